//! Voice gateway adapter.
//!
//! Bridges the chat gateway (serenity) and the audio client: tracks the
//! bot's own voice sessions, forwards voice server / voice state updates and
//! drives pool switches that need a fresh voice connection.

use dashmap::DashMap;
use serenity::{
    async_trait,
    client::{Context, EventHandler},
    model::{
        event::VoiceServerUpdateEvent,
        gateway::Ready,
        id::{ChannelId, GuildId, UserId},
        voice::VoiceState as GatewayVoiceState,
    },
};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::AudioClient;
use crate::node::{AudioNode, NodePool};

/// How long a pool switch waits for the chat gateway's voice server update.
const VOICE_SERVER_TIMEOUT: Duration = Duration::from_secs(15);

/// Voice connection controls of the chat gateway.
#[async_trait]
pub trait GatewayVoiceStateInterceptor: Send + Sync {
    /// `None` when the bot's voice state is not known.
    async fn in_audio_channel(&self, guild_id: GuildId) -> Option<bool>;

    async fn make_connect(&self, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<()>;

    async fn disconnect(&self, guild_id: GuildId) -> anyhow::Result<()>;
}

/// serenity handler feeding voice events to the [`AudioClient`].
pub struct VoiceGatewayListener {
    client: Arc<AudioClient>,
    sessions: DashMap<GuildId, String>,
}

impl VoiceGatewayListener {
    pub fn new(client: Arc<AudioClient>) -> Self {
        Self {
            client,
            sessions: DashMap::new(),
        }
    }

    /// Voice session id of the bot in the guild, if connected.
    pub fn session_id(&self, guild_id: GuildId) -> Option<String> {
        self.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    pub async fn handle_voice_state(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: Option<ChannelId>,
        session_id: &str,
    ) {
        if user_id != self.client.bot_id() {
            return;
        }
        match channel_id {
            Some(_) => {
                self.sessions.insert(guild_id, session_id.to_string());
            }
            None => {
                self.sessions.remove(&guild_id);
            }
        }
        let connected = self.client.on_voice_state_update(guild_id, channel_id).await;
        debug!("Voice state of guild {} updated (connected: {})", guild_id, connected);
    }

    pub async fn handle_voice_server(&self, guild_id: GuildId, token: &str, endpoint: Option<&str>) {
        let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) else {
            debug!("Voice server of guild {} is being reallocated", guild_id);
            return;
        };
        let Some(session_id) = self.session_id(guild_id) else {
            warn!("Voice server update for guild {} before any voice state", guild_id);
            return;
        };
        if let Err(e) = self
            .client
            .on_voice_server_update(guild_id, token, endpoint, &session_id)
            .await
        {
            warn!("❌ Could not bind voice server of guild {}: {}", guild_id, e);
        }
    }
}

#[async_trait]
impl EventHandler for VoiceGatewayListener {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("✅ {} connected to the chat gateway", ready.user.name);
    }

    async fn voice_state_update(
        &self,
        _ctx: Context,
        _old: Option<GatewayVoiceState>,
        new: GatewayVoiceState,
    ) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        self.handle_voice_state(guild_id, new.user_id, new.channel_id, &new.session_id)
            .await;
    }

    async fn voice_server_update(&self, _ctx: Context, event: VoiceServerUpdateEvent) {
        let Some(guild_id) = event.guild_id else {
            return;
        };
        self.handle_voice_server(guild_id, &event.token, event.endpoint.as_deref())
            .await;
    }
}

/// Entry point of upper layers that need a guild moved to a node pool.
pub struct SessionController {
    client: Arc<AudioClient>,
    interceptor: Arc<dyn GatewayVoiceStateInterceptor>,
}

impl SessionController {
    pub fn new(client: Arc<AudioClient>, interceptor: Arc<dyn GatewayVoiceStateInterceptor>) -> Self {
        Self {
            client,
            interceptor,
        }
    }

    /// Switches the guild to `pool`. Connects the bot to `author_channel`
    /// first when it is not in a voice channel yet; the transfer itself runs
    /// once the voice server is known. Returns false when the pool has no
    /// available node.
    pub async fn load_and_transfer_to_pool<F>(
        &self,
        guild_id: GuildId,
        pool: NodePool,
        author_channel: Option<ChannelId>,
        on_transfer: F,
    ) -> bool
    where
        F: FnOnce(Arc<AudioNode>) + Send + 'static,
    {
        self.client.update_guild_node_pool(guild_id, pool);
        debug!("Switching guild {} to pool {}", guild_id, pool);

        if !self.client.nodes(true).iter().any(|node| node.in_pool(pool)) {
            return false;
        }
        let trigger = self.client.arm_voice_trigger(guild_id);

        if self.interceptor.in_audio_channel(guild_id).await == Some(false) {
            if let Some(channel_id) = author_channel {
                if let Err(e) = self.interceptor.make_connect(guild_id, channel_id).await {
                    warn!("Could not join channel {} in guild {}: {}", channel_id, guild_id, e);
                }
                debug!("Joining channel {} in guild {}", channel_id, guild_id);
            }
        } else {
            debug!("Already in a voice channel of guild {}, voice server unchanged", guild_id);
            self.client.fire_voice_trigger(guild_id);
        }

        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            match timeout(VOICE_SERVER_TIMEOUT, trigger).await {
                Ok(Ok(())) => {
                    if let Err(e) = client.transfer_to_pool(guild_id, pool, on_transfer) {
                        warn!("Pool transfer of guild {} failed: {}", guild_id, e);
                    }
                }
                Ok(Err(_)) => debug!("Pool transfer trigger of guild {} replaced", guild_id),
                Err(_) => warn!(
                    "No voice server update for guild {} within {:?}",
                    guild_id, VOICE_SERVER_TIMEOUT
                ),
            }
        });
        true
    }

    pub async fn disconnect_with_audio_channel(&self, guild_id: GuildId) -> anyhow::Result<()> {
        self.interceptor.disconnect(guild_id).await?;
        debug!("Left the voice channel of guild {}", guild_id);
        Ok(())
    }
}
