use parking_lot::{Mutex, RwLock};
use serenity::model::id::GuildId;
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::GatewayResult;
use crate::node::{AudioNode, NodeId, NodePool, NodeRegistry};
use crate::player::{AudioPlayer, PlayerUpdateBuilder};
use crate::protocol::VoiceState;

/// Connection state of a guild's link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("DISCONNECTED"),
            Self::Connecting => f.write_str("CONNECTING"),
            Self::Connected => f.write_str("CONNECTED"),
        }
    }
}

/// Per-guild session: which node serves the guild and how far the voice
/// connection got. The node is referenced by id and resolved through the
/// registry on every use.
pub struct Link {
    guild_id: GuildId,
    node: RwLock<NodeId>,
    registry: Arc<NodeRegistry>,
    state: watch::Sender<LinkState>,
    transfer_delay: Duration,
    transfers: Mutex<CancellationToken>,
}

impl Link {
    pub fn new(
        guild_id: GuildId,
        node: NodeId,
        registry: Arc<NodeRegistry>,
        transfer_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            guild_id,
            node: RwLock::new(node),
            registry,
            state,
            transfer_delay,
            transfers: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub(crate) fn update_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("(link: {}) State changed: {} -> {}", self, previous, state);
        }
    }

    pub fn selected_node_id(&self) -> NodeId {
        self.node.read().clone()
    }

    /// Fails when the node was removed from the registry.
    pub fn selected_node(&self) -> GatewayResult<Arc<AudioNode>> {
        self.registry.require(&self.node.read())
    }

    pub fn selected_pool(&self) -> Option<NodePool> {
        self.selected_node().ok().map(|node| node.pool())
    }

    pub fn cached_player(&self) -> Option<AudioPlayer> {
        self.selected_node()
            .ok()
            .and_then(|node| node.get_cached_player(self.guild_id))
    }

    pub async fn player(&self) -> GatewayResult<AudioPlayer> {
        Ok(self.selected_node()?.get_player(self.guild_id).await?)
    }

    pub fn create_or_update_player(&self) -> GatewayResult<PlayerUpdateBuilder> {
        Ok(self.selected_node()?.create_or_update_player(self.guild_id))
    }

    /// Destroys the guild's player on the selected node. Dropping the link
    /// itself is up to the owner.
    pub async fn destroy(&self) -> GatewayResult<()> {
        self.cancel_transfers();
        Ok(self.selected_node()?.destroy_player(self.guild_id).await?)
    }

    /// Aborts every in-flight transfer task of this link, including the
    /// HTTP calls they are awaiting.
    pub fn cancel_transfers(&self) {
        let mut token = self.transfers.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Pushes a fresh voice handshake to the selected node. Does nothing while
    /// that node is unavailable.
    pub async fn update_node_voice_state(&self, voice: VoiceState) {
        let node = match self.selected_node() {
            Ok(node) if node.is_available() => node,
            _ => {
                debug!("(link: {}) Node unavailable, voice state not sent", self);
                return;
            }
        };
        self.update_state(LinkState::Connecting);

        let result = node
            .create_or_update_player(self.guild_id)
            .set_voice_state(voice.clone())
            .send()
            .await;
        match result {
            Ok(_) => debug!("(link: {}) Updated voice state: {}", self, voice.endpoint),
            Err(e) => {
                self.update_state(LinkState::Disconnected);
                error!(
                    "(link: {}) Failed to update voice state to: {}. Cause: {}",
                    self, voice.endpoint, e
                );
            }
        }
    }

    /// Moves the guild to `new_node` within the same pool.
    ///
    /// The link points at `new_node` as soon as this returns. When the old
    /// node had a cached player, the returned task replicates it on the new
    /// node, waits for the new voice connection (bounded by the transfer
    /// delay) and then drops the old node's cache entry.
    pub fn transfer_node(self: &Arc<Self>, new_node: &Arc<AudioNode>) -> Option<JoinHandle<()>> {
        let old_id = self.switch_node(new_node.id());
        self.update_state(LinkState::Connecting);

        let old_node = self.registry.get(&old_id)?;
        let player = old_node.get_cached_player(self.guild_id)?;
        let replica = player.state_to_builder(new_node);

        let link = Arc::clone(self);
        let new_node = Arc::clone(new_node);
        Some(self.spawn_transfer(async move {
            match replica.send().await {
                Ok(_) => {
                    link.wait_until_connected().await;
                    old_node.remove_cached_player(link.guild_id);
                    info!("🔄 (link: {}) Transferred player from {}", link, old_node);
                }
                Err(e) => {
                    link.update_state(LinkState::Disconnected);
                    error!(
                        "(link: {}) Failed to transfer player to new node: {}. Cause: {}",
                        link, new_node, e
                    );
                }
            }
        }))
    }

    /// Moves the guild to `new_node` of another pool, carrying volume, voice
    /// state and filters over. `on_complete` runs once the new player exists.
    pub fn transfer_to_pool<F>(
        self: &Arc<Self>,
        new_node: &Arc<AudioNode>,
        new_pool: NodePool,
        on_complete: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Arc<AudioNode>) + Send + 'static,
    {
        let old_id = self.switch_node(new_node.id());
        self.update_state(LinkState::Connecting);

        let mut builder = new_node.create_or_update_player(self.guild_id);
        if let Some(old_node) = self.registry.get(&old_id) {
            if let Some(player) = old_node.get_cached_player(self.guild_id) {
                builder = builder
                    .set_volume(player.volume())
                    .set_voice_state(player.voice_state().clone())
                    .set_filters(player.filters().clone());
            }
            let guild_id = self.guild_id;
            tokio::spawn(async move {
                if let Err(e) = old_node.destroy_player(guild_id).await {
                    warn!(
                        "Could not destroy player of guild {} on {}: {}",
                        guild_id, old_node, e
                    );
                }
            });
        }

        let link = Arc::clone(self);
        let new_node = Arc::clone(new_node);
        self.spawn_transfer(async move {
            match builder.send().await {
                Ok(_) => {
                    link.wait_until_connected().await;
                    info!("🔄 (link: {}) Moved to node pool {}", link, new_pool);
                    on_complete(new_node);
                }
                Err(e) => {
                    link.update_state(LinkState::Disconnected);
                    error!(
                        "(link: {}) Failed to transfer player to new node pool: {}. Cause: {}",
                        link, new_pool, e
                    );
                }
            }
        })
    }

    fn switch_node(&self, new_id: NodeId) -> NodeId {
        std::mem::replace(&mut *self.node.write(), new_id)
    }

    /// Resolves on CONNECTED or after the transfer delay, whichever is first.
    async fn wait_until_connected(&self) {
        let mut state = self.state.subscribe();
        let connected = state.wait_for(|s| *s == LinkState::Connected);
        if timeout(self.transfer_delay, connected).await.is_err() {
            debug!(
                "(link: {}) No voice connection after {:?}, finalizing anyway",
                self, self.transfer_delay
            );
        }
    }

    fn spawn_transfer<F>(&self, work: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.transfers.lock().clone();
        let guild_id = self.guild_id;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Transfer of guild {} cancelled", guild_id),
                _ = work => {}
            }
        })
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.guild_id == other.guild_id
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guild_id.hash(state);
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (guild: {})", self.node.read(), self.guild_id)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("guild_id", &self.guild_id)
            .field("node", &*self.node.read())
            .field("state", &self.state())
            .finish()
    }
}
