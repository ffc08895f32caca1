//! # Audio Client
//!
//! Orchestrates nodes, links and guild pools:
//!
//! - one [`Link`] per guild, bound to a node picked by the [`LoadBalancer`]
//! - node push messages applied to the cached state and republished as
//!   [`ClientEvent`]s
//! - live migration of links when a node goes away, when a node comes back
//!   (orphan adoption) or when a guild switches pool
//!
//! The push channel itself (socket, reconnects) lives outside of this crate;
//! its owner feeds [`AudioClient::handle_node_message`] and
//! [`AudioClient::on_node_disconnected`].

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::balancer::{region::VoiceRegion, LoadBalancer, NodeMetric};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult, SelectionError};
use crate::event::{self, AudioNodeListener, ClientEvent};
use crate::link::{Link, LinkState};
use crate::node::{AudioNode, NodeConfig, NodeId, NodePool, NodeRegistry};
use crate::player::TrackEndReason;
use crate::protocol::{EmittedEvent, Message, VoiceState};

/// Voice close codes after which the guild's player and link are dropped.
const FATAL_VOICE_CLOSE_CODES: [i32; 2] = [4004, 4009];

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct AudioClient {
    bot_id: UserId,
    instance_name: String,
    registry: Arc<NodeRegistry>,
    balancer: LoadBalancer,
    links: DashMap<GuildId, Arc<Link>>,
    guild_pools: DashMap<GuildId, NodePool>,
    voice_triggers: DashMap<GuildId, oneshot::Sender<()>>,
    publisher: broadcast::Sender<ClientEvent>,
    transfer_delay: Duration,
    shutdown: CancellationToken,
}

impl AudioClient {
    pub fn new(bot_token: &str, instance_name: &str, transfer_delay: Duration) -> GatewayResult<Self> {
        let (publisher, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            bot_id: user_id_from_token(bot_token)?,
            instance_name: instance_name.to_string(),
            registry: Arc::new(NodeRegistry::new()),
            balancer: LoadBalancer::new(),
            links: DashMap::new(),
            guild_pools: DashMap::new(),
            voice_triggers: DashMap::new(),
            publisher,
            transfer_delay,
            shutdown: CancellationToken::new(),
        })
    }

    /// Client with every node of `config` registered.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let client = Self::new(
            &config.discord_token,
            &config.instance_name,
            config.node_transfer_delay,
        )?;
        client.add_nodes(config.nodes.iter().cloned())?;
        info!(
            "🎼 Audio client '{}' ready with {} nodes",
            client.instance_name,
            client.registry.len()
        );
        Ok(client)
    }

    pub fn bot_id(&self) -> UserId {
        self.bot_id
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    pub fn add_node(&self, config: NodeConfig) -> GatewayResult<Arc<AudioNode>> {
        let node = AudioNode::new(config)?;
        self.registry.register(node)
    }

    pub fn add_nodes(&self, configs: impl IntoIterator<Item = NodeConfig>) -> GatewayResult<()> {
        for config in configs {
            self.add_node(config)?;
        }
        Ok(())
    }

    /// Moves the node's links elsewhere, then forgets the node.
    pub fn remove_node(&self, id: &NodeId) -> bool {
        let Some(node) = self.registry.get(id) else {
            debug!("Unable to find node {}, nothing to remove", id);
            return false;
        };
        self.on_node_disconnected(&node);
        self.registry.remove(id).is_some()
    }

    pub fn nodes(&self, only_available: bool) -> Vec<Arc<AudioNode>> {
        if only_available {
            self.registry.available()
        } else {
            self.registry.all()
        }
    }

    pub fn players_count_for_guilds(&self, guild_ids: &[GuildId]) -> usize {
        self.registry
            .available()
            .iter()
            .map(|node| {
                node.cached_guilds()
                    .iter()
                    .filter(|guild| guild_ids.contains(guild))
                    .count()
            })
            .sum()
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub fn get_link_if_cached(&self, guild_id: GuildId) -> Option<Arc<Link>> {
        self.links.get(&guild_id).map(|link| Arc::clone(link.value()))
    }

    /// Existing link of the guild, else a new one bound to the best node of
    /// the guild's pool.
    pub fn get_or_create_link(
        &self,
        guild_id: GuildId,
        region: Option<VoiceRegion>,
    ) -> GatewayResult<Arc<Link>> {
        match self.links.entry(guild_id) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let pool = self
                    .guild_node_pool(guild_id)
                    .ok_or(GatewayError::PoolNotAssigned(guild_id))?;
                let nodes = self.registry.in_pool(pool);
                let node = self.balancer.select_node(&nodes, region, guild_id)?;
                let link = Arc::new(Link::new(
                    guild_id,
                    node.id(),
                    Arc::clone(&self.registry),
                    self.transfer_delay,
                ));
                info!("🔗 Created link {}", link);
                Ok(Arc::clone(entry.insert(link).value()))
            }
        }
    }

    pub fn remove_destroyed_link(&self, guild_id: GuildId) -> Option<Arc<Link>> {
        let (_, link) = self.links.remove(&guild_id)?;
        link.cancel_transfers();
        debug!("Removed link {}", link);
        Some(link)
    }

    /// Destroys the guild's player on its node and forgets the link.
    pub async fn destroy_link(&self, guild_id: GuildId) -> GatewayResult<()> {
        let link = self
            .get_link_if_cached(guild_id)
            .ok_or(GatewayError::LinkNotFound(guild_id))?;
        link.destroy().await?;
        self.remove_destroyed_link(guild_id);
        Ok(())
    }

    pub fn links_count(&self) -> usize {
        self.links.len()
    }

    pub fn update_guild_node_pool(&self, guild_id: GuildId, pool: NodePool) {
        self.guild_pools.insert(guild_id, pool);
    }

    pub fn guild_node_pool(&self, guild_id: GuildId) -> Option<NodePool> {
        self.guild_pools.get(&guild_id).map(|pool| *pool)
    }

    // ------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------

    /// Reacts to a node losing its push channel.
    pub fn on_node_disconnected(&self, node: &Arc<AudioNode>) {
        node.set_available(false);
        if self.shutdown.is_cancelled() {
            return;
        }
        warn!("⚠️ Audio node {} disconnected", node);

        let pool_nodes = self.registry.in_pool(node.pool());
        let affected: Vec<Arc<Link>> = self
            .links
            .iter()
            .filter(|link| link.selected_node_id() == node.id())
            .map(|link| Arc::clone(link.value()))
            .collect();

        if pool_nodes.len() == 1 && pool_nodes[0].id() == node.id() {
            for link in self.links.iter() {
                if link.selected_pool() == Some(node.pool()) {
                    link.update_state(LinkState::Disconnected);
                }
            }
            return;
        }
        if pool_nodes.iter().all(|n| !n.is_available()) {
            for link in &affected {
                link.update_state(LinkState::Disconnected);
            }
            return;
        }

        for link in affected {
            let region = link.cached_player().and_then(|player| player.voice_region());
            match self
                .balancer
                .select_node(&pool_nodes, region, link.guild_id())
            {
                Ok(new_node) => {
                    info!("🔄 Moving {} to node {}", link, new_node);
                    link.transfer_node(new_node);
                }
                Err(e) => {
                    link.update_state(LinkState::Disconnected);
                    warn!("(link: {}) No node to move to: {}", link, e);
                }
            }
        }
    }

    /// Adopts links whose player is stranded on an unavailable node of the
    /// same pool. Links already served by an available node stay put, even
    /// when a stale entry is left on a dead node.
    pub fn transfer_orphans_to(&self, node: &Arc<AudioNode>) {
        if !node.is_available() {
            return;
        }
        let orphans = self
            .registry
            .all()
            .into_iter()
            .filter(|n| !n.is_available())
            .flat_map(|n| n.cached_guilds());

        for guild_id in orphans {
            let Some(link) = self.get_link_if_cached(guild_id) else {
                continue;
            };
            let has_voice = link
                .cached_player()
                .is_some_and(|player| !player.voice_state().is_empty());
            let stranded = !self
                .registry
                .get(&link.selected_node_id())
                .is_some_and(|current| current.is_available());
            if has_voice
                && stranded
                && link.selected_node_id() != node.id()
                && link.selected_pool() == Some(node.pool())
            {
                info!("🔄 Adopting orphaned {} on {}", link, node);
                link.transfer_node(node);
            }
        }
    }

    /// Moves the guild to `pool`. Runs `on_complete` right away when the
    /// link already sits in that pool.
    pub fn transfer_to_pool<F>(
        &self,
        guild_id: GuildId,
        pool: NodePool,
        on_complete: F,
    ) -> GatewayResult<Option<JoinHandle<()>>>
    where
        F: FnOnce(Arc<AudioNode>) + Send + 'static,
    {
        let link = self
            .get_link_if_cached(guild_id)
            .ok_or(GatewayError::LinkNotFound(guild_id))?;
        let current = link.selected_node()?;
        if current.in_pool(pool) {
            info!("Node {} is already in pool {}, skipping transfer", current, pool);
            on_complete(current);
            return Ok(None);
        }

        let pool_nodes = self.registry.in_pool(pool);
        let region = link.cached_player().and_then(|player| player.voice_region());
        let new_node = self
            .balancer
            .select_node(&pool_nodes, region, guild_id)
            .map_err(|e| match e {
                SelectionError::NoNodesConfigured => GatewayError::NoNodeInPool(pool),
                other => other.into(),
            })?;
        Ok(Some(link.transfer_to_pool(new_node, pool, on_complete)))
    }

    // ------------------------------------------------------------------
    // Voice gateway
    // ------------------------------------------------------------------

    /// New voice server for the guild: bind a link near the endpoint and
    /// hand the handshake to its node.
    pub async fn on_voice_server_update(
        &self,
        guild_id: GuildId,
        token: &str,
        endpoint: &str,
        session_id: &str,
    ) -> GatewayResult<()> {
        let region = VoiceRegion::from_endpoint(endpoint);
        let link = self.get_or_create_link(guild_id, Some(region))?;
        debug!("(link: {}) Voice server update in region {}", link, region);

        link.update_node_voice_state(VoiceState::new(token, endpoint, session_id))
            .await;
        self.fire_voice_trigger(guild_id);
        Ok(())
    }

    /// Returns whether the guild is still connected. A bot that left its
    /// channel with no connected player tears the link down.
    pub async fn on_voice_state_update(&self, guild_id: GuildId, channel: Option<ChannelId>) -> bool {
        let Some(link) = self.get_link_if_cached(guild_id) else {
            return channel.is_some();
        };
        let player_connected = link
            .cached_player()
            .is_some_and(|player| player.state().connected);

        if channel.is_none() && !player_connected {
            link.update_state(LinkState::Disconnected);
            if let Err(e) = link.destroy().await {
                debug!("(link: {}) Player destroy skipped: {}", link, e);
            }
            self.remove_destroyed_link(guild_id);
            return false;
        }
        link.update_state(LinkState::Connected);
        true
    }

    /// Armed before asking the chat gateway to connect; fires on the next
    /// voice server update of the guild.
    pub(crate) fn arm_voice_trigger(&self, guild_id: GuildId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.voice_triggers.insert(guild_id, tx);
        rx
    }

    pub(crate) fn fire_voice_trigger(&self, guild_id: GuildId) {
        if let Some((_, trigger)) = self.voice_triggers.remove(&guild_id) {
            let _ = trigger.send(());
        }
    }

    // ------------------------------------------------------------------
    // Tracks & events
    // ------------------------------------------------------------------

    /// Resolves `identifier` on the guild's node and publishes the result.
    pub async fn load_item(&self, guild_id: GuildId, identifier: &str) -> GatewayResult<ClientEvent> {
        let node = match self.get_link_if_cached(guild_id) {
            Some(link) => link.selected_node()?,
            None => {
                let pool = self
                    .guild_node_pool(guild_id)
                    .ok_or(GatewayError::PoolNotAssigned(guild_id))?;
                let nodes = self.registry.in_pool(pool);
                Arc::clone(self.balancer.select_node(&nodes, None, guild_id)?)
            }
        };
        let result = node.load_item(identifier).await?;
        let mut event = ClientEvent::from_load_result(node.id(), result);
        event.guild_id = Some(guild_id);
        self.publish(event.clone());
        Ok(event)
    }

    /// Applies one raw push message of `node_id` and publishes its event.
    pub async fn handle_node_message(&self, node_id: &NodeId, raw: &str) -> GatewayResult<ClientEvent> {
        let node = self.registry.require(node_id)?;
        let message: Message = serde_json::from_str(raw)?;

        match &message {
            Message::Ready(ready) => {
                if !ready.resumed {
                    node.penalties().reset();
                }
                node.mark_ready(&ready.session_id);
                self.replay_players(&node);
                self.transfer_orphans_to(&node);
            }
            Message::Stats(stats) => node.set_stats(stats.clone()),
            Message::PlayerUpdate(update) => {
                node.with_cached_player(update.guild_id, |player| player.set_state(update.state));
                if let Some(link) = self.get_link_if_cached(update.guild_id) {
                    if link.selected_node_id() == node.id() {
                        link.update_state(if update.state.connected {
                            LinkState::Connected
                        } else {
                            LinkState::Disconnected
                        });
                    }
                }
            }
            Message::Event(event) => self.apply_track_event(&node, event).await,
        }

        let event = ClientEvent::from_message(node.id(), message);
        self.publish(event.clone());
        Ok(event)
    }

    async fn apply_track_event(&self, node: &Arc<AudioNode>, event: &EmittedEvent) {
        match event {
            EmittedEvent::TrackStart(e) => {
                node.penalties().record(NodeMetric::LoadAttempt);
                node.with_cached_player(e.guild_id, |player| player.set_track(Some(e.track.clone())));
            }
            EmittedEvent::TrackEnd(e) => {
                if e.reason == TrackEndReason::LoadFailed {
                    node.penalties().record(NodeMetric::LoadFailed);
                }
                node.with_cached_player(e.guild_id, |player| player.set_track(None));
            }
            EmittedEvent::TrackException(_) => node.penalties().record(NodeMetric::TrackException),
            EmittedEvent::TrackStuck(_) => node.penalties().record(NodeMetric::TrackStuck),
            EmittedEvent::WebSocketClosed(e) => {
                debug!(
                    "Voice connection of guild {} closed with code {}: {} (by remote: {})",
                    e.guild_id, e.code, e.reason, e.by_remote
                );
                if FATAL_VOICE_CLOSE_CODES.contains(&e.code) {
                    self.destroy_player_and_link(node, e.guild_id).await;
                }
            }
        }
    }

    async fn destroy_player_and_link(&self, node: &AudioNode, guild_id: GuildId) {
        match node.destroy_player(guild_id).await {
            Ok(()) => {
                self.remove_destroyed_link(guild_id);
            }
            Err(e) => error!(
                "❌ Could not destroy player of guild {} on {}: {}",
                guild_id, node, e
            ),
        }
    }

    /// Re-sends every cached player whose guild is still served by `node`
    /// and already had a voice connection. Entries of guilds served
    /// elsewhere are dropped.
    fn replay_players(&self, node: &Arc<AudioNode>) {
        let mut replays = Vec::new();
        for player in node.cached_players() {
            let served_here = self
                .get_link_if_cached(player.guild_id())
                .is_some_and(|link| link.selected_node_id() == node.id());
            if !served_here {
                debug!("Dropping stale player of guild {} on {}", player.guild_id(), node);
                node.remove_cached_player(player.guild_id());
            } else if !player.voice_state().is_empty() {
                replays.push(player.state_to_builder(node).set_no_replace(false));
            }
        }
        if replays.is_empty() {
            return;
        }
        let node_name = node.to_string();
        debug!("Restoring {} players on {}", replays.len(), node_name);
        tokio::spawn(async move {
            let results = join_all(replays.into_iter().map(|replay| replay.send())).await;
            for result in results {
                if let Err(e) = result {
                    warn!("Could not restore player on {}: {}", node_name, e);
                }
            }
        });
    }

    fn publish(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.publisher.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.publisher.subscribe()
    }

    /// Feeds every published event to `listener` until the client closes.
    pub fn spawn_listener(&self, listener: Arc<dyn AudioNodeListener>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => received,
                };
                match received {
                    Ok(event) => event::dispatch(listener.as_ref(), &event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Audio listener lagging, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stops listeners and in-flight transfers. Links and nodes are left
    /// as they are.
    pub fn close(&self) {
        self.shutdown.cancel();
        for link in self.links.iter() {
            link.cancel_transfers();
        }
        for node in self.registry.all() {
            node.set_available(false);
        }
        info!("Closing audio client '{}'", self.instance_name);
    }
}

/// The first segment of a bot token is the base64 encoded bot user id.
fn user_id_from_token(token: &str) -> GatewayResult<UserId> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(GatewayError::InvalidBotToken(
            "expected three dot separated segments".to_string(),
        ));
    }
    let segment = parts[0].trim_end_matches('=');
    let decoded = STANDARD_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD.decode(parts[0]))
        .map_err(|e| GatewayError::InvalidBotToken(e.to_string()))?;
    let id = String::from_utf8(decoded)
        .map_err(|e| GatewayError::InvalidBotToken(e.to_string()))?
        .parse::<u64>()
        .map_err(|e| GatewayError::InvalidBotToken(e.to_string()))?;
    if id == 0 {
        return Err(GatewayError::InvalidBotToken("bot id cannot be zero".to_string()));
    }
    Ok(UserId::new(id))
}
