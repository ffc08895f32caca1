//! # Node Module
//!
//! Remote audio nodes and everything the gateway keeps about them.
//!
//! - [`NodeConfig`]: identity, transport endpoints, credentials and the
//!   balancer setup (pool + region group) of a node
//! - [`AudioNode`]: runtime view of a node (availability, session id, last
//!   stats, cached per-guild players) and its guarded player RPCs
//! - [`registry::NodeRegistry`]: owner of every [`AudioNode`]; links only
//!   keep a [`NodeId`] and look the node up here
//! - [`rest::NodeRestClient`]: the HTTP client behind the RPCs

pub mod registry;
pub mod rest;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info};

use crate::balancer::penalty::NodePenalties;
use crate::balancer::region::RegionGroup;
use crate::balancer::{NodeCandidate, NodeSnapshot};
use crate::error::{GatewayError, RestError};
use crate::player::{AudioPlayer, PlayerUpdateBuilder};
use crate::protocol::{LoadResult, PlayerUpdate, Stats};

pub use registry::NodeRegistry;
pub use rest::NodeRestClient;

/// Stable identity of a node (its configured name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical group of nodes. A guild plays from exactly one pool at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodePool {
    /// Queued tracks requested by users.
    Queued,
    /// Long running radio streams.
    Continuous,
}

impl FromStr for NodePool {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "CONTINUOUS" => Ok(Self::Continuous),
            other => Err(GatewayError::UnknownPool(other.to_string())),
        }
    }
}

impl fmt::Display for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("QUEUED"),
            Self::Continuous => f.write_str("CONTINUOUS"),
        }
    }
}

/// Static definition of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub pool: NodePool,
    pub region_group: RegionGroup,
    pub password: String,
    pub http_url: String,
    pub proxy_verification_header: String,
    pub proxy_verification_token: Option<String>,
    pub http_timeout: Duration,
}

impl NodeConfig {
    pub fn builder(name: &str, http_url: &str) -> NodeConfigBuilder {
        NodeConfigBuilder {
            config: NodeConfig {
                name: name.to_string(),
                pool: NodePool::Queued,
                region_group: RegionGroup::Unknown,
                password: String::new(),
                http_url: http_url.to_string(),
                proxy_verification_header: "X-Proxy-Verification".to_string(),
                proxy_verification_token: None,
                http_timeout: Duration::from_secs(5),
            },
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from(self.name.as_str())
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pool: {})", self.name, self.pool)
    }
}

pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn password(mut self, password: &str) -> Self {
        self.config.password = password.to_string();
        self
    }

    pub fn balancer_setup(mut self, pool: NodePool, region_group: RegionGroup) -> Self {
        self.config.pool = pool;
        self.config.region_group = region_group;
        self
    }

    pub fn proxy_verification(mut self, header: &str, token: &str) -> Self {
        self.config.proxy_verification_header = header.to_string();
        self.config.proxy_verification_token = Some(token.to_string());
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

/// Runtime view of a single remote audio node.
pub struct AudioNode {
    config: NodeConfig,
    rest: NodeRestClient,
    available: AtomicBool,
    session_id: RwLock<Option<String>>,
    stats: RwLock<Option<Stats>>,
    players: DashMap<GuildId, AudioPlayer>,
    penalties: NodePenalties,
}

impl AudioNode {
    /// New nodes start unavailable until their event channel reports ready.
    pub fn new(config: NodeConfig) -> Result<Self, RestError> {
        let rest = NodeRestClient::new(&config)?;
        Ok(Self {
            config,
            rest,
            available: AtomicBool::new(false),
            session_id: RwLock::new(None),
            stats: RwLock::new(None),
            players: DashMap::new(),
            penalties: NodePenalties::new(),
        })
    }

    pub fn id(&self) -> NodeId {
        self.config.id()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn pool(&self) -> NodePool {
        self.config.pool
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn in_pool(&self, pool: NodePool) -> bool {
        self.config.pool == pool
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Called when the node's event channel reports ready.
    pub(crate) fn mark_ready(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_string());
        self.set_available(true);
        info!("✅ Node {} is ready with session id: {}", self, session_id);
    }

    pub fn stats(&self) -> Option<Stats> {
        self.stats.read().clone()
    }

    pub(crate) fn set_stats(&self, stats: Stats) {
        *self.stats.write() = Some(stats);
    }

    pub fn penalties(&self) -> &NodePenalties {
        &self.penalties
    }

    pub fn get_cached_player(&self, guild_id: GuildId) -> Option<AudioPlayer> {
        self.players.get(&guild_id).map(|p| p.value().clone())
    }

    pub fn cached_players(&self) -> Vec<AudioPlayer> {
        self.players.iter().map(|p| p.value().clone()).collect()
    }

    pub fn cached_guilds(&self) -> Vec<GuildId> {
        self.players.iter().map(|p| *p.key()).collect()
    }

    pub(crate) fn cache_player(&self, player: AudioPlayer) {
        self.players.insert(player.guild_id(), player);
    }

    pub(crate) fn remove_cached_player(&self, guild_id: GuildId) -> Option<AudioPlayer> {
        self.players.remove(&guild_id).map(|(_, player)| player)
    }

    /// Mutates the cached player in place (state / track updates from events).
    pub(crate) fn with_cached_player(&self, guild_id: GuildId, f: impl FnOnce(&mut AudioPlayer)) {
        if let Some(mut player) = self.players.get_mut(&guild_id) {
            f(player.value_mut());
        }
    }

    /// Cached player, else the node's; a missing player is created empty.
    pub async fn get_player(self: &Arc<Self>, guild_id: GuildId) -> Result<AudioPlayer, RestError> {
        if let Some(player) = self.get_cached_player(guild_id) {
            return Ok(player);
        }
        let session_id = self.guarded_session()?;
        match self.rest.get_player(&session_id, guild_id).await {
            Ok(player) => {
                let player = AudioPlayer::new(self.id(), player);
                self.cache_player(player.clone());
                Ok(player)
            }
            Err(e) if e.is_not_found() => {
                debug!("No player for guild {} on {}, creating one", guild_id, self);
                self.create_or_update_player(guild_id).send().await
            }
            Err(e) => Err(e),
        }
    }

    pub fn create_or_update_player(self: &Arc<Self>, guild_id: GuildId) -> PlayerUpdateBuilder {
        PlayerUpdateBuilder::new(guild_id, Arc::clone(self))
    }

    pub async fn update_player(
        &self,
        guild_id: GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<AudioPlayer, RestError> {
        let session_id = self.guarded_session()?;
        let player = self
            .rest
            .update_player(&session_id, guild_id, update, no_replace)
            .await?;
        let player = AudioPlayer::new(self.id(), player);
        self.cache_player(player.clone());
        Ok(player)
    }

    pub async fn destroy_player(&self, guild_id: GuildId) -> Result<(), RestError> {
        let session_id = self.guarded_session()?;
        self.rest.destroy_player(&session_id, guild_id).await?;
        self.remove_cached_player(guild_id);
        Ok(())
    }

    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult, RestError> {
        if !self.is_available() {
            return Err(RestError::NodeUnavailable(self.id()));
        }
        self.rest.load_item(identifier).await
    }

    fn guarded_session(&self) -> Result<String, RestError> {
        if !self.is_available() {
            return Err(RestError::NodeUnavailable(self.id()));
        }
        self.session_id()
            .ok_or_else(|| RestError::MissingSession(self.id()))
    }
}

impl NodeCandidate for AudioNode {
    fn snapshot(&self) -> NodeSnapshot {
        let available = self.is_available();
        let stats = self.stats();
        let playing = self
            .players
            .iter()
            .filter(|p| p.value().track().is_some() && !p.value().paused())
            .count();
        NodeSnapshot {
            id: self.id(),
            available,
            accumulated_penalty: self.penalties.calculate_total(available, stats.as_ref(), playing),
            region_group: self.config.region_group,
        }
    }
}

impl fmt::Display for AudioNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.config, f)
    }
}

impl fmt::Debug for AudioNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioNode")
            .field("name", &self.config.name)
            .field("pool", &self.config.pool)
            .field("available", &self.is_available())
            .field("players", &self.players.len())
            .finish()
    }
}
