//! # Player Module
//!
//! Node-side playback state as the gateway sees it.
//!
//! - [`AudioPlayer`]: cached snapshot of a guild's player on a node
//! - [`PlayerUpdateBuilder`]: fluent partial update sent to a node
//! - [`filters::FilterBuilder`]: filter sets and equalizer presets
//! - [`track::Track`]: node issued playable unit

pub mod filters;
pub mod track;

use serenity::model::id::GuildId;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::balancer::region::VoiceRegion;
use crate::error::RestError;
use crate::node::{AudioNode, NodeId};
use crate::protocol::{
    Filters, Player, PlayerState, PlayerUpdate, PlayerUpdateTrack, ProtocolTrack, VoiceState,
};

pub use filters::{EqualizerPreset, FilterBuilder};
pub use track::{Track, TrackEndReason};

/// Last known state of a guild's player on a specific node.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPlayer {
    node: NodeId,
    inner: Player,
}

impl AudioPlayer {
    pub fn new(node: NodeId, inner: Player) -> Self {
        Self { node, inner }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    pub fn track(&self) -> Option<Track> {
        self.inner.track.clone().map(Track::from)
    }

    pub fn volume(&self) -> i32 {
        self.inner.volume
    }

    pub fn paused(&self) -> bool {
        self.inner.paused
    }

    pub fn state(&self) -> PlayerState {
        self.inner.state
    }

    pub fn voice_state(&self) -> &VoiceState {
        &self.inner.voice
    }

    pub fn filters(&self) -> &Filters {
        &self.inner.filters
    }

    /// Playback position in millis, extrapolated from the last reported
    /// state while playing and capped at the track length.
    pub fn position(&self) -> i64 {
        let Some(track) = &self.inner.track else {
            return 0;
        };
        let state = self.inner.state;
        if self.inner.paused {
            return state.position;
        }
        let elapsed = (now_millis() - state.time).max(0);
        (state.position + elapsed).min(track.info.length)
    }

    /// Region of the voice server the player is connected to.
    pub fn voice_region(&self) -> Option<VoiceRegion> {
        let endpoint = self.inner.voice.endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }
        Some(VoiceRegion::from_endpoint(endpoint))
    }

    /// Update replaying this player's full state on `node`.
    pub fn state_to_builder(&self, node: &Arc<AudioNode>) -> PlayerUpdateBuilder {
        let builder = node
            .create_or_update_player(self.guild_id())
            .set_position(self.position())
            .omit_end_time()
            .set_volume(self.inner.volume)
            .set_paused(self.inner.paused)
            .set_filters(self.inner.filters.clone())
            .set_voice_state(self.inner.voice.clone());
        match self.track() {
            Some(track) => builder.set_track(&track),
            None => builder.stop_track(),
        }
    }

    pub(crate) fn set_state(&mut self, state: PlayerState) {
        self.inner.state = state;
    }

    pub(crate) fn set_track(&mut self, track: Option<ProtocolTrack>) {
        self.inner.track = track;
    }
}

/// Partial player update bound to the node it will be sent to.
#[derive(Debug, Clone)]
pub struct PlayerUpdateBuilder {
    guild_id: GuildId,
    node: Arc<AudioNode>,
    update: PlayerUpdate,
    no_replace: bool,
}

impl PlayerUpdateBuilder {
    pub fn new(guild_id: GuildId, node: Arc<AudioNode>) -> Self {
        Self {
            guild_id,
            node,
            update: PlayerUpdate::default(),
            no_replace: false,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn node(&self) -> &Arc<AudioNode> {
        &self.node
    }

    pub fn update(&self) -> &PlayerUpdate {
        &self.update
    }

    pub fn set_track(mut self, track: &Track) -> Self {
        let user_data = track.raw_user_data();
        self.update.track = Some(PlayerUpdateTrack {
            encoded: Some(Some(track.encoded().to_string())),
            identifier: None,
            user_data: (!user_data.is_empty()).then(|| user_data.clone()),
        });
        self
    }

    /// Lets the node resolve and play `identifier` itself.
    pub fn set_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.update.track = Some(PlayerUpdateTrack {
            identifier: Some(identifier.into()),
            ..Default::default()
        });
        self
    }

    pub fn stop_track(mut self) -> Self {
        self.update.track = Some(PlayerUpdateTrack {
            encoded: Some(None),
            ..Default::default()
        });
        self
    }

    pub fn set_position(mut self, position: i64) -> Self {
        self.update.position = Some(position.max(0));
        self
    }

    /// `None` clears an end time set earlier.
    pub fn set_end_time(mut self, end_time: Option<i64>) -> Self {
        self.update.end_time = Some(end_time);
        self
    }

    pub fn omit_end_time(mut self) -> Self {
        self.update.end_time = None;
        self
    }

    pub fn set_volume(mut self, volume: i32) -> Self {
        self.update.volume = Some(volume.clamp(0, 1000));
        self
    }

    pub fn set_paused(mut self, paused: bool) -> Self {
        self.update.paused = Some(paused);
        self
    }

    pub fn set_filters(mut self, filters: Filters) -> Self {
        self.update.filters = Some(filters);
        self
    }

    pub fn set_voice_state(mut self, voice: VoiceState) -> Self {
        self.update.voice = Some(voice);
        self
    }

    /// Keep a track that is already playing instead of replacing it.
    pub fn set_no_replace(mut self, no_replace: bool) -> Self {
        self.no_replace = no_replace;
        self
    }

    /// Takes over every field of `other`; the target node stays this one's.
    pub fn apply_builder(mut self, other: &PlayerUpdateBuilder) -> Self {
        self.update = other.update.clone();
        self.no_replace = other.no_replace;
        self
    }

    pub async fn send(self) -> Result<AudioPlayer, RestError> {
        self.node
            .update_player(self.guild_id, &self.update, self.no_replace)
            .await
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::region::RegionGroup;
    use crate::node::{NodeConfig, NodePool};
    use crate::protocol::fixtures;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn node(name: &str) -> Arc<AudioNode> {
        let config = NodeConfig::builder(name, "http://127.0.0.1:2333")
            .balancer_setup(NodePool::Queued, RegionGroup::Europe)
            .build();
        Arc::new(AudioNode::new(config).unwrap())
    }

    fn player(endpoint: &str) -> AudioPlayer {
        let inner: Player = serde_json::from_value(fixtures::player_json(3, endpoint)).unwrap();
        AudioPlayer::new(NodeId::from("a"), inner)
    }

    #[test]
    fn test_voice_region() {
        assert_eq!(
            player("rotterdam12.discord.media:443").voice_region(),
            Some(VoiceRegion::Rotterdam)
        );
        assert_eq!(player("").voice_region(), None);
        assert_eq!(
            player("nowhere:443").voice_region(),
            Some(VoiceRegion::Unknown)
        );
    }

    #[test]
    fn test_position() {
        let mut player = player("rotterdam12.discord.media:443");
        assert_eq!(player.position(), 0);

        player.set_track(Some(fixtures::track("song", 0)));
        player.set_state(PlayerState {
            time: now_millis() - 5_000,
            position: 10_000,
            connected: true,
            ping: 10,
        });
        let position = player.position();
        assert!((15_000..16_000).contains(&position), "position: {position}");

        // capped at the track length
        player.set_state(PlayerState {
            time: 0,
            position: 10_000,
            connected: true,
            ping: 10,
        });
        assert_eq!(player.position(), 215_000);

        player.inner.paused = true;
        assert_eq!(player.position(), 10_000);
    }

    #[test]
    fn test_state_to_builder_replays_everything() {
        let mut player = player("milan4.discord.media:443");
        player.inner.paused = true;
        player.set_track(Some(fixtures::track("song", 0)));
        player.set_state(PlayerState {
            time: 0,
            position: 42_000,
            connected: true,
            ping: 1,
        });

        let target = node("b");
        let builder = player.state_to_builder(&target);
        assert_eq!(builder.node().name(), "b");

        assert_eq!(builder.update().filters.as_ref(), Some(player.filters()));

        let mut body = serde_json::to_value(builder.update()).unwrap();
        body.as_object_mut().unwrap().remove("filters");
        assert_eq!(
            body,
            json!({
                "track": { "encoded": "QAAAsong" },
                "position": 42_000,
                "volume": 80,
                "paused": true,
                "voice": { "token": "tok", "endpoint": "milan4.discord.media:443", "sessionId": "sess" }
            })
        );
    }

    #[test]
    fn test_apply_builder_keeps_own_target() {
        let source = node("a")
            .create_or_update_player(GuildId::new(3))
            .set_volume(2000)
            .set_end_time(None)
            .set_no_replace(true);
        let merged = node("b")
            .create_or_update_player(GuildId::new(3))
            .set_paused(true)
            .apply_builder(&source);

        assert_eq!(merged.node().name(), "b");
        assert_eq!(merged.update().volume, Some(1000));
        assert_eq!(merged.update().end_time, Some(None));
        assert_eq!(merged.update().paused, None);
        assert!(merged.no_replace);
    }
}
