//! Wire models of the audio node v4 protocol.
//!
//! Covers the REST payloads (players, load results, errors) and the push
//! messages emitted over the node's event channel. Field names follow the
//! node's camelCase JSON; guild ids travel as snowflake strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serenity::model::id::GuildId;

use crate::player::track::TrackEndReason;

/// Guild ids arrive as strings (sometimes as numbers from older nodes).
pub(crate) mod snowflake {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use serenity::model::id::GuildId;
    use std::num::NonZeroU64;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GuildId, D::Error> {
        let value = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse::<u64>().map_err(D::Error::custom)?,
            Raw::Number(number) => number,
        };
        NonZeroU64::new(value)
            .map(GuildId::from)
            .ok_or_else(|| D::Error::custom("guild id cannot be zero"))
    }

    pub fn serialize<S: Serializer>(id: &GuildId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&id.get())
    }
}

// ============================================================================
// Player
// ============================================================================

/// Voice handshake forwarded from the chat gateway to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

impl VoiceState {
    pub fn new(
        token: impl Into<String>,
        endpoint: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            endpoint: endpoint.into(),
            session_id: session_id.into(),
        }
    }

    /// True while any part of the handshake is missing.
    pub fn is_empty(&self) -> bool {
        self.token.is_empty() || self.endpoint.is_empty() || self.session_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp (millis) of the report.
    pub time: i64,
    pub position: i64,
    pub connected: bool,
    /// -1 when not connected.
    pub ping: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    pub length: i64,
    pub is_stream: bool,
    pub position: i64,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolTrack {
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Map<String, Value>,
    #[serde(default)]
    pub user_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    #[serde(default)]
    pub track: Option<ProtocolTrack>,
    pub volume: i32,
    pub paused: bool,
    pub state: PlayerState,
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Filters,
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub band: u8,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Karaoke {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

impl Default for Karaoke {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timescale {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for Timescale {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// Shared shape of tremolo and vibrato.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Oscillation {
    pub frequency: f32,
    pub depth: f32,
}

impl Default for Oscillation {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Distortion {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rotation {
    pub rotation_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelMix {
    pub left_to_left: f32,
    pub left_to_right: f32,
    pub right_to_left: f32,
    pub right_to_right: f32,
}

impl Default for ChannelMix {
    fn default() -> Self {
        Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 0.0,
            right_to_right: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPass {
    pub smoothing: f32,
}

impl Default for LowPass {
    fn default() -> Self {
        Self { smoothing: 20.0 }
    }
}

/// Full filter set of a player. Absent entries are disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<Band>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Oscillation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Oscillation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub plugin_filters: Map<String, Value>,
}

// ============================================================================
// Player update (PATCH body)
// ============================================================================

/// Track part of a player update. `encoded: Some(None)` stops playback.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateTrack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Map<String, Value>>,
}

/// Partial player update. `None` fields are omitted from the request;
/// `end_time: Some(None)` clears a previously set end time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<PlayerUpdateTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

// ============================================================================
// Track loading
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// -1 when no track is selected.
    pub selected_track: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: Map<String, Value>,
    pub tracks: Vec<ProtocolTrack>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyData {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(ProtocolTrack),
    Playlist(PlaylistData),
    Search(Vec<ProtocolTrack>),
    Empty(EmptyData),
    Error(TrackException),
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorResponse {
    pub timestamp: i64,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub trace: Option<String>,
}

// ============================================================================
// Push messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: i64,
    pub used: i64,
    pub allocated: i64,
    pub reservable: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: i32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i32,
    pub nulled: i32,
    /// -1 when the node could not compute it.
    pub deficit: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub players: i32,
    pub playing_players: i32,
    pub uptime: i64,
    pub memory: Memory,
    pub cpu: Cpu,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyMessage {
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateMessage {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub state: PlayerState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartPayload {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub track: ProtocolTrack,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndPayload {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub track: ProtocolTrack,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionPayload {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub track: ProtocolTrack,
    pub exception: TrackException,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckPayload {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub track: ProtocolTrack,
    pub threshold_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedPayload {
    #[serde(with = "snowflake")]
    pub guild_id: GuildId,
    pub code: i32,
    pub reason: String,
    pub by_remote: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum EmittedEvent {
    #[serde(rename = "TrackStartEvent")]
    TrackStart(TrackStartPayload),
    #[serde(rename = "TrackEndEvent")]
    TrackEnd(TrackEndPayload),
    #[serde(rename = "TrackExceptionEvent")]
    TrackException(TrackExceptionPayload),
    #[serde(rename = "TrackStuckEvent")]
    TrackStuck(TrackStuckPayload),
    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed(WebSocketClosedPayload),
}

impl EmittedEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackStart(e) => e.guild_id,
            Self::TrackEnd(e) => e.guild_id,
            Self::TrackException(e) => e.guild_id,
            Self::TrackStuck(e) => e.guild_id,
            Self::WebSocketClosed(e) => e.guild_id,
        }
    }
}

/// Anything a node pushes over its event channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Message {
    Ready(ReadyMessage),
    Stats(Stats),
    PlayerUpdate(PlayerUpdateMessage),
    Event(EmittedEvent),
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn track_json(title: &str, position: i64) -> Value {
        serde_json::json!({
            "encoded": format!("QAAA{title}"),
            "info": {
                "identifier": format!("id-{title}"),
                "isSeekable": true,
                "author": "Some Artist",
                "length": 215_000,
                "isStream": false,
                "position": position,
                "title": title,
                "uri": format!("https://example.com/{title}"),
                "artworkUrl": null,
                "isrc": null,
                "sourceName": "http"
            },
            "pluginInfo": {},
            "userData": {}
        })
    }

    pub fn track(title: &str, position: i64) -> ProtocolTrack {
        serde_json::from_value(track_json(title, position)).expect("valid track fixture")
    }

    pub fn player_json(guild_id: u64, endpoint: &str) -> Value {
        serde_json::json!({
            "guildId": guild_id.to_string(),
            "track": null,
            "volume": 80,
            "paused": false,
            "state": { "time": 1_700_000_000_000i64, "position": 0, "connected": true, "ping": 20 },
            "voice": { "token": "tok", "endpoint": endpoint, "sessionId": "sess" },
            "filters": { "timescale": { "speed": 1.2, "pitch": 1.0, "rate": 1.0 } }
        })
    }
}
