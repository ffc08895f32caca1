//! Domain events published by the gateway client.
//!
//! Every push message of a node and every track resolution result becomes
//! exactly one [`ClientEvent`], stamped with the node that produced it and,
//! when the message concerns a guild, the guild id.

use async_trait::async_trait;
use serde_json::{Map, Value};
use serenity::model::id::GuildId;

use crate::node::NodeId;
use crate::player::{Track, TrackEndReason};
use crate::protocol::{
    Cpu, EmittedEvent, FrameStats, LoadResult, Memory, Message, PlayerState, PlaylistInfo,
    TrackException,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub node: NodeId,
    pub guild_id: Option<GuildId>,
    pub kind: ClientEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEventKind {
    Ready {
        resumed: bool,
        session_id: String,
    },
    Stats {
        frame_stats: Option<FrameStats>,
        players: i32,
        playing_players: i32,
        uptime: i64,
        memory: Memory,
        cpu: Cpu,
    },
    PlayerUpdate {
        state: PlayerState,
    },
    TrackStart {
        track: Track,
    },
    TrackEnd {
        track: Track,
        reason: TrackEndReason,
    },
    TrackException {
        track: Track,
        exception: TrackException,
    },
    TrackStuck {
        track: Track,
        threshold_ms: i64,
    },
    WebSocketClosed {
        code: i32,
        reason: String,
        by_remote: bool,
    },
    TrackLoaded {
        track: Track,
    },
    PlaylistLoaded {
        info: PlaylistInfo,
        plugin_info: Map<String, Value>,
        tracks: Vec<Track>,
    },
    SearchResult {
        tracks: Vec<Track>,
    },
    /// Resolution finished without matches.
    NoMatches,
    LoadFailed {
        exception: TrackException,
    },
}

impl ClientEvent {
    pub fn from_message(node: NodeId, message: Message) -> Self {
        let (guild_id, kind) = match message {
            Message::Ready(ready) => (
                None,
                ClientEventKind::Ready {
                    resumed: ready.resumed,
                    session_id: ready.session_id,
                },
            ),
            Message::Stats(stats) => (
                None,
                ClientEventKind::Stats {
                    frame_stats: stats.frame_stats,
                    players: stats.players,
                    playing_players: stats.playing_players,
                    uptime: stats.uptime,
                    memory: stats.memory,
                    cpu: stats.cpu,
                },
            ),
            Message::PlayerUpdate(update) => (
                Some(update.guild_id),
                ClientEventKind::PlayerUpdate {
                    state: update.state,
                },
            ),
            Message::Event(event) => {
                let guild_id = event.guild_id();
                let kind = match event {
                    EmittedEvent::TrackStart(e) => ClientEventKind::TrackStart {
                        track: e.track.into(),
                    },
                    EmittedEvent::TrackEnd(e) => ClientEventKind::TrackEnd {
                        track: e.track.into(),
                        reason: e.reason,
                    },
                    EmittedEvent::TrackException(e) => ClientEventKind::TrackException {
                        track: e.track.into(),
                        exception: e.exception,
                    },
                    EmittedEvent::TrackStuck(e) => ClientEventKind::TrackStuck {
                        track: e.track.into(),
                        threshold_ms: e.threshold_ms,
                    },
                    EmittedEvent::WebSocketClosed(e) => ClientEventKind::WebSocketClosed {
                        code: e.code,
                        reason: e.reason,
                        by_remote: e.by_remote,
                    },
                };
                (Some(guild_id), kind)
            }
        };
        Self {
            node,
            guild_id,
            kind,
        }
    }

    pub fn from_load_result(node: NodeId, result: LoadResult) -> Self {
        let kind = match result {
            LoadResult::Track(track) => ClientEventKind::TrackLoaded {
                track: track.into(),
            },
            LoadResult::Playlist(playlist) => ClientEventKind::PlaylistLoaded {
                info: playlist.info,
                plugin_info: playlist.plugin_info,
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
            },
            LoadResult::Search(tracks) => ClientEventKind::SearchResult {
                tracks: tracks.into_iter().map(Track::from).collect(),
            },
            LoadResult::Empty(_) => ClientEventKind::NoMatches,
            LoadResult::Error(exception) => ClientEventKind::LoadFailed { exception },
        };
        Self {
            node,
            guild_id: None,
            kind,
        }
    }
}

/// Upstream consumer of track lifecycle events (queue scheduler, radio, ...).
/// Every hook defaults to doing nothing.
#[async_trait]
pub trait AudioNodeListener: Send + Sync {
    async fn on_track_start(&self, _guild_id: GuildId, _track: &Track) {}

    async fn on_track_end(&self, _guild_id: GuildId, _track: &Track, _reason: TrackEndReason) {}

    async fn on_track_stuck(&self, _guild_id: GuildId, _track: &Track, _threshold_ms: i64) {}

    async fn on_track_exception(
        &self,
        _guild_id: GuildId,
        _track: &Track,
        _exception: &TrackException,
    ) {
    }

    async fn on_closed_connection(&self, _guild_id: GuildId, _code: i32, _reason: &str) {}
}

/// Routes one event to the matching listener hook.
pub async fn dispatch(listener: &dyn AudioNodeListener, event: &ClientEvent) {
    let Some(guild_id) = event.guild_id else {
        return;
    };
    match &event.kind {
        ClientEventKind::TrackStart { track } => listener.on_track_start(guild_id, track).await,
        ClientEventKind::TrackEnd { track, reason } => {
            listener.on_track_end(guild_id, track, *reason).await
        }
        ClientEventKind::TrackStuck {
            track,
            threshold_ms,
        } => listener.on_track_stuck(guild_id, track, *threshold_ms).await,
        ClientEventKind::TrackException { track, exception } => {
            listener.on_track_exception(guild_id, track, exception).await
        }
        ClientEventKind::WebSocketClosed { code, reason, .. } => {
            listener.on_closed_connection(guild_id, *code, reason).await
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{fixtures, Severity};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn translate(raw: Value) -> ClientEvent {
        let message: Message = serde_json::from_value(raw).unwrap();
        ClientEvent::from_message(NodeId::from("node-a"), message)
    }

    #[test]
    fn test_ready_and_stats() {
        let event = translate(json!({ "op": "ready", "resumed": false, "sessionId": "abc" }));
        assert_eq!(event.node, NodeId::from("node-a"));
        assert_eq!(event.guild_id, None);
        assert_eq!(
            event.kind,
            ClientEventKind::Ready {
                resumed: false,
                session_id: "abc".to_string()
            }
        );

        let event = translate(json!({
            "op": "stats",
            "players": 4,
            "playingPlayers": 2,
            "uptime": 123456,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 8, "systemLoad": 0.5, "lavalinkLoad": 0.25 },
            "frameStats": null
        }));
        match event.kind {
            ClientEventKind::Stats {
                frame_stats,
                players,
                playing_players,
                uptime,
                cpu,
                ..
            } => {
                assert_eq!(frame_stats, None);
                assert_eq!((players, playing_players, uptime), (4, 2, 123456));
                assert_eq!(cpu.cores, 8);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_guild_scoped_events() {
        let event = translate(json!({
            "op": "playerUpdate",
            "guildId": "11",
            "state": { "time": 1, "position": 2, "connected": true, "ping": 3 }
        }));
        assert_eq!(event.guild_id, Some(GuildId::new(11)));
        assert!(matches!(
            event.kind,
            ClientEventKind::PlayerUpdate { state } if state.connected && state.position == 2
        ));

        let event = translate(json!({
            "op": "event",
            "type": "TrackStuckEvent",
            "guildId": "12",
            "track": fixtures::track_json("stuck", 500),
            "thresholdMs": 10_000
        }));
        assert_eq!(event.guild_id, Some(GuildId::new(12)));
        match event.kind {
            ClientEventKind::TrackStuck {
                track,
                threshold_ms,
            } => {
                assert_eq!(track.title(), "stuck");
                assert_eq!(threshold_ms, 10_000);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = translate(json!({
            "op": "event",
            "type": "WebSocketClosedEvent",
            "guildId": "13",
            "code": 4006,
            "reason": "Session is no longer valid.",
            "byRemote": true
        }));
        assert_eq!(
            event.kind,
            ClientEventKind::WebSocketClosed {
                code: 4006,
                reason: "Session is no longer valid.".to_string(),
                by_remote: true
            }
        );
    }

    #[test]
    fn test_load_results() {
        let node = NodeId::from("node-a");
        let result: LoadResult = serde_json::from_value(json!({
            "loadType": "playlist",
            "data": {
                "info": { "name": "mix", "selectedTrack": -1 },
                "pluginInfo": {},
                "tracks": [fixtures::track_json("one", 0), fixtures::track_json("two", 0)]
            }
        }))
        .unwrap();
        match ClientEvent::from_load_result(node.clone(), result).kind {
            ClientEventKind::PlaylistLoaded { info, tracks, .. } => {
                assert_eq!(info.name, "mix");
                assert_eq!(tracks.len(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let failed = LoadResult::Error(TrackException {
            message: Some("blocked".to_string()),
            severity: Severity::Common,
            cause: "geo".to_string(),
        });
        let event = ClientEvent::from_load_result(node, failed);
        assert!(matches!(
            event.kind,
            ClientEventKind::LoadFailed { exception } if exception.severity == Severity::Common
        ));
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioNodeListener for Recorder {
        async fn on_track_end(&self, guild_id: GuildId, track: &Track, reason: TrackEndReason) {
            self.calls
                .lock()
                .push(format!("end {} {} {:?}", guild_id, track.title(), reason));
        }

        async fn on_closed_connection(&self, guild_id: GuildId, code: i32, _reason: &str) {
            self.calls.lock().push(format!("closed {guild_id} {code}"));
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_hooks() {
        let recorder = Recorder::default();

        let end = translate(json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "5",
            "track": fixtures::track_json("song", 0),
            "reason": "finished"
        }));
        let start = translate(json!({
            "op": "event",
            "type": "TrackStartEvent",
            "guildId": "5",
            "track": fixtures::track_json("song", 0)
        }));
        let closed = translate(json!({
            "op": "event",
            "type": "WebSocketClosedEvent",
            "guildId": "5",
            "code": 4014,
            "reason": "",
            "byRemote": true
        }));

        for event in [&end, &start, &closed] {
            dispatch(&recorder, event).await;
        }
        assert_eq!(
            *recorder.calls.lock(),
            vec!["end 5 song Finished".to_string(), "closed 5 4014".to_string()]
        );
    }
}
