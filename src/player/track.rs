use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::protocol::{ProtocolTrack, TrackInfo};

/// Why a node stopped playing a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether the scheduler may advance to the next queued track.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// Playable unit issued by a node: an opaque encoded blob plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    inner: ProtocolTrack,
}

impl Track {
    pub fn encoded(&self) -> &str {
        &self.inner.encoded
    }

    pub fn info(&self) -> &TrackInfo {
        &self.inner.info
    }

    pub fn title(&self) -> &str {
        &self.inner.info.title
    }

    pub fn author(&self) -> &str {
        &self.inner.info.author
    }

    pub fn uri(&self) -> Option<&str> {
        self.inner.info.uri.as_deref()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.inner.info.length.max(0) as u64)
    }

    /// Last position the node reported for this track, in millis.
    pub fn position(&self) -> i64 {
        self.inner.info.position
    }

    pub fn is_stream(&self) -> bool {
        self.inner.info.is_stream
    }

    pub fn plugin_info(&self) -> &Map<String, Value> {
        &self.inner.plugin_info
    }

    pub fn raw_user_data(&self) -> &Map<String, Value> {
        &self.inner.user_data
    }

    /// Decodes the metadata attached by whoever queued the track.
    pub fn user_data<T: DeserializeOwned>(&self) -> Option<T> {
        if self.inner.user_data.is_empty() {
            return None;
        }
        serde_json::from_value(Value::Object(self.inner.user_data.clone())).ok()
    }

    /// Attaches sender metadata. Non-object values are wrapped under `value`.
    pub fn set_user_data<T: Serialize>(&mut self, data: &T) -> Result<(), serde_json::Error> {
        self.inner.user_data = match serde_json::to_value(data)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Ok(())
    }

    /// Logically new copy of the track starting from the beginning, used to
    /// requeue it (e.g. loop).
    pub fn make_clone(&self) -> Track {
        let mut inner = self.inner.clone();
        inner.info.position = 0;
        Track { inner }
    }

    pub fn into_protocol(self) -> ProtocolTrack {
        self.inner
    }
}

impl From<ProtocolTrack> for Track {
    fn from(inner: ProtocolTrack) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fixtures;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Requester {
        user_id: u64,
        name: String,
    }

    #[test]
    fn test_make_clone_resets_position() {
        let track = Track::from(fixtures::track("anthem", 93_000));
        let cloned = track.make_clone();

        assert_eq!(cloned.position(), 0);
        assert_eq!(cloned.title(), track.title());
        assert_eq!(cloned.author(), track.author());
        assert_eq!(cloned.uri(), track.uri());
        assert_eq!(cloned.duration(), track.duration());
        assert_eq!(cloned.encoded(), track.encoded());
        assert_eq!(track.position(), 93_000);
    }

    #[test]
    fn test_user_data_survives_clone() {
        let mut track = Track::from(fixtures::track("anthem", 0));
        assert_eq!(track.user_data::<Requester>(), None);

        let requester = Requester {
            user_id: 99,
            name: "dj".to_string(),
        };
        track.set_user_data(&requester).unwrap();

        assert_eq!(track.make_clone().user_data::<Requester>(), Some(requester));
    }

    #[test]
    fn test_end_reasons_that_advance_queue() {
        assert!(TrackEndReason::Finished.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(!TrackEndReason::Cleanup.may_start_next());
    }
}
