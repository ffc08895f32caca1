use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use super::region::{RegionGroup, VoiceRegion};
use super::{NodeSnapshot, PenaltyProvider};
use crate::protocol::Stats;

/// Penalty that excludes a node from every practical selection.
pub const BLOCKED_PENALTY: i64 = i32::MAX as i64 - 1;

/// Minute buckets kept in a node's metric window.
const METRIC_WINDOW_MINUTES: usize = 100;

/// Prefers nodes whose region group matches the guild's voice region.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceRegionPenaltyProvider;

impl VoiceRegionPenaltyProvider {
    pub const NEIGHBOUR_PENALTY: i64 = 250;
    /// Either side unknown, both sides unknown included: nothing says the
    /// node is close.
    pub const UNKNOWN_PENALTY: i64 = 50;
    pub const FOREIGN_PENALTY: i64 = 1000;
}

impl PenaltyProvider for VoiceRegionPenaltyProvider {
    fn penalty(&self, node: &NodeSnapshot, region: Option<VoiceRegion>) -> i64 {
        let Some(region) = region else {
            return 0;
        };
        let wanted = region.group();
        match (node.region_group, wanted) {
            (group, wanted) if group == wanted && group != RegionGroup::Unknown => 0,
            (RegionGroup::Unknown, _) | (_, RegionGroup::Unknown) => Self::UNKNOWN_PENALTY,
            (group, wanted) if group.is_neighbour_of(wanted) => Self::NEIGHBOUR_PENALTY,
            _ => Self::FOREIGN_PENALTY,
        }
    }
}

/// Track lifecycle signals counted per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMetric {
    LoadAttempt,
    LoadFailed,
    TrackException,
    TrackStuck,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MetricCounts {
    load_attempts: i64,
    load_failures: i64,
    exceptions: i64,
    stuck: i64,
}

impl MetricCounts {
    fn bump(&mut self, metric: NodeMetric) {
        match metric {
            NodeMetric::LoadAttempt => self.load_attempts += 1,
            NodeMetric::LoadFailed => self.load_failures += 1,
            NodeMetric::TrackException => self.exceptions += 1,
            NodeMetric::TrackStuck => self.stuck += 1,
        }
    }

    fn merge(mut self, other: &MetricCounts) -> Self {
        self.load_attempts += other.load_attempts;
        self.load_failures += other.load_failures;
        self.exceptions += other.exceptions;
        self.stuck += other.stuck;
        self
    }
}

/// Accumulated penalty of a node: load from its last stats plus the track
/// failures seen during the last [`METRIC_WINDOW_MINUTES`] active minutes.
#[derive(Debug, Default)]
pub struct NodePenalties {
    window: Mutex<BTreeMap<u64, MetricCounts>>,
}

impl NodePenalties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, metric: NodeMetric) {
        self.record_in_minute(current_minute(), metric);
    }

    fn record_in_minute(&self, minute: u64, metric: NodeMetric) {
        let mut window = self.window.lock();
        window.entry(minute).or_default().bump(metric);
        while window.len() > METRIC_WINDOW_MINUTES {
            window.pop_first();
        }
    }

    /// Cleared when a node starts a fresh (non resumed) session.
    pub fn reset(&self) {
        self.window.lock().clear();
    }

    fn totals(&self) -> MetricCounts {
        self.window
            .lock()
            .values()
            .fold(MetricCounts::default(), |acc, counts| acc.merge(counts))
    }

    pub fn calculate_total(&self, available: bool, stats: Option<&Stats>, cached_playing: usize) -> i64 {
        let Some(stats) = stats.filter(|_| available) else {
            return BLOCKED_PENALTY;
        };
        let metrics = self.totals();
        if metrics.load_attempts > 0 && metrics.load_attempts == metrics.load_failures {
            return BLOCKED_PENALTY;
        }

        let player_penalty = (cached_playing as i64).max(i64::from(stats.playing_players));
        let cpu_penalty = (1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0) as i64;

        let (deficit_penalty, nulled_penalty) = match stats.frame_stats {
            Some(frames) if frames.deficit != -1 => (
                frame_curve(frames.deficit),
                frame_curve(frames.nulled).saturating_mul(2),
            ),
            _ => (0, 0),
        };

        let stuck_penalty = metrics.stuck * 100 - 100;
        let exception_penalty = metrics.exceptions * 10 - 10;
        let load_failed_penalty = if metrics.load_failures > 0 && metrics.load_attempts > 0 {
            metrics.load_failures / metrics.load_attempts
        } else {
            0
        };

        [
            cpu_penalty,
            deficit_penalty,
            nulled_penalty,
            stuck_penalty,
            exception_penalty,
            load_failed_penalty,
        ]
        .into_iter()
        .fold(player_penalty, i64::saturating_add)
    }
}

fn frame_curve(frames: i32) -> i64 {
    (1.03f64.powf(500.0 * (f64::from(frames) / 3000.0)) * 600.0 - 600.0) as i64
}

fn current_minute() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::protocol::{Cpu, FrameStats, Memory};
    use pretty_assertions::assert_eq;

    fn stats(playing: i32, system_load: f64, frames: Option<FrameStats>) -> Stats {
        Stats {
            players: playing,
            playing_players: playing,
            uptime: 1000,
            memory: Memory {
                free: 0,
                used: 0,
                allocated: 0,
                reservable: 0,
            },
            cpu: Cpu {
                cores: 4,
                system_load,
                lavalink_load: 0.0,
            },
            frame_stats: frames,
        }
    }

    fn snapshot(group: RegionGroup) -> NodeSnapshot {
        NodeSnapshot {
            id: NodeId::from("node"),
            available: true,
            accumulated_penalty: 0,
            region_group: group,
        }
    }

    #[test]
    fn test_region_penalty_scale() {
        let provider = VoiceRegionPenaltyProvider;
        let europe = snapshot(RegionGroup::Europe);

        assert_eq!(provider.penalty(&europe, None), 0);
        assert_eq!(provider.penalty(&europe, Some(VoiceRegion::Rotterdam)), 0);
        assert_eq!(
            provider.penalty(&europe, Some(VoiceRegion::Unknown)),
            VoiceRegionPenaltyProvider::UNKNOWN_PENALTY
        );
        assert_eq!(
            provider.penalty(&snapshot(RegionGroup::Unknown), Some(VoiceRegion::Rotterdam)),
            VoiceRegionPenaltyProvider::UNKNOWN_PENALTY
        );
        assert_eq!(
            provider.penalty(&snapshot(RegionGroup::Unknown), Some(VoiceRegion::Unknown)),
            VoiceRegionPenaltyProvider::UNKNOWN_PENALTY
        );

        let us = provider.penalty(&snapshot(RegionGroup::Us), Some(VoiceRegion::Rotterdam));
        let asia = provider.penalty(&snapshot(RegionGroup::Asia), Some(VoiceRegion::Rotterdam));
        assert!(us > 0);
        assert!(asia >= us);
    }

    #[test]
    fn test_blocked_without_stats_or_availability() {
        let penalties = NodePenalties::new();
        assert_eq!(penalties.calculate_total(true, None, 0), BLOCKED_PENALTY);
        assert_eq!(
            penalties.calculate_total(false, Some(&stats(0, 0.0, None)), 0),
            BLOCKED_PENALTY
        );
    }

    #[test]
    fn test_idle_node_penalty() {
        let penalties = NodePenalties::new();
        // no stuck tracks and no exceptions offset the base by -110
        assert_eq!(penalties.calculate_total(true, Some(&stats(0, 0.0, None)), 0), -110);
        assert_eq!(penalties.calculate_total(true, Some(&stats(3, 0.0, None)), 5), -105);
    }

    #[test]
    fn test_load_grows_penalty() {
        let penalties = NodePenalties::new();
        let idle = penalties.calculate_total(true, Some(&stats(0, 0.1, None)), 0);
        let busy = penalties.calculate_total(true, Some(&stats(0, 0.9, None)), 0);
        assert!(busy > idle);

        let frames = FrameStats {
            sent: 3000,
            nulled: 300,
            deficit: 300,
        };
        let choppy = penalties.calculate_total(true, Some(&stats(0, 0.1, Some(frames))), 0);
        assert!(choppy > idle);

        let unknown_deficit = FrameStats {
            sent: 3000,
            nulled: 300,
            deficit: -1,
        };
        assert_eq!(
            penalties.calculate_total(true, Some(&stats(0, 0.1, Some(unknown_deficit))), 0),
            idle
        );
    }

    #[test]
    fn test_every_load_failed_blocks_node() {
        let penalties = NodePenalties::new();
        penalties.record(NodeMetric::LoadAttempt);
        penalties.record(NodeMetric::LoadFailed);
        assert_eq!(
            penalties.calculate_total(true, Some(&stats(0, 0.0, None)), 0),
            BLOCKED_PENALTY
        );

        penalties.record(NodeMetric::LoadAttempt);
        assert!(penalties.calculate_total(true, Some(&stats(0, 0.0, None)), 0) < BLOCKED_PENALTY);

        penalties.reset();
        assert_eq!(penalties.calculate_total(true, Some(&stats(0, 0.0, None)), 0), -110);
    }

    #[test]
    fn test_window_drops_oldest_minutes() {
        let penalties = NodePenalties::new();
        penalties.record_in_minute(0, NodeMetric::TrackStuck);
        for minute in 1..=METRIC_WINDOW_MINUTES as u64 {
            penalties.record_in_minute(minute, NodeMetric::TrackException);
        }

        let totals = penalties.totals();
        assert_eq!(totals.stuck, 0);
        assert_eq!(totals.exceptions, METRIC_WINDOW_MINUTES as i64);
    }
}
