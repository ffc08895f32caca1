//! # Balancer Module
//!
//! Picks the audio node that should serve a guild.
//!
//! ## Scoring
//!
//! Every available candidate gets `accumulated_penalty + Σ provider penalties`
//! and the lowest score wins. Ties go to the node listed first, so the same
//! snapshot always yields the same node.
//!
//! Providers are pluggable ([`PenaltyProvider`]); the built in
//! [`penalty::VoiceRegionPenaltyProvider`] prefers nodes close to the
//! guild's voice region.

pub mod penalty;
pub mod region;

use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::debug;

use crate::error::SelectionError;
use crate::node::NodeId;
use region::{RegionGroup, VoiceRegion};

pub use penalty::{NodeMetric, NodePenalties, VoiceRegionPenaltyProvider, BLOCKED_PENALTY};

/// Point-in-time view of a node as seen by the balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub available: bool,
    pub accumulated_penalty: i64,
    pub region_group: RegionGroup,
}

/// Anything the balancer can rank.
pub trait NodeCandidate {
    fn snapshot(&self) -> NodeSnapshot;
}

impl NodeCandidate for NodeSnapshot {
    fn snapshot(&self) -> NodeSnapshot {
        self.clone()
    }
}

impl<T: NodeCandidate + ?Sized> NodeCandidate for Arc<T> {
    fn snapshot(&self) -> NodeSnapshot {
        (**self).snapshot()
    }
}

/// Pure scoring strategy; must not have side effects.
#[cfg_attr(test, mockall::automock)]
pub trait PenaltyProvider: Send + Sync {
    fn penalty(&self, node: &NodeSnapshot, region: Option<VoiceRegion>) -> i64;
}

pub struct LoadBalancer {
    providers: RwLock<Vec<Arc<dyn PenaltyProvider>>>,
}

impl LoadBalancer {
    /// Balancer without any provider.
    pub fn empty() -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
        }
    }

    /// Balancer with the voice region provider registered.
    pub fn new() -> Self {
        let balancer = Self::empty();
        balancer.add_provider(Arc::new(VoiceRegionPenaltyProvider));
        balancer
    }

    pub fn add_provider(&self, provider: Arc<dyn PenaltyProvider>) {
        self.providers.write().push(provider);
    }

    /// Returns false when the provider was never registered.
    pub fn remove_provider(&self, provider: &Arc<dyn PenaltyProvider>) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|p| !Arc::ptr_eq(p, provider));
        providers.len() != before
    }

    pub fn providers_count(&self) -> usize {
        self.providers.read().len()
    }

    pub fn select_node<'a, N: NodeCandidate>(
        &self,
        nodes: &'a [N],
        region: Option<VoiceRegion>,
        guild_id: GuildId,
    ) -> Result<&'a N, SelectionError> {
        if let [node] = nodes {
            let snapshot = node.snapshot();
            if !snapshot.available {
                return Err(SelectionError::SoleNodeUnavailable(snapshot.id));
            }
            debug!("Guild {} served by sole node {}", guild_id, snapshot.id);
            return Ok(node);
        }
        if nodes.is_empty() {
            return Err(SelectionError::NoNodesConfigured);
        }

        let providers = self.providers.read();
        let selected = nodes
            .iter()
            .map(|node| (node, node.snapshot()))
            .filter(|(_, snapshot)| snapshot.available)
            .map(|(node, snapshot)| {
                let score = providers
                    .iter()
                    .map(|provider| provider.penalty(&snapshot, region))
                    .fold(snapshot.accumulated_penalty, i64::saturating_add);
                (node, snapshot.id, score)
            })
            .min_by_key(|(_, _, score)| *score);

        match selected {
            Some((node, id, score)) => {
                debug!(
                    "Selected node {} for guild {} (region: {:?}, score: {})",
                    id, guild_id, region, score
                );
                Ok(node)
            }
            None => Err(SelectionError::NoAvailableNode {
                configured: nodes.len(),
            }),
        }
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(name: &str, available: bool, penalty: i64, group: RegionGroup) -> NodeSnapshot {
        NodeSnapshot {
            id: NodeId::from(name),
            available,
            accumulated_penalty: penalty,
            region_group: group,
        }
    }

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn ids(node: &NodeSnapshot) -> &str {
        node.id.as_str()
    }

    #[test]
    fn test_lowest_penalty_wins() {
        let balancer = LoadBalancer::new();
        let nodes = vec![
            node("a", true, 5, RegionGroup::Europe),
            node("b", true, 10, RegionGroup::Europe),
            node("c", false, 0, RegionGroup::Europe),
        ];
        let selected = balancer.select_node(&nodes, None, guild()).unwrap();
        assert_eq!(ids(selected), "a");
    }

    #[test]
    fn test_sole_node_must_be_available() {
        let balancer = LoadBalancer::new();
        let nodes = vec![node("a", false, 0, RegionGroup::Europe)];
        assert_eq!(
            balancer.select_node(&nodes, None, guild()),
            Err(SelectionError::SoleNodeUnavailable(NodeId::from("a")))
        );

        let nodes = vec![node("a", true, BLOCKED_PENALTY, RegionGroup::Europe)];
        assert_eq!(ids(balancer.select_node(&nodes, None, guild()).unwrap()), "a");
    }

    #[test]
    fn test_no_available_node() {
        let balancer = LoadBalancer::new();
        let nodes = vec![
            node("a", false, 0, RegionGroup::Europe),
            node("b", false, 0, RegionGroup::Us),
            node("c", false, 0, RegionGroup::Asia),
        ];
        assert_eq!(
            balancer.select_node(&nodes, None, guild()),
            Err(SelectionError::NoAvailableNode { configured: 3 })
        );

        let empty: Vec<NodeSnapshot> = Vec::new();
        assert_eq!(
            balancer.select_node(&empty, None, guild()),
            Err(SelectionError::NoNodesConfigured)
        );
    }

    #[test]
    fn test_ties_resolve_to_first_listed() {
        let balancer = LoadBalancer::new();
        let nodes = vec![
            node("b", true, 7, RegionGroup::Us),
            node("a", true, 7, RegionGroup::Us),
        ];
        for _ in 0..10 {
            assert_eq!(ids(balancer.select_node(&nodes, None, guild()).unwrap()), "b");
        }
    }

    #[test]
    fn test_region_outweighs_small_load_difference() {
        let balancer = LoadBalancer::new();
        let nodes = vec![
            node("us", true, 0, RegionGroup::Us),
            node("eu", true, 40, RegionGroup::Europe),
        ];
        let selected = balancer
            .select_node(&nodes, Some(VoiceRegion::Frankfurt), guild())
            .unwrap();
        assert_eq!(ids(selected), "eu");

        let selected = balancer.select_node(&nodes, None, guild()).unwrap();
        assert_eq!(ids(selected), "us");
    }

    #[test]
    fn test_every_provider_is_summed() {
        let balancer = LoadBalancer::empty();

        let mut first = MockPenaltyProvider::new();
        first
            .expect_penalty()
            .returning(|node, _| if node.id.as_str() == "a" { 100 } else { 0 });
        let mut second = MockPenaltyProvider::new();
        second
            .expect_penalty()
            .withf(|_, region| *region == Some(VoiceRegion::Milan))
            .returning(|node, _| if node.id.as_str() == "b" { 150 } else { 0 });

        balancer.add_provider(Arc::new(first));
        balancer.add_provider(Arc::new(second));

        let nodes = vec![
            node("a", true, 0, RegionGroup::Europe),
            node("b", true, 0, RegionGroup::Europe),
            node("c", true, 120, RegionGroup::Europe),
        ];
        // a = 100, b = 150, c = 120
        let selected = balancer
            .select_node(&nodes, Some(VoiceRegion::Milan), guild())
            .unwrap();
        assert_eq!(ids(selected), "a");
    }

    #[test]
    fn test_unavailable_nodes_are_never_scored() {
        let balancer = LoadBalancer::empty();
        let mut provider = MockPenaltyProvider::new();
        provider
            .expect_penalty()
            .withf(|node, _| node.available)
            .times(2)
            .return_const(0i64);
        balancer.add_provider(Arc::new(provider));

        let nodes = vec![
            node("a", false, 0, RegionGroup::Europe),
            node("b", true, 0, RegionGroup::Europe),
            node("c", true, 0, RegionGroup::Europe),
        ];
        assert_eq!(ids(balancer.select_node(&nodes, None, guild()).unwrap()), "b");
    }

    #[test]
    fn test_remove_provider() {
        let balancer = LoadBalancer::empty();
        let provider: Arc<dyn PenaltyProvider> = Arc::new(VoiceRegionPenaltyProvider);
        balancer.add_provider(Arc::clone(&provider));
        assert_eq!(balancer.providers_count(), 1);

        assert!(balancer.remove_provider(&provider));
        assert!(!balancer.remove_provider(&provider));
        assert_eq!(balancer.providers_count(), 0);
    }
}
