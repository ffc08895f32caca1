use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::{AudioNode, NodeId, NodePool};
use crate::error::{GatewayError, GatewayResult};

/// Owner of every configured node. Links and players only keep a [`NodeId`]
/// and resolve it here, so removing a node never leaves a dangling handle.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<Arc<AudioNode>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: AudioNode) -> GatewayResult<Arc<AudioNode>> {
        let mut nodes = self.nodes.write();
        let id = node.id();
        if nodes.iter().any(|n| n.id() == id) {
            return Err(GatewayError::DuplicateNode(id));
        }
        let node = Arc::new(node);
        nodes.push(Arc::clone(&node));
        info!("🎼 Registered audio node {}", node);
        Ok(node)
    }

    pub fn remove(&self, id: &NodeId) -> Option<Arc<AudioNode>> {
        let mut nodes = self.nodes.write();
        let position = nodes.iter().position(|n| &n.id() == id)?;
        let node = nodes.remove(position);
        node.set_available(false);
        info!("Removed audio node {}", node);
        Some(node)
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<AudioNode>> {
        self.nodes.read().iter().find(|n| &n.id() == id).cloned()
    }

    pub fn require(&self, id: &NodeId) -> GatewayResult<Arc<AudioNode>> {
        self.get(id)
            .ok_or_else(|| GatewayError::NodeNotFound(id.clone()))
    }

    /// Snapshot in registration order.
    pub fn all(&self) -> Vec<Arc<AudioNode>> {
        self.nodes.read().clone()
    }

    pub fn in_pool(&self, pool: NodePool) -> Vec<Arc<AudioNode>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.in_pool(pool))
            .cloned()
            .collect()
    }

    pub fn available(&self) -> Vec<Arc<AudioNode>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_available())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
