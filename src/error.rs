use serenity::model::id::GuildId;
use thiserror::Error;

use crate::node::{NodeId, NodePool};

/// Failures of the load balancer. Never retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no audio nodes are configured")]
    NoNodesConfigured,

    /// Single-node deployments must not fall back to an unhealthy node.
    #[error("the only configured audio node ({0}) is unavailable")]
    SoleNodeUnavailable(NodeId),

    #[error("none of the {configured} configured audio nodes is available")]
    NoAvailableNode { configured: usize },
}

/// Failures of a single call against a node's REST surface.
#[derive(Debug, Error)]
pub enum RestError {
    /// The node answered with a non-2xx status.
    #[error("node responded {status} on {path}: {message}")]
    Remote {
        status: u16,
        message: String,
        path: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed node response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("audio node {0} is not available")]
    NodeUnavailable(NodeId),

    #[error("audio node {0} has no session yet")]
    MissingSession(NodeId),
}

impl RestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Umbrella error of the gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("audio node {0} is not registered")]
    NodeNotFound(NodeId),

    #[error("audio node {0} is already registered")]
    DuplicateNode(NodeId),

    #[error("no link exists for guild {0}")]
    LinkNotFound(GuildId),

    #[error("guild {0} has no node pool assigned")]
    PoolNotAssigned(GuildId),

    #[error("no audio node found in pool {0}")]
    NoNodeInPool(NodePool),

    #[error("unknown node pool: {0}")]
    UnknownPool(String),

    #[error("invalid node definition '{definition}': {reason}")]
    InvalidNodeDefinition { definition: String, reason: String },

    #[error("bot token is not valid: {0}")]
    InvalidBotToken(String),

    #[error("unrecognised node message: {0}")]
    Protocol(#[from] serde_json::Error),
}

impl GatewayError {
    /// Conditions shown to users as "audio service temporarily unavailable".
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Selection(_)
                | Self::NoNodeInPool(_)
                | Self::NodeNotFound(_)
                | Self::Rest(RestError::NodeUnavailable(_))
                | Self::Rest(RestError::MissingSession(_))
                | Self::Rest(RestError::Transport(_))
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
