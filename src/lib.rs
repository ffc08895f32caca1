//! # Open Music Gateway
//!
//! Control plane between the chat gateway and a fleet of remote audio nodes.
//! Picks a node per guild, keeps one [`Link`] per guild and migrates live
//! sessions between nodes and node pools without dropping playback.

pub mod balancer;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod link;
pub mod node;
pub mod player;
pub mod protocol;

pub use balancer::{region::VoiceRegion, LoadBalancer, PenaltyProvider};
pub use client::AudioClient;
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult, RestError, SelectionError};
pub use event::{AudioNodeListener, ClientEvent, ClientEventKind};
pub use gateway::{GatewayVoiceStateInterceptor, SessionController, VoiceGatewayListener};
pub use link::{Link, LinkState};
pub use node::{AudioNode, NodeConfig, NodeId, NodePool};
pub use player::{AudioPlayer, PlayerUpdateBuilder, Track, TrackEndReason};
