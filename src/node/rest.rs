use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serenity::model::id::GuildId;
use tracing::debug;

use super::{NodeConfig, NodeId};
use crate::error::RestError;
use crate::protocol::{ErrorResponse, LoadResult, Player, PlayerUpdate};

/// Thin async client for a node's v4 REST surface.
///
/// Every call resolves exactly once, to a value or a [`RestError`]. Dropping
/// the returned future (or the task awaiting it) aborts the underlying HTTP
/// call; nothing is retried here.
#[derive(Debug, Clone)]
pub struct NodeRestClient {
    node: NodeId,
    http: Client,
    base_url: String,
    password: String,
    proxy_verification: Option<(String, String)>,
}

impl NodeRestClient {
    pub fn new(config: &NodeConfig) -> Result<Self, RestError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("open-music-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            node: config.id(),
            http,
            base_url: config.http_url.trim_end_matches('/').to_string(),
            password: config.password.clone(),
            proxy_verification: config
                .proxy_verification_token
                .clone()
                .map(|token| (config.proxy_verification_header.clone(), token)),
        })
    }

    pub async fn get_player(&self, session_id: &str, guild_id: GuildId) -> Result<Player, RestError> {
        let path = format!("/v4/sessions/{session_id}/players/{guild_id}");
        self.fetch(self.request(Method::GET, &path), &path).await
    }

    /// Partial update; creates the player when the node has none for the guild.
    /// With `no_replace` the node keeps a track that is already playing.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<Player, RestError> {
        let path = format!("/v4/sessions/{session_id}/players/{guild_id}?noReplace={no_replace}");
        let request = self.request(Method::PATCH, &path).json(update);
        self.fetch(request, &path).await
    }

    /// 204 maps to a valueless success.
    pub async fn destroy_player(&self, session_id: &str, guild_id: GuildId) -> Result<(), RestError> {
        let path = format!("/v4/sessions/{session_id}/players/{guild_id}");
        let response = self.send(self.request(Method::DELETE, &path), &path).await?;
        if response.status() != StatusCode::NO_CONTENT {
            debug!(
                "Node {} answered {} to player destroy, treating as success",
                self.node,
                response.status()
            );
        }
        Ok(())
    }

    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult, RestError> {
        let path = format!("/v4/loadtracks?identifier={}", urlencoding::encode(identifier));
        self.fetch(self.request(Method::GET, &path), &path).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", &self.password);
        if let Some((header, token)) = &self.proxy_verification {
            request = request.header(header.as_str(), token.as_str());
        }
        request
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<T, RestError> {
        let response = self.send(request, path).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<reqwest::Response, RestError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let message = match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(error) if !error.message.is_empty() => error.message,
            Ok(error) if !error.error.is_empty() => error.error,
            _ => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        debug!("Node {} rejected {}: {} {}", self.node, path, status, message);

        Err(RestError::Remote {
            status: status.as_u16(),
            message,
            path: path.to_string(),
        })
    }
}
