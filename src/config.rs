use anyhow::{Context, Result};
use std::{collections::HashSet, time::Duration};
use url::Url;

use crate::balancer::region::RegionGroup;
use crate::error::{GatewayError, GatewayResult};
use crate::node::{NodeConfig, NodePool};

/// Field separator inside one `AUDIO_NODES` entry.
const NODE_FIELD_SEPARATOR: &str = "::";
const MAX_TRANSFER_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // Discord
    pub discord_token: String,
    pub instance_name: String,

    // Nodes
    pub nodes: Vec<NodeConfig>,
    pub node_timeout: Duration,
    pub node_transfer_delay: Duration,
    pub proxy_verification_header: String,
}

impl GatewayConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup, `load` uses the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?;
        let instance_name = lookup("INSTANCE_NAME").unwrap_or_else(|| "open-music".to_string());

        let node_timeout = Duration::from_millis(
            lookup("AUDIO_NODE_TIMEOUT_MS")
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .context("AUDIO_NODE_TIMEOUT_MS must be a number of milliseconds")?,
        );
        let node_transfer_delay = Duration::from_millis(
            lookup("NODE_TRANSFER_DELAY_MS")
                .unwrap_or_else(|| "1000".to_string())
                .parse()
                .context("NODE_TRANSFER_DELAY_MS must be a number of milliseconds")?,
        );
        let proxy_verification_header = lookup("PROXY_VERIFICATION_HEADER")
            .unwrap_or_else(|| "X-Proxy-Verification".to_string());

        let nodes = parse_node_definitions(
            &lookup("AUDIO_NODES").unwrap_or_default(),
            node_timeout,
            &proxy_verification_header,
        )?;

        Ok(Self {
            discord_token,
            instance_name,
            nodes,
            node_timeout,
            node_transfer_delay,
            proxy_verification_header,
        })
    }

    /// Sanity checks that catch a misconfigured deployment before any node
    /// is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("At least one audio node must be configured in AUDIO_NODES");
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                anyhow::bail!("Audio node '{}' is configured more than once", node.name);
            }
        }

        if self.node_timeout.is_zero() {
            anyhow::bail!("Audio node timeout must be greater than 0");
        }

        if self.node_transfer_delay > MAX_TRANSFER_DELAY {
            anyhow::bail!(
                "Node transfer delay cannot exceed {:?}, got: {:?}",
                MAX_TRANSFER_DELAY,
                self.node_transfer_delay
            );
        }

        Ok(())
    }

    /// Log safe summary: no token, no node passwords.
    pub fn summary(&self) -> String {
        let nodes = self
            .nodes
            .iter()
            .map(|node| format!("{} [{}/{}]", node.name, node.pool, node.region_group))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Config Summary:\n  \
            Instance: {}\n  \
            Nodes ({}): {}\n  \
            Timeouts: {}ms node requests, {}ms transfer delay",
            self.instance_name,
            self.nodes.len(),
            nodes,
            self.node_timeout.as_millis(),
            self.node_transfer_delay.as_millis(),
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            instance_name: "open-music".to_string(),
            nodes: Vec::new(),
            node_timeout: Duration::from_millis(5000),
            node_transfer_delay: Duration::from_millis(1000),
            proxy_verification_header: "X-Proxy-Verification".to_string(),
        }
    }
}

/// Parses `name::pool::region_group::password::http_url[::proxy_token]`
/// entries separated by `;`. Blank entries are skipped.
pub fn parse_node_definitions(
    raw: &str,
    http_timeout: Duration,
    proxy_verification_header: &str,
) -> GatewayResult<Vec<NodeConfig>> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_node_definition(entry, http_timeout, proxy_verification_header))
        .collect()
}

fn parse_node_definition(
    definition: &str,
    http_timeout: Duration,
    proxy_verification_header: &str,
) -> GatewayResult<NodeConfig> {
    let invalid = |reason: String| GatewayError::InvalidNodeDefinition {
        definition: redact(definition),
        reason,
    };

    let fields: Vec<&str> = split_fields(definition).into_iter().map(str::trim).collect();
    let (name, pool, region_group, password, http_url, proxy_token) = match fields.as_slice() {
        [name, pool, region, password, url] => (*name, *pool, *region, *password, *url, None),
        [name, pool, region, password, url, token] => {
            (*name, *pool, *region, *password, *url, Some(*token))
        }
        _ => {
            return Err(invalid(format!(
                "expected 5 or 6 '{}' separated fields, got {}",
                NODE_FIELD_SEPARATOR,
                fields.len()
            )))
        }
    };

    if name.is_empty() {
        return Err(invalid("node name is empty".to_string()));
    }
    let pool: NodePool = pool.parse().map_err(|e: GatewayError| invalid(e.to_string()))?;
    let region_group: RegionGroup = region_group.parse().map_err(invalid)?;
    let url = Url::parse(http_url).map_err(|e| invalid(format!("invalid http url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported url scheme '{}'", url.scheme())));
    }

    let mut builder = NodeConfig::builder(name, http_url.trim_end_matches('/'))
        .password(password)
        .balancer_setup(pool, region_group)
        .http_timeout(http_timeout);
    if let Some(token) = proxy_token.filter(|t| !t.is_empty()) {
        builder = builder.proxy_verification(proxy_verification_header, token);
    }
    Ok(builder.build())
}

/// Splits one entry into its fields. The url is the fifth field and may
/// carry a bracketed IPv6 host (`http://[::1]:2333`), whose colons are not
/// separators.
fn split_fields(definition: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = definition.splitn(5, NODE_FIELD_SEPARATOR).collect();
    if fields.len() < 5 {
        return fields;
    }
    let tail = fields[4];
    let host_end = tail
        .find("://[")
        .and_then(|start| tail[start..].find(']').map(|end| start + end + 1))
        .unwrap_or(0);
    if let Some(at) = tail[host_end..].find(NODE_FIELD_SEPARATOR) {
        let at = host_end + at;
        fields[4] = &tail[..at];
        fields.extend(tail[at + NODE_FIELD_SEPARATOR.len()..].split(NODE_FIELD_SEPARATOR));
    }
    fields
}

/// Keeps the password out of error messages.
fn redact(definition: &str) -> String {
    split_fields(definition)
        .into_iter()
        .enumerate()
        .map(|(i, field)| if i == 3 || i == 5 { "***" } else { field })
        .collect::<Vec<_>>()
        .join(NODE_FIELD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("AUDIO_NODES", "eu-1::queued::europe::secret::http://eu-1:2333"),
        ]))
        .unwrap();

        assert_eq!(config.instance_name, "open-music");
        assert_eq!(config.node_timeout, Duration::from_millis(5000));
        assert_eq!(config.node_transfer_delay, Duration::from_millis(1000));
        assert_eq!(config.proxy_verification_header, "X-Proxy-Verification");
        assert_eq!(config.nodes.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_token() {
        let err = GatewayConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn test_parse_node_definitions() {
        let nodes = parse_node_definitions(
            "eu-1::QUEUED::EUROPE::pw::https://eu-1.example:2333/ ; ;\
             radio::continuous::south-america::pw2::http://radio:2333::proxy-secret",
            Duration::from_secs(2),
            "X-Check",
        )
        .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "eu-1");
        assert_eq!(nodes[0].pool, NodePool::Queued);
        assert_eq!(nodes[0].region_group, RegionGroup::Europe);
        assert_eq!(nodes[0].http_url, "https://eu-1.example:2333");
        assert_eq!(nodes[0].proxy_verification_token, None);
        assert_eq!(nodes[0].http_timeout, Duration::from_secs(2));

        assert_eq!(nodes[1].pool, NodePool::Continuous);
        assert_eq!(nodes[1].region_group, RegionGroup::SouthAmerica);
        assert_eq!(nodes[1].password, "pw2");
        assert_eq!(nodes[1].proxy_verification_header, "X-Check");
        assert_eq!(nodes[1].proxy_verification_token.as_deref(), Some("proxy-secret"));
    }

    #[test]
    fn test_invalid_node_definitions() {
        let cases = [
            "eu-1::queued::europe::pw",
            "::queued::europe::pw::http://eu-1:2333",
            "eu-1::radio::europe::pw::http://eu-1:2333",
            "eu-1::queued::atlantis::pw::http://eu-1:2333",
            "eu-1::queued::europe::pw::not a url",
            "eu-1::queued::europe::pw::ftp://eu-1:2333",
        ];
        for case in cases {
            let err = parse_node_definitions(case, Duration::from_secs(1), "X").unwrap_err();
            assert!(
                matches!(err, GatewayError::InvalidNodeDefinition { .. }),
                "{case}: {err}"
            );
        }
    }

    #[test]
    fn test_ipv6_node_urls() {
        let nodes = parse_node_definitions(
            "local::queued::us::pw::http://[::1]:2333;\
             proxied::continuous::europe::pw::https://[2001:db8::7]:443/::proxy-secret",
            Duration::from_secs(1),
            "X-Check",
        )
        .unwrap();

        assert_eq!(nodes[0].http_url, "http://[::1]:2333");
        assert_eq!(nodes[0].proxy_verification_token, None);
        assert_eq!(nodes[1].http_url, "https://[2001:db8::7]:443");
        assert_eq!(nodes[1].proxy_verification_token.as_deref(), Some("proxy-secret"));

        let err = parse_node_definitions(
            "local::queued::us::pw::http://[::1]:2333::token::extra",
            Duration::from_secs(1),
            "X",
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidNodeDefinition { .. }));
    }

    #[test]
    fn test_password_is_redacted() {
        let err = parse_node_definitions(
            "eu-1::queued::nowhere::hunter2::http://eu-1:2333::proxy-token",
            Duration::from_secs(1),
            "X",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("hunter2"), "{message}");
        assert!(!message.contains("proxy-token"), "{message}");

        let err = parse_node_definitions(
            "v6::queued::nowhere::hunter2::http://[::1]:2333::proxy-token",
            Duration::from_secs(1),
            "X",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("http://[::1]:2333"), "{message}");
        assert!(!message.contains("proxy-token"), "{message}");
    }

    #[test]
    fn test_validate() {
        let node = |name: &str| NodeConfig::builder(name, "http://127.0.0.1:2333").build();

        let empty = GatewayConfig::default();
        assert!(empty.validate().is_err());

        let duplicated = GatewayConfig {
            nodes: vec![node("a"), node("a")],
            ..Default::default()
        };
        assert!(duplicated.validate().is_err());

        let zero_timeout = GatewayConfig {
            nodes: vec![node("a")],
            node_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let slow_transfer = GatewayConfig {
            nodes: vec![node("a")],
            node_transfer_delay: Duration::from_secs(31),
            ..Default::default()
        };
        assert!(slow_transfer.validate().is_err());

        let valid = GatewayConfig {
            nodes: vec![node("a"), node("b")],
            ..Default::default()
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let config = GatewayConfig {
            discord_token: "very-secret-token".to_string(),
            nodes: vec![NodeConfig::builder("eu-1", "http://127.0.0.1:2333")
                .password("hunter2")
                .build()],
            ..Default::default()
        };
        let summary = config.summary();
        assert!(summary.contains("eu-1 [QUEUED/UNKNOWN]"), "{summary}");
        assert!(!summary.contains("very-secret-token"));
        assert!(!summary.contains("hunter2"));
    }
}
