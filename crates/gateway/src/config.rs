use anyhow::Context as _;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One configured upstream MCP server.
///
/// Header and env values may be `secret://<name>` references; they are
/// resolved at call time, never at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum UpstreamSpec {
    Http {
        /// Full MCP endpoint URL, e.g. `https://mcp.vercel.com/mcp`.
        url: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: IndexMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
}

impl UpstreamSpec {
    pub fn is_http(&self) -> bool {
        matches!(self, UpstreamSpec::Http { .. })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Loopback port the gateway listens on. `0` binds an ephemeral port.
    pub port: u16,
    /// Secret name holding the token local clients must present.
    pub local_token_name: String,
}

/// A point-in-time view of the configuration.
///
/// Obtained fresh at the start of every request so adds/removes take effect
/// without a daemon restart; consistent within the scope of one request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySnapshot {
    pub gateway: GatewaySettings,
    /// Ordered: merge order of the catalog follows this map's order.
    #[serde(default)]
    pub servers: IndexMap<String, UpstreamSpec>,
}

/// Upstream names: `[A-Za-z0-9][A-Za-z0-9._-]{0,62}`.
pub fn is_valid_upstream_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    bytes[0].is_ascii_alphanumeric()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

pub fn validate_snapshot(snapshot: &GatewaySnapshot) -> anyhow::Result<()> {
    for name in snapshot.servers.keys() {
        if !is_valid_upstream_name(name) {
            anyhow::bail!(
                "invalid upstream name '{name}' (expected [A-Za-z0-9][A-Za-z0-9._-]{{0,62}})"
            );
        }
    }
    if snapshot.gateway.local_token_name.trim().is_empty() {
        anyhow::bail!("gateway.localTokenName must be non-empty");
    }
    Ok(())
}

/// Source of configuration snapshots.
///
/// The gateway core never caches a snapshot across requests; an
/// implementation may memoize internally.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<GatewaySnapshot>;
}

/// YAML file re-read on every snapshot.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn snapshot(&self) -> anyhow::Result<GatewaySnapshot> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let snapshot: GatewaySnapshot = serde_yaml::from_slice(&bytes)
            .with_context(|| format!("parse YAML config: {}", self.path.display()))?;
        validate_snapshot(&snapshot)
            .with_context(|| format!("validate config: {}", self.path.display()))?;
        Ok(snapshot)
    }
}
