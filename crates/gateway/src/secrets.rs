//! Secret references and their resolution.
//!
//! Config values may be literal or `secret://<name>`. A reference resolves
//! through the `MCPX_SECRET_<name>` env override first, then the injected
//! secret store. Resolution happens per call; plaintext never lands in a
//! snapshot or a pool entry key.

use crate::error::GatewayError;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

pub const SECRET_REF_PREFIX: &str = "secret://";
pub const SECRET_ENV_PREFIX: &str = "MCPX_SECRET_";

const KEYRING_SERVICE: &str = "mcpx";

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<String>>;
}

/// Platform secret store (macOS Keychain, Windows Credential Manager,
/// libsecret) via the `keyring` crate.
pub struct KeyringSecretStore;

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<String>> {
        let name = name.to_string();
        // keyring is blocking; keep it off the request tasks.
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(KEYRING_SERVICE, &name)?;
            match entry.get_password() {
                Ok(v) => Ok(Some(v)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }
}

/// In-memory store for tests/dev only.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: HashMap<String, String>,
}

impl MemorySecretStore {
    pub fn with(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(name).cloned())
    }
}

/// Backend selection for `--secret-backend` / `MCPX_SECRET_BACKEND`.
pub fn open_secret_store(backend: Option<&str>) -> anyhow::Result<Arc<dyn SecretStore>> {
    match backend {
        None | Some("keyring") => Ok(Arc::new(KeyringSecretStore)),
        Some("memory") => Ok(Arc::new(MemorySecretStore::default())),
        Some(other) => anyhow::bail!("unknown secret backend: {other}"),
    }
}

#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Pass-through for literals; lookup for `secret://` references.
    pub async fn resolve(&self, value: &str) -> Result<String, GatewayError> {
        let Some(name) = value.strip_prefix(SECRET_REF_PREFIX) else {
            return Ok(value.to_string());
        };
        if let Ok(v) = std::env::var(format!("{SECRET_ENV_PREFIX}{name}")) {
            return Ok(v);
        }
        match self.store.get(name).await {
            Ok(Some(v)) => Ok(v),
            Ok(None) => Err(GatewayError::SecretMissing(name.to_string())),
            Err(e) => Err(GatewayError::Internal(
                e.context(format!("secret store lookup for '{name}'")),
            )),
        }
    }

    /// Resolve every value of a header/env map, preserving order.
    pub async fn resolve_map(
        &self,
        values: &IndexMap<String, String>,
    ) -> Result<IndexMap<String, String>, GatewayError> {
        let mut out = IndexMap::with_capacity(values.len());
        for (k, v) in values {
            out.insert(k.clone(), self.resolve(v).await?);
        }
        Ok(out)
    }
}
