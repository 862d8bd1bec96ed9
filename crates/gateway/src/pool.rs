//! Long-lived stdio MCP clients, keyed by upstream name.
//!
//! One child process per configured stdio upstream, shared by all concurrent
//! requests. The entry is inserted before the connection completes so
//! concurrent acquires share a single spawn attempt. Entries are replaced
//! when the spec fingerprint changes, and evicted on transport errors; the
//! child process is kill-on-drop, so dropping the last handle closes it.

use crate::config::UpstreamSpec;
use crate::error::GatewayError;
use crate::fingerprint::spec_fingerprint;
use crate::secrets::SecretResolver;
use anyhow::anyhow;
use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rmcp::ServiceExt as _;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;

pub type McpClient = RunningService<RoleClient, ()>;

type ConnectResult = Result<Arc<McpClient>, Arc<anyhow::Error>>;
type ConnectFuture = Shared<BoxFuture<'static, ConnectResult>>;

struct Entry {
    fingerprint: String,
    generation: u64,
    client: ConnectFuture,
}

#[derive(Default)]
pub struct StdioConnectionPool {
    entries: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl StdioConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the shared client for `name`, spawning the child process if
    /// needed. The returned handle is valid for the scope of one call; the
    /// caller reports transport failures back via [`Self::invalidate`].
    pub async fn acquire(
        &self,
        name: &str,
        spec: &UpstreamSpec,
        secrets: &SecretResolver,
    ) -> Result<Arc<McpClient>, GatewayError> {
        let UpstreamSpec::Stdio {
            command,
            args,
            env,
            cwd,
        } = spec
        else {
            return Err(GatewayError::Internal(anyhow!(
                "acquire called for non-stdio upstream '{name}'"
            )));
        };

        // Resolve env secrets before touching the pool: a missing secret must
        // fail the call without ever spawning the child.
        let resolved_env = secrets.resolve_map(env).await?;

        let fp = spec_fingerprint(spec);
        let (fut, generation) = {
            let mut entries = self.entries.lock();
            let reusable = entries
                .get(name)
                .filter(|entry| entry.fingerprint == fp)
                .map(|entry| (entry.client.clone(), entry.generation));
            match reusable {
                Some(shared) => shared,
                None => {
                    if entries.contains_key(name) {
                        tracing::info!(
                            upstream = %name,
                            "stdio spec changed; replacing pooled connection"
                        );
                    }
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fut = connect_future(
                        name.to_string(),
                        command.clone(),
                        args.clone(),
                        resolved_env.into_iter().collect(),
                        cwd.clone(),
                    );
                    // Replacing the map slot drops the old entry's handle; the
                    // child stays alive only as long as in-flight borrowers
                    // hold it (TokioChildProcess is kill_on_drop).
                    entries.insert(
                        name.to_string(),
                        Entry {
                            fingerprint: fp,
                            generation,
                            client: fut.clone(),
                        },
                    );
                    (fut, generation)
                }
            }
        };

        match fut.await {
            Ok(client) => Ok(client),
            Err(e) => {
                self.remove_generation(name, generation);
                Err(GatewayError::StdioTransport {
                    upstream: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Evict whatever entry exists for `name`. Called after transport-level
    /// call failures and timeouts; the next acquire starts fresh.
    pub fn invalidate(&self, name: &str) {
        if self.entries.lock().remove(name).is_some() {
            tracing::warn!(upstream = %name, "evicted stdio connection");
        }
    }

    /// Drop entries whose upstream was removed from the configuration or
    /// whose spec fingerprint no longer matches.
    pub fn reconcile(&self, servers: &indexmap::IndexMap<String, UpstreamSpec>) {
        let mut entries = self.entries.lock();
        entries.retain(|name, entry| {
            servers.get(name).is_some_and(|spec| {
                matches!(spec, UpstreamSpec::Stdio { .. })
                    && spec_fingerprint(spec) == entry.fingerprint
            })
        });
    }

    /// Close everything. Close errors are irrelevant: children are
    /// kill-on-drop.
    pub fn shutdown(&self) {
        let drained = {
            let mut entries = self.entries.lock();
            entries.drain().count()
        };
        if drained > 0 {
            tracing::info!(count = drained, "closed stdio upstream connections");
        }
    }

    fn remove_generation(&self, name: &str, generation: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(name)
            .is_some_and(|e| e.generation == generation)
        {
            entries.remove(name);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn connect_future(
    name: String,
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<String>,
) -> ConnectFuture {
    async move {
        let mut cmd = Command::new(&command);
        cmd.args(&args);
        for (key, value) in &env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &cwd {
            cmd.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| Arc::new(anyhow!("spawn '{name}': {e}")))?;
        let client = ()
            .serve(transport)
            .await
            .map_err(|e| Arc::new(anyhow!("connect to '{name}': {e}")))?;
        tracing::debug!(upstream = %name, "stdio upstream connected");
        Ok(Arc::new(client))
    }
    .boxed()
    .shared()
}
