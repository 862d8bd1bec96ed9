#![allow(dead_code)]

use anyhow::Context as _;
use axum::Router;
use serde_json::Value;
use std::io::BufRead as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub use mcpx_test_support::{KillOnDrop, pick_unused_port, wait_http_ok};

/// Token every spawned gateway expects from local clients
/// (injected via `MCPX_SECRET_local_token`).
pub const LOCAL_TOKEN: &str = "test-local-token";

pub struct SpawnedGateway {
    pub child: Child,
    pub base: String,
}

fn parse_listen_addr(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    // Logs are JSON; the address ends before the next quote or brace.
    let end = rest
        .find('"')
        .or_else(|| rest.find('}'))
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

pub fn wait_for_gateway_port(mut child: Child, timeout: Duration) -> anyhow::Result<SpawnedGateway> {
    let stdout = child.stdout.take().context("missing child stdout")?;
    let stderr = child.stderr.take().context("missing child stderr")?;

    let (tx, rx) = mpsc::channel::<String>();
    let tx_out = tx.clone();
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stdout);
        for line in reader.lines().map_while(Result::ok) {
            let _ = tx_out.send(line);
        }
    });
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            let _ = tx.send(line);
        }
    });

    let start = Instant::now();
    let mut last_lines: Vec<String> = Vec::new();

    while start.elapsed() < timeout {
        if let Ok(Some(status)) = child.try_wait() {
            anyhow::bail!("gateway process exited early: {status}");
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => {
                if last_lines.len() >= 50 {
                    last_lines.remove(0);
                }
                last_lines.push(line.clone());

                if let Some(addr) =
                    parse_listen_addr(&line, "Starting mcpx gateway HTTP server on ")
                {
                    return Ok(SpawnedGateway {
                        child,
                        base: format!("http://{addr}"),
                    });
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    anyhow::bail!(
        "timed out waiting for gateway port; last output:\n{}",
        last_lines.join("\n")
    );
}

pub fn spawn_gateway(config_path: &Path) -> anyhow::Result<SpawnedGateway> {
    let bin = env!("CARGO_BIN_EXE_mcpx-gateway");
    let mut cmd = Command::new(bin);
    cmd.arg("--config")
        .arg(config_path)
        .arg("--log-level")
        .arg("info")
        .arg("--secret-backend")
        .arg("memory")
        .env("MCPX_SECRET_local_token", LOCAL_TOKEN)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = cmd.spawn().context("spawn gateway")?;
    wait_for_gateway_port(child, Duration::from_secs(10))
}

/// Write a config file with `port: 0` and the given `servers:` block
/// (two-space indented entries, or an empty map for no upstreams).
pub fn write_config(dir: &tempfile::TempDir, servers_yaml: &str) -> anyhow::Result<PathBuf> {
    let path = dir.path().join("mcpx.yaml");
    rewrite_config(&path, servers_yaml)?;
    Ok(path)
}

pub fn rewrite_config(path: &Path, servers_yaml: &str) -> anyhow::Result<()> {
    let servers = if servers_yaml.trim().is_empty() {
        "servers: {}\n".to_string()
    } else {
        format!("servers:\n{servers_yaml}")
    };
    let config = format!("gateway:\n  port: 0\n  localTokenName: local_token\n{servers}");
    std::fs::write(path, config).context("write gateway config")
}

pub fn http_server_yaml(name: &str, base: &str) -> String {
    format!("  {name}:\n    transport: http\n    url: \"{base}/mcp\"\n")
}

/// POST a JSON-RPC body to the gateway, authenticated with the local token
/// header; `bearer` adds an `Authorization` header on top.
pub async fn post_mcp(
    client: &reqwest::Client,
    base: &str,
    query: Option<&str>,
    bearer: Option<&str>,
    body: &Value,
) -> anyhow::Result<reqwest::Response> {
    let url = match query {
        Some(q) => format!("{base}/mcp?{q}"),
        None => format!("{base}/mcp"),
    };
    let mut req = client
        .post(url)
        .header("content-type", "application/json")
        .header("accept", "application/json")
        .header("x-mcpx-local-token", LOCAL_TOKEN)
        .json(body);
    if let Some(bearer) = bearer {
        req = req.header("authorization", format!("Bearer {bearer}"));
    }
    req.send().await.context("POST /mcp")
}

/// Serve an in-process mock upstream; returns its base URL.
pub async fn start_mock_upstream(
    app: Router,
) -> anyhow::Result<(String, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("bind mock upstream")?;
    let addr = listener.local_addr().context("mock upstream addr")?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), handle))
}

/// Names of the tools in a `tools/list` result.
pub fn tool_names(result: &Value) -> Vec<String> {
    result["result"]["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
