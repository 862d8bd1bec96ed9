//! Helpers shared by the gateway integration tests.

use anyhow::Context as _;
use std::net::TcpListener;
use std::process::Child;
use std::time::{Duration, Instant};

/// Child process guard that kills (and reaps) the process on drop.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Ask the OS for a currently-unused loopback port.
///
/// Racy by nature (the port is released before the caller binds it), but good
/// enough for tests that spawn one process per port.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind probe listener")?;
    let port = listener.local_addr().context("probe local addr")?.port();
    Ok(port)
}

/// Poll `url` until it answers with any HTTP status, or `timeout_dur` elapses.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if client.get(url).send().await.is_ok() {
            return Ok(());
        }
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
