use anyhow::Context as _;
use clap::Parser;
use config::ConfigSource;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod call_route;
mod catalog;
mod config;
mod error;
mod fingerprint;
mod jsonrpc;
mod mcp;
mod namespacing;
mod oauth;
mod pool;
mod router;
mod secrets;
mod timeouts;
mod upstream_http;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI arguments for the gateway daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcpx-gateway")]
#[command(
    version,
    about = "mcpx gateway: one local MCP endpoint multiplexing many upstream MCP servers"
)]
struct CliArgs {
    /// Path to the gateway config file (YAML). Re-read on every request.
    #[arg(short = 'c', long = "config", env = "MCPX_CONFIG")]
    config: PathBuf,

    /// Log level. Supports tracing filter syntax.
    #[arg(
        short = 'l',
        long = "log-level",
        env = "MCPX_GATEWAY_LOG",
        default_value = "info"
    )]
    log_level: String,

    /// Secret storage backend: `keyring` or `memory` (tests/dev only).
    #[arg(long = "secret-backend", env = "MCPX_SECRET_BACKEND")]
    secret_backend: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!("Starting mcpx gateway v{VERSION}");
    run(args).await
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = Arc::new(config::FileConfigSource::new(args.config.clone()));

    // Fail fast on an unreadable or invalid initial snapshot; later edits are
    // picked up per request.
    let snapshot = config
        .snapshot()
        .await
        .context("load initial config snapshot")?;
    tracing::info!(
        upstreams = snapshot.servers.len(),
        "initial configuration loaded"
    );

    let store = secrets::open_secret_store(args.secret_backend.as_deref())?;
    let secrets = secrets::SecretResolver::new(store);
    let http = build_no_redirect_http_client()?;
    let pool = Arc::new(pool::StdioConnectionPool::new());

    // Loopback only: the gateway is a single-host multiplexer, never a
    // network service.
    let addr = SocketAddr::from(([127, 0, 0, 1], snapshot.gateway.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind gateway address '{addr}'"))?;
    let bound = listener.local_addr().context("get gateway bind address")?;
    tracing::info!("Starting mcpx gateway HTTP server on {bound}");

    let state = Arc::new(mcp::GatewayState {
        config,
        secrets,
        http,
        pool: pool.clone(),
        port: bound.port(),
    });
    let app = mcp::router(state);

    let ct = CancellationToken::new();
    spawn_shutdown_watcher(ct.clone());

    let serve_ct = ct.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            serve_ct.cancelled().await;
        })
        .await
        .context("serve gateway")?;

    pool.shutdown();
    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

fn build_no_redirect_http_client() -> anyhow::Result<reqwest::Client> {
    // Redirects are disabled (SSRF hardening). Upstream endpoints should be
    // configured with their final URL.
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("build upstream HTTP client")
}

fn spawn_shutdown_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                }
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            () = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        ct.cancel();
    });
}

/// Initialize logging based on the log level string.
///
/// `MCPX_GATEWAY_DEBUG=1` forces the `debug` filter. Logs go to stderr; a TTY
/// gets the human format, anything else structured JSON.
fn init_logging(log_level: &str) {
    let level = if mcpx_env::flag("MCPX_GATEWAY_DEBUG") {
        "debug"
    } else {
        log_level
    };
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let is_tty = atty::is(atty::Stream::Stderr);

    if is_tty {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
