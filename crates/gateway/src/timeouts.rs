use std::time::Duration;

/// Default per-call upstream deadline (milliseconds) when no env override is
/// provided.
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;

/// Per-call deadline for outbound upstream work (HTTP round-trip, stdio
/// round-trip including child spawn).
///
/// Env var: `MCPX_UPSTREAM_TIMEOUT_MS`.
#[must_use]
pub fn upstream_timeout_ms() -> u64 {
    mcpx_env::positive_u64("MCPX_UPSTREAM_TIMEOUT_MS").unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS)
}

#[must_use]
pub fn upstream_timeout() -> Duration {
    Duration::from_millis(upstream_timeout_ms())
}
