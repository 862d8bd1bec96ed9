//! OAuth discovery passthrough and challenge rewriting.
//!
//! The gateway proxies the upstream's `/.well-known/oauth-*` documents and
//! points `resource` / `resource_metadata` back at itself, so a client's
//! OAuth flow negotiates with the real upstream while talking only to the
//! local endpoint.

use crate::config::{GatewaySnapshot, UpstreamSpec};
use crate::error::GatewayError;
use crate::secrets::SecretResolver;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse as _, Response};
use indexmap::IndexMap;
use serde_json::Value;

pub const WELL_KNOWN_PREFIXES: [&str; 3] = [
    "/.well-known/oauth-protected-resource",
    "/.well-known/oauth-authorization-server",
    "/.well-known/openid-configuration",
];

const PROTECTED_RESOURCE_PREFIX: &str = "/.well-known/oauth-protected-resource";
const HEADER_PROTOCOL_VERSION: &str = "mcp-protocol-version";

/// Base URL clients can reach us at, from their own `Host` header.
pub fn local_base_url(headers: &HeaderMap, port: u16) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| format!("127.0.0.1:{port}"), str::to_string);
    format!("http://{host}")
}

/// The gateway's own protected-resource metadata URL for a given scope.
pub fn local_metadata_url(base: &str, scope: Option<&str>) -> String {
    match scope {
        Some(name) => format!("{base}{PROTECTED_RESOURCE_PREFIX}?upstream={name}"),
        None => format!("{base}{PROTECTED_RESOURCE_PREFIX}"),
    }
}

/// Replace (or add) the `resource_metadata` URL inside a `WWW-Authenticate`
/// value, leaving everything else untouched.
pub fn rewrite_resource_metadata(value: &str, metadata_url: &str) -> String {
    const FIELD: &str = "resource_metadata=\"";
    if let Some(start) = value.find(FIELD) {
        let url_start = start + FIELD.len();
        if let Some(url_len) = value[url_start..].find('"') {
            return format!(
                "{}{}{}",
                &value[..url_start],
                metadata_url,
                &value[url_start + url_len..]
            );
        }
    }
    if value.trim().is_empty() {
        return format!("Bearer resource_metadata=\"{metadata_url}\"");
    }
    format!("{value}, resource_metadata=\"{metadata_url}\"")
}

/// The single HTTP upstream the well-known endpoints may proxy to, if any.
///
/// `scope` selects it explicitly; otherwise a configuration with exactly one
/// upstream qualifies. Anything else (stdio, multiple upstreams) has no
/// meaningful discovery surface here.
fn single_http_upstream<'a>(
    snapshot: &'a GatewaySnapshot,
    scope: Option<&str>,
) -> Option<(Option<&'a str>, &'a str, &'a IndexMap<String, String>)> {
    if let Some(name) = scope {
        let (name, spec) = snapshot.servers.get_key_value(name)?;
        let UpstreamSpec::Http { url, headers } = spec else {
            return None;
        };
        return Some((Some(name.as_str()), url.as_str(), headers));
    }
    if snapshot.servers.len() != 1 {
        return None;
    }
    let (_, spec) = snapshot.servers.first()?;
    let UpstreamSpec::Http { url, headers } = spec else {
        return None;
    };
    Some((None, url.as_str(), headers))
}

/// Upstream URL for a well-known document: origin + prefix + the upstream's
/// configured path (minus any trailing slash), per RFC 8414 path insertion.
fn upstream_well_known_url(upstream_url: &str, prefix: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(upstream_url).ok()?;
    let origin = parsed.origin().ascii_serialization();
    let path = parsed.path().trim_end_matches('/');
    Some(format!("{origin}{prefix}{path}"))
}

pub struct WellKnownProxy<'a> {
    pub http: &'a reqwest::Client,
    pub secrets: &'a SecretResolver,
    pub snapshot: &'a GatewaySnapshot,
    pub prefix: &'a str,
    pub scope: Option<&'a str>,
    pub inbound_headers: &'a HeaderMap,
    pub port: u16,
}

pub async fn proxy_well_known(proxy: WellKnownProxy<'_>) -> Response {
    let Some((scope_name, upstream_url, upstream_headers)) =
        single_http_upstream(proxy.snapshot, proxy.scope)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(target) = upstream_well_known_url(upstream_url, proxy.prefix) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    tracing::debug!(target = %target, "proxying well-known request");

    let resolved = match proxy.secrets.resolve_map(upstream_headers).await {
        Ok(v) => v,
        Err(e) => return well_known_error(&e),
    };

    let mut req = proxy
        .http
        .get(&target)
        .header(header::ACCEPT, "application/json");
    if let Some(v) = proxy
        .inbound_headers
        .get(HEADER_PROTOCOL_VERSION)
        .and_then(|v| v.to_str().ok())
    {
        req = req.header(HEADER_PROTOCOL_VERSION, v);
    }
    for (name, value) in &resolved {
        req = req.header(name.as_str(), value.as_str());
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "well-known upstream request failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut mirrored = HeaderMap::new();
    for name in [
        header::CONTENT_TYPE,
        header::CACHE_CONTROL,
        header::WWW_AUTHENTICATE,
    ] {
        if let Some(v) = resp.headers().get(&name) {
            mirrored.insert(name, v.clone());
        }
    }

    let body = match resp.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "well-known upstream body read failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let body = if proxy.prefix == PROTECTED_RESOURCE_PREFIX && status.is_success() {
        rewrite_protected_resource_body(&body, proxy.inbound_headers, proxy.port, scope_name)
    } else {
        body.to_vec()
    };

    (status, mirrored, body).into_response()
}

/// Point the advertised `resource` at the local `/mcp` endpoint (scope
/// preserved); leave unparseable bodies as-is.
fn rewrite_protected_resource_body(
    body: &[u8],
    inbound_headers: &HeaderMap,
    port: u16,
    scope: Option<&str>,
) -> Vec<u8> {
    let Ok(mut doc) = serde_json::from_slice::<Value>(body) else {
        return body.to_vec();
    };
    let Some(obj) = doc.as_object_mut() else {
        return body.to_vec();
    };
    let base = local_base_url(inbound_headers, port);
    let resource = match scope {
        Some(name) => format!("{base}/mcp?upstream={name}"),
        None => format!("{base}/mcp"),
    };
    obj.insert("resource".to_string(), Value::String(resource));
    serde_json::to_vec(&doc).unwrap_or_else(|_| body.to_vec())
}

fn well_known_error(e: &GatewayError) -> Response {
    tracing::warn!(error = %e, "well-known proxy failed");
    (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
}
