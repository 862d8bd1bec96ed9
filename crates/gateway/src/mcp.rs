//! The client-facing HTTP surface: `/mcp` plus the OAuth well-known proxies.
//!
//! One loopback listener. Local clients authenticate with the gateway token
//! (`x-mcpx-local-token` or `Authorization: Bearer`); a bearer that is not
//! the local token is forwarded to HTTP upstreams as the caller's own
//! credential. Each request re-reads the configuration snapshot, so upstream
//! adds/removes take effect without a restart.

use crate::call_route::resolve_call_target;
use crate::catalog::merge_list;
use crate::config::{ConfigSource, GatewaySnapshot, UpstreamSpec};
use crate::error::GatewayError;
use crate::jsonrpc::{self, Request, RequestId};
use crate::oauth;
use crate::pool::StdioConnectionPool;
use crate::router::{McpMethod, UpstreamContext, call_upstream};
use crate::secrets::SecretResolver;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse as _, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::Instrument as _;
use uuid::Uuid;

pub const SERVER_NAME: &str = "mcpx";
pub const MAX_POST_BODY_BYTES: usize = 2_000_000;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PROTOCOL_VERSION: &str = "2025-11-25";
const HEADER_LOCAL_TOKEN: &str = "x-mcpx-local-token";
const HEADER_SESSION_ID: &str = "mcp-session-id";
const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";

pub struct GatewayState {
    pub config: Arc<dyn ConfigSource>,
    pub secrets: SecretResolver,
    pub http: reqwest::Client,
    pub pool: Arc<StdioConnectionPool>,
    /// Bound port, used when the client sends no `Host` header.
    pub port: u16,
}

#[derive(Debug, Deserialize, Default)]
struct ScopeQuery {
    upstream: Option<String>,
}

pub fn router(state: Arc<GatewayState>) -> axum::Router {
    let mut app = axum::Router::new().route(
        "/mcp",
        axum::routing::post(post_mcp).get(get_mcp),
    );
    for prefix in oauth::WELL_KNOWN_PREFIXES {
        app = app
            .route(prefix, axum::routing::get(get_well_known))
            .route(
                &format!("{prefix}/{{*rest}}"),
                axum::routing::get(get_well_known),
            );
    }
    // Hard cap to protect the process from unbounded request bodies.
    app.layer(DefaultBodyLimit::max(MAX_POST_BODY_BYTES))
        .with_state(state)
}

async fn get_mcp(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let snapshot = load_snapshot(&state).await?;
    let _auth = authenticate(&state, &snapshot, &headers).await?;
    Ok(Json(json!({ "ok": true, "server": SERVER_NAME })).into_response())
}

async fn post_mcp(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ScopeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let span = tracing::info_span!(
        "gateway.mcp.post",
        scope = query.upstream.as_deref().unwrap_or(""),
        bytes = body.len()
    );
    async move {
        let snapshot = load_snapshot(&state).await?;
        let auth = authenticate(&state, &snapshot, &headers).await?;

        let parsed: Value = serde_json::from_slice(&body)
            .map_err(|e| malformed_request(format!("invalid request body: {e}")))?;
        let (requests, batch) = match parsed {
            Value::Array(items) if !items.is_empty() => (items, true),
            Value::Array(_) => {
                return Err(malformed_request("empty batch".to_string()));
            }
            single => (vec![single], false),
        };

        // Evict pool entries whose upstream was removed or mutated before any
        // of this batch touches them.
        state.pool.reconcile(&snapshot.servers);

        let ctx = DispatchContext {
            state: &state,
            snapshot: &snapshot,
            scope: query.upstream.as_deref(),
            passthrough_authorization: auth.passthrough_authorization.as_deref(),
        };

        let mut saw_initialize = false;
        let mut responses: Vec<Value> = Vec::new();
        for raw in requests {
            let request: Request = match serde_json::from_value(raw) {
                Ok(r) => r,
                Err(e) => {
                    responses.push(jsonrpc::response_error(
                        RequestId::Null,
                        jsonrpc::SERVER_ERROR,
                        format!("invalid JSON-RPC request: {e}"),
                    ));
                    continue;
                }
            };
            if request.method == "initialize" {
                saw_initialize = true;
            }
            // No id member: a notification; it never produces a response.
            let Some(id) = request.id.clone() else {
                tracing::debug!(method = %request.method, "dropping notification");
                continue;
            };

            match dispatch_request(ctx, &request, &id).await {
                Ok(result) => responses.push(jsonrpc::response_ok(id, result)),
                Err(e) => {
                    if e.is_auth_challenge() {
                        return Ok(challenge_response(&state, &headers, ctx.scope, &e));
                    }
                    tracing::debug!(method = %request.method, error = %e, "request failed");
                    responses.push(jsonrpc::response_error(
                        id,
                        e.jsonrpc_code(),
                        e.to_string(),
                    ));
                }
            }
        }

        let mut response = frame_responses(&headers, responses, batch);
        if saw_initialize {
            let session_id = Uuid::new_v4().to_string();
            let value = HeaderValue::from_str(&session_id).expect("uuid is a valid header");
            response.headers_mut().insert(HEADER_SESSION_ID, value);
        }
        Ok(response)
    }
    .instrument(span)
    .await
}

async fn get_well_known(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ScopeQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path();
    let Some(prefix) = oauth::WELL_KNOWN_PREFIXES
        .iter()
        .find(|p| path.starts_with(**p))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let snapshot = match state.config.snapshot().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "config snapshot failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    oauth::proxy_well_known(oauth::WellKnownProxy {
        http: &state.http,
        secrets: &state.secrets,
        snapshot: &snapshot,
        prefix,
        scope: query.upstream.as_deref(),
        inbound_headers: &headers,
        port: state.port,
    })
    .await
}

struct Authenticated {
    /// Caller-supplied `Authorization` offered to HTTP upstreams verbatim.
    /// Present only when it is a bearer distinct from the local token.
    passthrough_authorization: Option<String>,
}

async fn authenticate(
    state: &GatewayState,
    snapshot: &GatewaySnapshot,
    headers: &HeaderMap,
) -> Result<Authenticated, Response> {
    let expected = state
        .secrets
        .resolve(&format!(
            "secret://{}",
            snapshot.gateway.local_token_name
        ))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "local gateway token unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "local gateway token unavailable",
            )
                .into_response()
        })?;

    let local_header = headers
        .get(HEADER_LOCAL_TOKEN)
        .and_then(|v| v.to_str().ok());
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let bearer = authorization.and_then(|v| v.strip_prefix("Bearer ").map(str::trim));

    let authorized = local_header == Some(expected.as_str()) || bearer == Some(expected.as_str());
    if !authorized {
        return Err(unauthorized_response());
    }

    let passthrough_authorization = match bearer {
        Some(token) if token != expected => authorization.map(str::to_string),
        _ => None,
    };
    Ok(Authenticated {
        passthrough_authorization,
    })
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": jsonrpc::UNAUTHORIZED, "message": "Unauthorized" },
        })),
    )
        .into_response()
}

fn malformed_request(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(jsonrpc::response_error(
            RequestId::Null,
            jsonrpc::SERVER_ERROR,
            message,
        )),
    )
        .into_response()
}

async fn load_snapshot(state: &GatewayState) -> Result<GatewaySnapshot, Response> {
    state.config.snapshot().await.map_err(|e| {
        tracing::error!(error = %e, "config snapshot failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("configuration unavailable: {e}"),
        )
            .into_response()
    })
}

#[derive(Clone, Copy)]
struct DispatchContext<'a> {
    state: &'a GatewayState,
    snapshot: &'a GatewaySnapshot,
    scope: Option<&'a str>,
    passthrough_authorization: Option<&'a str>,
}

async fn dispatch_request(
    ctx: DispatchContext<'_>,
    request: &Request,
    id: &RequestId,
) -> Result<Value, GatewayError> {
    match request.method.as_str() {
        // Gateway-synthesized; upstreams are not contacted and `?upstream=`
        // is ignored.
        "initialize" => Ok(initialize_result(request.params.as_ref())),
        "ping" => Ok(json!({ "ok": true })),
        name => {
            let Some(method) = McpMethod::from_name(name) else {
                return Err(GatewayError::UnknownMethod(name.to_string()));
            };
            if let Some(scope) = ctx.scope
                && !ctx.snapshot.servers.contains_key(scope)
            {
                return Err(GatewayError::UnknownUpstream(scope.to_string()));
            }
            let upstream_ctx = UpstreamContext {
                http: &ctx.state.http,
                pool: &ctx.state.pool,
                secrets: &ctx.state.secrets,
            };

            if method.is_list() {
                let scope_servers: Vec<(String, UpstreamSpec)> = match ctx.scope {
                    Some(name) => {
                        let spec = ctx
                            .snapshot
                            .servers
                            .get(name)
                            .expect("scope validated above");
                        vec![(name.to_string(), spec.clone())]
                    }
                    None => ctx
                        .snapshot
                        .servers
                        .iter()
                        .map(|(n, s)| (n.clone(), s.clone()))
                        .collect(),
                };
                let params = request.params.clone().unwrap_or_else(|| json!({}));
                merge_list(
                    upstream_ctx,
                    &scope_servers,
                    method,
                    params,
                    id,
                    ctx.passthrough_authorization,
                )
                .await
            } else {
                let target = resolve_call_target(
                    method,
                    request.params.as_ref(),
                    ctx.scope,
                    &ctx.snapshot.servers,
                )?;
                let spec = ctx
                    .snapshot
                    .servers
                    .get(&target.server)
                    .ok_or_else(|| GatewayError::UnknownUpstream(target.server.clone()))?;
                call_upstream(
                    upstream_ctx,
                    &target.server,
                    spec,
                    method,
                    target.params,
                    id,
                    ctx.passthrough_authorization,
                )
                .await
            }
        }
    }
}

fn initialize_result(params: Option<&Value>) -> Value {
    let protocol_version = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
        "serverInfo": { "name": SERVER_NAME, "version": VERSION },
    })
}

/// Plain JSON by default; SSE framing when the client's `Accept` asks for an
/// event stream.
fn frame_responses(headers: &HeaderMap, responses: Vec<Value>, batch: bool) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if accept.contains(EVENT_STREAM_MIME_TYPE) {
        let events = responses.into_iter().map(|r| {
            let data = serde_json::to_string(&r).expect("valid json");
            Ok::<_, Infallible>(Event::default().event("message").data(data))
        });
        return Sse::new(futures::stream::iter(events)).into_response();
    }

    if batch {
        return Json(Value::Array(responses)).into_response();
    }
    match responses.into_iter().next() {
        Some(response) => Json(response).into_response(),
        // A lone notification: nothing to say.
        None => StatusCode::OK.into_response(),
    }
}

/// Upstream 401/403: the whole HTTP response is replaced by the upstream's
/// status and body, with `resource_metadata` re-pointed at this gateway.
fn challenge_response(
    state: &GatewayState,
    headers: &HeaderMap,
    scope: Option<&str>,
    error: &GatewayError,
) -> Response {
    let Some((status, body, www_authenticate)) = error.as_auth_challenge() else {
        // Callers only pass challenges; anything else is a bug upstream of
        // here, surfaced as a 500 rather than a panic.
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let base = oauth::local_base_url(headers, state.port);
    let metadata_url = oauth::local_metadata_url(&base, scope);

    let mut response_headers = HeaderMap::new();
    if let Some(value) = www_authenticate {
        let rewritten = oauth::rewrite_resource_metadata(value, &metadata_url);
        if let Ok(v) = HeaderValue::from_str(&rewritten) {
            response_headers.insert(header::WWW_AUTHENTICATE, v);
        }
    }

    tracing::debug!(status, "hoisting upstream auth challenge");
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED),
        response_headers,
        body.to_string(),
    )
        .into_response()
}
