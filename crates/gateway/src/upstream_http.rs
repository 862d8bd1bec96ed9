//! One JSON-RPC call to an HTTPS upstream.
//!
//! Upstreams answer either `application/json` (one response object) or
//! `text/event-stream` (a stream of JSON-RPC messages; the one matching the
//! request id wins). Non-2xx statuses are preserved verbatim so 401/403 can
//! be hoisted to the client.

use crate::error::GatewayError;
use crate::jsonrpc::RequestId;
use crate::secrets::SecretResolver;
use crate::timeouts;
use futures::StreamExt as _;
use indexmap::IndexMap;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, WWW_AUTHENTICATE,
};
use serde_json::{Value, json};

pub struct HttpUpstream<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub headers: &'a IndexMap<String, String>,
}

pub async fn call_http_upstream(
    http: &reqwest::Client,
    secrets: &SecretResolver,
    upstream: HttpUpstream<'_>,
    method: &str,
    params: Value,
    id: &RequestId,
    passthrough_authorization: Option<&str>,
) -> Result<Value, GatewayError> {
    let timeout = timeouts::upstream_timeout();
    let headers = build_headers(secrets, upstream.headers, passthrough_authorization).await?;
    let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

    tracing::debug!(upstream = %upstream.name, method, "calling http upstream");

    let call = perform_call(http, &upstream, headers, &body, id);
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::UpstreamTimeout {
            upstream: upstream.name.to_string(),
            method: method.to_string(),
            ms: timeouts::upstream_timeout_ms(),
        }),
    }
}

async fn build_headers(
    secrets: &SecretResolver,
    upstream_headers: &IndexMap<String, String>,
    passthrough_authorization: Option<&str>,
) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    for (name, value) in upstream_headers {
        let resolved = secrets.resolve(value).await?;
        // Unrepresentable header names/values are skipped, not fatal.
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&resolved),
        ) {
            headers.insert(n, v);
        }
    }
    // The caller-supplied Authorization wins over any configured header.
    if let Some(auth) = passthrough_authorization
        && let Ok(v) = HeaderValue::from_str(auth)
    {
        headers.insert(AUTHORIZATION, v);
    }
    Ok(headers)
}

async fn perform_call(
    http: &reqwest::Client,
    upstream: &HttpUpstream<'_>,
    headers: HeaderMap,
    body: &Value,
    id: &RequestId,
) -> Result<Value, GatewayError> {
    let name = upstream.name;
    let resp = http
        .post(upstream.url)
        .headers(headers)
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamTransport {
            upstream: name.to_string(),
            message: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        let www_authenticate = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamHttp {
            upstream: name.to_string(),
            status: status.as_u16(),
            body,
            www_authenticate,
        });
    }

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let payload = if content_type.starts_with("text/event-stream") {
        read_sse_response(resp, name, id).await?
    } else {
        // application/json, and best-effort for anything else.
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::UpstreamTransport {
                upstream: name.to_string(),
                message: e.to_string(),
            })?;
        serde_json::from_str::<Value>(&text).map_err(|e| GatewayError::UpstreamProtocol {
            upstream: name.to_string(),
            message: format!("unparseable response body: {e}"),
        })?
    };

    unwrap_jsonrpc_result(name, payload)
}

fn unwrap_jsonrpc_result(name: &str, payload: Value) -> Result<Value, GatewayError> {
    if let Some(err) = payload.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| err.to_string(), str::to_string);
        return Err(GatewayError::UpstreamRpc {
            upstream: name.to_string(),
            message,
        });
    }
    match payload.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(GatewayError::UpstreamProtocol {
            upstream: name.to_string(),
            message: "response carries neither result nor error".to_string(),
        }),
    }
}

/// Stream-parse an SSE body. Returns the first event whose `id` matches the
/// request, the last parseable event otherwise.
async fn read_sse_response(
    resp: reqwest::Response,
    name: &str,
    id: &RequestId,
) -> Result<Value, GatewayError> {
    let id_value = serde_json::to_value(id).expect("request ids serialize to JSON");
    let mut stream = resp.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut last: Option<Value> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GatewayError::UpstreamTransport {
            upstream: name.to_string(),
            message: format!("sse read failed: {e}"),
        })?;
        for payload in decoder.push(&chunk) {
            if let Some(found) = consider_event(&payload, &id_value, &mut last) {
                return Ok(found);
            }
        }
    }
    if let Some(payload) = decoder.finish()
        && let Some(found) = consider_event(&payload, &id_value, &mut last)
    {
        return Ok(found);
    }

    last.ok_or_else(|| GatewayError::UpstreamProtocol {
        upstream: name.to_string(),
        message: "sse stream ended without a parseable event".to_string(),
    })
}

fn consider_event(payload: &str, id_value: &Value, last: &mut Option<Value>) -> Option<Value> {
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return None;
    };
    if event.get("id") == Some(id_value) {
        return Some(event);
    }
    *last = Some(event);
    None
}

/// Incremental SSE decoder: accumulates `data:` lines, emits one payload per
/// blank-line-delimited event. Byte-oriented so multi-byte characters split
/// across chunks survive.
pub struct SseDecoder {
    buf: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            data_lines: Vec::new(),
        }
    }

    /// Feed a chunk; returns every event payload completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.accept_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// Flush a trailing event not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buf.is_empty() {
            let line: Vec<u8> = std::mem::take(&mut self.buf);
            let mut events = Vec::new();
            self.accept_line(&String::from_utf8_lossy(&line), &mut events);
        }
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }

    fn accept_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data_lines.is_empty() {
                events.push(self.data_lines.join("\n"));
                self.data_lines.clear();
            }
            return;
        }
        // Comments and unknown fields are ignored.
        if line.starts_with(':') {
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim_start().to_string());
        }
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}
