//! Transport dispatch: one entry point per outbound MCP call.
//!
//! HTTP upstreams get a raw JSON-RPC POST; stdio upstreams go through the
//! connection pool and the typed client methods. Transport-level stdio
//! failures (and timeouts) evict the pool entry; JSON-RPC errors from the
//! upstream do not.

use crate::config::UpstreamSpec;
use crate::error::GatewayError;
use crate::jsonrpc::RequestId;
use crate::pool::StdioConnectionPool;
use crate::secrets::SecretResolver;
use crate::timeouts;
use crate::upstream_http::{HttpUpstream, call_http_upstream};
use rmcp::model::{
    CallToolRequest, CallToolRequestMethod, CallToolRequestParam, ClientRequest, Extensions,
    GetPromptRequest, GetPromptRequestMethod, GetPromptRequestParam, ReadResourceRequest,
    ReadResourceRequestMethod, ReadResourceRequestParam, ServerResult,
};
use rmcp::service::{PeerRequestOptions, ServiceError};
use serde_json::Value;
use std::sync::Arc;

/// The six MCP methods the gateway forwards. Everything else is rejected at
/// the dispatcher with `-32601`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    ToolsList,
    ResourcesList,
    PromptsList,
    ToolsCall,
    ResourcesRead,
    PromptsGet,
}

impl McpMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tools/list" => Some(Self::ToolsList),
            "resources/list" => Some(Self::ResourcesList),
            "prompts/list" => Some(Self::PromptsList),
            "tools/call" => Some(Self::ToolsCall),
            "resources/read" => Some(Self::ResourcesRead),
            "prompts/get" => Some(Self::PromptsGet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolsList => "tools/list",
            Self::ResourcesList => "resources/list",
            Self::PromptsList => "prompts/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesRead => "resources/read",
            Self::PromptsGet => "prompts/get",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(
            self,
            Self::ToolsList | Self::ResourcesList | Self::PromptsList
        )
    }
}

/// Shared handles every outbound call needs.
#[derive(Clone, Copy)]
pub struct UpstreamContext<'a> {
    pub http: &'a reqwest::Client,
    pub pool: &'a StdioConnectionPool,
    pub secrets: &'a SecretResolver,
}

pub async fn call_upstream(
    ctx: UpstreamContext<'_>,
    name: &str,
    spec: &UpstreamSpec,
    method: McpMethod,
    params: Value,
    id: &RequestId,
    passthrough_authorization: Option<&str>,
) -> Result<Value, GatewayError> {
    match spec {
        UpstreamSpec::Http { url, headers } => {
            call_http_upstream(
                ctx.http,
                ctx.secrets,
                HttpUpstream { name, url, headers },
                method.as_str(),
                params,
                id,
                passthrough_authorization,
            )
            .await
        }
        UpstreamSpec::Stdio { .. } => call_stdio_upstream(ctx, name, spec, method, params).await,
    }
}

async fn call_stdio_upstream(
    ctx: UpstreamContext<'_>,
    name: &str,
    spec: &UpstreamSpec,
    method: McpMethod,
    params: Value,
) -> Result<Value, GatewayError> {
    let timeout = timeouts::upstream_timeout();
    let client = ctx.pool.acquire(name, spec, ctx.secrets).await?;
    tracing::debug!(upstream = %name, method = method.as_str(), "calling stdio upstream");

    let result = match method {
        McpMethod::ToolsList => {
            let tools = await_list(ctx, name, method, client.peer().list_all_tools()).await?;
            serde_json::json!({ "tools": tools })
        }
        McpMethod::ResourcesList => {
            let resources =
                await_list(ctx, name, method, client.peer().list_all_resources()).await?;
            serde_json::json!({ "resources": resources })
        }
        McpMethod::PromptsList => {
            let prompts = await_list(ctx, name, method, client.peer().list_all_prompts()).await?;
            serde_json::json!({ "prompts": prompts })
        }
        McpMethod::ToolsCall => {
            let call_name = require_str_param(&params, "name", method)?;
            let arguments = params.get("arguments").and_then(Value::as_object).cloned();
            let request = ClientRequest::CallToolRequest(CallToolRequest {
                method: CallToolRequestMethod,
                params: CallToolRequestParam {
                    name: call_name.to_string().into(),
                    arguments,
                },
                extensions: Extensions::default(),
            });
            let result = send_typed(ctx, name, method, &client, request, timeout).await?;
            match result {
                ServerResult::CallToolResult(r) => to_result_value(r)?,
                other => return Err(unexpected_result(name, method, &other)),
            }
        }
        McpMethod::ResourcesRead => {
            let uri = require_str_param(&params, "uri", method)?;
            let request = ClientRequest::ReadResourceRequest(ReadResourceRequest {
                method: ReadResourceRequestMethod,
                params: ReadResourceRequestParam {
                    uri: uri.to_string(),
                },
                extensions: Extensions::default(),
            });
            let result = send_typed(ctx, name, method, &client, request, timeout).await?;
            match result {
                ServerResult::ReadResourceResult(r) => to_result_value(r)?,
                other => return Err(unexpected_result(name, method, &other)),
            }
        }
        McpMethod::PromptsGet => {
            let prompt_name = require_str_param(&params, "name", method)?;
            let arguments = params.get("arguments").and_then(Value::as_object).cloned();
            let request = ClientRequest::GetPromptRequest(GetPromptRequest {
                method: GetPromptRequestMethod,
                params: GetPromptRequestParam {
                    name: prompt_name.to_string(),
                    arguments,
                },
                extensions: Extensions::default(),
            });
            let result = send_typed(ctx, name, method, &client, request, timeout).await?;
            match result {
                ServerResult::GetPromptResult(r) => to_result_value(r)?,
                other => return Err(unexpected_result(name, method, &other)),
            }
        }
    };

    Ok(result)
}

/// List calls carry no cancellable handle of their own; the shared deadline
/// is applied from the outside and evicts on expiry.
async fn await_list<T: serde::Serialize>(
    ctx: UpstreamContext<'_>,
    name: &str,
    method: McpMethod,
    fut: impl Future<Output = Result<Vec<T>, ServiceError>>,
) -> Result<Value, GatewayError> {
    match tokio::time::timeout(timeouts::upstream_timeout(), fut).await {
        Ok(Ok(items)) => Ok(serde_json::to_value(items)
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("serialize list result: {e}")))?),
        Ok(Err(e)) => Err(classify_service_error(ctx, name, method, &e)),
        Err(_) => {
            ctx.pool.invalidate(name);
            Err(timeout_error(name, method))
        }
    }
}

async fn send_typed(
    ctx: UpstreamContext<'_>,
    name: &str,
    method: McpMethod,
    client: &Arc<crate::pool::McpClient>,
    request: ClientRequest,
    timeout: std::time::Duration,
) -> Result<ServerResult, GatewayError> {
    let handle = client
        .peer()
        .send_cancellable_request(
            request,
            PeerRequestOptions {
                timeout: Some(timeout),
                meta: None,
            },
        )
        .await
        .map_err(|e| classify_service_error(ctx, name, method, &e))?;

    handle
        .await_response()
        .await
        .map_err(|e| classify_service_error(ctx, name, method, &e))
}

/// Map a client-library error onto the gateway taxonomy and decide eviction:
/// JSON-RPC errors from the upstream leave the child alone; timeouts and
/// transport failures invalidate the pool entry.
fn classify_service_error(
    ctx: UpstreamContext<'_>,
    name: &str,
    method: McpMethod,
    error: &ServiceError,
) -> GatewayError {
    match error {
        ServiceError::McpError(data) => GatewayError::UpstreamRpc {
            upstream: name.to_string(),
            message: data.message.to_string(),
        },
        ServiceError::Timeout { .. } => {
            ctx.pool.invalidate(name);
            timeout_error(name, method)
        }
        other => {
            ctx.pool.invalidate(name);
            GatewayError::StdioTransport {
                upstream: name.to_string(),
                message: other.to_string(),
            }
        }
    }
}

fn timeout_error(name: &str, method: McpMethod) -> GatewayError {
    GatewayError::UpstreamTimeout {
        upstream: name.to_string(),
        method: method.as_str().to_string(),
        ms: timeouts::upstream_timeout_ms(),
    }
}

fn unexpected_result(name: &str, method: McpMethod, other: &ServerResult) -> GatewayError {
    GatewayError::UpstreamProtocol {
        upstream: name.to_string(),
        message: format!(
            "unexpected response type for {}: {other:?}",
            method.as_str()
        ),
    }
}

fn to_result_value<T: serde::Serialize>(result: T) -> Result<Value, GatewayError> {
    serde_json::to_value(result)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("serialize call result: {e}")))
}

fn require_str_param<'a>(
    params: &'a Value,
    key: &str,
    method: McpMethod,
) -> Result<&'a str, GatewayError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidParams(format!(
                "{} requires a string params.{key}",
                method.as_str()
            ))
        })
}
