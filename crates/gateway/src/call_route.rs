//! Routing of `tools/call`, `prompts/get`, `resources/read` to a single
//! upstream, accepting both flat and namespaced identifiers.
//!
//! Namespacing is syntactic: a name is split at its first dot, a resource
//! uri at the `mcpx://` scheme. A namespaced identifier whose server is not
//! in scope is an error, never a flat fallback.

use crate::config::UpstreamSpec;
use crate::error::GatewayError;
use crate::namespacing;
use crate::router::McpMethod;
use indexmap::IndexMap;
use serde_json::Value;

/// A resolved call: which upstream, and the params with the upstream-local
/// identifier written back (all other params preserved).
#[derive(Debug, PartialEq)]
pub struct CallTarget {
    pub server: String,
    pub params: Value,
}

pub fn resolve_call_target(
    method: McpMethod,
    params: Option<&Value>,
    scope: Option<&str>,
    servers: &IndexMap<String, UpstreamSpec>,
) -> Result<CallTarget, GatewayError> {
    let params_obj = params
        .and_then(Value::as_object)
        .ok_or_else(|| {
            GatewayError::InvalidParams(format!("{} requires a params object", method.as_str()))
        })?;

    let (key, is_uri) = match method {
        McpMethod::ToolsCall | McpMethod::PromptsGet => ("name", false),
        McpMethod::ResourcesRead => ("uri", true),
        other => {
            return Err(GatewayError::Internal(anyhow::anyhow!(
                "resolve_call_target called for {}",
                other.as_str()
            )));
        }
    };
    let raw = params_obj
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidParams(format!(
                "{} requires a string params.{key}",
                method.as_str()
            ))
        })?;

    let (server, local) = if is_uri {
        route_uri(raw, scope, servers)?
    } else {
        route_name(raw, scope, servers)?
    };

    let mut rewritten = params_obj.clone();
    rewritten.insert(key.to_string(), Value::String(local));
    Ok(CallTarget {
        server,
        params: Value::Object(rewritten),
    })
}

fn route_name(
    raw: &str,
    scope: Option<&str>,
    servers: &IndexMap<String, UpstreamSpec>,
) -> Result<(String, String), GatewayError> {
    if let Some((prefix, rest)) = namespacing::split_namespaced_name(raw) {
        if let Some(scope) = scope {
            if prefix != scope {
                return Err(GatewayError::InvalidParams(format!(
                    "'{raw}' is namespaced for upstream '{prefix}' but the request is scoped to '{scope}'"
                )));
            }
            return Ok((scope.to_string(), rest.to_string()));
        }
        if servers.contains_key(prefix) {
            return Ok((prefix.to_string(), rest.to_string()));
        }
        return Err(GatewayError::InvalidParams(format!(
            "unknown upstream '{prefix}' in name '{raw}'"
        )));
    }

    // Flat mode: the scope (or a lone configured upstream) picks the target
    // and the name passes through unmodified.
    if let Some(scope) = scope {
        return Ok((scope.to_string(), raw.to_string()));
    }
    if servers.len() == 1 {
        let only = servers.keys().next().expect("len checked");
        return Ok((only.clone(), raw.to_string()));
    }
    Err(GatewayError::InvalidParams(format!(
        "'{raw}' must be namespaced as '<server>.<name>' when multiple upstreams are configured"
    )))
}

fn route_uri(
    raw: &str,
    scope: Option<&str>,
    servers: &IndexMap<String, UpstreamSpec>,
) -> Result<(String, String), GatewayError> {
    if let Some((server, local)) = namespacing::split_namespaced_resource_uri(raw) {
        if let Some(scope) = scope {
            if server != scope {
                return Err(GatewayError::InvalidParams(format!(
                    "'{raw}' is namespaced for upstream '{server}' but the request is scoped to '{scope}'"
                )));
            }
            return Ok((scope.to_string(), local));
        }
        if servers.contains_key(server) {
            return Ok((server.to_string(), local));
        }
        return Err(GatewayError::InvalidParams(format!(
            "unknown upstream '{server}' in resource uri"
        )));
    }

    if let Some(scope) = scope {
        return Ok((scope.to_string(), raw.to_string()));
    }
    if servers.len() == 1 {
        let only = servers.keys().next().expect("len checked");
        return Ok((only.clone(), raw.to_string()));
    }
    Err(GatewayError::InvalidParams(format!(
        "'{raw}' must be namespaced as 'mcpx://<server>/<uri>' when multiple upstreams are configured"
    )))
}
