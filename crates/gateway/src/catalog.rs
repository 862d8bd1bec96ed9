//! Catalog merging for `tools/list`, `resources/list`, `prompts/list`.
//!
//! Upstreams in scope are queried concurrently; the merged result keeps
//! configuration order. A failing upstream is excluded rather than failing
//! the merge, except for an auth challenge in single-upstream scope, which
//! must reach the client verbatim.

use crate::config::UpstreamSpec;
use crate::error::GatewayError;
use crate::jsonrpc::RequestId;
use crate::namespacing;
use crate::router::{McpMethod, UpstreamContext, call_upstream};
use serde_json::{Value, json};

pub async fn merge_list(
    ctx: UpstreamContext<'_>,
    scope: &[(String, UpstreamSpec)],
    method: McpMethod,
    params: Value,
    id: &RequestId,
    passthrough_authorization: Option<&str>,
) -> Result<Value, GatewayError> {
    let key = match method {
        McpMethod::ToolsList => "tools",
        McpMethod::ResourcesList => "resources",
        McpMethod::PromptsList => "prompts",
        other => {
            return Err(GatewayError::Internal(anyhow::anyhow!(
                "merge_list called for {}",
                other.as_str()
            )));
        }
    };
    let flat = scope.len() == 1;

    let calls = scope.iter().map(|(name, spec)| {
        let params = params.clone();
        async move {
            let result = call_upstream(
                ctx,
                name,
                spec,
                method,
                params,
                id,
                passthrough_authorization,
            )
            .await;
            (name.as_str(), result)
        }
    });
    let results = futures::future::join_all(calls).await;

    let mut merged: Vec<Value> = Vec::new();
    for (name, result) in results {
        match result {
            Ok(value) => {
                let items = value
                    .get(key)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for mut item in items {
                    if !flat {
                        rewrite_item(name, key, &mut item);
                    }
                    merged.push(item);
                }
            }
            Err(e) if flat && e.is_auth_challenge() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    upstream = %name,
                    error = %e,
                    "{} failed; excluding upstream from merged catalog",
                    method.as_str()
                );
            }
        }
    }

    Ok(json!({ key: merged }))
}

fn rewrite_item(server: &str, key: &str, item: &mut Value) {
    let Some(obj) = item.as_object_mut() else {
        return;
    };
    if let Some(name) = obj.get("name").and_then(Value::as_str) {
        let namespaced = namespacing::namespaced_name(server, name);
        obj.insert("name".to_string(), Value::String(namespaced));
    }
    if key == "resources"
        && let Some(uri) = obj.get("uri").and_then(Value::as_str)
    {
        let wrapped = namespacing::namespaced_resource_uri(server, uri);
        obj.insert("uri".to_string(), Value::String(wrapped));
    }
}
