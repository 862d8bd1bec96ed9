mod common;

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use common::{
    KillOnDrop, http_server_yaml, post_mcp, spawn_gateway, start_mock_upstream, write_config,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const UPSTREAM_CHALLENGE: &str = r#"Bearer error="invalid_token", resource_metadata="https://mcp.vercel.com/.well-known/oauth-protected-resource""#;

async fn challenge_mcp() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, UPSTREAM_CHALLENGE)],
        r#"{"error":"invalid_token"}"#,
    )
}

#[tokio::test]
async fn upstream_challenge_hoists_with_rewritten_metadata() -> anyhow::Result<()> {
    let app = Router::new().route("/mcp", post(challenge_mcp));
    let (upstream_base, _server) = start_mock_upstream(app).await?;

    let dir = tempdir()?;
    let config_path = write_config(&dir, &http_server_yaml("vercel", &upstream_base))?;
    let gw = spawn_gateway(&config_path)?;
    let base = gw.base.clone();
    let _guard = KillOnDrop(gw.child);

    let client = reqwest::Client::new();
    let list = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} });
    let resp = post_mcp(&client, &base, None, None, &list).await?;

    assert_eq!(resp.status(), 401);
    let www = resp
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .expect("www-authenticate present")
        .to_string();
    let expected = format!(
        r#"resource_metadata="{base}/.well-known/oauth-protected-resource""#
    );
    assert!(
        www.contains(&expected),
        "rewritten header {www:?} should contain {expected:?}"
    );
    assert!(www.contains(r#"error="invalid_token""#), "rest of the challenge survives");
    assert_eq!(resp.text().await?, r#"{"error":"invalid_token"}"#);
    Ok(())
}

#[tokio::test]
async fn multi_upstream_catalog_swallows_challenges() -> anyhow::Result<()> {
    let challenged = Router::new().route("/mcp", post(challenge_mcp));
    let healthy = Router::new().route(
        "/mcp",
        post(|Json(body): Json<Value>| async move {
            Json(json!({
                "jsonrpc": "2.0", "id": body["id"],
                "result": { "tools": [ { "name": "echo" } ] },
            }))
        }),
    );
    let (challenged_base, _s1) = start_mock_upstream(challenged).await?;
    let (healthy_base, _s2) = start_mock_upstream(healthy).await?;

    let dir = tempdir()?;
    let servers = format!(
        "{}{}",
        http_server_yaml("circleback", &challenged_base),
        http_server_yaml("vercel", &healthy_base)
    );
    let config_path = write_config(&dir, &servers)?;
    let gw = spawn_gateway(&config_path)?;
    let base = gw.base.clone();
    let _guard = KillOnDrop(gw.child);

    let client = reqwest::Client::new();
    let list = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} });
    let resp = post_mcp(&client, &base, None, None, &list).await?;
    // Two upstreams in scope: the challenge is isolated, not hoisted.
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(common::tool_names(&body), vec!["vercel.echo".to_string()]);
    Ok(())
}

#[tokio::test]
async fn well_known_resource_points_at_the_gateway() -> anyhow::Result<()> {
    let app = Router::new().route(
        "/.well-known/oauth-protected-resource/mcp",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"resource":"https://example.com/","authorization_servers":["https://auth.example.com"]}"#,
            )
        }),
    );
    let (upstream_base, _server) = start_mock_upstream(app).await?;

    let dir = tempdir()?;
    let config_path = write_config(&dir, &http_server_yaml("vercel", &upstream_base))?;
    let gw = spawn_gateway(&config_path)?;
    let base = gw.base.clone();
    let _guard = KillOnDrop(gw.child);

    // No local auth on the well-known surface.
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/.well-known/oauth-protected-resource"))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body["resource"], format!("{base}/mcp"));
    assert_eq!(body["authorization_servers"][0], "https://auth.example.com");
    Ok(())
}

#[tokio::test]
async fn well_known_is_404_without_a_single_http_upstream() -> anyhow::Result<()> {
    let (base_a, _s1) = start_mock_upstream(Router::new()).await?;
    let (base_b, _s2) = start_mock_upstream(Router::new()).await?;

    let dir = tempdir()?;
    let servers = format!(
        "{}{}",
        http_server_yaml("circleback", &base_a),
        http_server_yaml("vercel", &base_b)
    );
    let config_path = write_config(&dir, &servers)?;
    let gw = spawn_gateway(&config_path)?;
    let base = gw.base.clone();
    let _guard = KillOnDrop(gw.child);

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/.well-known/oauth-protected-resource"))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);

    // `?upstream=` is the escape hatch, and the scope survives into the
    // rewritten resource.
    let app = Router::new().route(
        "/.well-known/oauth-protected-resource/mcp",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"resource":"https://example.com/"}"#,
            )
        }),
    );
    let (scoped_base, _s3) = start_mock_upstream(app).await?;
    let servers = format!(
        "{}{}",
        http_server_yaml("circleback", &base_a),
        http_server_yaml("vercel", &scoped_base)
    );
    common::rewrite_config(&config_path, &servers)?;

    let resp = client
        .get(format!(
            "{base}/.well-known/oauth-protected-resource?upstream=vercel"
        ))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body["resource"], format!("{base}/mcp?upstream=vercel"));
    Ok(())
}

#[tokio::test]
async fn bearer_passthrough_reaches_http_upstreams() -> anyhow::Result<()> {
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_for_app = seen.clone();
    let app = Router::new().route(
        "/mcp",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let seen = seen_for_app.clone();
            async move {
                seen.lock().expect("lock").push(
                    headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                );
                Json(json!({
                    "jsonrpc": "2.0", "id": body["id"],
                    "result": { "tools": [] },
                }))
            }
        }),
    );
    let (upstream_base, _server) = start_mock_upstream(app).await?;

    let dir = tempdir()?;
    let config_path = write_config(&dir, &http_server_yaml("vercel", &upstream_base))?;
    let gw = spawn_gateway(&config_path)?;
    let base = gw.base.clone();
    let _guard = KillOnDrop(gw.child);

    let client = reqwest::Client::new();
    let list = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} });

    // Local token header + a foreign bearer: the bearer goes upstream.
    let resp = post_mcp(&client, &base, None, Some("upstream-cred"), &list).await?;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        seen.lock().expect("lock").last().cloned().flatten(),
        Some("Bearer upstream-cred".to_string())
    );

    // The local token as bearer authenticates locally and is NOT forwarded.
    let resp = post_mcp(&client, &base, None, Some(common::LOCAL_TOKEN), &list).await?;
    assert_eq!(resp.status(), 200);
    assert_eq!(seen.lock().expect("lock").last().cloned().flatten(), None);
    Ok(())
}
