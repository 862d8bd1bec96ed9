//! Minimal MCP server speaking newline-delimited JSON-RPC over stdio.
//!
//! Used by the integration tests as a spawnable stdio upstream. Exposes two
//! tools: `echo` (returns `arguments.text`, or `"ok"`) and `pid` (returns
//! this process id, letting tests observe child reuse).

use serde_json::{Value, json};
use std::io::{BufRead as _, Write as _};

fn main() -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        // Notifications (no id) get no response.
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let response = match method {
            "initialize" => {
                let requested = message
                    .pointer("/params/protocolVersion")
                    .cloned()
                    .unwrap_or_else(|| json!("2025-06-18"));
                ok(
                    id,
                    json!({
                        "protocolVersion": requested,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "mcpx-echo-server", "version": env!("CARGO_PKG_VERSION") },
                    }),
                )
            }
            "ping" => ok(id, json!({})),
            "tools/list" => ok(
                id,
                json!({
                    "tools": [
                        {
                            "name": "echo",
                            "description": "Echo the given text back.",
                            "inputSchema": {
                                "type": "object",
                                "properties": { "text": { "type": "string" } },
                            },
                        },
                        {
                            "name": "pid",
                            "description": "Report the server's process id.",
                            "inputSchema": { "type": "object" },
                        },
                    ],
                }),
            ),
            "resources/list" => ok(id, json!({ "resources": [] })),
            "prompts/list" => ok(id, json!({ "prompts": [] })),
            "tools/call" => handle_tools_call(id, &message),
            other => error(id, -32601, &format!("method not found: {other}")),
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_tools_call(id: Value, message: &Value) -> Value {
    let tool = message
        .pointer("/params/name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match tool {
        "echo" => {
            let text = message
                .pointer("/params/arguments/text")
                .and_then(Value::as_str)
                .unwrap_or("ok")
                .to_string();
            ok(id, text_result(&text))
        }
        "pid" => ok(id, text_result(&std::process::id().to_string())),
        other => error(id, -32602, &format!("unknown tool: {other}")),
    }
}

fn text_result(text: &str) -> Value {
    json!({
        "content": [ { "type": "text", "text": text } ],
        "isError": false,
    })
}

fn ok(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}
