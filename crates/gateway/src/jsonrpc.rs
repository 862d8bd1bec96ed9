//! Raw JSON-RPC 2.0 types for the gateway's client-facing surface.
//!
//! The gateway deliberately works on loosely-typed values here: upstream
//! results are passed through unchanged, so only the envelope is modeled.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const VERSION: &str = "2.0";

// Gateway JSON-RPC error codes (server range -32000..-32099 plus the
// standard ones).
pub const SERVER_ERROR: i64 = -32000;
pub const UNAUTHORIZED: i64 = -32001;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// A JSON-RPC request id: string, number, or null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

/// One inbound request object. `id: None` means the member was absent, i.e.
/// a notification; `id: Some(RequestId::Null)` is an explicit null id.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

pub fn response_ok(id: RequestId, result: Value) -> Value {
    json!({ "jsonrpc": VERSION, "id": id, "result": result })
}

pub fn response_error(id: RequestId, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": VERSION,
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_forms_round_trip() {
        let s: RequestId = serde_json::from_value(json!("abc")).expect("string id");
        let n: RequestId = serde_json::from_value(json!(7)).expect("number id");
        let null: RequestId = serde_json::from_value(json!(null)).expect("null id");
        assert_eq!(s, RequestId::String("abc".into()));
        assert_eq!(n, RequestId::Number(7));
        assert_eq!(null, RequestId::Null);
        assert_eq!(serde_json::to_value(RequestId::Number(7)).expect("json"), json!(7));
    }

    #[test]
    fn absent_id_is_a_notification() {
        let req: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .expect("notification");
        assert_eq!(req.id, None);

        let req: Request = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": null, "method": "tools/list", "params": {}}),
        )
        .expect("request");
        assert_eq!(req.id, Some(RequestId::Null));
    }

    #[test]
    fn error_response_shape() {
        let v = response_error(RequestId::Number(1), INVALID_PARAMS, "bad");
        assert_eq!(v["error"]["code"], json!(-32602));
        assert_eq!(v["id"], json!(1));
    }
}
