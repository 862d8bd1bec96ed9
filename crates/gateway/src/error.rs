use crate::jsonrpc;

/// Everything that can go wrong between accepting a request and framing a
/// response. Variants map onto the client-visible dispositions: a JSON-RPC
/// error code, or (for upstream auth challenges) a hoisted HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Secret not found: {0}")]
    SecretMissing(String),

    #[error("upstream '{upstream}' {method} timed out after {ms}ms")]
    UpstreamTimeout {
        upstream: String,
        method: String,
        ms: u64,
    },

    #[error("upstream '{upstream}' returned an error: {message}")]
    UpstreamRpc { upstream: String, message: String },

    #[error("upstream '{upstream}' request failed: {message}")]
    UpstreamTransport { upstream: String, message: String },

    /// Non-2xx HTTP status from an upstream. Body and `WWW-Authenticate` are
    /// preserved verbatim so 401/403 can be hoisted to the client unchanged.
    #[error("upstream '{upstream}' returned HTTP {status}")]
    UpstreamHttp {
        upstream: String,
        status: u16,
        body: String,
        www_authenticate: Option<String>,
    },

    #[error("upstream '{upstream}' returned an unusable response: {message}")]
    UpstreamProtocol { upstream: String, message: String },

    #[error("stdio upstream '{upstream}' transport failure: {message}")]
    StdioTransport { upstream: String, message: String },

    #[error("unknown upstream '{0}'")]
    UnknownUpstream(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    UnknownMethod(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            GatewayError::UnknownMethod(_) => jsonrpc::METHOD_NOT_FOUND,
            GatewayError::InvalidParams(_) | GatewayError::UnknownUpstream(_) => {
                jsonrpc::INVALID_PARAMS
            }
            _ => jsonrpc::SERVER_ERROR,
        }
    }

    /// An upstream 401/403 that must propagate to the client as an HTTP-level
    /// challenge instead of a JSON-RPC error.
    pub fn as_auth_challenge(&self) -> Option<(u16, &str, Option<&str>)> {
        match self {
            GatewayError::UpstreamHttp {
                status: status @ (401 | 403),
                body,
                www_authenticate,
                ..
            } => Some((*status, body.as_str(), www_authenticate.as_deref())),
            _ => None,
        }
    }

    pub fn is_auth_challenge(&self) -> bool {
        self.as_auth_challenge().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_detection_is_limited_to_401_and_403() {
        let unauthorized = GatewayError::UpstreamHttp {
            upstream: "vercel".into(),
            status: 401,
            body: "{}".into(),
            www_authenticate: Some("Bearer".into()),
        };
        let server_error = GatewayError::UpstreamHttp {
            upstream: "vercel".into(),
            status: 500,
            body: "boom".into(),
            www_authenticate: None,
        };
        assert!(unauthorized.is_auth_challenge());
        assert!(!server_error.is_auth_challenge());
        assert!(!GatewayError::SecretMissing("x".into()).is_auth_challenge());
    }

    #[test]
    fn code_mapping() {
        assert_eq!(
            GatewayError::UnknownMethod("x".into()).jsonrpc_code(),
            jsonrpc::METHOD_NOT_FOUND
        );
        assert_eq!(
            GatewayError::InvalidParams("x".into()).jsonrpc_code(),
            jsonrpc::INVALID_PARAMS
        );
        assert_eq!(
            GatewayError::SecretMissing("x".into()).jsonrpc_code(),
            jsonrpc::SERVER_ERROR
        );
        let timeout = GatewayError::UpstreamTimeout {
            upstream: "vercel".into(),
            method: "tools/call".into(),
            ms: 30000,
        };
        assert_eq!(timeout.jsonrpc_code(), jsonrpc::SERVER_ERROR);
        assert!(timeout.to_string().contains("timed out after 30000ms"));
    }
}
