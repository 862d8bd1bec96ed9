//! Rewriting of item names and resource URIs for the merged catalog.
//!
//! Multi-upstream scope prefixes tool/prompt names with `<server>.` and wraps
//! resource URIs as `mcpx://<server>/<encoded>`; single-upstream scope is
//! "flat" and passes identifiers through unchanged in both directions.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

pub const RESOURCE_SCHEME: &str = "mcpx://";

// Component-style encoding: keep only the characters a URI component keeps.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'!')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn namespaced_name(server: &str, name: &str) -> String {
    format!("{server}.{name}")
}

pub fn namespaced_resource_uri(server: &str, uri: &str) -> String {
    format!(
        "{RESOURCE_SCHEME}{server}/{}",
        utf8_percent_encode(uri, COMPONENT)
    )
}

/// Split `"server.local"` at the first dot. Returns `None` for undotted
/// names; the caller decides whether the prefix names a real upstream.
pub fn split_namespaced_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

/// Parse `mcpx://server/<encoded>` back into `(server, original_uri)`.
pub fn split_namespaced_resource_uri(uri: &str) -> Option<(&str, String)> {
    let rest = uri.strip_prefix(RESOURCE_SCHEME)?;
    let (server, encoded) = rest.split_once('/')?;
    let decoded = percent_decode_str(encoded).decode_utf8().ok()?.into_owned();
    Some((server, decoded))
}
