use crate::config::UpstreamSpec;
use serde_json::Value;
use sha2::{Digest as _, Sha256};

/// Deterministic fingerprint over an upstream specification.
///
/// Canonical JSON (recursively sorted object keys) hashed with SHA-256; any
/// semantic change to the spec (command, arg order, env, headers, url, cwd)
/// changes the result. Used only as a cache key by the stdio pool.
pub fn spec_fingerprint(spec: &UpstreamSpec) -> String {
    let value = serde_json::to_value(spec).expect("upstream specs serialize to JSON");
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn stdio_spec(args: &[&str], env: &[(&str, &str)]) -> UpstreamSpec {
        UpstreamSpec::Stdio {
            command: "node".into(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            cwd: None,
        }
    }

    #[test]
    fn equal_specs_have_equal_fingerprints() {
        let a = stdio_spec(&["x", "y"], &[("A", "1"), ("B", "2")]);
        let b = stdio_spec(&["x", "y"], &[("A", "1"), ("B", "2")]);
        assert_eq!(spec_fingerprint(&a), spec_fingerprint(&b));
    }

    #[test]
    fn env_insertion_order_does_not_matter() {
        let a = stdio_spec(&[], &[("A", "1"), ("B", "2")]);
        let b = stdio_spec(&[], &[("B", "2"), ("A", "1")]);
        assert_eq!(spec_fingerprint(&a), spec_fingerprint(&b));
    }

    #[test]
    fn semantic_changes_change_the_fingerprint() {
        let base = stdio_spec(&["x", "y"], &[("A", "1")]);
        assert_ne!(
            spec_fingerprint(&base),
            spec_fingerprint(&stdio_spec(&["y", "x"], &[("A", "1")])),
            "arg order is semantic"
        );
        assert_ne!(
            spec_fingerprint(&base),
            spec_fingerprint(&stdio_spec(&["x", "y"], &[("A", "2")])),
            "env values are semantic"
        );
    }

    #[test]
    fn transports_never_collide() {
        let mut headers = IndexMap::new();
        headers.insert("Authorization".to_string(), "secret://t".to_string());
        let http = UpstreamSpec::Http {
            url: "https://example.com/mcp".into(),
            headers,
        };
        assert_ne!(spec_fingerprint(&http), spec_fingerprint(&stdio_spec(&[], &[])));
    }
}
