//! Environment variable parsing shared by the mcpx daemon and its tests.

use std::str::FromStr;

/// Read an env var, trimmed, treating empty values as unset.
fn trimmed(name: &str) -> Option<String> {
    let raw = std::env::var(name).ok()?;
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse an env var into `T`, discarding values that fail `keep`.
fn parse_filtered<T: FromStr>(name: &str, keep: impl Fn(&T) -> bool) -> Option<T> {
    trimmed(name)?.parse::<T>().ok().filter(keep)
}

/// Interpret an env var as an on/off switch.
///
/// The usual truthy spellings (`1`, `true`, `yes`, `y`, `on`, any case) turn
/// it on; everything else, including unset, is off.
#[must_use]
pub fn flag(name: &str) -> bool {
    trimmed(name).is_some_and(|value| {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        )
    })
}

/// Interpret an env var as a strictly positive integer; `0` and unparseable
/// values count as unset.
#[must_use]
pub fn positive_u64(name: &str) -> Option<u64> {
    parse_filtered(name, |value: &u64| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_var(name: &str, value: &str) {
        // Test-only; no concurrent getenv in this test binary.
        unsafe { std::env::set_var(name, value) };
    }

    #[test]
    fn flag_accepts_truthy_forms() {
        // Unique var names: tests in one binary share the process environment.
        set_var("MCPX_ENV_TEST_FLAG_ON", "YES");
        set_var("MCPX_ENV_TEST_FLAG_OFF", "0");
        set_var("MCPX_ENV_TEST_FLAG_BLANK", "   ");
        assert!(flag("MCPX_ENV_TEST_FLAG_ON"));
        assert!(!flag("MCPX_ENV_TEST_FLAG_OFF"));
        assert!(!flag("MCPX_ENV_TEST_FLAG_BLANK"));
        assert!(!flag("MCPX_ENV_TEST_FLAG_UNSET"));
    }

    #[test]
    fn positive_u64_rejects_zero_and_garbage() {
        set_var("MCPX_ENV_TEST_U64_OK", " 1500 ");
        set_var("MCPX_ENV_TEST_U64_ZERO", "0");
        set_var("MCPX_ENV_TEST_U64_BAD", "soon");
        assert_eq!(positive_u64("MCPX_ENV_TEST_U64_OK"), Some(1500));
        assert_eq!(positive_u64("MCPX_ENV_TEST_U64_ZERO"), None);
        assert_eq!(positive_u64("MCPX_ENV_TEST_U64_BAD"), None);
    }
}
