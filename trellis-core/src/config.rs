//! Environment configuration helpers
//!
//! Each subsystem exposes its own `from_env()` constructor; these helpers
//! keep the variable parsing rules identical across them. Unparseable
//! values fall back to the default and are reported at `warn` level.

use std::str::FromStr;

/// Read a variable, treating empty or whitespace-only values as unset.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read and parse a variable, falling back to `default` when unset or invalid.
pub fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match env_string(name) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring unparseable setting");
                default
            }
        },
        None => default,
    }
}

/// Read a comma-separated list. Returns `None` when unset so callers keep defaults.
pub fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|s| split_list(&s)).filter(|v| !v.is_empty())
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_list_trims_and_skips_empty() {
        assert_eq!(
            split_list(" ACCESS-TOKEN, ,X-Access-Token ,"),
            vec!["ACCESS-TOKEN".to_string(), "X-Access-Token".to_string()]
        );
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_unset_variables_use_defaults() {
        let name = "TRELLIS_TEST_SURELY_UNSET_VARIABLE";
        assert_eq!(env_string(name), None);
        assert_eq!(env_parse(name, 3600u64), 3600);
        assert_eq!(env_list(name), None);
    }

    proptest! {
        #[test]
        fn prop_split_list_never_yields_blank_items(raw in "[a-zA-Z ,-]{0,40}") {
            for item in split_list(&raw) {
                prop_assert!(!item.is_empty());
                prop_assert_eq!(item.trim(), item.as_str());
            }
        }
    }
}
