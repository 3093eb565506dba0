//! Cache key composition.
//!
//! Keys are `"<namespace>:<key>"`, extended with the JSON of the sorted
//! parameter set when one is supplied. Composites longer than
//! [`MAX_KEY_CHARS`] collapse to a bounded hashed form.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Longest composite key stored verbatim.
pub const MAX_KEY_CHARS: usize = 200;
/// Characters of the caller key kept in a collapsed composite.
const COLLAPSED_KEY_CHARS: usize = 50;
/// Hex characters of the digest appended to a collapsed composite.
const HASH_SUFFIX_CHARS: usize = 8;

/// Parameter set folded into a cache key (query filters, pagination, ...).
///
/// Parameters are kept sorted by name so that the same set always yields the
/// same key regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheParams(BTreeMap<String, Value>);

impl CacheParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_json(&self) -> String {
        // A map of JSON values with string keys always serializes.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Fully composed storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compose the storage key for `namespace`/`key` and optional parameters.
    pub fn compose(namespace: &str, key: &str, params: Option<&CacheParams>) -> Self {
        let composite = match params.filter(|params| !params.is_empty()) {
            Some(params) => format!("{namespace}:{key}:{}", params.to_json()),
            None => format!("{namespace}:{key}"),
        };

        if composite.chars().count() <= MAX_KEY_CHARS {
            return Self(composite);
        }

        let digest = hex::encode(Sha256::digest(composite.as_bytes()));
        let head: String = key.chars().take(COLLAPSED_KEY_CHARS).collect();
        Self(format!(
            "{namespace}:{head}...{}",
            &digest[..HASH_SUFFIX_CHARS]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every key in `namespace`.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_key() {
        let key = CacheKey::compose("debates", "list", None);
        assert_eq!(key.as_str(), "debates:list");
    }

    #[test]
    fn params_are_sorted() {
        let a = CacheParams::new().with("page", 2).with("limit", 20);
        let b = CacheParams::new().with("limit", 20).with("page", 2);

        let key_a = CacheKey::compose("debates", "list", Some(&a));
        let key_b = CacheKey::compose("debates", "list", Some(&b));

        assert_eq!(key_a, key_b);
        assert_eq!(key_a.as_str(), r#"debates:list:{"limit":20,"page":2}"#);
    }

    #[test]
    fn empty_params_match_no_params() {
        let empty = CacheParams::new();
        assert_eq!(
            CacheKey::compose("metadata", "programme", Some(&empty)),
            CacheKey::compose("metadata", "programme", None)
        );
    }

    #[test]
    fn long_composites_collapse() {
        let long_key = "x".repeat(300);
        let key = CacheKey::compose("streaming", &long_key, None);

        let expected_prefix = format!("streaming:{}...", "x".repeat(50));
        assert!(key.as_str().starts_with(&expected_prefix));
        assert_eq!(key.as_str().len(), expected_prefix.len() + 8);
        assert!(
            key.as_str()[expected_prefix.len()..]
                .chars()
                .all(|c| c.is_ascii_hexdigit())
        );
    }

    #[test]
    fn collapsed_keys_differ_by_params() {
        let long_key = "y".repeat(250);
        let first = CacheParams::new().with("page", 1);
        let second = CacheParams::new().with("page", 2);

        assert_ne!(
            CacheKey::compose("debates", &long_key, Some(&first)),
            CacheKey::compose("debates", &long_key, Some(&second))
        );
    }

    #[test]
    fn boundary_length_is_kept_verbatim() {
        // "ns:" + 197 chars == 200
        let key = "k".repeat(197);
        let composed = CacheKey::compose("ns", &key, None);
        assert_eq!(composed.as_str().len(), MAX_KEY_CHARS);
        assert!(!composed.as_str().contains("..."));
    }
}
