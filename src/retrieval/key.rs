//! Deterministic namespaced cache-key construction
//!
//! Discriminators are individually hashed before joining, so separator
//! characters inside user-supplied query text cannot collide with the key
//! structure. The namespace prefix stays plain to keep prefix pattern
//! invalidation working.

use sha2::{Digest, Sha256};

/// Hex digits kept per hashed discriminator
const DIGEST_CHARS: usize = 16;

/// Build a cache key from a namespace and an ordered tuple of discriminators.
///
/// Identical logical requests always produce the same key. Callers must not
/// rely on the format beyond the namespace prefix.
pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut key = String::with_capacity(namespace.len() + parts.len() * (DIGEST_CHARS + 1));
    key.push_str(namespace);
    for part in parts {
        key.push(':');
        key.push_str(&digest(part));
    }
    key
}

fn digest(part: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(part.as_bytes());
    let full = hex::encode(hasher.finalize());
    full[..DIGEST_CHARS].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = cache_key("rag:fulltext", &["who is elon musk", "8"]);
        let b = cache_key("rag:fulltext", &["who is elon musk", "8"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespace_prefix_is_plain() {
        let key = cache_key("rag:serp", &["query"]);
        assert!(key.starts_with("rag:serp:"));
    }

    #[test]
    fn test_separator_in_query_cannot_collide() {
        // Raw concatenation would make these identical
        let a = cache_key("rag:fulltext", &["a:b", "c"]);
        let b = cache_key("rag:fulltext", &["a", "b:c"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_discriminators_distinct_keys() {
        let a = cache_key("rag:vector", &["query", "8"]);
        let b = cache_key("rag:vector", &["query", "16"]);
        assert_ne!(a, b);
    }
}
