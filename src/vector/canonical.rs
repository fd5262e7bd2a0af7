use crate::vector::KEY_DELIMITER;

/// Derives the canonical article identity from a storage key.
///
/// Storage keys carry a source-specific prefix, e.g. `reuters_2025-10-12345`.
/// The identity is whatever follows the last `_`; a key without one is already
/// canonical. An empty key has no identity.
pub fn canonicalize(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }

    match key.rfind(KEY_DELIMITER) {
        Some(pos) => Some(&key[pos + KEY_DELIMITER.len_utf8()..]),
        None => Some(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_prefix() {
        assert_eq!(canonicalize("a_b_c"), Some("c"));
        assert_eq!(canonicalize("source_2025-10-12345"), Some("2025-10-12345"));
        assert_eq!(canonicalize("_lead"), Some("lead"));
    }

    #[test]
    fn test_canonicalize_without_delimiter() {
        assert_eq!(canonicalize("nodelimiter"), Some("nodelimiter"));
        assert_eq!(canonicalize("2025-10-12345"), Some("2025-10-12345"));
    }

    #[test]
    fn test_canonicalize_edge_cases() {
        assert_eq!(canonicalize(""), None);
        assert_eq!(canonicalize("trailing_"), Some(""));
        assert_eq!(canonicalize("_"), Some(""));
        assert_eq!(canonicalize("naïve_ключ"), Some("ключ"));
    }

    #[test]
    fn test_canonicalize_is_deterministic() {
        for key in ["a_b_c", "x", "src_A_1", "other_1", "ü_ö"] {
            assert_eq!(canonicalize(key), canonicalize(key));
        }
    }
}
