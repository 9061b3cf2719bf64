//! Shared utility helpers.

use sha2::{Digest, Sha256};

/// Lowercase hex of the first four bytes of the SHA-256 digest of `input`.
///
/// Used wherever a short, stable disambiguator is appended to a derived name.
pub fn hash8(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

/// Join displayable items with a separator.
pub fn join_display<T: std::fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Truncate `value` to at most `max_bytes` bytes without splitting a UTF-8 character.
pub fn truncate_to_byte_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash8_is_stable_lowercase_hex() {
        let first = hash8("key-unification-canonical-name:v1\n$.schoolId");
        let second = hash8("key-unification-canonical-name:v1\n$.schoolId");
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash8_known_value() {
        // sha256("abc") = ba7816bf...
        assert_eq!(hash8("abc"), "ba7816bf");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate_to_byte_boundary("abcdef", 3), "abc");
        assert_eq!(truncate_to_byte_boundary("aé", 2), "a");
        assert_eq!(truncate_to_byte_boundary("short", 63), "short");
    }
}
