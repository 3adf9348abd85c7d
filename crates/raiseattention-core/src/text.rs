//! Small text utilities shared across the workspace.

use sha2::{Digest, Sha256};

/// Return the final segment of a dotted name.
///
/// `json.decoder.JSONDecodeError` becomes `JSONDecodeError`; a name with
/// no dots is returned unchanged.
pub fn short_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Compute the SHA-256 hash of a byte slice as a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Check whether `haystack` contains `token` as a whole identifier.
///
/// Identifier characters are ASCII alphanumerics and underscore; the
/// match fails when the occurrence is embedded in a longer identifier
/// (`ValueErrorish` does not contain the token `ValueError`).
pub fn contains_token(haystack: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(token) {
        let abs = start + pos;
        let before_ok = abs == 0 || !is_ident_byte(bytes[abs - 1]);
        let end = abs + token.len();
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Case-insensitive check for a "raise"/"raises" mention in docstring text.
pub fn mentions_raises(text: &str) -> bool {
    let lower = text.to_lowercase();
    contains_token(&lower, "raise") || contains_token(&lower, "raises")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_module_path() {
        assert_eq!(short_name("json.JSONDecodeError"), "JSONDecodeError");
        assert_eq!(short_name("ValueError"), "ValueError");
        assert_eq!(short_name("a.b.c.D"), "D");
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex(b"abc").len(), 64);
    }

    #[test]
    fn contains_token_requires_word_boundaries() {
        assert!(contains_token("may raise ValueError here", "ValueError"));
        assert!(contains_token("ValueError", "ValueError"));
        assert!(!contains_token("ValueErrorish things", "ValueError"));
        assert!(!contains_token("MyValueError", "ValueError"));
        assert!(contains_token("see (ValueError).", "ValueError"));
    }

    #[test]
    fn mentions_raises_is_case_insensitive() {
        assert!(mentions_raises("Raises ValueError on bad input."));
        assert!(mentions_raises("may RAISE an error"));
        assert!(!mentions_raises("praised for reliability"));
        assert!(!mentions_raises("returns a number"));
    }
}
