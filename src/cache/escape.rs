//! Key Escaping
//!
//! Maps lookup keys to single path components and back.
//!
//! Every byte outside `[A-Za-z0-9_.~-]` is percent-encoded, so an escaped name
//! never contains a path separator, a drive colon, NUL, or a raw `%`. The two
//! names the file system reserves (`.` and `..`) are encoded as `%2E` and
//! `%2E%2E`. The mapping is injective and [`unescape_key`] inverts it.

use crate::error::{Error, Result};

/// Longest file name accepted by common file systems
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Prefix of temporary files; escaping always encodes this character
pub const TEMP_MARKER: char = '#';

/// Suffix of temporary files
const TEMP_SUFFIX: &str = ".tmp";

/// Escape `key` into a file name.
pub fn escape_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(Error::KeyEncoding {
            key: String::new(),
            reason: "empty key".to_string(),
        });
    }

    let escaped = match key {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(key).into_owned(),
    };

    if escaped.len() > MAX_FILE_NAME_BYTES {
        return Err(Error::KeyEncoding {
            key: key.to_string(),
            reason: format!(
                "escaped name is {} bytes, limit is {}",
                escaped.len(),
                MAX_FILE_NAME_BYTES
            ),
        });
    }

    Ok(escaped)
}

/// Recover the key from an escaped file name.
///
/// Returns `None` for names [`escape_key`] could not have produced
/// (temporary files, stray files, non-canonical encodings).
pub fn unescape_key(name: &str) -> Option<String> {
    if name.is_empty() || is_temp_file_name(name) {
        return None;
    }

    let key = urlencoding::decode(name).ok()?.into_owned();
    match escape_key(&key) {
        Ok(canonical) if canonical == name => Some(key),
        _ => None,
    }
}

/// Unique temporary file name for an in-progress write
pub fn temp_file_name() -> String {
    format!(
        "{}{}{}",
        TEMP_MARKER,
        uuid::Uuid::new_v4().simple(),
        TEMP_SUFFIX
    )
}

/// Whether `name` is a temporary file left by a write
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_escape_reserved_characters() {
        let escaped = escape_key("https://example.com/img/a b.png?x=1").unwrap();
        assert!(!escaped.contains('/'));
        assert!(!escaped.contains(':'));
        assert!(!escaped.contains(' '));
        assert!(!escaped.contains('?'));
        assert_eq!(escaped, "https%3A%2F%2Fexample.com%2Fimg%2Fa%20b.png%3Fx%3D1");
    }

    #[test]
    fn test_escape_backslash_and_percent() {
        assert_eq!(escape_key(r"C:\dir\f").unwrap(), "C%3A%5Cdir%5Cf");
        assert_eq!(escape_key("100%").unwrap(), "100%25");
    }

    #[test]
    fn test_escape_dot_names() {
        assert_eq!(escape_key(".").unwrap(), "%2E");
        assert_eq!(escape_key("..").unwrap(), "%2E%2E");
        assert_eq!(escape_key("...").unwrap(), "...");
        assert_eq!(unescape_key("%2E").as_deref(), Some("."));
        assert_eq!(unescape_key("%2E%2E").as_deref(), Some(".."));
    }

    #[test]
    fn test_escape_rejects_empty_and_long() {
        assert_matches!(escape_key(""), Err(Error::KeyEncoding { .. }));

        let long = "/".repeat(100);
        assert_matches!(escape_key(&long), Err(Error::KeyEncoding { reason, .. }) => {
            assert!(reason.contains("300 bytes"));
        });

        let fits = "a".repeat(MAX_FILE_NAME_BYTES);
        assert_eq!(escape_key(&fits).unwrap(), fits);
    }

    #[test]
    fn test_unescape_round_trip() {
        for key in ["a/b", r"a\b", "c:d", "ünïcødé/🖼", "#hash", "~tilde", "x%2Fy"] {
            let escaped = escape_key(key).unwrap();
            assert_eq!(unescape_key(&escaped).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_unescape_rejects_foreign_names() {
        // Lowercase hex is not what escape_key produces
        assert_eq!(unescape_key("a%2fb"), None);
        // Raw characters escape_key would have encoded
        assert_eq!(unescape_key("a b"), None);
        assert_eq!(unescape_key("."), None);
        assert_eq!(unescape_key(""), None);
    }

    #[test]
    fn test_temp_names_never_collide_with_keys() {
        let temp = temp_file_name();
        assert!(is_temp_file_name(&temp));
        assert!(temp.ends_with(".tmp"));
        assert_eq!(unescape_key(&temp), None);

        let escaped = escape_key(&temp).unwrap();
        assert!(!is_temp_file_name(&escaped));
        assert_ne!(temp_file_name(), temp);
    }
}
