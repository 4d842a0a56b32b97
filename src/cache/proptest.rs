//! Property-Based Tests for Key Escaping
//!
//! # Test Properties
//!
//! 1. **Round trip**: unescape(escape(k)) = k
//! 2. **Injectivity**: distinct keys never share a file name
//! 3. **Safe names**: escaped names are single, non-reserved path components

#![cfg(test)]

use proptest::prelude::*;

use super::escape::{escape_key, is_temp_file_name, unescape_key, MAX_FILE_NAME_BYTES};

/// Keys biased towards path and URL punctuation
fn key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9/\\\\:.%?&=#~_ -]{1,60}",
        "\\PC{1,30}",
        Just("..".to_string()),
        Just(".".to_string()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_escape_round_trips(key in key_strategy()) {
        prop_assume!(!key.contains('\0'));
        if let Ok(name) = escape_key(&key) {
            prop_assert_eq!(unescape_key(&name), Some(key));
        }
    }

    #[test]
    fn prop_escape_is_injective(a in key_strategy(), b in key_strategy()) {
        prop_assume!(a != b);
        if let (Ok(x), Ok(y)) = (escape_key(&a), escape_key(&b)) {
            prop_assert_ne!(x, y);
        }
    }

    #[test]
    fn prop_escaped_name_is_a_safe_component(key in key_strategy()) {
        if let Ok(name) = escape_key(&key) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= MAX_FILE_NAME_BYTES);
            prop_assert!(name != "." && name != "..");
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.contains('\\'));
            prop_assert!(!name.contains(':'));
            prop_assert!(!name.contains('\0'));
            prop_assert!(!is_temp_file_name(&name));
        }
    }
}
