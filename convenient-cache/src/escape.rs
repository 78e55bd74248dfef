//! Reversible escaping for job id components
//!
//! `.` separates the fields of a job id and `@` separates list items, so any
//! raw string embedded in an id escapes both of them along with the escape
//! character itself:
//!
//! | raw | escaped |
//! |-----|---------|
//! | `_` | `__`    |
//! | `@` | `_a`    |
//! | `.` | `_b`    |
//!
//! An escaped string never contains `.` or `@`, which lets ids nest: an
//! escaped id can be a field of another id and still split on the first `.`.

/// Errors produced while decoding an escaped component
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscapeError {
    /// `_` followed by something other than `_`, `a` or `b`
    #[error("Invalid escape sequence '_{found}' at byte {position} in '{input}'")]
    InvalidEscape {
        /// Full encoded input
        input: String,
        /// Byte offset of the `_`
        position: usize,
        /// Character that followed the `_`
        found: char,
    },

    /// Input ends in the middle of an escape sequence
    #[error("Dangling escape character at end of '{0}'")]
    TrailingEscape(String),
}

/// Escape a raw string for use inside a job id
pub fn escape_str(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '_' => out.push_str("__"),
            '@' => out.push_str("_a"),
            '.' => out.push_str("_b"),
            other => out.push(other),
        }
    }
    out
}

/// Decode a string produced by [`escape_str`]
pub fn unescape_str(encoded: &str) -> Result<String, EscapeError> {
    let mut out = String::with_capacity(encoded.len());
    let mut escape_at = None;

    for (position, c) in encoded.char_indices() {
        match escape_at.take() {
            None if c == '_' => escape_at = Some(position),
            None => out.push(c),
            Some(position) => match c {
                '_' => out.push('_'),
                'a' => out.push('@'),
                'b' => out.push('.'),
                found => {
                    return Err(EscapeError::InvalidEscape {
                        input: encoded.to_string(),
                        position,
                        found,
                    });
                }
            },
        }
    }

    if escape_at.is_some() {
        return Err(EscapeError::TrailingEscape(encoded.to_string()));
    }
    Ok(out)
}

/// Escape every item and join them with `@`
///
/// The empty list and the single-empty-string list share the encoding `""`;
/// decoding yields the latter.
pub fn escape_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| escape_str(item.as_ref()))
        .collect::<Vec<_>>()
        .join("@")
}

/// Decode a list produced by [`escape_list`]
pub fn unescape_list(encoded: &str) -> Result<Vec<String>, EscapeError> {
    encoded.split('@').map(unescape_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(escape_str("a.b"), "a_bb");
        assert_eq!(escape_str("x@y"), "x_ay");
        assert_eq!(escape_str("snake_case"), "snake__case");
        assert_eq!(escape_str("plain"), "plain");
    }

    #[test]
    fn test_escaped_has_no_separators() {
        let escaped = escape_str("gen.cpp@v1_final.2");
        assert!(!escaped.contains('.'));
        assert!(!escaped.contains('@'));
    }

    #[test]
    fn test_list_encoding() {
        assert_eq!(escape_list(&["gen", "10", "a.b"]), "gen@10@a_bb");
        assert_eq!(
            unescape_list("gen@10@a_bb").unwrap(),
            vec!["gen".to_string(), "10".to_string(), "a.b".to_string()]
        );
    }

    #[test]
    fn test_empty_list_decodes_to_single_empty_item() {
        assert_eq!(escape_list::<&str>(&[]), "");
        assert_eq!(unescape_list("").unwrap(), vec![String::new()]);
    }

    #[test]
    fn test_invalid_escape_rejected() {
        let err = unescape_str("ab_c").unwrap_err();
        assert_eq!(
            err,
            EscapeError::InvalidEscape {
                input: "ab_c".to_string(),
                position: 2,
                found: 'c',
            }
        );
    }

    #[test]
    fn test_trailing_escape_rejected() {
        assert!(matches!(
            unescape_str("abc_"),
            Err(EscapeError::TrailingEscape(_))
        ));
        assert!(unescape_list("ok@bad_").is_err());
    }

    #[test]
    fn test_non_ascii_passthrough() {
        let raw = "тест_файл.txt";
        assert_eq!(unescape_str(&escape_str(raw)).unwrap(), raw);
    }
}
