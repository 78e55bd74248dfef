//! Property tests for the id escaping grammar

use convenient_cache::{escape_list, escape_str, unescape_list, unescape_str};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_string_round_trip(raw in "[ -~]*") {
        prop_assert_eq!(unescape_str(&escape_str(&raw)).unwrap(), raw);
    }

    #[test]
    fn prop_escaped_has_no_separators(raw in "[ -~]*") {
        let escaped = escape_str(&raw);
        prop_assert!(!escaped.contains('.'));
        prop_assert!(!escaped.contains('@'));
    }

    #[test]
    fn prop_list_round_trip(items in prop::collection::vec("[ -~]*", 1..8)) {
        prop_assert_eq!(unescape_list(&escape_list(&items)).unwrap(), items);
    }
}
