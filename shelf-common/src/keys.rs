//! Durable position key scheme
//!
//! The host application and the session engine both write saved positions into
//! the same flat key/value store. Either writer must produce byte-identical keys
//! so that whichever path last succeeded yields the same recoverable state:
//!
//! - `group_pos_<group>`: position (ms) inside the current track of the group
//! - `track_idx_<group>`: index of the current track
//! - `track_pos_<group>_<index>`: last position (ms) reached inside a given track
//!
//! `<group>` is the group identifier with every character outside
//! `[A-Za-z0-9_.-]` replaced by `_`.

/// Prefix of the group position key
pub const GROUP_POSITION_PREFIX: &str = "group_pos_";

/// Prefix of the current track index key
pub const TRACK_INDEX_PREFIX: &str = "track_idx_";

/// Prefix of the per-track position key
pub const TRACK_POSITION_PREFIX: &str = "track_pos_";

/// Key holding the persisted sleep timer (JSON)
pub const SLEEP_TIMER_KEY: &str = "sleep_timer_state";

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`
pub fn sanitize_group_id(group_id: &str) -> String {
    group_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Key holding the in-track position of a group
pub fn group_position_key(group_id: &str) -> String {
    format!("{}{}", GROUP_POSITION_PREFIX, sanitize_group_id(group_id))
}

/// Key holding the current track index of a group
pub fn track_index_key(group_id: &str) -> String {
    format!("{}{}", TRACK_INDEX_PREFIX, sanitize_group_id(group_id))
}

/// Key holding the last position reached inside one track of a group
pub fn track_position_key(group_id: &str, track_index: usize) -> String {
    format!(
        "{}{}_{}",
        TRACK_POSITION_PREFIX,
        sanitize_group_id(group_id),
        track_index
    )
}

/// All keys written for one saved position, paired with their values
///
/// Order matches the write order used by both the host and the fallback store.
pub fn position_entries(group_id: &str, track_index: usize, position_ms: u64) -> Vec<(String, String)> {
    vec![
        (group_position_key(group_id), position_ms.to_string()),
        (track_index_key(group_id), track_index.to_string()),
        (
            track_position_key(group_id, track_index),
            position_ms.to_string(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_allowed_characters() {
        assert_eq!(sanitize_group_id("Book_1.part-2"), "Book_1.part-2");
    }

    #[test]
    fn test_sanitize_replaces_everything_else() {
        assert_eq!(
            sanitize_group_id("https://host/books/Dune (1965)"),
            "https___host_books_Dune__1965_"
        );
        // Non-ASCII letters are outside the allowed set as well
        assert_eq!(sanitize_group_id("Übung"), "_bung");
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(group_position_key("a b"), "group_pos_a_b");
        assert_eq!(track_index_key("a b"), "track_idx_a_b");
        assert_eq!(track_position_key("a b", 7), "track_pos_a_b_7");
    }

    #[test]
    fn test_position_entries() {
        let entries = position_entries("book/42", 3, 12_500);
        assert_eq!(
            entries,
            vec![
                ("group_pos_book_42".to_string(), "12500".to_string()),
                ("track_idx_book_42".to_string(), "3".to_string()),
                ("track_pos_book_42_3".to_string(), "12500".to_string()),
            ]
        );
    }
}
