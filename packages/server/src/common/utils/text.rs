/// Longest error text stored on a job row.
pub const MAX_ERROR_CHARS: usize = 1000;

/// Truncate `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The last `max_chars` characters of `text`, on a char boundary.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Error text as persisted in `error_message`.
pub fn bounded_error(text: &str) -> String {
    truncate_chars(text, MAX_ERROR_CHARS).to_string()
}
