//! Conversation title derivation

/// Title used when the first user message carries no usable text.
pub const PLACEHOLDER_TITLE: &str = "New session";

const MAX_TITLE_CHARS: usize = 30;

/// Truncate to the display budget, appending `…` when over.
pub fn truncate_title(text: &str) -> String {
    let mut out: String = text.chars().take(MAX_TITLE_CHARS).collect();
    if text.chars().count() > MAX_TITLE_CHARS {
        out.push('…');
    }
    out
}

/// Title for a new conversation, derived from the first user message.
pub fn title_from_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }
    truncate_title(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_stored_verbatim() {
        assert_eq!(title_from_message("hello"), "hello");
        assert_eq!(title_from_message("exactly-thirty-characters-long"), "exactly-thirty-characters-long");
    }

    #[test]
    fn long_message_is_truncated_with_ellipsis() {
        let message = "a".repeat(31);
        let title = title_from_message(&message);
        assert_eq!(title.chars().count(), 31);
        assert_eq!(title, format!("{}…", "a".repeat(30)));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let message = "é".repeat(31);
        assert_eq!(
            title_from_message(&message),
            format!("{}…", "é".repeat(30))
        );
    }

    #[test]
    fn blank_message_falls_back_to_placeholder() {
        assert_eq!(title_from_message("   \n\t "), PLACEHOLDER_TITLE);
        assert_eq!(title_from_message(""), PLACEHOLDER_TITLE);
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(title_from_message("  fix the build  "), "fix the build");
    }
}
