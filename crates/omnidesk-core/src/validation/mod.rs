//! Inbound content sanitization.
//!
//! Webhook bodies come straight from the internet; content is stripped of
//! control characters, unicode-normalized, and truncated to the channel's
//! limit before it is persisted. Oversized content is truncated rather
//! than rejected so a long visitor message still lands in the inbox.

use unicode_normalization::UnicodeNormalization;

/// Sanitize and bound inbound message content.
///
/// 1. Strip null bytes and control characters (newlines and tabs survive).
/// 2. NFKC-normalize.
/// 3. Truncate to `max_chars` characters.
#[must_use]
pub fn sanitize_content(input: &str, max_chars: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
        .nfkc()
        .collect();

    if cleaned.chars().count() <= max_chars {
        cleaned
    } else {
        cleaned.chars().take(max_chars).collect()
    }
}
