//! Address normalization and channel classification for inbound traffic.
//!
//! The E.164 handling is a best-effort heuristic, not ITU validation:
//! - already `+`-prefixed → unchanged
//! - 10 digits → assume NANP, prefix `+1`
//! - 11 digits starting with `1` → prefix `+`
//! - anything else → prefix `+`
//!
//! Ingestion idempotency relies on these functions being pure.

use crate::channels::ChannelKind;

/// Transport prefix the chat-app provider puts on its addresses.
pub const CHAT_PREFIX: &str = "whatsapp:";

/// Whether an address carries the chat-app transport prefix.
pub fn has_chat_prefix(raw: &str) -> bool {
    raw.trim_start()
        .get(..CHAT_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(CHAT_PREFIX))
}

/// Remove the chat-app transport prefix, if present.
pub fn strip_chat_prefix(raw: &str) -> &str {
    let trimmed = raw.trim();
    if has_chat_prefix(trimmed) {
        trimmed.get(CHAT_PREFIX.len()..).unwrap_or_default()
    } else {
        trimmed
    }
}

/// Add the chat-app transport prefix unless it is already there.
pub fn with_chat_prefix(address: &str) -> String {
    if has_chat_prefix(address) {
        address.trim().to_string()
    } else {
        format!("{CHAT_PREFIX}{}", address.trim())
    }
}

/// Normalize a raw provider address into its canonical E.164-style form.
pub fn normalize_address(raw: &str) -> String {
    let cleaned: String = strip_chat_prefix(raw)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.starts_with('+') {
        return cleaned;
    }
    if cleaned.len() == 10 {
        return format!("+1{cleaned}");
    }
    if cleaned.len() == 11 && cleaned.starts_with('1') {
        return format!("+{cleaned}");
    }
    format!("+{cleaned}")
}

/// Classify an inbound exchange as chat-app or SMS from its raw addresses.
pub fn classify_channel(from: &str, to: &str) -> ChannelKind {
    if has_chat_prefix(from) || has_chat_prefix(to) {
        ChannelKind::Whatsapp
    } else {
        ChannelKind::Sms
    }
}
