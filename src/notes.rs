//! Contact notes: mention parsing and in-place edits.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::model::Note;

/// `@name` at the start of the text or after a non-word character, so the
/// domain of an email address is not read as a mention.
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|[^\w@])@(\w+)").unwrap());

/// Mentioned user ids in order of first appearance, without repeats.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for cap in MENTION_RE.captures_iter(content) {
        let name = &cap[1];
        if !mentions.iter().any(|m| m == name) {
            mentions.push(name.to_string());
        }
    }
    mentions
}

/// Partial update to a note. `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct NoteEdit {
    pub content: Option<String>,
    pub title: Option<String>,
    pub is_private: Option<bool>,
}

impl NoteEdit {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.title.is_none() && self.is_private.is_none()
    }

    /// Apply the edit. New content re-derives the mention list.
    pub fn apply(self, note: &mut Note, editor: &str) {
        if let Some(content) = self.content {
            note.mentions = extract_mentions(&content);
            note.content = content;
        }
        if let Some(title) = self.title {
            note.title = Some(title).filter(|t| !t.trim().is_empty());
        }
        if let Some(is_private) = self.is_private {
            note.is_private = is_private;
        }
        note.updated_by = Some(editor.to_string());
        note.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_deduplicated_in_order() {
        assert_eq!(
            extract_mentions("@bob can you check with @carol_2? cc @bob"),
            vec!["bob".to_string(), "carol_2".to_string()]
        );
        assert!(extract_mentions("no mentions here").is_empty());
    }

    #[test]
    fn email_addresses_are_not_mentions() {
        assert!(extract_mentions("write to ada@example.com").is_empty());
        assert_eq!(extract_mentions("(@dan) ada@example.com"), vec!["dan".to_string()]);
    }

    #[test]
    fn edit_rederives_mentions_and_stamps_editor() {
        let mut note = Note::new("c1", "ask @bob", "alice");
        let before = note.updated_at;

        NoteEdit {
            content: Some("ask @carol instead".into()),
            is_private: Some(true),
            ..Default::default()
        }
        .apply(&mut note, "alice");

        assert_eq!(note.mentions, vec!["carol".to_string()]);
        assert!(note.is_private);
        assert_eq!(note.updated_by.as_deref(), Some("alice"));
        assert!(note.updated_at >= before);
    }

    #[test]
    fn blank_title_clears_it() {
        let mut note = Note::new("c1", "text", "alice");
        note.title = Some("Old".into());
        NoteEdit {
            title: Some("  ".into()),
            ..Default::default()
        }
        .apply(&mut note, "alice");
        assert!(note.title.is_none());
    }
}
