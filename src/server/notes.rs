//! Contact note endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use super::messages::user_id;
use super::{ApiError, AppState};
use crate::error::{FieldError, ValidationError};
use crate::model::Note;
use crate::notes::NoteEdit;
use crate::realtime::EventKind;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesQuery {
    contact_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteBody {
    #[serde(default)]
    contact_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    is_private: bool,
    title: Option<String>,
}

impl CreateNoteBody {
    fn into_note(self, author: &str) -> Result<Note, ValidationError> {
        let mut errors = Vec::new();
        if self.contact_id.trim().is_empty() {
            errors.push(FieldError::new("contactId", "Required"));
        }
        if self.content.trim().is_empty() {
            errors.push(FieldError::new("content", "Must not be empty"));
        }
        if !errors.is_empty() {
            return Err(ValidationError(errors));
        }

        let mut note = Note::new(self.contact_id, self.content, author);
        note.is_private = self.is_private;
        note.title = self.title.filter(|t| !t.trim().is_empty());
        Ok(note)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNoteBody {
    content: Option<String>,
    title: Option<String>,
    is_private: Option<bool>,
}

impl UpdateNoteBody {
    fn into_edit(self) -> Result<NoteEdit, ValidationError> {
        if self.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ValidationError::single("content", "Must not be empty"));
        }
        let edit = NoteEdit {
            content: self.content,
            title: self.title,
            is_private: self.is_private,
        };
        if edit.is_empty() {
            return Err(ValidationError::single("body", "Nothing to update"));
        }
        Ok(edit)
    }
}

/// GET /api/notes?contactId=
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NotesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let contact_id = query
        .contact_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ValidationError::single("contactId", "Required"))?;
    let viewer = user_id(&headers);
    let notes = state
        .db
        .list_notes_for_contact(&contact_id, viewer.as_deref())
        .await?;
    Ok(Json(notes))
}

/// POST /api/notes
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateNoteBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let author = user_id(&headers).ok_or_else(ApiError::unauthorized)?;
    let Json(body) = body?;
    let note = body.into_note(&author)?;

    if state.db.get_contact(&note.contact_id).await?.is_none() {
        return Err(ApiError::not_found("Contact not found"));
    }
    state.db.insert_note(&note).await?;

    info!(note_id = %note.id, contact_id = %note.contact_id, private = note.is_private, "Note created");
    announce(&state, &note, EventKind::NoteCreated).await;
    Ok(Json(note))
}

/// PATCH /api/notes/{id}
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<UpdateNoteBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let editor = user_id(&headers).ok_or_else(ApiError::unauthorized)?;
    let Json(body) = body?;
    let edit = body.into_edit()?;

    let mut note = state
        .db
        .get_note(&id)
        .await?
        .filter(|n| n.visible_to(Some(editor.as_str())))
        .ok_or_else(|| ApiError::not_found("Note not found"))?;
    if note.created_by != editor {
        return Err(ApiError::forbidden("Only the author can edit a note"));
    }

    edit.apply(&mut note, &editor);
    state.db.update_note(&note).await?;

    info!(note_id = %note.id, "Note updated");
    announce(&state, &note, EventKind::NoteUpdated).await;
    Ok(Json(note))
}

/// Public notes go to the contact topic. Private notes only reach the
/// author and the mentioned users.
async fn announce(state: &AppState, note: &Note, event: EventKind) {
    let payload = serde_json::json!({
        "note": note,
        "userId": note.created_by,
    });
    if !note.is_private {
        state
            .fanout
            .notify_contact(&note.contact_id, event, payload)
            .await;
        return;
    }

    let mut recipients = vec![note.created_by.as_str()];
    recipients.extend(
        note.mentions
            .iter()
            .map(String::as_str)
            .filter(|m| *m != note.created_by),
    );
    for user in recipients {
        state.fanout.notify_user(user, event, payload.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_is_validated() {
        let err = CreateNoteBody {
            contact_id: " ".into(),
            content: "".into(),
            is_private: false,
            title: None,
        }
        .into_note("u1")
        .unwrap_err();
        let fields: Vec<_> = err.fields().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["contactId", "content"]);
    }

    #[test]
    fn create_body_builds_note() {
        let note = CreateNoteBody {
            contact_id: "c1".into(),
            content: "loop in @bob".into(),
            is_private: true,
            title: Some("".into()),
        }
        .into_note("alice")
        .unwrap();
        assert_eq!(note.created_by, "alice");
        assert_eq!(note.mentions, vec!["bob".to_string()]);
        assert!(note.is_private);
        assert!(note.title.is_none());
    }

    #[test]
    fn empty_update_is_rejected() {
        let empty = UpdateNoteBody {
            content: None,
            title: None,
            is_private: None,
        };
        assert!(empty.into_edit().is_err());

        let blank = UpdateNoteBody {
            content: Some("  ".into()),
            title: None,
            is_private: None,
        };
        assert_eq!(blank.into_edit().unwrap_err().fields()[0].field, "content");
    }
}
