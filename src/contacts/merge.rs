//! Duplicate detection and merge.
//!
//! Similarity between two contacts is the strongest of:
//! - same canonical phone number → 1.0
//! - same email (case-insensitive) → 1.0
//! - normalized Levenshtein of lowercase emails
//! - normalized Levenshtein of lowercase names

use serde::Serialize;

use crate::error::{MergeError, ValidationError};
use crate::model::Contact;
use crate::normalize::normalize_address;
use crate::store::Database;

pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// A pair of contacts that look like the same person.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub contact1_id: String,
    pub contact2_id: String,
    pub similarity: f64,
    pub reason: String,
}

fn lower(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

/// Score a pair. Returns the similarity and a human-readable reason.
pub fn similarity(a: &Contact, b: &Contact) -> (f64, String) {
    if let (Some(pa), Some(pb)) = (a.phone_number.as_deref(), b.phone_number.as_deref())
        && normalize_address(pa) == normalize_address(pb)
    {
        return (1.0, "Same phone number".to_string());
    }

    let mut best = (0.0, String::new());

    if let (Some(ea), Some(eb)) = (lower(a.email.as_deref()), lower(b.email.as_deref())) {
        if ea == eb {
            return (1.0, "Same email".to_string());
        }
        let sim = strsim::normalized_levenshtein(&ea, &eb);
        if sim > best.0 {
            best = (sim, format!("Similar email ({}%)", (sim * 100.0).round()));
        }
    }

    if let (Some(na), Some(nb)) = (lower(a.name.as_deref()), lower(b.name.as_deref())) {
        let sim = strsim::normalized_levenshtein(&na, &nb);
        if sim > best.0 {
            best = (sim, format!("Similar name ({}%)", (sim * 100.0).round()));
        }
    }

    best
}

/// Every pair scoring at or above `threshold`, in input order.
pub fn find_duplicates(contacts: &[Contact], threshold: f64) -> Vec<DuplicateCandidate> {
    let mut out = Vec::new();
    for (i, a) in contacts.iter().enumerate() {
        for b in &contacts[i + 1..] {
            let (score, reason) = similarity(a, b);
            if score >= threshold {
                out.push(DuplicateCandidate {
                    contact1_id: a.id.clone(),
                    contact2_id: b.id.clone(),
                    similarity: score,
                    reason,
                });
            }
        }
    }
    out
}

/// The primary with its missing fields filled from the duplicate and tags unioned.
pub fn merged_fields(primary: &Contact, duplicate: &Contact) -> Contact {
    let mut merged = primary.clone();
    let fill = |mine: &mut Option<String>, theirs: &Option<String>| {
        if mine.as_deref().is_none_or(|v| v.trim().is_empty()) && theirs.is_some() {
            *mine = theirs.clone();
        }
    };
    fill(&mut merged.name, &duplicate.name);
    fill(&mut merged.phone_number, &duplicate.phone_number);
    fill(&mut merged.email, &duplicate.email);
    fill(&mut merged.twitter_handle, &duplicate.twitter_handle);
    fill(&mut merged.facebook_id, &duplicate.facebook_id);
    fill(&mut merged.team_id, &duplicate.team_id);

    for tag in &duplicate.tags {
        if !merged.tags.contains(tag) {
            merged.tags.push(tag.clone());
        }
    }
    merged
}

/// Merge `duplicate_id` into `primary_id` and return the surviving contact.
pub async fn merge_contacts(
    db: &dyn Database,
    primary_id: &str,
    duplicate_id: &str,
) -> Result<Contact, MergeError> {
    if primary_id == duplicate_id {
        return Err(ValidationError::single("duplicateId", "must differ from primaryId").into());
    }

    let primary = db
        .get_contact(primary_id)
        .await?
        .ok_or_else(|| MergeError::ContactNotFound(primary_id.to_string()))?;
    let duplicate = db
        .get_contact(duplicate_id)
        .await?
        .ok_or_else(|| MergeError::ContactNotFound(duplicate_id.to_string()))?;

    let merged = merged_fields(&primary, &duplicate);
    db.merge_contacts(&merged, duplicate_id).await?;
    Ok(merged)
}
