//! Find-or-create of a contact keyed on its canonical phone number.

use crate::error::DatabaseError;
use crate::model::Contact;
use crate::store::Database;

/// Outcome of resolving an inbound address to a contact.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub contact: Contact,
    pub created: bool,
    pub renamed: bool,
}

impl Resolved {
    /// Whether subscribers should hear about this contact.
    pub fn changed(&self) -> bool {
        self.created || self.renamed
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve `address` to a contact, creating it if unknown.
///
/// A new contact is named after `profile_name`, else `fallback_name`, else the
/// address. An existing contact is renamed only when a non-empty
/// `profile_name` differs from its stored name.
///
/// Safe under concurrent calls for the same address: creation relies on the
/// unique phone-number constraint, not on a prior lookup.
pub async fn resolve_contact(
    db: &dyn Database,
    address: &str,
    profile_name: Option<&str>,
    fallback_name: Option<&str>,
) -> Result<Resolved, DatabaseError> {
    let profile_name = non_empty(profile_name);
    let initial_name = profile_name
        .or_else(|| non_empty(fallback_name))
        .unwrap_or(address);

    let (mut contact, created) = db.find_or_create_contact_by_phone(address, initial_name).await?;

    let mut renamed = false;
    let rename_to = profile_name.filter(|name| !created && contact.name.as_deref() != Some(*name));
    if let Some(name) = rename_to {
        db.update_contact_name(&contact.id, name).await?;
        tracing::info!(contact_id = %contact.id, "Contact renamed from provider profile");
        contact.name = Some(name.to_string());
        renamed = true;
    }

    Ok(Resolved {
        contact,
        created,
        renamed,
    })
}
