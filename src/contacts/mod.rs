//! Contact identity: resolution from inbound addresses, duplicate detection and merge.

pub mod merge;
pub mod resolver;

pub use merge::{DEFAULT_THRESHOLD, DuplicateCandidate, find_duplicates, merge_contacts};
pub use resolver::{Resolved, resolve_contact};
