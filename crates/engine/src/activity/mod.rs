//! Document activity
//!
//! Edits are tracked one of two ways:
//! - metadata mode: per-actor last-edit timestamps stored on the document
//! - legacy mode: the document's revision history
//!
//! [`ActivitySource`] hides the difference behind [`ActivityFetch`] and owns
//! the one-way upgrade from legacy to metadata tracking.

mod sheets;
mod source;
mod transport;

pub use sheets::{SheetsActivityTransport, ACTIVITY_METADATA_PREFIX};
pub use source::{ActivityError, ActivityFetch, ActivitySource};
pub use transport::{ActivityTransport, DocumentMetadata, Revision, RevisionPage, TransportError};
