//! Transport port for document activity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use huntbot_core::EditEvent;

use crate::reliability::{Classify, ErrorClass};

/// Per-editor activity kept in a document's metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Latest edit per actor
    pub edits: Vec<EditEvent>,
    /// Number of segments (sheets) in the document
    pub segment_count: Option<u32>,
}

impl DocumentMetadata {
    /// Whether the document carries activity metadata at all
    pub fn has_activity(&self) -> bool {
        !self.edits.is_empty()
    }
}

/// One entry of a document's revision history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub actor: String,
    pub modified: DateTime<Utc>,
}

/// One page of revision history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionPage {
    pub revisions: Vec<Revision>,
    /// Token for the following page; `None` on the last page
    pub next_page_token: Option<String>,
}

impl From<Revision> for EditEvent {
    fn from(revision: Revision) -> Self {
        EditEvent::new(revision.actor, revision.modified)
    }
}

/// Errors from the document service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Rate limit or quota rejection
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other non-success response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection failure or timeout
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Classify for TransportError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::QuotaExceeded(_) => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Calls against the external document service.
///
/// Each method is one outbound call; rate limiting and retries are applied
/// by the caller.
#[async_trait]
pub trait ActivityTransport: Send + Sync + 'static {
    /// Activity metadata plus segment count, in one call
    async fn fetch_metadata(&self, document_ref: &str) -> Result<DocumentMetadata, TransportError>;

    /// One page of revision history, starting at `page_token` or the first page
    async fn list_revisions(
        &self,
        document_ref: &str,
        page_token: Option<&str>,
    ) -> Result<RevisionPage, TransportError>;

    /// Number of segments (sheets) in the document
    async fn segment_count(&self, document_ref: &str) -> Result<Option<u32>, TransportError>;
}
