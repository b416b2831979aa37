//! Per-puzzle activity fetch in either tracking mode

use std::sync::Arc;

use tracing::{debug, info, warn};

use huntbot_core::{DocumentActivityMode, EditEvent, Puzzle};

use super::transport::{ActivityTransport, TransportError};
use crate::context::SchedulerContext;
use crate::persistence::{AssignmentStore, StoreError};
use crate::reliability::{CallOutcome, RetryableClient};

/// Edit activity for one document, tagged with the mode that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityFetch {
    Metadata {
        events: Vec<EditEvent>,
        document_meta_count: Option<u32>,
    },
    Legacy {
        events: Vec<EditEvent>,
        document_meta_count: Option<u32>,
    },
}

impl ActivityFetch {
    /// A fetch that found nothing
    pub fn empty(mode: DocumentActivityMode) -> Self {
        match mode {
            DocumentActivityMode::Metadata => Self::Metadata {
                events: Vec::new(),
                document_meta_count: None,
            },
            DocumentActivityMode::Legacy => Self::Legacy {
                events: Vec::new(),
                document_meta_count: None,
            },
        }
    }

    pub fn mode(&self) -> DocumentActivityMode {
        match self {
            Self::Metadata { .. } => DocumentActivityMode::Metadata,
            Self::Legacy { .. } => DocumentActivityMode::Legacy,
        }
    }

    pub fn events(&self) -> &[EditEvent] {
        match self {
            Self::Metadata { events, .. } | Self::Legacy { events, .. } => events,
        }
    }

    pub fn document_meta_count(&self) -> Option<u32> {
        match self {
            Self::Metadata {
                document_meta_count,
                ..
            }
            | Self::Legacy {
                document_meta_count,
                ..
            } => *document_meta_count,
        }
    }

    pub fn into_events(self) -> Vec<EditEvent> {
        match self {
            Self::Metadata { events, .. } | Self::Legacy { events, .. } => events,
        }
    }
}

/// Errors from an activity fetch
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// Quota retries exhausted; skip this puzzle for the cycle
    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    GaveUp {
        operation: &'static str,
        attempts: u32,
        last_error: TransportError,
    },

    /// Non-retryable transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Persisting the mode upgrade failed
    #[error("failed to persist activity mode: {0}")]
    Store(#[from] StoreError),
}

/// Fetches edit activity through the shared rate limiter and retry policy
#[derive(Clone)]
pub struct ActivitySource {
    transport: Arc<dyn ActivityTransport>,
    client: RetryableClient,
}

impl ActivitySource {
    pub fn new(transport: Arc<dyn ActivityTransport>, ctx: Arc<SchedulerContext>) -> Self {
        Self {
            transport,
            client: RetryableClient::new(ctx),
        }
    }

    /// Fetch activity for the puzzle in its current tracking mode.
    ///
    /// A puzzle without a document yields an empty fetch with no calls made.
    pub async fn fetch(&self, puzzle: &Puzzle) -> Result<ActivityFetch, ActivityError> {
        let Some(document_ref) = puzzle.document_ref.as_deref() else {
            return Ok(ActivityFetch::empty(puzzle.document_activity_mode));
        };
        match puzzle.document_activity_mode {
            DocumentActivityMode::Metadata => self.fetch_metadata(document_ref).await,
            DocumentActivityMode::Legacy => self.fetch_legacy(document_ref).await,
        }
    }

    /// One batched metadata call
    pub async fn fetch_metadata(&self, document_ref: &str) -> Result<ActivityFetch, ActivityError> {
        let transport = &self.transport;
        let outcome = self
            .client
            .call("fetch_metadata", || transport.fetch_metadata(document_ref))
            .await;
        let metadata = settle("fetch_metadata", document_ref, outcome)?;

        Ok(ActivityFetch::Metadata {
            events: metadata.edits,
            document_meta_count: metadata.segment_count,
        })
    }

    /// Revision history plus a separate segment count.
    ///
    /// Each revision page is its own rate-limited call, so a quota retry
    /// repeats only the page that was rejected.
    pub async fn fetch_legacy(&self, document_ref: &str) -> Result<ActivityFetch, ActivityError> {
        let transport = &self.transport;
        let mut revisions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.as_deref();
            let outcome = self
                .client
                .call("list_revisions", || transport.list_revisions(document_ref, token))
                .await;
            let page = settle("list_revisions", document_ref, outcome)?;
            revisions.extend(page.revisions);

            match page.next_page_token {
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    warn!(document_ref, page_token = %next, "Revision page token repeated, stopping");
                    break;
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        let outcome = self
            .client
            .call("segment_count", || transport.segment_count(document_ref))
            .await;
        let document_meta_count = settle("segment_count", document_ref, outcome)?;

        Ok(ActivityFetch::Legacy {
            events: revisions.into_iter().map(EditEvent::from).collect(),
            document_meta_count,
        })
    }

    /// Check a legacy puzzle for activity metadata.
    ///
    /// When the document has metadata, the puzzle is switched to metadata
    /// tracking in the store and this pass's metadata fetch is returned.
    /// Returns `None` when the puzzle should keep using revision history,
    /// including when the metadata check itself fails for a reason other than quota.
    pub async fn upgrade_if_available(
        &self,
        puzzle: &Puzzle,
        store: &dyn AssignmentStore,
    ) -> Result<Option<ActivityFetch>, ActivityError> {
        if puzzle.document_activity_mode != DocumentActivityMode::Legacy {
            return Ok(None);
        }
        let Some(document_ref) = puzzle.document_ref.as_deref() else {
            return Ok(None);
        };

        let fetch = match self.fetch_metadata(document_ref).await {
            Ok(fetch) => fetch,
            Err(ActivityError::Transport(e)) => {
                warn!(puzzle_id = %puzzle.id, error = %e, "Metadata check failed, staying on revisions");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if fetch.events().is_empty() {
            debug!(puzzle_id = %puzzle.id, "No activity metadata yet, staying on revisions");
            return Ok(None);
        }

        if store.upgrade_activity_mode(puzzle.id).await? {
            info!(puzzle_id = %puzzle.id, puzzle = %puzzle.name, "Upgraded to metadata activity tracking");
        }
        Ok(Some(fetch))
    }
}

/// Turn a call outcome into a value. Malformed responses count as empty.
fn settle<T: Default>(
    operation: &'static str,
    document_ref: &str,
    outcome: CallOutcome<T, TransportError>,
) -> Result<T, ActivityError> {
    match outcome {
        CallOutcome::Success(value) => Ok(value),
        CallOutcome::GaveUp {
            attempts,
            last_error,
        } => Err(ActivityError::GaveUp {
            operation,
            attempts,
            last_error,
        }),
        CallOutcome::Failed(TransportError::Malformed(reason)) => {
            warn!(operation, document_ref, %reason, "Malformed response, treating as empty");
            Ok(T::default())
        }
        CallOutcome::Failed(e) => Err(ActivityError::Transport(e)),
    }
}
