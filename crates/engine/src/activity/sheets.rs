//! HTTP transport for spreadsheet documents
//!
//! Metadata mode reads developer metadata entries keyed `PB_ACTIVITY:<actor>`
//! whose values are epoch seconds, written by the sheet's edit hook. Legacy
//! mode walks the file's revision history.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use huntbot_core::EditEvent;

use super::transport::{ActivityTransport, DocumentMetadata, Revision, RevisionPage, TransportError};

/// Developer metadata key prefix for per-actor edit timestamps
pub const ACTIVITY_METADATA_PREFIX: &str = "PB_ACTIVITY:";

const DEFAULT_SHEETS_URL: &str = "https://sheets.googleapis.com";
const DEFAULT_DRIVE_URL: &str = "https://www.googleapis.com";
const QUOTA_REASONS: [&str; 4] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "RESOURCE_EXHAUSTED",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    developer_metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataEntry {
    metadata_key: String,
    #[serde(default)]
    metadata_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionListResponse {
    #[serde(default)]
    revisions: Vec<RevisionEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionEntry {
    modified_time: DateTime<Utc>,
    #[serde(default)]
    last_modifying_user: Option<RevisionUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionUser {
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl RevisionUser {
    /// Account name: the email local part, else the display name
    fn actor(&self) -> Option<String> {
        self.email_address
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .or(self.display_name.as_deref())
            .map(str::to_string)
    }
}

/// Spreadsheet document transport with bearer-token auth
#[derive(Clone)]
pub struct SheetsActivityTransport {
    client: reqwest::Client,
    sheets_url: String,
    drive_url: String,
    token: String,
}

impl SheetsActivityTransport {
    /// Create a transport against the public endpoints
    pub fn new(token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            sheets_url: DEFAULT_SHEETS_URL.to_string(),
            drive_url: DEFAULT_DRIVE_URL.to_string(),
            token: token.into(),
        }
    }

    /// Point both APIs at one base URL (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        self.sheets_url = base_url.clone();
        self.drive_url = base_url;
        self
    }

    async fn get_json<T: DeserializeOwned + Default>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn spreadsheet(
        &self,
        document_ref: &str,
        fields: &str,
    ) -> Result<SpreadsheetResponse, TransportError> {
        let url = format!("{}/v4/spreadsheets/{}", self.sheets_url, document_ref);
        self.get_json(&url, &[("fields", fields)]).await
    }
}

fn error_for_status(status: StatusCode, body: String) -> TransportError {
    let quota = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && QUOTA_REASONS.iter().any(|reason| body.contains(reason)));

    if quota {
        TransportError::QuotaExceeded(format!("HTTP {}", status.as_u16()))
    } else {
        TransportError::Http {
            status: status.as_u16(),
            message: body,
        }
    }
}

fn parse_metadata(response: SpreadsheetResponse) -> DocumentMetadata {
    let mut edits = Vec::new();
    for entry in response.developer_metadata {
        let Some(actor) = entry.metadata_key.strip_prefix(ACTIVITY_METADATA_PREFIX) else {
            continue;
        };
        let timestamp = entry
            .metadata_value
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        match timestamp {
            Some(timestamp) if !actor.is_empty() => edits.push(EditEvent::new(actor, timestamp)),
            _ => warn!(key = %entry.metadata_key, "Skipping unreadable activity metadata"),
        }
    }

    DocumentMetadata {
        edits,
        segment_count: response.sheets.map(|s| s.len() as u32),
    }
}

#[async_trait]
impl ActivityTransport for SheetsActivityTransport {
    async fn fetch_metadata(&self, document_ref: &str) -> Result<DocumentMetadata, TransportError> {
        let response = self
            .spreadsheet(
                document_ref,
                "sheets(properties(sheetId)),developerMetadata(metadataKey,metadataValue)",
            )
            .await?;
        let metadata = parse_metadata(response);
        debug!(
            document_ref,
            edits = metadata.edits.len(),
            segments = ?metadata.segment_count,
            "Fetched activity metadata"
        );
        Ok(metadata)
    }

    async fn list_revisions(
        &self,
        document_ref: &str,
        page_token: Option<&str>,
    ) -> Result<RevisionPage, TransportError> {
        let url = format!("{}/drive/v3/files/{}/revisions", self.drive_url, document_ref);
        let fields = "nextPageToken,revisions(modifiedTime,lastModifyingUser(displayName,emailAddress))";
        let mut query = vec![("fields", fields), ("pageSize", "1000")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let page: RevisionListResponse = self.get_json(&url, &query).await?;

        let revisions: Vec<_> = page
            .revisions
            .into_iter()
            .filter_map(|entry| {
                let actor = entry.last_modifying_user.as_ref()?.actor()?;
                Some(Revision {
                    actor,
                    modified: entry.modified_time,
                })
            })
            .collect();
        let next_page_token = page.next_page_token.filter(|token| !token.is_empty());

        debug!(
            document_ref,
            revisions = revisions.len(),
            more = next_page_token.is_some(),
            "Listed revision page"
        );
        Ok(RevisionPage {
            revisions,
            next_page_token,
        })
    }

    async fn segment_count(&self, document_ref: &str) -> Result<Option<u32>, TransportError> {
        let response = self
            .spreadsheet(document_ref, "sheets(properties(sheetId))")
            .await?;
        Ok(response.sheets.map(|s| s.len() as u32))
    }
}
