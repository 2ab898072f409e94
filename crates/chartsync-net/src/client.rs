//! HTTP sync transport
//!
//! Pushes one collection's queued records to the remote sync endpoint as a
//! single batch POST and maps every outcome onto the `SyncFailure` taxonomy.
//! The engine owns retry policy; this client only classifies.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chartsync_net::client::HttpSyncTransport;
//!
//! # fn example() -> anyhow::Result<()> {
//! let transport = HttpSyncTransport::new("https://sync.example.org")?
//!     .with_bearer_token("access-token-here");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

use chartsync_core::domain::{Collection, PendingRecord, SyncFailure};
use chartsync_core::ports::{BatchAck, SyncTransport};

/// Total request deadline; a hung request must not stall the drain loop
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum characters of response body carried into rejection reasons
const REASON_EXCERPT_LEN: usize = 200;

// ============================================================================
// HttpSyncTransport
// ============================================================================

/// Batch transport over HTTP for the `/api/sync/<collection>` endpoints.
///
/// The request body is a single JSON object keyed by the collection name,
/// holding the queued payloads in submission order:
///
/// ```json
/// { "patients": [ { ... }, { ... } ] }
/// ```
///
/// A 2xx response may carry a per-record acknowledgment body; remotes that
/// answer with an empty or non-acknowledgment body accept the whole batch.
pub struct HttpSyncTransport {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpSyncTransport {
    /// Create a transport targeting the given server base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        })
    }

    /// Attach a bearer token sent in the Authorization header of every push.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Server base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn push_batch(
        &self,
        collection: Collection,
        records: &[PendingRecord],
    ) -> Result<BatchAck, SyncFailure> {
        let path = collection
            .endpoint_path()
            .ok_or(SyncFailure::NotSyncable(collection))?;
        let url = format!("{}{}", self.base_url, path);

        let payloads: Vec<serde_json::Value> =
            records.iter().map(|r| r.payload().clone()).collect();
        let mut body = serde_json::Map::new();
        body.insert(
            collection.as_str().to_string(),
            serde_json::Value::Array(payloads),
        );

        debug!(
            collection = %collection,
            records = records.len(),
            url = %url,
            "Pushing batch to sync endpoint"
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncFailure::NetworkUnavailable(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| SyncFailure::NetworkUnavailable(e.to_string()))?;
            let ack = parse_ack(&text, records);
            debug!(
                collection = %collection,
                accepted = ack.accepted.len(),
                rejected = ack.rejected.len(),
                "Batch acknowledged"
            );
            return Ok(ack);
        }

        if status.is_client_error() {
            let reason = reason_excerpt(&response.text().await.unwrap_or_default());
            warn!(
                collection = %collection,
                status = status.as_u16(),
                reason = %reason,
                "Remote rejected batch"
            );
            return Err(SyncFailure::RemoteRejected {
                status: status.as_u16(),
                reason,
            });
        }

        warn!(
            collection = %collection,
            status = status.as_u16(),
            "Remote server error, batch will be retried"
        );
        Err(SyncFailure::RemoteServerError {
            status: status.as_u16(),
        })
    }
}

// ============================================================================
// Response handling
// ============================================================================

/// Interpret a 2xx response body as a per-record acknowledgment.
///
/// Remotes that predate per-record acks answer with an empty body or an
/// unrelated JSON document; both mean the whole batch was accepted. An ack
/// that names no record at all is treated the same way, since a remote that
/// committed nothing would not have answered 2xx.
fn parse_ack(body: &str, records: &[PendingRecord]) -> BatchAck {
    match serde_json::from_str::<BatchAck>(body) {
        Ok(ack) if !ack.accepted.is_empty() || !ack.rejected.is_empty() => ack,
        _ => BatchAck::whole_batch(records),
    }
}

/// First line of a response body, truncated for logs and dead-letter reasons.
fn reason_excerpt(body: &str) -> String {
    let line = body.lines().next().unwrap_or("").trim();
    if line.chars().count() <= REASON_EXCERPT_LEN {
        return line.to_string();
    }
    let mut excerpt: String = line.chars().take(REASON_EXCERPT_LEN).collect();
    excerpt.push_str("...");
    excerpt
}
