use crate::error::Error;
use crate::store::LogStore;
use crate::types::{CapturedHeaders, NewRecord, RecordId};
use crate::verification;
use chrono::Utc;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Result of handling one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Verified and parsed. `record_id` is `None` when the store write failed.
    Accepted { record_id: Option<RecordId> },
    /// Signature missing or wrong; nothing was parsed or stored.
    Unauthorized,
    /// Something went wrong after the signature check passed.
    ServerError(String),
}

/// Verifies, parses and stores inbound Novu email webhooks.
#[derive(Clone)]
pub struct Ingestor {
    secret: Arc<str>,
    store: Arc<dyn LogStore>,
}

impl Ingestor {
    pub fn new(secret: impl Into<Arc<str>>, store: Arc<dyn LogStore>) -> Self {
        Self {
            secret: secret.into(),
            store,
        }
    }

    pub async fn ingest(&self, raw_body: &[u8], headers: CapturedHeaders) -> IngestOutcome {
        let delivery_id = Uuid::new_v4();
        let span = tracing::info_span!("ingest", %delivery_id);
        self.ingest_inner(raw_body, headers).instrument(span).await
    }

    async fn ingest_inner(&self, raw_body: &[u8], headers: CapturedHeaders) -> IngestOutcome {
        tracing::info!(
            signature = %headers.signature,
            content_type = %headers.content_type,
            user_agent = %headers.user_agent,
            "webhook received"
        );

        if !verification::verify_novu_hmac(&self.secret, raw_body, &headers.signature) {
            tracing::warn!("{}", Error::InvalidSignature);
            return IngestOutcome::Unauthorized;
        }

        let data: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(v) => v,
            Err(e) => {
                let err = Error::MalformedPayload(e);
                tracing::error!(error = %err, "verified webhook body is not valid JSON");
                return IngestOutcome::ServerError(err.to_string());
            }
        };
        tracing::debug!(body = %data, "verified webhook body");

        let record = NewRecord {
            received_at: Some(Utc::now().to_rfc3339()),
            headers,
            data,
        };

        match self.store.insert(record).await {
            Ok(record_id) => {
                tracing::info!(record_id, "webhook persisted");
                IngestOutcome::Accepted {
                    record_id: Some(record_id),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to persist Novu webhook payload");
                IngestOutcome::Accepted { record_id: None }
            }
        }
    }
}
