//! Payment-provider facing records: the webhook dedupe ledger and payout
//! handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One received webhook delivery. Unique per `(provider_name, provider_event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider_name: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ProviderEvent {
    #[must_use]
    pub fn received(
        provider_name: &str,
        provider_event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            provider_event_id: provider_event_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            processed: false,
            processing_error: None,
            received_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPayoutStatus {
    /// Accepted by the provider, outcome arrives by webhook.
    Submitted,
    Paid,
    Failed,
}

/// The provider's view of a payout we asked it to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPayout {
    pub provider_payout_id: String,
    pub status: ProviderPayoutStatus,
}
