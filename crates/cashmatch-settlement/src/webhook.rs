//! Payment-provider webhook ingestion.
//!
//! The signature is checked against the raw body before anything is parsed.
//! The event row is inserted before any handler runs; a second delivery of
//! the same event id hits the unique key and is acknowledged as a duplicate
//! without side effects. Handler failures are stored on the event row and
//! alerted, but still acknowledged so the provider stops redelivering.
//!
//! Envelope: `{"id": "...", "type": "...", "data": {...}}`
//!
//! | type                | data fields                                  |
//! |---------------------|----------------------------------------------|
//! | `deposit.succeeded` | `provider_intent_id`                         |
//! | `deposit.failed`    | `provider_intent_id`                         |
//! | `payout.succeeded`  | `payout_id`, `withdrawal_id`?                |
//! | `payout.failed`     | `payout_id`, `withdrawal_id`?, `failure_reason`? |

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use cashmatch_ledger::{DepositCompletion, LedgerStore, Wallet, raise_alert};
use cashmatch_types::{
    Alert, AlertSeverity, AlertType, CashMatchError, Clock, ProviderEvent, Result, WithdrawalId,
};

use crate::withdrawal_processor::WithdrawalProcessor;

type HmacSha256 = Hmac<Sha256>;

/// Check `hex(HMAC-SHA256(secret, raw_body))`, with or without a
/// `sha256=` prefix. An empty secret verifies nothing.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature: &str) -> Result<()> {
    if secret.is_empty() {
        tracing::error!("webhook signing secret not configured");
        return Err(CashMatchError::SignatureInvalid);
    }
    let hex_sig = signature
        .trim()
        .strip_prefix("sha256=")
        .unwrap_or_else(|| signature.trim());
    let expected = hex::decode(hex_sig).map_err(|_| CashMatchError::SignatureInvalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CashMatchError::Internal(format!("hmac key: {e}")))?;
    mac.update(raw_body);
    mac.verify_slice(&expected)
        .map_err(|_| CashMatchError::SignatureInvalid)
}

/// Signature header value for `raw_body`, as the provider computes it.
pub fn sign_payload(secret: &str, raw_body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CashMatchError::Internal(format!("hmac key: {e}")))?;
    mac.update(raw_body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DepositData {
    provider_intent_id: String,
}

#[derive(Debug, Deserialize)]
struct PayoutData {
    payout_id: String,
    #[serde(default)]
    withdrawal_id: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl PayoutData {
    fn withdrawal_id(&self) -> Option<WithdrawalId> {
        self.withdrawal_id.as_deref().and_then(|raw| {
            WithdrawalId::parse(raw.strip_prefix("wd:").unwrap_or(raw))
        })
    }
}

/// Acknowledgement returned to the provider. Every variant is a 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Processed,
    /// Event id seen before; nothing was done.
    Duplicate,
    /// Recorded, but no handler for this type.
    Ignored,
    /// Recorded; the handler failed and an alert was raised.
    Failed { reason: String },
}

pub struct WebhookProcessor {
    store: Arc<dyn LedgerStore>,
    wallet: Arc<Wallet>,
    withdrawals: Arc<WithdrawalProcessor>,
    clock: Arc<dyn Clock>,
    provider_name: String,
    signing_secret: String,
}

impl WebhookProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallet: Arc<Wallet>,
        withdrawals: Arc<WithdrawalProcessor>,
        clock: Arc<dyn Clock>,
        provider_name: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            wallet,
            withdrawals,
            clock,
            provider_name: provider_name.into(),
            signing_secret: signing_secret.into(),
        }
    }

    pub async fn handle(&self, raw_body: &[u8], signature: &str) -> Result<WebhookAck> {
        if let Err(err) = verify_signature(&self.signing_secret, raw_body, signature) {
            tracing::warn!(provider = %self.provider_name, "webhook signature rejected");
            return Err(err);
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| CashMatchError::validation(format!("webhook body: {e}")))?;
        let envelope: Envelope = serde_json::from_value(payload.clone())
            .map_err(|e| CashMatchError::validation(format!("webhook envelope: {e}")))?;

        let inserted = self
            .store
            .insert_event(ProviderEvent::received(
                &self.provider_name,
                &envelope.id,
                &envelope.event_type,
                payload,
                self.clock.now(),
            ))
            .await?;
        if !inserted {
            tracing::info!(event_id = %envelope.id, event_type = %envelope.event_type, "duplicate webhook");
            return Ok(WebhookAck::Duplicate);
        }

        let outcome = self.dispatch(&envelope).await;
        let processing_error = outcome.as_ref().err().map(ToString::to_string);
        if let Err(err) = self
            .store
            .finish_event(&self.provider_name, &envelope.id, processing_error)
            .await
        {
            tracing::error!(event_id = %envelope.id, error = %err, "failed to finish webhook event");
        }

        match outcome {
            Ok(true) => Ok(WebhookAck::Processed),
            Ok(false) => {
                tracing::info!(event_id = %envelope.id, event_type = %envelope.event_type, "unhandled webhook type");
                Ok(WebhookAck::Ignored)
            }
            Err(err) => {
                tracing::error!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    error = %err,
                    "webhook handler failed"
                );
                raise_alert(
                    self.store.as_ref(),
                    Alert::new(
                        AlertType::WebhookProcessingFailed,
                        AlertSeverity::Critical,
                        format!("{} {} failed: {err}", envelope.event_type, envelope.id),
                        self.clock.now(),
                    )
                    .with_metadata(serde_json::json!({
                        "provider": self.provider_name,
                        "event_id": envelope.id,
                    })),
                )
                .await;
                Ok(WebhookAck::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// `Ok(false)` for event types with no handler.
    async fn dispatch(&self, envelope: &Envelope) -> Result<bool> {
        match envelope.event_type.as_str() {
            "deposit.succeeded" => {
                let data: DepositData = parse_data(&envelope.data)?;
                match self.wallet.credit_deposit(&data.provider_intent_id).await? {
                    DepositCompletion::Credited { intent, .. } => {
                        tracing::info!(
                            provider_intent_id = %intent.provider_intent_id,
                            user_id = %intent.user_id,
                            amount_cents = intent.amount_cents,
                            "deposit credited by webhook"
                        );
                    }
                    DepositCompletion::AlreadyCompleted(intent) => {
                        tracing::debug!(provider_intent_id = %intent.provider_intent_id, "deposit already credited");
                    }
                }
            }
            "deposit.failed" => {
                let data: DepositData = parse_data(&envelope.data)?;
                self.wallet.fail_deposit(&data.provider_intent_id).await?;
            }
            "payout.succeeded" => {
                let data: PayoutData = parse_data(&envelope.data)?;
                self.withdrawals
                    .complete_payout(&data.payout_id, data.withdrawal_id())
                    .await?;
            }
            "payout.failed" => {
                let data: PayoutData = parse_data(&envelope.data)?;
                let reason = data
                    .failure_reason
                    .as_deref()
                    .unwrap_or("payout failed at provider");
                self.withdrawals
                    .fail_payout(&data.payout_id, data.withdrawal_id(), reason)
                    .await?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse_data<T: DeserializeOwned>(data: &serde_json::Value) -> Result<T> {
    T::deserialize(data).map_err(|e| CashMatchError::validation(format!("webhook data: {e}")))
}
