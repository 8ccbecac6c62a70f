//! Error types for the CashMatch engine.
//!
//! All errors use the `CM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors
//! - 2xx: Wallet / ledger errors
//! - 3xx: Match / escrow errors
//! - 4xx: Settlement errors
//! - 5xx: Withdrawal / compliance errors
//! - 6xx: Webhook / payment provider errors
//! - 7xx: Idempotency / auth errors
//! - 8xx: Platform availability (kill switches)
//! - 9xx: General / internal errors
//!
//! Every variant maps onto one HTTP status via [`CashMatchError::http_status`],
//! which the request idempotency layer stores alongside the error body. All
//! of them are failures; an idempotent replay is an `Ok` outcome of the
//! operation that was replayed.

use thiserror::Error;

use crate::{MatchId, UserId};

/// Central error enum for all CashMatch operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CashMatchError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The request failed input validation.
    #[error("CM_ERR_100: Validation failed: {reason}")]
    Validation { reason: String },

    // =================================================================
    // Wallet / Ledger Errors (2xx)
    // =================================================================
    /// Not enough available balance to perform the operation.
    #[error("CM_ERR_200: Insufficient funds: need {needed} cents, have {available} cents")]
    InsufficientFunds { needed: i64, available: i64 },

    /// Not enough locked balance to unlock or consume.
    #[error("CM_ERR_201: Insufficient locked funds: need {needed} cents, locked {locked} cents")]
    InsufficientLocked { needed: i64, locked: i64 },

    /// The ledger no longer sums to the wallet balance. Critical.
    #[error("CM_ERR_202: Ledger invariant violation: {reason}")]
    LedgerInvariantViolation { reason: String },

    // =================================================================
    // Match / Escrow Errors (3xx)
    // =================================================================
    /// The referenced entity does not exist.
    #[error("CM_ERR_300: {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The entity is in the wrong lifecycle state for this operation.
    #[error("CM_ERR_301: State conflict: {reason}")]
    StateConflict { reason: String },

    /// The user already holds a seat in this match.
    #[error("CM_ERR_302: User {user_id} already joined {match_id}")]
    AlreadyJoined { match_id: MatchId, user_id: UserId },

    /// The match has no free seats.
    #[error("CM_ERR_303: Match is full: {0}")]
    MatchFull(MatchId),

    // =================================================================
    // Settlement Errors (4xx)
    // =================================================================
    /// Another owner holds the settlement lock for this match.
    #[error("CM_ERR_400: Settlement lock for {match_id} held by {holder}")]
    SettlementLocked { match_id: MatchId, holder: String },

    /// Settlement could not be applied.
    #[error("CM_ERR_401: Settlement failed for {match_id}: {reason}")]
    SettlementFailed { match_id: MatchId, reason: String },

    // =================================================================
    // Withdrawal / Compliance Errors (5xx)
    // =================================================================
    /// Frozen account, KYC, or fraud gate refused the request.
    #[error("CM_ERR_500: Compliance blocked: {reason}")]
    ComplianceBlocked { reason: String },

    /// Per-user or platform-wide rate/volume limit exceeded.
    #[error("CM_ERR_501: Rate limited: {reason}")]
    RateLimited { reason: String },

    // =================================================================
    // Webhook / Provider Errors (6xx)
    // =================================================================
    /// Provider signature did not verify against the raw body.
    #[error("CM_ERR_600: Webhook signature invalid")]
    SignatureInvalid,

    /// Provider call exceeded its network timeout; the outcome is unknown.
    #[error("CM_ERR_601: Provider timeout during {operation} after {timeout_ms}ms")]
    ProviderTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Provider explicitly refused or failed the call.
    #[error("CM_ERR_602: Provider error: {reason}")]
    ProviderError { reason: String },

    // =================================================================
    // Idempotency / Auth Errors (7xx)
    // =================================================================
    /// A request with this idempotency key is still executing.
    #[error("CM_ERR_700: Request with idempotency key {key} is in progress")]
    RequestInProgress { key: String },

    /// Caller is not authenticated.
    #[error("CM_ERR_701: Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Caller is authenticated but not allowed to perform this action.
    #[error("CM_ERR_702: Forbidden: {reason}")]
    Forbidden { reason: String },

    // =================================================================
    // Availability (8xx)
    // =================================================================
    /// A kill switch has disabled this category of operation.
    #[error("CM_ERR_800: Service unavailable: {feature} disabled")]
    ServiceUnavailable { feature: &'static str },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CM_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("CM_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("CM_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("CM_ERR_903: I/O error: {0}")]
    Io(String),
}

impl CashMatchError {
    /// Shorthand for [`CashMatchError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CashMatchError::StateConflict`].
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::StateConflict {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CashMatchError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The `CM_ERR_NNN` code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "CM_ERR_100",
            Self::InsufficientFunds { .. } => "CM_ERR_200",
            Self::InsufficientLocked { .. } => "CM_ERR_201",
            Self::LedgerInvariantViolation { .. } => "CM_ERR_202",
            Self::NotFound { .. } => "CM_ERR_300",
            Self::StateConflict { .. } => "CM_ERR_301",
            Self::AlreadyJoined { .. } => "CM_ERR_302",
            Self::MatchFull(_) => "CM_ERR_303",
            Self::SettlementLocked { .. } => "CM_ERR_400",
            Self::SettlementFailed { .. } => "CM_ERR_401",
            Self::ComplianceBlocked { .. } => "CM_ERR_500",
            Self::RateLimited { .. } => "CM_ERR_501",
            Self::SignatureInvalid => "CM_ERR_600",
            Self::ProviderTimeout { .. } => "CM_ERR_601",
            Self::ProviderError { .. } => "CM_ERR_602",
            Self::RequestInProgress { .. } => "CM_ERR_700",
            Self::Unauthorized { .. } => "CM_ERR_701",
            Self::Forbidden { .. } => "CM_ERR_702",
            Self::ServiceUnavailable { .. } => "CM_ERR_800",
            Self::Internal(_) => "CM_ERR_900",
            Self::Serialization(_) => "CM_ERR_901",
            Self::Configuration(_) => "CM_ERR_902",
            Self::Io(_) => "CM_ERR_903",
        }
    }

    /// HTTP status the client surface reports for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. }
            | Self::InsufficientFunds { .. }
            | Self::StateConflict { .. }
            | Self::AlreadyJoined { .. }
            | Self::MatchFull(_) => 400,
            Self::SignatureInvalid | Self::Unauthorized { .. } => 401,
            Self::ComplianceBlocked { .. } | Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::SettlementLocked { .. } | Self::RequestInProgress { .. } => 409,
            Self::RateLimited { .. } => 429,
            Self::ProviderError { .. } => 502,
            Self::ServiceUnavailable { .. } => 503,
            Self::ProviderTimeout { .. } => 504,
            Self::InsufficientLocked { .. }
            | Self::LedgerInvariantViolation { .. }
            | Self::SettlementFailed { .. }
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Io(_) => 500,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, CashMatchError>;

impl From<std::io::Error> for CashMatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CashMatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
