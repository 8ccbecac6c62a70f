//! System-wide constants for the CashMatch engine.

/// Failed settlement attempts before a match is marked settlement-failed.
pub const MAX_SETTLEMENT_ATTEMPTS: u32 = 5;

/// Base unit of the linear settlement backoff (`attempt × base`), seconds.
pub const DEFAULT_SETTLEMENT_BACKOFF_SECS: i64 = 60;

/// Matches examined per auto-settlement sweep.
pub const DEFAULT_SETTLEMENT_BATCH_SIZE: usize = 50;

/// Settlement lock time-to-live, seconds.
pub const DEFAULT_SETTLEMENT_LOCK_TTL_SECS: i64 = 120;

/// Interval between auto-settlement sweeps in the worker, seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Withdrawals at or above this amount need a human ($1,000).
pub const MANUAL_REVIEW_AMOUNT_CENTS: i64 = 100_000;

/// Fraud score at or above which withdrawals are refused outright.
pub const FRAUD_BLOCK_SCORE: u8 = 70;

/// Fraud score at or above which withdrawals need manual review.
pub const FRAUD_REVIEW_SCORE: u8 = 50;

/// Accounts younger than this need manual review, days.
pub const NEW_ACCOUNT_REVIEW_DAYS: i64 = 30;

/// Minimum withdrawal ($10).
pub const MIN_WITHDRAWAL_CENTS: i64 = 1_000;

/// Maximum single withdrawal ($10,000).
pub const MAX_WITHDRAWAL_CENTS: i64 = 1_000_000;

/// Platform-wide withdrawal volume per UTC day ($250,000).
pub const DEFAULT_DAILY_PLATFORM_WITHDRAWAL_LIMIT_CENTS: i64 = 25_000_000;

/// Rolling window for the one-request-per-user rate limit, hours.
pub const WITHDRAWAL_RATE_WINDOW_HOURS: i64 = 24;

/// Minimum gap between last match participation and a withdrawal, hours.
pub const WITHDRAWAL_COOLDOWN_HOURS: i64 = 24;

/// Network timeout for payment-provider calls, milliseconds.
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;

/// Interval between dispatch passes over approved withdrawals, seconds.
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 30;

/// Maximum idempotency key length.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// An in-flight idempotency reservation older than this is taken over by
/// the next retry, seconds.
pub const DEFAULT_IDEMPOTENCY_LEASE_SECS: i64 = 300;

/// Upper bound for any configured duration, seconds (365 days).
pub const MAX_CONFIG_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Provider name used for webhook dedupe rows when none is configured.
pub const DEFAULT_PROVIDER_NAME: &str = "stripe";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "CashMatch";
