//! Shared tunables and allowlists for the authorization vault.
//!
//! Values here are the *defaults* — `VaultConfig::from_env` overrides most
//! of them at startup. Constants that are structural (currency allowlist,
//! field size caps) are not configurable.

/// ISO-4217 currency codes accepted in `amount_limit`/`max_amount` fields.
/// Authorizations quoting any other code fail verification with
/// `MISSING_REQUIRED_FIELD` (malformed currency is treated as a malformed
/// required field, not a distinct error class).
pub const ALLOWED_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "CNY", "HKD",
    "SGD", "SEK", "NOK", "DKK", "PLN", "CZK", "HUF", "RON", "BGN", "HRK",
    "TRY", "ZAR", "INR", "BRL", "MXN", "ARS", "CLP", "COP", "PEN", "KRW",
    "TWD", "THB", "MYR", "IDR", "PHP", "VND", "AED", "SAR", "ILS", "EGP",
];

pub fn is_allowed_currency(code: &str) -> bool {
    ALLOWED_CURRENCIES.contains(&code.to_ascii_uppercase().as_str())
}

/// Maximum accepted size of a raw inbound payload (JWT-VC or ACP token),
/// in bytes, before it is rejected as `INVALID_FORMAT` without parsing.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 262_144;

/// Largest `amount_limit`/`max_amount` value accepted (two decimal places).
pub const MAX_AMOUNT_LIMIT: &str = "999999.99";

/// Default HTTP timeout for a single outbound webhook delivery attempt.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Default maximum delivery attempts before a `DeliveryAttempt` moves to
/// `DEAD` (dead-letter) status.
pub const DEFAULT_WEBHOOK_MAX_RETRIES: u32 = 8;

/// Seed for the exponential backoff schedule between delivery attempts.
pub const DEFAULT_WEBHOOK_RETRY_BACKOFF_SEED_SECS: u64 = 2;

/// Upper bound any single backoff delay is clamped to.
pub const DEFAULT_WEBHOOK_RETRY_BACKOFF_MAX_SECS: u64 = 3_600;

/// Number of concurrent outbound delivery worker tasks.
pub const DEFAULT_WEBHOOK_WORKER_COUNT: usize = 4;

/// How often the expiry scanner (C9) sweeps for authorizations past
/// `expires_at`.
pub const DEFAULT_EXPIRY_CHECK_INTERVAL_SECS: u64 = 60;

/// How often the retention cleanup worker (C9) sweeps terminal records.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3_600;

/// How often the failed-delivery retrier (C9) re-enqueues due attempts.
pub const DEFAULT_RETRY_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default retention window (days) for terminal authorizations before the
/// cleanup worker purges their row (audit events are never purged).
pub const DEFAULT_RETENTION_DAYS: i64 = 365;

/// Bounded outbound queue size is `queue_multiplier * worker_count`.
pub const OUTBOUND_QUEUE_MULTIPLIER: usize = 4;

/// Maximum scope string length accepted on an AP2 credential.
pub const MAX_SCOPE_LEN: usize = 2_048;
