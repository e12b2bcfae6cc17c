use crate::money::Money;
use crate::types::{
    AlertId, AuditEventId, AuthorizationId, AuthorizationStatus, DeliveryAttemptId, EventId,
    Protocol, SubscriptionId, TenantId, VerificationStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The durable record of a single ingested authorization. This is the
/// entity C5 persists and the state machine (§4.5) mutates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Authorization {
    pub id: AuthorizationId,
    pub tenant_id: TenantId,
    pub protocol: Protocol,
    pub issuer: String,
    pub subject: String,
    pub amount_limit: Money,
    pub scope: String,
    pub status: AuthorizationStatus,
    /// Outcome of the verification run that produced (or last re-checked)
    /// this authorization. Independent of `status`: a `SIG_INVALID`
    /// verification still persists an `ACTIVE` authorization (S6).
    pub verification_status: VerificationStatus,
    pub verification_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The raw inbound payload (compact JWS or ACP token), retained for the
    /// evidence pack exporter (C10). Never re-parsed after ingestion.
    pub raw_payload: String,
    /// Days a soft-deleted row is retained before hard-delete; 0 ≡ immediate.
    pub retention_days: i64,
    /// Soft-delete marker. `Some(_)` makes the row invisible to default
    /// queries; the status itself is left untouched.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Authorization {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Outcome of running a protocol verifier (C2/C3) over a raw payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub reason: Option<String>,
    pub details: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub amount_limit: Option<Money>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self.status, VerificationStatus::Valid)
    }

    pub fn failure(status: VerificationStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            details: None,
            issuer: None,
            subject: None,
            amount_limit: None,
            scope: None,
            expires_at: None,
        }
    }
}

/// An append-only record of a lifecycle transition (C6). Exactly one is
/// written per state change, in the same atomic unit as the transition
/// itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub tenant_id: TenantId,
    pub authorization_id: AuthorizationId,
    pub old_status: Option<AuthorizationStatus>,
    pub new_status: AuthorizationStatus,
    pub reason: String,
    /// Event-type-specific required fields (§4.6), e.g. `protocol`,
    /// `verification_status`, `amount`/`currency`/`transaction_id` for a
    /// `USED` event, `filename`/`user_id` for an `EXPORTED` event.
    pub details: serde_json::Value,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

/// A deduped near-expiry notice raised by the alert generator (C9). Unique
/// per `(authorization_id, alert_type)` — a second sweep inside the same
/// window never creates a duplicate row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub authorization_id: AuthorizationId,
    pub alert_type: String,
    pub created_at: DateTime<Utc>,
}

/// A tenant's registered outbound webhook endpoint (C8).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub target_url: String,
    pub signing_secret: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Delivery state of one outbound webhook dispatch (C8).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Dead,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        };
        write!(f, "{s}")
    }
}

/// One row per delivery attempt of a logical outbound event. At-least-once
/// delivery: the same `event_id` may produce several attempts, and
/// consumers dedupe on `event_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: DeliveryAttemptId,
    pub subscription_id: SubscriptionId,
    pub event_id: EventId,
    pub authorization_id: AuthorizationId,
    pub tenant_id: TenantId,
    pub event_type: String,
    /// The notification body, retained so a later retry (C9) can
    /// reconstruct and resend it without the original publisher.
    pub payload: serde_json::Value,
    pub attempt_number: u32,
    pub status: DeliveryStatus,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Marks a `(tenant_id, psp_event_id)` pair as already processed, so a
/// redelivered ACP webhook is a no-op rather than a double transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: TenantId,
    pub psp_event_id: String,
    pub authorization_id: AuthorizationId,
    pub received_at: DateTime<Utc>,
}
