use std::path::Path;

use vault_core::{AuthorizationId, DeliveryAttemptId, SubscriptionId, TenantId, VaultError};

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   authorizations     — (tenant_id, authorization_id) → bincode(Authorization)
///   audit_events       — (tenant_id, authorization_id, audit_event_id) → bincode(AuditEvent)
///   alerts             — (tenant_id, authorization_id, alert_type) → bincode(Alert)
///   subscriptions      — (tenant_id, subscription_id) → bincode(Subscription)
///   delivery_attempts  — (tenant_id, delivery_attempt_id) → bincode(DeliveryAttempt)
///   idempotency        — (tenant_id, psp_event_id) → bincode(IdempotencyRecord)
///   meta               — utf8 key bytes → raw bytes (auto-increment counters)
pub struct StateDb {
    pub(crate) db: sled::Db,
    pub(crate) authorizations: sled::Tree,
    pub(crate) audit_events: sled::Tree,
    pub(crate) alerts: sled::Tree,
    pub(crate) subscriptions: sled::Tree,
    pub(crate) delivery_attempts: sled::Tree,
    pub(crate) idempotency: sled::Tree,
    pub(crate) meta: sled::Tree,
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VaultError> {
        let db = sled::open(path).map_err(|e| VaultError::Storage(e.to_string()))?;
        let authorizations = db
            .open_tree("authorizations")
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let audit_events = db
            .open_tree("audit_events")
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let alerts = db.open_tree("alerts").map_err(|e| VaultError::Storage(e.to_string()))?;
        let subscriptions = db
            .open_tree("subscriptions")
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let delivery_attempts = db
            .open_tree("delivery_attempts")
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let idempotency = db
            .open_tree("idempotency")
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let meta = db.open_tree("meta").map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(Self {
            db,
            authorizations,
            audit_events,
            alerts,
            subscriptions,
            delivery_attempts,
            idempotency,
            meta,
        })
    }

    /// Opens a temporary database, for tests only. Gated by `test-support`
    /// so downstream crates can use it from their own test suites too.
    #[cfg(any(test, feature = "test-support"))]
    pub fn open_temp() -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Self::open(dir.path()).expect("open sled db");
        (db, dir)
    }

    pub(crate) fn next_id(&self, counter_key: &str) -> Result<u64, VaultError> {
        let next = self
            .meta
            .update_and_fetch(counter_key.as_bytes(), |old| {
                let current = old
                    .map(|bytes| u64::from_be_bytes(bytes.try_into().unwrap_or([0; 8])))
                    .unwrap_or(0);
                Some((current + 1).to_be_bytes().to_vec())
            })
            .map_err(|e| VaultError::Storage(e.to_string()))?
            .expect("update_and_fetch always returns Some when the closure does");
        Ok(u64::from_be_bytes(next.as_ref().try_into().unwrap()))
    }
}

/// Composite key helpers. Every table is scoped by tenant first so a
/// prefix scan lists one tenant's rows without touching another's.
pub(crate) fn tenant_prefix(tenant_id: &TenantId) -> Vec<u8> {
    let bytes = tenant_id.as_str().as_bytes();
    let mut key = (bytes.len() as u32).to_be_bytes().to_vec();
    key.extend_from_slice(bytes);
    key
}

pub(crate) fn authorization_key(tenant_id: &TenantId, id: &AuthorizationId) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(&id.as_bytes());
    key
}

pub(crate) fn subscription_key(tenant_id: &TenantId, id: &SubscriptionId) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(id.0.as_bytes());
    key
}

pub(crate) fn delivery_attempt_key(tenant_id: &TenantId, id: &DeliveryAttemptId) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(id.0.as_bytes());
    key
}

pub(crate) fn idempotency_key(tenant_id: &TenantId, psp_event_id: &str) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(psp_event_id.as_bytes());
    key
}

pub(crate) fn audit_event_key(
    tenant_id: &TenantId,
    authorization_id: &AuthorizationId,
    audit_id: u64,
) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(&authorization_id.as_bytes());
    key.extend_from_slice(&audit_id.to_be_bytes());
    key
}

pub(crate) fn alert_key(
    tenant_id: &TenantId,
    authorization_id: &AuthorizationId,
    alert_type: &str,
) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(&authorization_id.as_bytes());
    key.extend_from_slice(alert_type.as_bytes());
    key
}

pub(crate) fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, VaultError> {
    bincode::serialize(value).map_err(|e| VaultError::Serialization(e.to_string()))
}

pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, VaultError> {
    bincode::deserialize(bytes).map_err(|e| VaultError::Serialization(e.to_string()))
}
