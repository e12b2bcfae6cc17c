use chrono::{DateTime, Utc};
use vault_core::{DeliveryAttempt, DeliveryAttemptId, DeliveryStatus, TenantId, VaultError};

use crate::db::{deserialize, delivery_attempt_key, serialize, tenant_prefix, StateDb};

/// Tenant-scoped store of outbound delivery attempts (C8). Every publish
/// writes a row here before the in-process queue is touched, so truth
/// about what's outstanding always lives in the store, not the channel.
pub struct DeliveryStore<'a> {
    db: &'a StateDb,
}

impl<'a> DeliveryStore<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    pub fn put(&self, attempt: &DeliveryAttempt) -> Result<(), VaultError> {
        let key = delivery_attempt_key(&attempt.tenant_id, &attempt.id);
        let bytes = serialize(attempt)?;
        self.db.delivery_attempts.insert(key, bytes).map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get(&self, tenant_id: &TenantId, id: &DeliveryAttemptId) -> Result<Option<DeliveryAttempt>, VaultError> {
        let key = delivery_attempt_key(tenant_id, id);
        match self.db.delivery_attempts.get(key).map_err(|e| VaultError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Attempts across all tenants whose `next_attempt_at` has passed and
    /// which haven't reached a terminal status — the failed-delivery
    /// retrier (C9) re-enqueues exactly these.
    pub fn due_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<DeliveryAttempt>, VaultError> {
        let mut out = Vec::new();
        for item in self.db.delivery_attempts.iter() {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            let attempt: DeliveryAttempt = deserialize(&bytes)?;
            if attempt.status == DeliveryStatus::Failed && attempt.next_attempt_at <= now {
                out.push(attempt);
            }
        }
        Ok(out)
    }

    pub fn for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<DeliveryAttempt>, VaultError> {
        let prefix = tenant_prefix(tenant_id);
        let mut out = Vec::new();
        for item in self.db.delivery_attempts.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }
}
