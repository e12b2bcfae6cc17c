use chrono::Utc;
use vault_core::{AuthorizationId, IdempotencyRecord, TenantId, VaultError};

use crate::db::{deserialize, idempotency_key, serialize, StateDb};

/// Absorbs replayed inbound ACP webhooks: a `(tenant_id, psp_event_id)`
/// pair is recorded at most once (C7's idempotency requirement).
pub struct IdempotencyStore<'a> {
    db: &'a StateDb,
}

impl<'a> IdempotencyStore<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// Inserts the record if and only if `psp_event_id` hasn't been seen for
    /// this tenant before. Returns `true` if this call actually inserted
    /// (i.e. this is a first delivery, not a replay).
    pub fn claim(
        &self,
        tenant_id: &TenantId,
        psp_event_id: &str,
        authorization_id: AuthorizationId,
    ) -> Result<bool, VaultError> {
        let key = idempotency_key(tenant_id, psp_event_id);
        if self.db.idempotency.contains_key(&key).map_err(|e| VaultError::Storage(e.to_string()))? {
            return Ok(false);
        }
        let record = IdempotencyRecord {
            tenant_id: tenant_id.clone(),
            psp_event_id: psp_event_id.to_string(),
            authorization_id,
            received_at: Utc::now(),
        };
        let bytes = serialize(&record)?;
        // compare_and_swap avoids a race between the contains_key check
        // above and this insert under concurrent delivery of the same event.
        let cas_result = self
            .db
            .idempotency
            .compare_and_swap(key, None::<&[u8]>, Some(bytes))
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(cas_result.is_ok())
    }

    pub fn lookup(&self, tenant_id: &TenantId, psp_event_id: &str) -> Result<Option<IdempotencyRecord>, VaultError> {
        let key = idempotency_key(tenant_id, psp_event_id);
        match self.db.idempotency.get(key).map_err(|e| VaultError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_succeeds_second_is_replay() {
        let (db, _dir) = StateDb::open_temp();
        let store = IdempotencyStore::new(&db);
        let tenant = TenantId::new("tenant-a");
        let auth_id = AuthorizationId::new();
        assert!(store.claim(&tenant, "evt-1", auth_id).unwrap());
        assert!(!store.claim(&tenant, "evt-1", auth_id).unwrap());
    }

    #[test]
    fn different_tenants_do_not_collide() {
        let (db, _dir) = StateDb::open_temp();
        let store = IdempotencyStore::new(&db);
        let auth_id = AuthorizationId::new();
        assert!(store.claim(&TenantId::new("tenant-a"), "evt-1", auth_id).unwrap());
        assert!(store.claim(&TenantId::new("tenant-b"), "evt-1", auth_id).unwrap());
    }
}
