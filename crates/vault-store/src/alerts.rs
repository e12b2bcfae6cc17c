use chrono::Utc;
use vault_core::{Alert, AlertId, AuthorizationId, TenantId, VaultError};

use crate::db::{alert_key, serialize, StateDb};

/// Persists near-expiry alerts (C9), deduped by `(authorization_id,
/// alert_type)` so a repeat sweep inside the same window never creates a
/// second row for the same condition.
pub struct AlertStore<'a> {
    db: &'a StateDb,
}

impl<'a> AlertStore<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// Inserts an `Alert` if and only if this `(authorization_id,
    /// alert_type)` pair hasn't already been recorded for the tenant.
    /// Returns `true` if this call actually inserted a new row.
    pub fn create_if_absent(
        &self,
        tenant_id: &TenantId,
        authorization_id: AuthorizationId,
        alert_type: &str,
    ) -> Result<bool, VaultError> {
        let key = alert_key(tenant_id, &authorization_id, alert_type);
        if self.db.alerts.contains_key(&key).map_err(|e| VaultError::Storage(e.to_string()))? {
            return Ok(false);
        }
        let alert = Alert {
            id: AlertId(self.db.next_id("alert_seq")?),
            tenant_id: tenant_id.clone(),
            authorization_id,
            alert_type: alert_type.to_string(),
            created_at: Utc::now(),
        };
        let bytes = serialize(&alert)?;
        // compare_and_swap avoids a race between the contains_key check
        // above and this insert under concurrent sweeps.
        let cas_result = self
            .db
            .alerts
            .compare_and_swap(key, None::<&[u8]>, Some(bytes))
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(cas_result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sweep_does_not_duplicate_alert() {
        let (db, _dir) = StateDb::open_temp();
        let store = AlertStore::new(&db);
        let tenant = TenantId::new("tenant-a");
        let auth_id = AuthorizationId::new();
        assert!(store.create_if_absent(&tenant, auth_id, "near_expiry").unwrap());
        assert!(!store.create_if_absent(&tenant, auth_id, "near_expiry").unwrap());
    }

    #[test]
    fn different_alert_types_are_independent() {
        let (db, _dir) = StateDb::open_temp();
        let store = AlertStore::new(&db);
        let tenant = TenantId::new("tenant-a");
        let auth_id = AuthorizationId::new();
        assert!(store.create_if_absent(&tenant, auth_id, "near_expiry").unwrap());
        assert!(store.create_if_absent(&tenant, auth_id, "other_type").unwrap());
    }
}
