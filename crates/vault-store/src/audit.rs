use vault_core::{AuditEvent, AuthorizationId, TenantId, VaultError};

use crate::db::{deserialize, tenant_prefix, StateDb};

/// Read-only access to the append-only audit trail (C6). Nothing in this
/// module ever deletes or mutates a row — the trail is retained as long as
/// its parent authorization row exists, and outlives it if retention
/// cleanup (C9) purges the authorization first.
pub struct AuditLog<'a> {
    db: &'a StateDb,
}

impl<'a> AuditLog<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// All audit events for one authorization, in chronological order (the
    /// key suffix is the monotonic audit event id, so iteration order is
    /// already chronological).
    pub fn for_authorization(
        &self,
        tenant_id: &TenantId,
        authorization_id: &AuthorizationId,
    ) -> Result<Vec<AuditEvent>, VaultError> {
        let mut prefix = tenant_prefix(tenant_id);
        prefix.extend_from_slice(&authorization_id.as_bytes());
        let mut out = Vec::new();
        for item in self.db.audit_events.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// All audit events for a tenant across every authorization, in the
    /// order sled returns them (authorization id, then event id).
    pub fn for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<AuditEvent>, VaultError> {
        let prefix = tenant_prefix(tenant_id);
        let mut out = Vec::new();
        for item in self.db.audit_events.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizations::AuthorizationStore;
    use chrono::Utc;
    use vault_core::{AuthorizationId, AuthorizationStatus, Money, Protocol, VerificationStatus};

    #[test]
    fn exactly_one_audit_event_per_transition() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let log = AuditLog::new(&db);
        let now = Utc::now();
        let auth = vault_core::Authorization {
            id: AuthorizationId::new(),
            tenant_id: TenantId::new("tenant-a"),
            protocol: Protocol::Ap2,
            issuer: "did:example:issuer".into(),
            subject: "did:example:subject".into(),
            amount_limit: Money::parse("10.00", "USD").unwrap(),
            scope: "payments:authorize".into(),
            status: AuthorizationStatus::Active,
            verification_status: VerificationStatus::Valid,
            verification_reason: "ok".into(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(1),
            raw_payload: "token".into(),
            retention_days: 365,
            deleted_at: None,
        };
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        store
            .transition(
                &auth.tenant_id,
                &auth.id,
                AuthorizationStatus::Valid,
                "verified",
                serde_json::json!({}),
                "svc",
                now,
                false,
            )
            .unwrap();
        let events = log.for_authorization(&auth.tenant_id, &auth.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].new_status, AuthorizationStatus::Active);
        assert_eq!(events[1].new_status, AuthorizationStatus::Valid);
    }
}
