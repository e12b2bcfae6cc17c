use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use vault_core::{
    AuditEvent, AuditEventId, Authorization, AuthorizationId, AuthorizationStatus, Protocol,
    TenantId, VaultError,
};

use crate::db::{audit_event_key, authorization_key, deserialize, serialize, tenant_prefix, StateDb};

/// Read/write access to the `authorizations` and `audit_events` trees,
/// enforcing the lifecycle state machine (ACTIVE → VALID → {USED, EXPIRED,
/// REVOKED}) on every mutation.
pub struct AuthorizationStore<'a> {
    db: &'a StateDb,
}

impl<'a> AuthorizationStore<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    pub fn get(&self, tenant_id: &TenantId, id: &AuthorizationId) -> Result<Option<Authorization>, VaultError> {
        let key = authorization_key(tenant_id, id);
        match self.db.authorizations.get(key).map_err(|e| VaultError::Storage(e.to_string()))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list(&self, tenant_id: &TenantId) -> Result<Vec<Authorization>, VaultError> {
        let prefix = tenant_prefix(tenant_id);
        let mut out = Vec::new();
        for item in self.db.authorizations.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Every authorization across every tenant. Used only by the lifecycle
    /// workers (C9), which sweep the whole store on a timer rather than
    /// operating within one tenant's scope.
    pub fn all(&self) -> Result<Vec<Authorization>, VaultError> {
        let mut out = Vec::new();
        for item in self.db.authorizations.iter() {
            let (_, bytes) = item.map_err(|e| VaultError::Storage(e.to_string()))?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Looks up an ACP authorization by the token id the PSP knows it by
    /// (`raw_payload.token_id`), not this vault's internal id. Inbound
    /// webhooks (C7) only ever carry the PSP's own token id.
    pub fn find_by_acp_token_id(
        &self,
        tenant_id: &TenantId,
        token_id: &str,
    ) -> Result<Option<Authorization>, VaultError> {
        for auth in self.list(tenant_id)? {
            if auth.protocol != Protocol::Acp {
                continue;
            }
            let matches = serde_json::from_str::<serde_json::Value>(&auth.raw_payload)
                .ok()
                .and_then(|v| v.get("token_id").and_then(|t| t.as_str()).map(|t| t == token_id))
                .unwrap_or(false);
            if matches {
                return Ok(Some(auth));
            }
        }
        Ok(None)
    }

    /// Removes a terminal authorization's row. The audit trail is left
    /// untouched — retention cleanup (C9) only ever purges this tree.
    pub fn delete(&self, tenant_id: &TenantId, id: &AuthorizationId) -> Result<(), VaultError> {
        let key = authorization_key(tenant_id, id);
        self.db.authorizations.remove(key).map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Marks a row invisible to default queries without touching its status
    /// or audit trail. Used by revoke-with-retention (C11) ahead of the
    /// retention window elapsing.
    pub fn soft_delete(
        &self,
        tenant_id: &TenantId,
        id: &AuthorizationId,
        now: DateTime<Utc>,
    ) -> Result<Authorization, VaultError> {
        let key = authorization_key(tenant_id, id);
        let mut current = self
            .get(tenant_id, id)?
            .ok_or_else(|| VaultError::not_found(format!("authorization {id}")))?;
        current.deleted_at = Some(now);
        let bytes = serialize(&current)?;
        self.db.authorizations.insert(key, bytes).map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(current)
    }

    /// Clears a soft-delete marker, making the row visible to default
    /// queries again.
    pub fn restore(&self, tenant_id: &TenantId, id: &AuthorizationId) -> Result<Authorization, VaultError> {
        let key = authorization_key(tenant_id, id);
        let mut current = self
            .get(tenant_id, id)?
            .ok_or_else(|| VaultError::not_found(format!("authorization {id}")))?;
        current.deleted_at = None;
        let bytes = serialize(&current)?;
        self.db.authorizations.insert(key, bytes).map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(current)
    }

    /// Hard-deletes a soft-deleted, past-retention row along with every
    /// audit event it ever produced, in one atomic commit (spec.md §4.9:
    /// "hard-delete them along with their audit events").
    pub fn hard_delete_with_audit(&self, tenant_id: &TenantId, id: &AuthorizationId) -> Result<(), VaultError> {
        let auth_key = authorization_key(tenant_id, id);
        let mut audit_prefix = tenant_prefix(tenant_id);
        audit_prefix.extend_from_slice(&id.as_bytes());
        let audit_keys: Vec<sled::IVec> = self
            .db
            .audit_events
            .scan_prefix(&audit_prefix)
            .map(|item| item.map(|(k, _)| k))
            .collect::<Result<_, _>>()
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        (&self.db.authorizations, &self.db.audit_events)
            .transaction(|(auths, audits)| {
                auths.remove(auth_key.as_slice())?;
                for key in &audit_keys {
                    audits.remove(key.as_ref())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_err_to_vault)?;
        Ok(())
    }

    /// Persists a brand new authorization and its creation audit event in
    /// one atomic commit.
    pub fn create(
        &self,
        authorization: &Authorization,
        actor: &str,
        details: serde_json::Value,
    ) -> Result<(), VaultError> {
        let key = authorization_key(&authorization.tenant_id, &authorization.id);
        if self.db.authorizations.contains_key(&key).map_err(|e| VaultError::Storage(e.to_string()))? {
            return Err(VaultError::AlreadyProcessed(format!(
                "authorization {} already exists",
                authorization.id
            )));
        }
        let audit_id = self.db.next_id("audit_event_seq")?;
        let audit = AuditEvent {
            id: AuditEventId(audit_id),
            tenant_id: authorization.tenant_id.clone(),
            authorization_id: authorization.id,
            old_status: None,
            new_status: authorization.status,
            reason: "created".to_string(),
            details,
            actor: actor.to_string(),
            occurred_at: authorization.created_at,
        };

        let auth_bytes = serialize(authorization)?;
        let audit_bytes = serialize(&audit)?;
        let audit_key = audit_event_key(&authorization.tenant_id, &authorization.id, audit_id);

        (&self.db.authorizations, &self.db.audit_events)
            .transaction(|(auths, audits)| {
                auths.insert(key.as_slice(), auth_bytes.as_slice())?;
                audits.insert(audit_key.as_slice(), audit_bytes.as_slice())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_err_to_vault)?;
        Ok(())
    }

    /// Applies a lifecycle transition, writing exactly one audit event in
    /// the same atomic unit as the state mutation.
    ///
    /// `allow_noop` permits `new_status == current.status` (used by
    /// re-verification of an already-terminal record, which must not
    /// resurrect it but does still record the attempt).
    #[allow(clippy::too_many_arguments)]
    pub fn transition(
        &self,
        tenant_id: &TenantId,
        id: &AuthorizationId,
        new_status: AuthorizationStatus,
        reason: &str,
        details: serde_json::Value,
        actor: &str,
        now: DateTime<Utc>,
        allow_noop: bool,
    ) -> Result<Authorization, VaultError> {
        let key = authorization_key(tenant_id, id);
        let current = self
            .get(tenant_id, id)?
            .ok_or_else(|| VaultError::not_found(format!("authorization {id}")))?;

        if current.status == new_status {
            if allow_noop {
                return self.record_noop(tenant_id, id, &current, reason, details, actor, now);
            }
            return Err(VaultError::IllegalTransition {
                from: current.status.to_string(),
                to: new_status.to_string(),
            });
        }

        if current.status.is_terminal() || !is_legal_transition(current.status, new_status) {
            return Err(VaultError::IllegalTransition {
                from: current.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let mut updated = current.clone();
        updated.status = new_status;
        updated.updated_at = now;

        let audit_id = self.db.next_id("audit_event_seq")?;
        let audit = AuditEvent {
            id: AuditEventId(audit_id),
            tenant_id: tenant_id.clone(),
            authorization_id: *id,
            old_status: Some(current.status),
            new_status,
            reason: reason.to_string(),
            details,
            actor: actor.to_string(),
            occurred_at: now,
        };

        let auth_bytes = serialize(&updated)?;
        let audit_bytes = serialize(&audit)?;
        let audit_key = audit_event_key(tenant_id, id, audit_id);

        (&self.db.authorizations, &self.db.audit_events)
            .transaction(|(auths, audits)| {
                auths.insert(key.as_slice(), auth_bytes.as_slice())?;
                audits.insert(audit_key.as_slice(), audit_bytes.as_slice())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_err_to_vault)?;

        Ok(updated)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_noop(
        &self,
        tenant_id: &TenantId,
        id: &AuthorizationId,
        current: &Authorization,
        reason: &str,
        details: serde_json::Value,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Authorization, VaultError> {
        let audit_id = self.db.next_id("audit_event_seq")?;
        let audit = AuditEvent {
            id: AuditEventId(audit_id),
            tenant_id: tenant_id.clone(),
            authorization_id: *id,
            old_status: Some(current.status),
            new_status: current.status,
            reason: reason.to_string(),
            details,
            actor: actor.to_string(),
            occurred_at: now,
        };
        let audit_bytes = serialize(&audit)?;
        let audit_key = audit_event_key(tenant_id, id, audit_id);
        self.db
            .audit_events
            .insert(audit_key, audit_bytes)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        Ok(current.clone())
    }
}

fn is_legal_transition(from: AuthorizationStatus, to: AuthorizationStatus) -> bool {
    use AuthorizationStatus::*;
    matches!(
        (from, to),
        (Active, Valid) | (Active, Expired) | (Active, Revoked) |
        (Valid, Used) | (Valid, Expired) | (Valid, Revoked)
    )
}

fn transaction_err_to_vault(e: TransactionError<()>) -> VaultError {
    match e {
        TransactionError::Abort(()) => VaultError::Internal("transaction aborted".into()),
        TransactionError::Storage(e) => VaultError::Storage(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::{Money, Protocol, VerificationStatus};

    fn sample(tenant: &str, status: AuthorizationStatus) -> Authorization {
        let now = Utc::now();
        Authorization {
            id: AuthorizationId::new(),
            tenant_id: TenantId::new(tenant),
            protocol: Protocol::Ap2,
            issuer: "did:example:issuer".into(),
            subject: "did:example:subject".into(),
            amount_limit: Money::parse("100.00", "USD").unwrap(),
            scope: "payments:authorize".into(),
            status,
            verification_status: VerificationStatus::Valid,
            verification_reason: "ok".into(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(1),
            raw_payload: "token".into(),
            retention_days: 365,
            deleted_at: None,
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let auth = sample("tenant-a", AuthorizationStatus::Active);
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        let fetched = store.get(&auth.tenant_id, &auth.id).unwrap().unwrap();
        assert_eq!(fetched.status, AuthorizationStatus::Active);
    }

    #[test]
    fn legal_transition_succeeds_and_logs_audit() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let auth = sample("tenant-a", AuthorizationStatus::Active);
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        let updated = store
            .transition(
                &auth.tenant_id,
                &auth.id,
                AuthorizationStatus::Valid,
                "verified",
                serde_json::json!({}),
                "svc",
                Utc::now(),
                false,
            )
            .unwrap();
        assert_eq!(updated.status, AuthorizationStatus::Valid);
    }

    #[test]
    fn terminal_state_rejects_further_transition() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let auth = sample("tenant-a", AuthorizationStatus::Revoked);
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        let err = store
            .transition(
                &auth.tenant_id,
                &auth.id,
                AuthorizationStatus::Valid,
                "retry",
                serde_json::json!({}),
                "svc",
                Utc::now(),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, VaultError::IllegalTransition { .. }));
    }

    #[test]
    fn noop_transition_allowed_when_flagged() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let auth = sample("tenant-a", AuthorizationStatus::Expired);
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        let result = store
            .transition(
                &auth.tenant_id,
                &auth.id,
                AuthorizationStatus::Expired,
                "reverify",
                serde_json::json!({}),
                "svc",
                Utc::now(),
                true,
            )
            .unwrap();
        assert_eq!(result.status, AuthorizationStatus::Expired);
    }

    #[test]
    fn tenant_isolation_in_list() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let auth_a = sample("tenant-a", AuthorizationStatus::Active);
        let auth_b = sample("tenant-b", AuthorizationStatus::Active);
        store.create(&auth_a, "system", serde_json::json!({})).unwrap();
        store.create(&auth_b, "system", serde_json::json!({})).unwrap();
        let listed = store.list(&TenantId::new("tenant-a")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, auth_a.id);
    }

    #[test]
    fn soft_deleted_row_hard_deletes_with_its_audit_trail() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let log = crate::audit::AuditLog::new(&db);
        let auth = sample("tenant-a", AuthorizationStatus::Active);
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        store.soft_delete(&auth.tenant_id, &auth.id, Utc::now()).unwrap();
        store.hard_delete_with_audit(&auth.tenant_id, &auth.id).unwrap();
        assert!(store.get(&auth.tenant_id, &auth.id).unwrap().is_none());
        assert!(log.for_authorization(&auth.tenant_id, &auth.id).unwrap().is_empty());
    }

    #[test]
    fn find_by_acp_token_id_matches_raw_payload() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let mut auth = sample("tenant-a", AuthorizationStatus::Active);
        auth.protocol = Protocol::Acp;
        auth.raw_payload = r#"{"token_id":"acp-77"}"#.to_string();
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        let found = store.find_by_acp_token_id(&auth.tenant_id, "acp-77").unwrap().unwrap();
        assert_eq!(found.id, auth.id);
        assert!(store.find_by_acp_token_id(&auth.tenant_id, "nope").unwrap().is_none());
    }
}
