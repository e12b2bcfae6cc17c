use std::sync::Arc;

use vault_core::{Clock, VaultError};
use vault_store::{AuthorizationStore, StateDb};

/// Hard-deletes soft-deleted authorizations whose retention window has
/// elapsed, along with every audit event they produced (spec.md §4.9:
/// "hard-delete them along with their audit events"). `default_retention`
/// is used only as a fallback for rows with `retention_days <= 0`.
pub async fn run(db: Arc<StateDb>, clock: Arc<dyn Clock>, default_retention: chrono::Duration) -> Result<usize, VaultError> {
    let db = db.clone();
    let clock = clock.clone();
    tokio::task::spawn_blocking(move || purge(&db, clock.as_ref(), default_retention))
        .await
        .map_err(|e| VaultError::Internal(e.to_string()))?
}

fn purge(db: &StateDb, clock: &dyn Clock, default_retention: chrono::Duration) -> Result<usize, VaultError> {
    let store = AuthorizationStore::new(db);
    let now = clock.now();
    let mut purged = 0;
    for auth in store.all()? {
        let Some(deleted_at) = auth.deleted_at else { continue };
        let retention = if auth.retention_days > 0 {
            chrono::Duration::days(auth.retention_days)
        } else {
            default_retention
        };
        if deleted_at + retention <= now {
            store.hard_delete_with_audit(&auth.tenant_id, &auth.id)?;
            purged += 1;
        }
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vault_core::{
        Authorization, AuthorizationId, AuthorizationStatus, Money, Protocol, TenantId, TestClock,
        VerificationStatus,
    };

    fn sample(
        status: AuthorizationStatus,
        deleted_at: Option<chrono::DateTime<chrono::Utc>>,
        retention_days: i64,
    ) -> Authorization {
        let now = chrono::Utc::now();
        Authorization {
            id: AuthorizationId::new(),
            tenant_id: TenantId::new("tenant-a"),
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
            expires_at: now + Duration::days(1),
            raw_payload: "token".into(),
            retention_days,
            deleted_at,
        }
    }

    #[test]
    fn purges_past_retention_soft_deleted_but_keeps_recent_and_active() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let clock = TestClock::new(chrono::Utc::now());

        let old_deleted = sample(AuthorizationStatus::Used, Some(clock.now() - Duration::days(100)), 30);
        let recent_deleted = sample(AuthorizationStatus::Revoked, Some(clock.now() - Duration::days(1)), 30);
        let active = sample(AuthorizationStatus::Active, None, 30);

        store.create(&old_deleted, "system", serde_json::json!({})).unwrap();
        store.create(&recent_deleted, "system", serde_json::json!({})).unwrap();
        store.create(&active, "system", serde_json::json!({})).unwrap();

        let purged = purge(&db, &clock, Duration::days(90)).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&old_deleted.tenant_id, &old_deleted.id).unwrap().is_none());
        assert!(store.get(&recent_deleted.tenant_id, &recent_deleted.id).unwrap().is_some());
        assert!(store.get(&active.tenant_id, &active.id).unwrap().is_some());
    }

    #[test]
    fn zero_retention_days_falls_back_to_default() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let clock = TestClock::new(chrono::Utc::now());
        let auth = sample(AuthorizationStatus::Used, Some(clock.now() - Duration::days(1)), 0);
        store.create(&auth, "system", serde_json::json!({})).unwrap();
        let purged = purge(&db, &clock, Duration::hours(1)).unwrap();
        assert_eq!(purged, 1);
    }
}
