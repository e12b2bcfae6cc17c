use std::sync::Arc;

use vault_core::{AuthorizationStatus, Clock, VaultError};
use vault_store::{AuthorizationStore, StateDb};

/// Sweeps every tenant's authorizations and transitions anything
/// non-terminal whose `expires_at` has passed to `Expired`.
pub async fn run(db: Arc<StateDb>, clock: Arc<dyn Clock>) -> Result<usize, VaultError> {
    let db = db.clone();
    let clock = clock.clone();
    tokio::task::spawn_blocking(move || sweep(&db, clock.as_ref()))
        .await
        .map_err(|e| VaultError::Internal(e.to_string()))?
}

fn sweep(db: &StateDb, clock: &dyn Clock) -> Result<usize, VaultError> {
    let store = AuthorizationStore::new(db);
    let now = clock.now();
    let mut expired_count = 0;
    for auth in store.all()? {
        if auth.status.is_terminal() || auth.expires_at > now {
            continue;
        }
        match store.transition(
            &auth.tenant_id,
            &auth.id,
            AuthorizationStatus::Expired,
            "expiry sweep",
            serde_json::json!({
                "protocol": auth.protocol.to_string(),
                "expires_at": auth.expires_at.to_rfc3339(),
                "old_status": auth.status.to_string(),
                "new_status": AuthorizationStatus::Expired.to_string(),
            }),
            "expiry-worker",
            now,
            false,
        ) {
            Ok(_) => expired_count += 1,
            Err(e) => tracing::warn!(authorization_id = %auth.id, error = %e, "expiry sweep failed to transition authorization"),
        }
    }
    Ok(expired_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vault_core::{
        Authorization, AuthorizationId, Money, Protocol, SystemClock, TenantId, TestClock,
        VerificationStatus,
    };

    fn sample(status: AuthorizationStatus, expires_at: chrono::DateTime<chrono::Utc>) -> Authorization {
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
            expires_at,
            raw_payload: "token".into(),
            retention_days: 365,
            deleted_at: None,
        }
    }

    #[test]
    fn sweep_expires_stale_active_authorization() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let clock = TestClock::new(chrono::Utc::now());
        let stale = sample(AuthorizationStatus::Active, clock.now() - Duration::hours(1));
        store.create(&stale, "system", serde_json::json!({})).unwrap();
        let count = sweep(&db, &clock).unwrap();
        assert_eq!(count, 1);
        let fetched = store.get(&stale.tenant_id, &stale.id).unwrap().unwrap();
        assert_eq!(fetched.status, AuthorizationStatus::Expired);
    }

    #[test]
    fn sweep_skips_terminal_and_future_expiry() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let clock = SystemClock;
        let future = sample(AuthorizationStatus::Active, clock.now() + Duration::days(1));
        let revoked = sample(AuthorizationStatus::Revoked, clock.now() - Duration::hours(1));
        store.create(&future, "system", serde_json::json!({})).unwrap();
        store.create(&revoked, "system", serde_json::json!({})).unwrap();
        let count = sweep(&db, &clock).unwrap();
        assert_eq!(count, 0);
    }
}
