use std::sync::Arc;

use vault_core::{AuthorizationStatus, Clock, VaultError};
use vault_store::{AlertStore, AuthorizationStore, StateDb};

const NEAR_EXPIRY: &str = "near_expiry";

/// Raises a deduped `near_expiry` alert for every authorization entering
/// `window` of its `expires_at`. Dedup is keyed on
/// `(authorization_id, alert_type)` — a repeat sweep inside the same window
/// never creates a second row for the same authorization (C9).
pub async fn run(db: Arc<StateDb>, clock: Arc<dyn Clock>, window: chrono::Duration) -> Result<usize, VaultError> {
    let db = db.clone();
    let clock = clock.clone();
    tokio::task::spawn_blocking(move || scan(&db, clock.as_ref(), window))
        .await
        .map_err(|e| VaultError::Internal(e.to_string()))?
}

fn scan(db: &StateDb, clock: &dyn Clock, window: chrono::Duration) -> Result<usize, VaultError> {
    let store = AuthorizationStore::new(db);
    let alerts = AlertStore::new(db);
    let now = clock.now();
    let horizon = now + window;
    let mut created = 0;
    for auth in store.all()? {
        if auth.status.is_terminal() || auth.is_deleted() {
            continue;
        }
        if matches!(auth.status, AuthorizationStatus::Active | AuthorizationStatus::Valid)
            && auth.expires_at > now
            && auth.expires_at <= horizon
            && alerts.create_if_absent(&auth.tenant_id, auth.id, NEAR_EXPIRY)?
        {
            tracing::info!(
                authorization_id = %auth.id,
                tenant_id = %auth.tenant_id,
                expires_at = %auth.expires_at,
                "authorization nearing expiry"
            );
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vault_core::{Authorization, AuthorizationId, Money, Protocol, TenantId, TestClock, VerificationStatus};

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
    fn alerts_on_authorization_inside_window_only() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let clock = TestClock::new(chrono::Utc::now());
        let soon = sample(AuthorizationStatus::Valid, clock.now() + Duration::minutes(30));
        let later = sample(AuthorizationStatus::Valid, clock.now() + Duration::days(30));
        store.create(&soon, "system", serde_json::json!({})).unwrap();
        store.create(&later, "system", serde_json::json!({})).unwrap();
        let count = scan(&db, &clock, Duration::hours(1)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn second_sweep_does_not_double_alert() {
        let (db, _dir) = StateDb::open_temp();
        let store = AuthorizationStore::new(&db);
        let clock = TestClock::new(chrono::Utc::now());
        let soon = sample(AuthorizationStatus::Valid, clock.now() + Duration::minutes(30));
        store.create(&soon, "system", serde_json::json!({})).unwrap();
        assert_eq!(scan(&db, &clock, Duration::hours(1)).unwrap(), 1);
        assert_eq!(scan(&db, &clock, Duration::hours(1)).unwrap(), 0);
    }
}
