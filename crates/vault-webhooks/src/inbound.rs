use serde::Deserialize;
use vault_core::{Authorization, AuthorizationStatus, Clock, TenantId, VaultError};
use vault_store::{AuthorizationStore, IdempotencyStore, StateDb};

/// The data payload of an inbound ACP lifecycle webhook. The PSP only ever
/// knows its own `token_id`, never this vault's internal authorization id
/// (spec.md §4.7/§6.1), so resolution always goes through it.
#[derive(Deserialize)]
struct AcpWebhookData {
    token_id: String,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    merchant_id: Option<String>,
}

/// The envelope of an inbound ACP lifecycle webhook (spec.md §6.1).
#[derive(Deserialize)]
struct AcpWebhookEnvelope {
    event_id: String,
    event_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<String>,
    data: AcpWebhookData,
}

/// Handles one inbound ACP webhook delivery (C7): verify → parse → resolve
/// by `data.token_id` → idempotency claim → conditional transition. Returns
/// the authorization's state after processing, which is identical to its
/// state before processing if this delivery turned out to be a replay.
pub fn handle_inbound(
    db: &StateDb,
    tenant_id: &TenantId,
    raw_body: &[u8],
    signature_hex: &str,
    webhook_secret: &[u8],
    acp_enabled: bool,
    clock: &dyn Clock,
) -> Result<Authorization, VaultError> {
    if !acp_enabled {
        return Err(VaultError::ProtocolDisabled("ACP".into()));
    }

    if !vault_crypto::verify_hex(webhook_secret, raw_body, signature_hex) {
        return Err(VaultError::Unauthorized("invalid webhook HMAC signature".into()));
    }

    let envelope: AcpWebhookEnvelope = serde_json::from_slice(raw_body)
        .map_err(|e| VaultError::InvalidInput(format!("malformed webhook body: {e}")))?;

    let auth_store = AuthorizationStore::new(db);
    let idempotency = IdempotencyStore::new(db);

    let authorization = auth_store
        .find_by_acp_token_id(tenant_id, &envelope.data.token_id)?
        .ok_or_else(|| VaultError::not_found(format!("acp token {}", envelope.data.token_id)))?;

    let first_delivery = idempotency.claim(tenant_id, &envelope.event_id, authorization.id)?;
    if !first_delivery {
        return auth_store
            .get(tenant_id, &authorization.id)?
            .ok_or_else(|| VaultError::not_found(format!("authorization {}", authorization.id)));
    }

    let (new_status, details) = match envelope.event_type.as_str() {
        "token.used" => (
            AuthorizationStatus::Used,
            serde_json::json!({
                "protocol": "ACP",
                "token_id": envelope.data.token_id,
                "amount": envelope.data.amount,
                "currency": envelope.data.currency,
                "transaction_id": envelope.data.transaction_id,
                "merchant_id": envelope.data.merchant_id,
            }),
        ),
        "token.revoked" => (
            AuthorizationStatus::Revoked,
            serde_json::json!({
                "protocol": "ACP",
                "reason": "revoked via ACP webhook",
                "revoked_by": "acp-webhook",
                "old_status": authorization.status.to_string(),
                "new_status": AuthorizationStatus::Revoked.to_string(),
            }),
        ),
        other => return Err(VaultError::InvalidInput(format!("unrecognized event_type: {other}"))),
    };

    auth_store.transition(
        tenant_id,
        &authorization.id,
        new_status,
        &format!("inbound ACP webhook: {}", envelope.event_type),
        details,
        "acp-webhook",
        clock.now(),
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::{AuthorizationId, Money, Protocol, SystemClock, VerificationStatus};

    fn seed_authorization(db: &StateDb, tenant_id: &TenantId, status: AuthorizationStatus, token_id: &str) -> AuthorizationId {
        let now = chrono::Utc::now();
        let auth = Authorization {
            id: AuthorizationId::new(),
            tenant_id: tenant_id.clone(),
            protocol: Protocol::Acp,
            issuer: "psp-1".into(),
            subject: "m-acme".into(),
            amount_limit: Money::parse("10.00", "USD").unwrap(),
            scope: token_id.to_string(),
            status,
            verification_status: VerificationStatus::Valid,
            verification_reason: "ok".into(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(1),
            raw_payload: format!(r#"{{"token_id":"{token_id}"}}"#),
            retention_days: 365,
            deleted_at: None,
        };
        AuthorizationStore::new(db).create(&auth, "system", serde_json::json!({})).unwrap();
        auth.id
    }

    fn used_body(event_id: &str, token_id: &str) -> String {
        format!(
            r#"{{"event_id":"{event_id}","event_type":"token.used","timestamp":"2026-01-01T00:00:00Z","data":{{"token_id":"{token_id}","amount":"5.00","currency":"USD","transaction_id":"tx-1","merchant_id":"m-acme"}}}}"#
        )
    }

    #[test]
    fn valid_signature_transitions_to_used() {
        let (db, _dir) = StateDb::open_temp();
        let tenant = TenantId::new("tenant-a");
        let auth_id = seed_authorization(&db, &tenant, AuthorizationStatus::Valid, "acp-1");
        let body = used_body("evt-1", "acp-1");
        let secret = b"shared-secret";
        let sig = vault_crypto::sign_hex(secret, body.as_bytes());
        let result = handle_inbound(&db, &tenant, body.as_bytes(), &sig, secret, true, &SystemClock).unwrap();
        assert_eq!(result.id, auth_id);
        assert_eq!(result.status, AuthorizationStatus::Used);
    }

    #[test]
    fn invalid_signature_rejected() {
        let (db, _dir) = StateDb::open_temp();
        let tenant = TenantId::new("tenant-a");
        seed_authorization(&db, &tenant, AuthorizationStatus::Valid, "acp-1");
        let body = used_body("evt-1", "acp-1");
        let err = handle_inbound(&db, &tenant, body.as_bytes(), "deadbeef", b"secret", true, &SystemClock).unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized(_)));
    }

    #[test]
    fn replayed_event_is_a_noop() {
        let (db, _dir) = StateDb::open_temp();
        let tenant = TenantId::new("tenant-a");
        seed_authorization(&db, &tenant, AuthorizationStatus::Valid, "acp-1");
        let body = used_body("evt-1", "acp-1");
        let secret = b"shared-secret";
        let sig = vault_crypto::sign_hex(secret, body.as_bytes());
        let first = handle_inbound(&db, &tenant, body.as_bytes(), &sig, secret, true, &SystemClock).unwrap();
        let second = handle_inbound(&db, &tenant, body.as_bytes(), &sig, secret, true, &SystemClock).unwrap();
        assert_eq!(first.status, second.status);
    }

    #[test]
    fn token_used_against_expired_is_illegal_transition() {
        let (db, _dir) = StateDb::open_temp();
        let tenant = TenantId::new("tenant-a");
        seed_authorization(&db, &tenant, AuthorizationStatus::Expired, "acp-1");
        let body = used_body("evt-1", "acp-1");
        let secret = b"shared-secret";
        let sig = vault_crypto::sign_hex(secret, body.as_bytes());
        let err = handle_inbound(&db, &tenant, body.as_bytes(), &sig, secret, true, &SystemClock).unwrap_err();
        assert!(matches!(err, VaultError::IllegalTransition { .. }));
    }

    #[test]
    fn unknown_token_id_is_not_found() {
        let (db, _dir) = StateDb::open_temp();
        let tenant = TenantId::new("tenant-a");
        seed_authorization(&db, &tenant, AuthorizationStatus::Valid, "acp-1");
        let body = used_body("evt-1", "acp-does-not-exist");
        let secret = b"shared-secret";
        let sig = vault_crypto::sign_hex(secret, body.as_bytes());
        let err = handle_inbound(&db, &tenant, body.as_bytes(), &sig, secret, true, &SystemClock).unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[test]
    fn disabled_protocol_is_rejected_before_verification() {
        let (db, _dir) = StateDb::open_temp();
        let tenant = TenantId::new("tenant-a");
        let body = used_body("evt-1", "acp-1");
        let err = handle_inbound(&db, &tenant, body.as_bytes(), "deadbeef", b"secret", false, &SystemClock).unwrap_err();
        assert!(matches!(err, VaultError::ProtocolDisabled(_)));
    }
}
