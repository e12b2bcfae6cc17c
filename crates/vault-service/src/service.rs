use std::sync::Arc;

use chrono::Duration;
use vault_core::{
    AuthorizationId, AuthorizationStatus, CallerContext, Clock, Money, Protocol, TenantId,
    VaultError, VerificationResult, VerificationStatus,
};
use vault_crypto::Truststore;
use vault_store::{AuthorizationStore, StateDb};
use vault_webhooks::{OutboundEngine, OutboundEvent, OutboundQueue};

use crate::filter::{SearchFilter, SortBy};

/// Default validity window assigned to a record that failed verification
/// before a usable `exp`/`expires_at` claim could be read — it must still
/// satisfy the "expires_at strictly future at create" invariant.
const FALLBACK_VALIDITY: Duration = Duration::days(1);

pub struct AuthorizationServiceConfig {
    pub max_payload_bytes: usize,
    /// Gates ACP ingestion end to end (§6.2 `ACP_ENABLE`): both `create`
    /// and `reverify` route through `vault_verify::dispatch`, which rejects
    /// `Protocol::Acp` with `ProtocolDisabled` while this is `false`.
    pub acp_enabled: bool,
    pub default_retention_days: i64,
}

/// The façade (C11) orchestrating C4 (dispatch), C5 (store), C6 (audit,
/// implicit in the store's transactional writes) and C8 (outbound) for the
/// operations transport handlers call.
pub struct AuthorizationService {
    db: Arc<StateDb>,
    truststore: Arc<Truststore>,
    psp_allowlist: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    outbound: Arc<OutboundEngine>,
    queue: OutboundQueue,
    clock: Arc<dyn Clock>,
    config: AuthorizationServiceConfig,
}

impl AuthorizationService {
    pub fn new(
        db: Arc<StateDb>,
        truststore: Arc<Truststore>,
        psp_allowlist: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        outbound: Arc<OutboundEngine>,
        queue: OutboundQueue,
        clock: Arc<dyn Clock>,
        config: AuthorizationServiceConfig,
    ) -> Self {
        Self { db, truststore, psp_allowlist, outbound, queue, clock, config }
    }

    fn require_tenant_write(&self, caller: &CallerContext, tenant_id: &TenantId) -> Result<(), VaultError> {
        if caller.is_admin() || &caller.tenant_id == tenant_id {
            Ok(())
        } else {
            Err(VaultError::Forbidden(format!(
                "caller tenant {} may not act on tenant {tenant_id}",
                caller.tenant_id
            )))
        }
    }

    /// Loads an authorization scoped to the caller's tenant. A cross-tenant
    /// read returns `NOT_FOUND`, never `FORBIDDEN`, per the no-enumeration
    /// invariant — admins may read any tenant. Soft-deleted rows
    /// (`deleted_at.is_some()`) are invisible unless `include_deleted`.
    fn load_scoped(
        &self,
        caller: &CallerContext,
        id: &AuthorizationId,
        include_deleted: bool,
    ) -> Result<vault_core::Authorization, VaultError> {
        let store = AuthorizationStore::new(&self.db);
        let found = if caller.is_admin() {
            store.all()?.into_iter().find(|a| &a.id == id)
        } else {
            store.get(&caller.tenant_id, id)?
        };
        found
            .filter(|a| include_deleted || !a.is_deleted())
            .ok_or_else(|| VaultError::not_found(format!("authorization {id}")))
    }

    fn dispatch(
        &self,
        protocol: Protocol,
        payload: &str,
        expected_scope: Option<&str>,
    ) -> Result<VerificationResult, VaultError> {
        vault_verify::dispatch(
            protocol,
            payload,
            &self.truststore,
            |psp| (self.psp_allowlist)(psp),
            expected_scope,
            self.config.acp_enabled,
            self.clock.as_ref(),
            self.config.max_payload_bytes,
        )
    }

    #[tracing::instrument(skip(self, payload), fields(tenant_id = %tenant_id))]
    pub fn create(
        &self,
        caller: &CallerContext,
        protocol: Protocol,
        payload: &str,
        tenant_id: TenantId,
        expected_scope: Option<&str>,
    ) -> Result<(vault_core::Authorization, VerificationResult), VaultError> {
        self.require_tenant_write(caller, &tenant_id)?;

        let verification = self.dispatch(protocol, payload, expected_scope)?;

        let now = self.clock.now();
        let authorization = vault_core::Authorization {
            id: AuthorizationId::new(),
            tenant_id: tenant_id.clone(),
            protocol,
            issuer: verification.issuer.clone().unwrap_or_default(),
            subject: verification.subject.clone().unwrap_or_default(),
            amount_limit: verification.amount_limit.unwrap_or(fallback_money()),
            scope: verification.scope.clone().unwrap_or_default(),
            status: AuthorizationStatus::Active,
            verification_status: verification.status,
            verification_reason: verification.reason.clone().unwrap_or_default(),
            created_at: now,
            updated_at: now,
            expires_at: verification.expires_at.unwrap_or(now + FALLBACK_VALIDITY),
            raw_payload: payload.to_string(),
            retention_days: self.config.default_retention_days,
            deleted_at: None,
        };

        let store = AuthorizationStore::new(&self.db);
        store.create(
            &authorization,
            &caller.user_id,
            serde_json::json!({
                "protocol": protocol.to_string(),
                "issuer": authorization.issuer,
                "subject": authorization.subject,
                "verification_status": verification.status.to_string(),
                "user_id": caller.user_id,
            }),
        )?;

        let authorization = if verification.is_valid() {
            store.transition(
                &tenant_id,
                &authorization.id,
                AuthorizationStatus::Valid,
                "verified",
                serde_json::json!({
                    "protocol": protocol.to_string(),
                    "verification_status": verification.status.to_string(),
                    "user_id": caller.user_id,
                }),
                &caller.user_id,
                now,
                false,
            )?
        } else {
            tracing::warn!(
                authorization_id = %authorization.id,
                status = ?verification.status,
                "authorization created with non-valid verification result"
            );
            authorization
        };

        if verification.is_valid() {
            self.publish(&authorization, "mandate.created")?;
        }

        Ok((authorization, verification))
    }

    #[tracing::instrument(skip(self))]
    pub fn reverify(
        &self,
        caller: &CallerContext,
        id: &AuthorizationId,
        expected_scope: Option<&str>,
    ) -> Result<VerificationResult, VaultError> {
        let authorization = self.load_scoped(caller, id, false)?;
        let verification = self.dispatch(authorization.protocol, &authorization.raw_payload, expected_scope)?;

        let now = self.clock.now();
        let store = AuthorizationStore::new(&self.db);

        if authorization.status.is_terminal() {
            store.transition(
                &authorization.tenant_id,
                id,
                authorization.status,
                "reverified",
                serde_json::json!({
                    "protocol": authorization.protocol.to_string(),
                    "recomputed_verification_status": verification.status.to_string(),
                    "user_id": caller.user_id,
                }),
                &caller.user_id,
                now,
                true,
            )?;
            // A terminal authorization's disposition is already settled; the
            // caller gets back the stored outcome, not whatever the fresh
            // (and discarded) recomputation produced.
            return Ok(VerificationResult {
                status: authorization.verification_status,
                reason: Some(authorization.verification_reason.clone()),
                details: None,
                issuer: Some(authorization.issuer.clone()),
                subject: Some(authorization.subject.clone()),
                amount_limit: Some(authorization.amount_limit),
                scope: Some(authorization.scope.clone()),
                expires_at: Some(authorization.expires_at),
            });
        }

        let new_status = if verification.status == VerificationStatus::Expired {
            AuthorizationStatus::Expired
        } else {
            authorization.status
        };

        store.transition(
            &authorization.tenant_id,
            id,
            new_status,
            "reverified",
            serde_json::json!({
                "protocol": authorization.protocol.to_string(),
                "verification_status": verification.status.to_string(),
                "user_id": caller.user_id,
            }),
            &caller.user_id,
            now,
            new_status == authorization.status,
        )?;

        Ok(verification)
    }

    #[tracing::instrument(skip(self))]
    pub fn revoke(
        &self,
        caller: &CallerContext,
        id: &AuthorizationId,
        reason: &str,
    ) -> Result<vault_core::Authorization, VaultError> {
        let authorization = self.load_scoped(caller, id, false)?;
        let now = self.clock.now();
        let updated = AuthorizationStore::new(&self.db).transition(
            &authorization.tenant_id,
            id,
            AuthorizationStatus::Revoked,
            reason,
            serde_json::json!({
                "protocol": authorization.protocol.to_string(),
                "reason": reason,
                "user_id": caller.user_id,
            }),
            &caller.user_id,
            now,
            false,
        )?;
        self.publish(&updated, "mandate.revoked")?;
        Ok(updated)
    }

    /// Soft-deletes a terminal authorization, starting its retention clock.
    /// The row stays in its last-known status for evidence packs and is only
    /// hidden from default `get`/`search` until C9's retention sweep
    /// hard-deletes it.
    #[tracing::instrument(skip(self))]
    pub fn delete(
        &self,
        caller: &CallerContext,
        id: &AuthorizationId,
    ) -> Result<vault_core::Authorization, VaultError> {
        let authorization = self.load_scoped(caller, id, false)?;
        if !authorization.status.is_terminal() {
            return Err(VaultError::IllegalTransition {
                from: authorization.status.to_string(),
                to: "deleted".to_string(),
            });
        }
        let now = self.clock.now();
        AuthorizationStore::new(&self.db).soft_delete(&authorization.tenant_id, id, now)
    }

    pub fn get(&self, caller: &CallerContext, id: &AuthorizationId) -> Result<vault_core::Authorization, VaultError> {
        self.load_scoped(caller, id, false)
    }

    pub fn search(
        &self,
        caller: &CallerContext,
        filter: &SearchFilter,
    ) -> Result<Vec<vault_core::Authorization>, VaultError> {
        let all = AuthorizationStore::new(&self.db).list(&caller.tenant_id)?;
        let mut matched: Vec<_> = all
            .into_iter()
            .filter(|a| filter.include_deleted || !a.is_deleted())
            .filter(|a| filter.protocol.map_or(true, |p| p == a.protocol))
            .filter(|a| filter.status.map_or(true, |s| s == a.status))
            .filter(|a| filter.issuer.as_deref().map_or(true, |i| i == a.issuer))
            .filter(|a| filter.subject.as_deref().map_or(true, |s| s == a.subject))
            .filter(|a| filter.min_amount.map_or(true, |m| a.amount_limit.amount() >= m))
            .filter(|a| filter.max_amount.map_or(true, |m| a.amount_limit.amount() <= m))
            .filter(|a| filter.currency.as_deref().map_or(true, |c| a.amount_limit.currency().as_str().eq_ignore_ascii_case(c)))
            .filter(|a| filter.expires_before.map_or(true, |t| a.expires_at < t))
            .filter(|a| filter.expires_after.map_or(true, |t| a.expires_at > t))
            .filter(|a| filter.created_before.map_or(true, |t| a.created_at < t))
            .filter(|a| filter.created_after.map_or(true, |t| a.created_at > t))
            .collect();
        match filter.sort_by {
            SortBy::CreatedAt => matched.sort_by_key(|a| a.created_at),
            SortBy::ExpiresAt => matched.sort_by_key(|a| a.expires_at),
            SortBy::AmountLimit => matched.sort_by_key(|a| a.amount_limit.amount()),
        }
        let start = filter.offset.min(matched.len());
        let end = (start + filter.effective_limit()).min(matched.len());
        Ok(matched[start..end].to_vec())
    }

    pub fn export_evidence(
        &self,
        caller: &CallerContext,
        id: &AuthorizationId,
    ) -> Result<(String, Vec<u8>), VaultError> {
        let authorization = self.load_scoped(caller, id, true)?;
        let verification = self.dispatch(authorization.protocol, &authorization.raw_payload, None)?;
        let now = self.clock.now();
        vault_evidence::export_evidence(&self.db, &authorization, &verification, &caller.user_id, now)
    }

    fn publish(&self, authorization: &vault_core::Authorization, event_type: &str) -> Result<(), VaultError> {
        let event = OutboundEvent {
            event_id: vault_core::EventId::new(),
            tenant_id: authorization.tenant_id.clone(),
            authorization_id: authorization.id,
            event_type: event_type.to_string(),
            body: serde_json::json!({
                "authorization_id": authorization.id.to_string(),
                "status": authorization.status.to_string(),
                "event_type": event_type,
            }),
            created_at: self.clock.now(),
        };
        self.outbound.publish(&self.db, &self.queue, event, self.clock.as_ref())?;
        Ok(())
    }
}

fn fallback_money() -> Money {
    Money::parse("0.00", "USD").expect("0.00 USD always parses")
}
