use std::io::Write;

use chrono::{DateTime, Datelike, Timelike, Utc};
use vault_core::{AuditEvent, Authorization, Protocol, VaultError, VerificationResult};
use vault_store::{AuditLog, AuthorizationStore, StateDb};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Builds the deterministic evidence archive for one authorization and
/// records the export in the audit trail.
///
/// The caller is responsible for tenant-scoping (`C11` enforces
/// `caller.tenant_id == authorization.tenant_id` before calling in). This
/// module re-verifies nothing — it packages whatever `VerificationResult`
/// the caller already produced, so a reverify-then-export composes cleanly
/// without a second cryptographic check.
pub fn export_evidence(
    db: &StateDb,
    authorization: &Authorization,
    verification: &VerificationResult,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<(String, Vec<u8>), VaultError> {
    let audit_trail = AuditLog::new(db).for_authorization(&authorization.tenant_id, &authorization.id)?;
    let bytes = build_archive(authorization, verification, &audit_trail)?;

    let filename = format!(
        "evidence_pack_{}_{}_{}.zip",
        authorization.protocol,
        &authorization.id.to_string()[..8],
        authorization.updated_at.format("%Y%m%d_%H%M%S"),
    );

    AuthorizationStore::new(db).transition(
        &authorization.tenant_id,
        &authorization.id,
        authorization.status,
        "exported",
        serde_json::json!({
            "protocol": authorization.protocol.to_string(),
            "filename": filename,
            "user_id": actor,
        }),
        actor,
        now,
        true,
    )?;

    Ok((filename, bytes))
}

fn build_archive(
    authorization: &Authorization,
    verification: &VerificationResult,
    audit_trail: &[AuditEvent],
) -> Result<Vec<u8>, VaultError> {
    let mtime = zip_mtime(authorization.updated_at);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(mtime);

    let mut buf = Vec::new();
    {
        let mut writer = ZipWriter::new(std::io::Cursor::new(&mut buf));

        match authorization.protocol {
            Protocol::Ap2 => {
                write_member(&mut writer, options, "vc_jwt.txt", authorization.raw_payload.as_bytes())?;
                let credential = decode_ap2_credential(&authorization.raw_payload);
                write_json(&mut writer, options, "credential.json", &credential)?;
            }
            Protocol::Acp => {
                write_member(&mut writer, options, "token.json", authorization.raw_payload.as_bytes())?;
            }
        }

        write_json(&mut writer, options, "verification.json", verification)?;
        write_json(&mut writer, options, "audit.json", audit_trail)?;
        write_member(&mut writer, options, "summary.txt", summary(authorization, verification, audit_trail).as_bytes())?;

        writer.finish().map_err(|e| VaultError::Internal(format!("zip finish failed: {e}")))?;
    }
    Ok(buf)
}

fn write_member<W: Write + std::io::Seek>(
    writer: &mut ZipWriter<W>,
    options: FileOptions,
    name: &str,
    data: &[u8],
) -> Result<(), VaultError> {
    writer
        .start_file(name, options)
        .map_err(|e| VaultError::Internal(format!("zip start_file({name}) failed: {e}")))?;
    writer
        .write_all(data)
        .map_err(|e| VaultError::Internal(format!("zip write({name}) failed: {e}")))?;
    Ok(())
}

fn write_json<W: Write + std::io::Seek, T: serde::Serialize>(
    writer: &mut ZipWriter<W>,
    options: FileOptions,
    name: &str,
    value: &T,
) -> Result<(), VaultError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_member(writer, options, name, &bytes)
}

/// Structural decode only — the signature was already checked by C4 before
/// this authorization was persisted; `credential.json` exists for human
/// inspection of the header and claims, not re-verification.
fn decode_ap2_credential(raw_jws: &str) -> serde_json::Value {
    use base64::Engine;
    let parts: Vec<&str> = raw_jws.split('.').collect();
    if parts.len() != 3 {
        return serde_json::json!({ "error": "not a compact JWS" });
    }
    let decode = |segment: &str| -> serde_json::Value {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(segment)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or(serde_json::Value::Null)
    };
    serde_json::json!({
        "header": decode(parts[0]),
        "payload": decode(parts[1]),
    })
}

fn summary(authorization: &Authorization, verification: &VerificationResult, audit_trail: &[AuditEvent]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Authorization ID: {}\n", authorization.id));
    out.push_str(&format!("Tenant:           {}\n", authorization.tenant_id));
    out.push_str(&format!("Protocol:         {}\n", authorization.protocol));
    out.push_str(&format!("Issuer:           {}\n", authorization.issuer));
    out.push_str(&format!("Subject:          {}\n", authorization.subject));
    out.push_str(&format!("Amount limit:     {}\n", authorization.amount_limit));
    out.push_str(&format!("Scope:            {}\n", authorization.scope));
    out.push_str(&format!("Status:           {}\n", authorization.status));
    out.push_str(&format!("Verification:     {:?}\n", verification.status));
    out.push_str(&format!("Created at:       {}\n", authorization.created_at.to_rfc3339()));
    out.push_str(&format!("Expires at:       {}\n", authorization.expires_at.to_rfc3339()));
    out.push_str("\nAudit trail:\n");
    for event in audit_trail {
        out.push_str(&format!(
            "  {} {:?} -> {:?} ({}) actor={}\n",
            event.occurred_at.to_rfc3339(),
            event.old_status,
            event.new_status,
            event.reason,
            event.actor,
        ));
    }
    out
}

fn zip_mtime(at: DateTime<Utc>) -> zip::DateTime {
    zip::DateTime::from_date_and_time(
        at.year() as u16,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::{AuthorizationId, AuthorizationStatus, Money, TenantId, VerificationStatus};

    fn sample_authorization(protocol: Protocol) -> Authorization {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        Authorization {
            id: AuthorizationId::new(),
            tenant_id: TenantId::new("tenant-a"),
            protocol,
            issuer: "did:example:issuer".into(),
            subject: "did:example:subject".into(),
            amount_limit: Money::parse("100.00", "USD").unwrap(),
            scope: "payments:authorize".into(),
            status: AuthorizationStatus::Valid,
            verification_status: VerificationStatus::Valid,
            verification_reason: "ok".into(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(30),
            raw_payload: "header.payload.signature".into(),
            retention_days: 365,
            deleted_at: None,
        }
    }

    #[test]
    fn export_is_byte_reproducible_for_same_inputs() {
        let (db, _dir) = vault_store::StateDb::open_temp();
        let auth = sample_authorization(Protocol::Ap2);
        AuthorizationStore::new(&db).create(&auth, "system", serde_json::json!({})).unwrap();
        let verification = VerificationResult::failure(VerificationStatus::Valid, "ok");
        let now = auth.updated_at;

        let (name_a, bytes_a) = export_evidence(&db, &auth, &verification, "tester", now).unwrap();
        let (name_b, bytes_b) = export_evidence(&db, &auth, &verification, "tester", now).unwrap();

        assert_eq!(name_a, name_b);
        assert_eq!(bytes_a, bytes_b);
        assert!(name_a.starts_with("evidence_pack_AP2_"));
    }

    #[test]
    fn export_writes_audit_event() {
        let (db, _dir) = vault_store::StateDb::open_temp();
        let auth = sample_authorization(Protocol::Acp);
        AuthorizationStore::new(&db).create(&auth, "system", serde_json::json!({})).unwrap();
        let verification = VerificationResult::failure(VerificationStatus::Valid, "ok");
        export_evidence(&db, &auth, &verification, "tester", auth.updated_at).unwrap();

        let trail = AuditLog::new(&db).for_authorization(&auth.tenant_id, &auth.id).unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].reason, "exported");
        assert_eq!(trail[1].details["protocol"], "ACP");
        assert_eq!(trail[1].details["user_id"], "tester");
        assert!(trail[1].details["filename"].as_str().unwrap().starts_with("evidence_pack_ACP_"));
    }
}
