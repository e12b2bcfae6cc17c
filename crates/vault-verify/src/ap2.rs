use chrono::{DateTime, TimeZone, Utc};
use vault_core::{Clock, Money, VerificationResult, VerificationStatus};
use vault_crypto::Truststore;

/// Verifies an AP2 JWT-VC authorization payload (C2). Steps run in a fixed
/// order and short-circuit at the first failure, exactly as named:
/// structure → signature → required claims → expiry → scope. `amount_limit`
/// and `currency` are optional claims (§3 data model); `iss`, `sub`, `iat`,
/// `exp` are mandatory. `expected_scope` is only checked when the caller
/// supplied one — a token with no caller-asserted scope expectation is
/// valid regardless of its own `scope` claim.
pub fn verify(
    payload: &str,
    truststore: &Truststore,
    expected_scope: Option<&str>,
    clock: &dyn Clock,
    max_payload_bytes: usize,
) -> VerificationResult {
    // 1. Structure: size cap, then compact-JWS shape + base64url + JSON.
    if payload.len() > max_payload_bytes {
        return VerificationResult::failure(VerificationStatus::InvalidFormat, "payload exceeds size cap");
    }
    let parts = match vault_crypto::parse_compact_jws(payload) {
        Ok(parts) => parts,
        Err(e) => return VerificationResult::failure(VerificationStatus::InvalidFormat, e.to_string()),
    };

    // 2. Issuer lookup — also a structural requirement (AP2 credentials are
    // always issuer-attributed), so a missing `iss` fails before signature.
    let issuer = match parts.payload.get("iss").and_then(|v| v.as_str()) {
        Some(iss) => iss.to_string(),
        None => {
            return VerificationResult::failure(
                VerificationStatus::MissingRequiredField,
                "missing iss claim",
            )
        }
    };

    let keys = match truststore.keys_for(&issuer) {
        Some(keys) if !keys.is_empty() => keys,
        _ => return VerificationResult::failure(VerificationStatus::IssuerUnknown, issuer),
    };

    // 3. Signature — try the key matching `kid` if present, else any trusted key.
    let candidates: Vec<_> = match &parts.header.kid {
        Some(kid) => keys.iter().filter(|k| k.kid.as_deref() == Some(kid.as_str())).collect(),
        None => keys.iter().collect(),
    };
    let candidates = if candidates.is_empty() { keys.iter().collect() } else { candidates };

    let signature_ok = candidates
        .iter()
        .any(|key| vault_crypto::verify_jws_signature(&parts, key).is_ok());
    if !signature_ok {
        return VerificationResult::failure(VerificationStatus::SigInvalid, "no trusted key verified the signature");
    }

    // 4. Required claims.
    let subject = match parts.payload.get("sub").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => return VerificationResult::failure(VerificationStatus::MissingRequiredField, "missing sub claim"),
    };
    if parts.payload.get("iat").and_then(|v| v.as_i64()).is_none() {
        return VerificationResult::failure(VerificationStatus::MissingRequiredField, "missing iat claim");
    }
    let exp = match parts.payload.get("exp").and_then(|v| v.as_i64()) {
        Some(e) => e,
        None => return VerificationResult::failure(VerificationStatus::MissingRequiredField, "missing exp claim"),
    };
    let scope = parts.payload.get("scope").and_then(|v| v.as_str()).map(|s| s.to_string());

    // amount_limit/currency are optional; a present amount_limit without a
    // matching currency (or vice versa) is still a malformed claim pair.
    let amount_raw = parts.payload.get("amount_limit").and_then(|v| v.as_str());
    let currency = parts.payload.get("currency").and_then(|v| v.as_str());
    let amount_limit = match (amount_raw, currency) {
        (None, None) => None,
        (Some(amount_raw), Some(currency)) => match Money::parse(amount_raw, currency) {
            Ok(m) => Some(m),
            Err(e) => return VerificationResult::failure(VerificationStatus::MissingRequiredField, e.to_string()),
        },
        _ => {
            return VerificationResult::failure(
                VerificationStatus::MissingRequiredField,
                "amount_limit and currency must both be present or both absent",
            )
        }
    };

    let expires_at = match Utc.timestamp_opt(exp, 0).single() {
        Some(dt) => dt,
        None => return VerificationResult::failure(VerificationStatus::MissingRequiredField, "exp out of range"),
    };

    // 5. Expiry.
    let now: DateTime<Utc> = clock.now();
    if now >= expires_at {
        return VerificationResult::failure(VerificationStatus::Expired, "credential has expired");
    }

    // 6. Scope — only checked when the caller asserted an expectation.
    if let Some(expected) = expected_scope {
        if scope.as_deref() != Some(expected) {
            return VerificationResult::failure(VerificationStatus::ScopeInvalid, "scope does not match expected value");
        }
    }

    VerificationResult {
        status: VerificationStatus::Valid,
        reason: None,
        details: None,
        issuer: Some(issuer),
        subject: Some(subject),
        amount_limit,
        scope,
        expires_at: Some(expires_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::{SystemClock, TestClock};

    #[test]
    fn oversized_payload_rejected_before_parsing() {
        let truststore = Truststore::new("mem://").unwrap();
        let clock = SystemClock;
        let huge = "x".repeat(10);
        let result = verify(&huge, &truststore, None, &clock, 5);
        assert_eq!(result.status, VerificationStatus::InvalidFormat);
    }

    #[test]
    fn malformed_jws_rejected() {
        let truststore = Truststore::new("mem://").unwrap();
        let clock = SystemClock;
        let result = verify("not-a-jws", &truststore, None, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::InvalidFormat);
    }

    #[test]
    fn unknown_issuer_rejected() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        let truststore = Truststore::new("mem://").unwrap();
        let clock = TestClock::new(Utc::now());
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"iss":"did:example:unknown"}"#);
        let token = format!("{header}.{payload}.sig");
        let result = verify(&token, &truststore, None, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::IssuerUnknown);
    }
}
