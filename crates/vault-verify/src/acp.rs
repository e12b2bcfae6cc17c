use chrono::{DateTime, Utc};
use serde::Deserialize;
use vault_core::{Clock, Money, VerificationResult, VerificationStatus};

/// Caller-asserted constraints narrowing a delegated token's usage.
#[derive(Deserialize)]
struct AcpConstraints {
    merchant: Option<String>,
}

/// The JSON shape of an ACP delegated-token payment authorization
/// (spec.md §4.3/§6.1). Unknown top-level keys are rejected outright.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AcpToken {
    token_id: String,
    psp_id: String,
    merchant_id: String,
    max_amount: String,
    currency: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    constraints: Option<AcpConstraints>,
}

/// Verifies an ACP delegated-token authorization (C3). `psp_is_allowed`
/// stands in for the caller's configured PSP allowlist (spec.md §6.2); a
/// PSP outside it is treated the same as an unknown issuer. If
/// `constraints.merchant` is present on the token it must match
/// `merchant_id` byte-for-byte, independent of any caller expectation.
pub fn verify(
    payload: &str,
    psp_is_allowed: impl Fn(&str) -> bool,
    clock: &dyn Clock,
    max_payload_bytes: usize,
) -> VerificationResult {
    if payload.len() > max_payload_bytes {
        return VerificationResult::failure(VerificationStatus::InvalidFormat, "payload exceeds size cap");
    }

    let token: AcpToken = match serde_json::from_str(payload) {
        Ok(t) => t,
        Err(e) => return VerificationResult::failure(VerificationStatus::InvalidFormat, e.to_string()),
    };

    let now: DateTime<Utc> = clock.now();
    if now >= token.expires_at {
        return VerificationResult::failure(VerificationStatus::Expired, "delegated token has expired");
    }

    let amount_limit = match Money::parse(&token.max_amount, &token.currency) {
        Ok(m) => m,
        Err(e) => return VerificationResult::failure(VerificationStatus::MissingRequiredField, e.to_string()),
    };

    // A zero delegated limit has nothing left to authorize — treated as an
    // already-revoked grant rather than a structurally invalid one.
    if amount_limit.is_zero() {
        return VerificationResult::failure(VerificationStatus::Revoked, "max_amount is zero");
    }

    if let Some(merchant) = token.constraints.as_ref().and_then(|c| c.merchant.as_ref()) {
        if merchant != &token.merchant_id {
            return VerificationResult::failure(
                VerificationStatus::ScopeInvalid,
                "constraints.merchant does not match merchant_id",
            );
        }
    }

    if !psp_is_allowed(&token.psp_id) {
        return VerificationResult::failure(VerificationStatus::IssuerUnknown, token.psp_id);
    }

    VerificationResult {
        status: VerificationStatus::Valid,
        reason: None,
        details: None,
        issuer: Some(token.psp_id),
        subject: Some(token.merchant_id),
        amount_limit: Some(amount_limit),
        scope: Some(token.token_id),
        expires_at: Some(token.expires_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::TestClock;

    fn token_json(max_amount: &str, expires_at: &str) -> String {
        format!(
            r#"{{"token_id":"acp-1","psp_id":"psp-1","merchant_id":"m-acme","max_amount":"{max_amount}","currency":"USD","expires_at":"{expires_at}"}}"#
        )
    }

    #[test]
    fn unknown_psp_rejected() {
        let clock = TestClock::new(Utc::now());
        let result = verify(&token_json("10.00", "2999-01-01T00:00:00Z"), |_| false, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::IssuerUnknown);
    }

    #[test]
    fn zero_max_amount_is_revoked() {
        let clock = TestClock::new(Utc::now());
        let result = verify(&token_json("0.00", "2999-01-01T00:00:00Z"), |_| true, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::Revoked);
    }

    #[test]
    fn expired_token_rejected() {
        let clock = TestClock::new(Utc::now());
        let result = verify(&token_json("10.00", "2000-01-01T00:00:00Z"), |_| true, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::Expired);
    }

    #[test]
    fn valid_token_accepted() {
        let clock = TestClock::new(Utc::now());
        let result = verify(&token_json("10.00", "2999-01-01T00:00:00Z"), |_| true, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::Valid);
        assert_eq!(result.amount_limit.unwrap().to_string(), "10.00 USD");
    }

    #[test]
    fn mismatched_constraint_merchant_is_scope_invalid() {
        let clock = TestClock::new(Utc::now());
        let payload = r#"{"token_id":"acp-1","psp_id":"psp-1","merchant_id":"m-acme","max_amount":"10.00","currency":"USD","expires_at":"2999-01-01T00:00:00Z","constraints":{"merchant":"m-other"}}"#;
        let result = verify(payload, |_| true, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::ScopeInvalid);
    }

    #[test]
    fn unknown_top_level_field_is_invalid_format() {
        let clock = TestClock::new(Utc::now());
        let payload = r#"{"token_id":"acp-1","psp_id":"psp-1","merchant_id":"m-acme","max_amount":"10.00","currency":"USD","expires_at":"2999-01-01T00:00:00Z","scope":"payments:charge"}"#;
        let result = verify(payload, |_| true, &clock, 1_000_000);
        assert_eq!(result.status, VerificationStatus::InvalidFormat);
    }
}
