use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signs `payload` with `secret`, returning a lowercase hex digest. Used
/// both to verify inbound ACP webhooks and to sign outbound deliveries.
pub fn sign_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a hex-encoded HMAC-SHA256 signature in constant time, so a
/// malformed or forged signature doesn't leak timing information about how
/// many leading bytes matched.
pub fn verify_hex(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(given) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();
    expected.as_slice().ct_eq(&given).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let secret = b"shared-secret";
        let payload = b"{\"event\":\"token.used\"}";
        let sig = sign_hex(secret, payload);
        assert!(verify_hex(secret, payload, &sig));
    }

    #[test]
    fn tampered_payload_fails() {
        let secret = b"shared-secret";
        let sig = sign_hex(secret, b"original");
        assert!(!verify_hex(secret, b"tampered", &sig));
    }

    #[test]
    fn malformed_hex_fails_closed() {
        assert!(!verify_hex(b"secret", b"payload", "not-hex!!"));
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = sign_hex(b"secret-a", b"payload");
        assert!(!verify_hex(b"secret-b", b"payload", &sig));
    }
}
