use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::truststore::TrustedKey;

#[derive(Debug, Error)]
pub enum JwsError {
    #[error("malformed compact JWS: {0}")]
    Malformed(String),
    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("signature verification failed")]
    SignatureInvalid,
}

/// The subset of the JWS header the dispatcher and verifier care about.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// A compact JWS split into its three segments, with the header and payload
/// already base64url-decoded and JSON-parsed. The signature itself is left
/// undecoded (raw base64url) — verification needs the exact encoded bytes
/// it was computed over.
pub struct JwsParts {
    pub header: JwsHeader,
    pub payload: serde_json::Value,
    pub signing_input: String,
    pub signature_b64: String,
}

/// Splits and decodes a compact JWS (`header.payload.signature`) without
/// touching the cryptographic signature. This is the "structure" step of
/// the AP2 verification pipeline — it must run, and fail with
/// `INVALID_FORMAT`, before any signature or claims check.
pub fn parse_compact_jws(token: &str) -> Result<JwsParts, JwsError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(JwsError::Malformed(format!(
            "expected 3 dot-separated segments, found {}",
            segments.len()
        )));
    }
    let [header_b64, payload_b64, signature_b64] = [segments[0], segments[1], segments[2]];

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| JwsError::Malformed(format!("header base64url: {e}")))?;
    let header: JwsHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| JwsError::Malformed(format!("header json: {e}")))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| JwsError::Malformed(format!("payload base64url: {e}")))?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes)
        .map_err(|e| JwsError::Malformed(format!("payload json: {e}")))?;

    if signature_b64.is_empty() {
        return Err(JwsError::Malformed("empty signature segment".into()));
    }

    Ok(JwsParts {
        header,
        payload,
        signing_input: format!("{header_b64}.{payload_b64}"),
        signature_b64: signature_b64.to_string(),
    })
}

/// Verifies the cryptographic signature of an already-parsed JWS against a
/// trusted key, delegating the actual math to `jsonwebtoken` rather than
/// hand-rolling RSA/EC verification.
pub fn verify_jws_signature(parts: &JwsParts, key: &TrustedKey) -> Result<(), JwsError> {
    if key.algorithm != parts.alg()? {
        return Err(JwsError::UnsupportedAlgorithm(key.algorithm));
    }
    // jsonwebtoken::crypto::verify takes the signature segment exactly as it
    // appears in the token (base64url, no padding), so no re-encoding is needed.
    let ok = jsonwebtoken::crypto::verify(
        &parts.signature_b64,
        parts.signing_input.as_bytes(),
        &key.decoding_key,
        key.algorithm,
    )
    .map_err(|_| JwsError::SignatureInvalid)?;
    if !ok {
        return Err(JwsError::SignatureInvalid);
    }
    Ok(())
}

impl JwsParts {
    fn alg(&self) -> Result<Algorithm, JwsError> {
        parse_algorithm(&self.header.alg)
    }
}

fn parse_algorithm(alg: &str) -> Result<Algorithm, JwsError> {
    match alg {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        other => Err(JwsError::Malformed(format!("unrecognized alg: {other}"))),
    }
}
