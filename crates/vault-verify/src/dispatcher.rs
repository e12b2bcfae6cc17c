use vault_core::{Clock, Protocol, VaultError, VerificationResult};
use vault_crypto::Truststore;

use crate::{acp, ap2};

/// Routes an inbound payload to the correct protocol verifier (C4). The
/// caller supplies the protocol explicitly — this vault never infers it
/// from payload shape, since AP2 and ACP payloads are not reliably
/// distinguishable without a caller-asserted hint. Rejects ACP payloads
/// outright when the protocol is disabled (`ACP_ENABLE=false`, spec.md
/// §6.2), before the payload is ever parsed.
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    protocol: Protocol,
    payload: &str,
    truststore: &Truststore,
    psp_is_allowed: impl Fn(&str) -> bool,
    expected_scope: Option<&str>,
    acp_enabled: bool,
    clock: &dyn Clock,
    max_payload_bytes: usize,
) -> Result<VerificationResult, VaultError> {
    match protocol {
        Protocol::Ap2 => Ok(ap2::verify(payload, truststore, expected_scope, clock, max_payload_bytes)),
        Protocol::Acp => {
            if !acp_enabled {
                return Err(VaultError::ProtocolDisabled("ACP".to_string()));
            }
            Ok(acp::verify(payload, psp_is_allowed, clock, max_payload_bytes))
        }
    }
}
