pub mod hmac_sign;
pub mod jws;
pub mod truststore;

pub use hmac_sign::{sign_hex, verify_hex};
pub use jws::{parse_compact_jws, verify_jws_signature, JwsError, JwsHeader, JwsParts};
pub use truststore::{TrustedKey, Truststore};
