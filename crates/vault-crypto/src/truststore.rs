use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TruststoreError {
    #[error("unsupported truststore source: {0}")]
    UnsupportedSource(String),
    #[error("failed to read truststore file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse truststore file: {0}")]
    Parse(String),
    #[error("failed to load key material for issuer {issuer}: {reason}")]
    InvalidKey { issuer: String, reason: String },
}

/// A verification key trusted for a given issuer, already parsed into the
/// form `jsonwebtoken` needs.
#[derive(Clone)]
pub struct TrustedKey {
    pub kid: Option<String>,
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
}

#[derive(Deserialize)]
struct RawTruststoreFile {
    issuers: HashMap<String, Vec<RawKeyEntry>>,
}

#[derive(Deserialize)]
struct RawKeyEntry {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    public_key_pem: String,
}

enum Source {
    File(PathBuf),
    Memory,
}

/// Maps AP2 issuer identifiers to the public key material used to verify
/// their credentials. Loaded once at startup and reloadable via `refresh`;
/// readers never observe a partially-updated map because the whole table
/// is swapped behind a single lock.
pub struct Truststore {
    source: Source,
    issuers: RwLock<HashMap<String, Vec<TrustedKey>>>,
}

impl Truststore {
    /// `source_uri` is `file:///path/to/truststore.json` or `mem://` (an
    /// empty store populated later via `register`, used in tests and
    /// single-tenant demo setups).
    pub fn new(source_uri: &str) -> Result<Self, TruststoreError> {
        let source = if let Some(path) = source_uri.strip_prefix("file://") {
            Source::File(PathBuf::from(path))
        } else if source_uri == "mem://" {
            Source::Memory
        } else {
            return Err(TruststoreError::UnsupportedSource(source_uri.to_string()));
        };
        let store = Self { source, issuers: RwLock::new(HashMap::new()) };
        store.refresh()?;
        Ok(store)
    }

    /// Reloads from the configured source and atomically swaps the table.
    pub fn refresh(&self) -> Result<(), TruststoreError> {
        let loaded = match &self.source {
            Source::Memory => return Ok(()),
            Source::File(path) => Self::load_file(path)?,
        };
        let mut guard = self.issuers.write().expect("truststore lock poisoned");
        *guard = loaded;
        Ok(())
    }

    fn load_file(path: &PathBuf) -> Result<HashMap<String, Vec<TrustedKey>>, TruststoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| TruststoreError::Read { path: path.display().to_string(), source })?;
        let parsed: RawTruststoreFile =
            serde_json::from_str(&raw).map_err(|e| TruststoreError::Parse(e.to_string()))?;

        let mut out = HashMap::new();
        for (issuer, entries) in parsed.issuers {
            let mut keys = Vec::with_capacity(entries.len());
            for entry in entries {
                keys.push(Self::build_key(&issuer, entry)?);
            }
            out.insert(issuer, keys);
        }
        Ok(out)
    }

    fn build_key(issuer: &str, entry: RawKeyEntry) -> Result<TrustedKey, TruststoreError> {
        let algorithm = match entry.alg.as_str() {
            "RS256" => Algorithm::RS256,
            "RS384" => Algorithm::RS384,
            "RS512" => Algorithm::RS512,
            "ES256" => Algorithm::ES256,
            "ES384" => Algorithm::ES384,
            other => {
                return Err(TruststoreError::InvalidKey {
                    issuer: issuer.to_string(),
                    reason: format!("unsupported alg {other}"),
                })
            }
        };
        let decoding_key = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                DecodingKey::from_rsa_pem(entry.public_key_pem.as_bytes())
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                DecodingKey::from_ec_pem(entry.public_key_pem.as_bytes())
            }
            _ => unreachable!("filtered above"),
        }
        .map_err(|e| TruststoreError::InvalidKey { issuer: issuer.to_string(), reason: e.to_string() })?;

        Ok(TrustedKey { kid: entry.kid, algorithm, decoding_key })
    }

    /// Registers a key directly, bypassing the configured source. Used by
    /// `mem://` stores and by tests that don't want a truststore file.
    pub fn register(&self, issuer: &str, key: TrustedKey) {
        let mut guard = self.issuers.write().expect("truststore lock poisoned");
        guard.entry(issuer.to_string()).or_default().push(key);
    }

    /// All keys trusted for `issuer`, or `None` if the issuer is unknown
    /// (the verifier reports `ISSUER_UNKNOWN` in that case).
    pub fn keys_for(&self, issuer: &str) -> Option<Vec<TrustedKey>> {
        let guard = self.issuers.read().expect("truststore lock poisoned");
        guard.get(issuer).cloned()
    }

    pub fn is_known_issuer(&self, issuer: &str) -> bool {
        let guard = self.issuers.read().expect("truststore lock poisoned");
        guard.contains_key(issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_starts_empty_and_accepts_registration() {
        let store = Truststore::new("mem://").unwrap();
        assert!(!store.is_known_issuer("did:example:issuer"));
    }

    #[test]
    fn unsupported_source_rejected() {
        assert!(Truststore::new("https://example.com/keys").is_err());
    }
}
