use crate::constants::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_EXPIRY_CHECK_INTERVAL_SECS, DEFAULT_MAX_PAYLOAD_BYTES,
    DEFAULT_RETENTION_DAYS, DEFAULT_RETRY_SWEEP_INTERVAL_SECS,
    DEFAULT_WEBHOOK_MAX_RETRIES, DEFAULT_WEBHOOK_RETRY_BACKOFF_SEED_SECS,
    DEFAULT_WEBHOOK_TIMEOUT_SECS, DEFAULT_WEBHOOK_WORKER_COUNT,
};
use anyhow::{Context, Result};

/// Runtime configuration, loaded once at startup from the environment
/// (spec.md §6.2's table). Every field has a typed default so a bare
/// `VaultConfig::from_env()` is enough for local development.
#[derive(Clone, Debug)]
pub struct VaultConfig {
    /// Whether ACP ingestion (inbound webhooks + dispatcher routing) is
    /// enabled for this deployment.
    pub acp_enabled: bool,
    /// Shared secret used to verify inbound ACP webhook HMAC signatures.
    pub acp_webhook_secret: String,
    /// PSP identifiers allowed to issue ACP tokens this vault will accept.
    pub acp_psp_allowlist: Vec<String>,
    /// Source the truststore (C1) loads AP2 issuer keys from at startup.
    pub truststore_source: String,
    /// Per-attempt HTTP timeout for outbound webhook delivery.
    pub webhook_timeout_secs: u64,
    /// Delivery attempts allowed before a webhook moves to the dead letter.
    pub webhook_max_retries: u32,
    /// Seed delay for the exponential backoff schedule.
    pub webhook_retry_backoff_seed_secs: u64,
    /// Number of concurrent outbound delivery workers.
    pub webhook_worker_count: usize,
    /// How often the expiry scanner sweeps for newly-expired authorizations.
    pub expiry_check_interval_secs: u64,
    /// How often the retention cleanup worker runs.
    pub cleanup_interval_secs: u64,
    /// How often the failed-delivery retrier re-enqueues due attempts.
    pub retry_sweep_interval_secs: u64,
    /// Days a terminal authorization is retained before cleanup purges it.
    pub retention_days: i64,
    /// Largest accepted raw payload, in bytes.
    pub max_payload_bytes: usize,
    /// Filesystem path to the sled database directory.
    pub data_dir: String,
}

impl VaultConfig {
    pub fn from_env() -> Result<Self> {
        let acp_enabled = std::env::var("ACP_ENABLE")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .context("invalid ACP_ENABLE")?;

        let acp_webhook_secret = std::env::var("ACP_WEBHOOK_SECRET").unwrap_or_default();

        let acp_psp_allowlist = std::env::var("ACP_PSP_ALLOWLIST")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let truststore_source =
            std::env::var("TRUSTSTORE_SOURCE").unwrap_or_else(|_| "mem://".into());

        let webhook_timeout_secs = std::env::var("WEBHOOK_TIMEOUT")
            .unwrap_or_else(|_| DEFAULT_WEBHOOK_TIMEOUT_SECS.to_string())
            .parse()
            .context("invalid WEBHOOK_TIMEOUT")?;

        let webhook_max_retries = std::env::var("WEBHOOK_MAX_RETRIES")
            .unwrap_or_else(|_| DEFAULT_WEBHOOK_MAX_RETRIES.to_string())
            .parse()
            .context("invalid WEBHOOK_MAX_RETRIES")?;

        let webhook_retry_backoff_seed_secs = std::env::var("WEBHOOK_RETRY_BACKOFF_SEED")
            .unwrap_or_else(|_| DEFAULT_WEBHOOK_RETRY_BACKOFF_SEED_SECS.to_string())
            .parse()
            .context("invalid WEBHOOK_RETRY_BACKOFF_SEED")?;

        let webhook_worker_count = std::env::var("WEBHOOK_WORKER_COUNT")
            .unwrap_or_else(|_| DEFAULT_WEBHOOK_WORKER_COUNT.to_string())
            .parse()
            .context("invalid WEBHOOK_WORKER_COUNT")?;

        let expiry_check_interval_secs = std::env::var("EXPIRY_CHECK_INTERVAL")
            .unwrap_or_else(|_| DEFAULT_EXPIRY_CHECK_INTERVAL_SECS.to_string())
            .parse()
            .context("invalid EXPIRY_CHECK_INTERVAL")?;

        let cleanup_interval_secs = std::env::var("CLEANUP_INTERVAL")
            .unwrap_or_else(|_| DEFAULT_CLEANUP_INTERVAL_SECS.to_string())
            .parse()
            .context("invalid CLEANUP_INTERVAL")?;

        let retry_sweep_interval_secs = std::env::var("RETRY_SWEEP_INTERVAL")
            .unwrap_or_else(|_| DEFAULT_RETRY_SWEEP_INTERVAL_SECS.to_string())
            .parse()
            .context("invalid RETRY_SWEEP_INTERVAL")?;

        let retention_days = std::env::var("RETENTION_DAYS")
            .unwrap_or_else(|_| DEFAULT_RETENTION_DAYS.to_string())
            .parse()
            .context("invalid RETENTION_DAYS")?;

        let max_payload_bytes = std::env::var("MAX_PAYLOAD_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_PAYLOAD_BYTES.to_string())
            .parse()
            .context("invalid MAX_PAYLOAD_BYTES")?;

        let data_dir = std::env::var("VAULT_DATA_DIR").unwrap_or_else(|_| "./vault-data".into());

        Ok(Self {
            acp_enabled,
            acp_webhook_secret,
            acp_psp_allowlist,
            truststore_source,
            webhook_timeout_secs,
            webhook_max_retries,
            webhook_retry_backoff_seed_secs,
            webhook_worker_count,
            expiry_check_interval_secs,
            cleanup_interval_secs,
            retry_sweep_interval_secs,
            retention_days,
            max_payload_bytes,
            data_dir,
        })
    }

    pub fn psp_is_allowed(&self, psp_id: &str) -> bool {
        self.acp_psp_allowlist.iter().any(|p| p == psp_id)
    }
}
