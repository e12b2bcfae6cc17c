//! vault-node — the authorization vault composition root.
//!
//! Startup sequence:
//!   1. Load configuration from the environment (`.env` if present)
//!   2. Open the state database and truststore
//!   3. Wire the outbound dispatcher pool and the C9 lifecycle workers
//!   4. Run the requested subcommand
//!
//! Transport (HTTP/gRPC) is out of scope: this binary is the in-process
//! entry point the transport layer would sit in front of, and in the
//! meantime a small CLI surface exercises every operation directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use vault_core::{
    AuthorizationId, CallerContext, CallerRole, Clock, Protocol, SystemClock, TenantId, VaultConfig,
};
use vault_crypto::Truststore;
use vault_service::{AuthorizationService, AuthorizationServiceConfig, SearchFilter, SortBy};
use vault_store::StateDb;
use vault_webhooks::{spawn_dispatcher_pool, OutboundEngine, WebhookConfig};
use vault_workers::WorkerHandle;

#[derive(Parser, Debug)]
#[command(name = "vault-node", version, about = "Multi-tenant authorization vault")]
struct Args {
    /// Directory for the persistent state database. Overrides VAULT_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Acting tenant for this invocation.
    #[arg(long, default_value = "default")]
    tenant: String,

    /// Acting user id for audit attribution.
    #[arg(long, default_value = "cli")]
    user: String,

    /// Act as a cross-tenant admin instead of a tenant member.
    #[arg(long)]
    admin: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortKey {
    CreatedAt,
    ExpiresAt,
    AmountLimit,
}

impl From<SortKey> for SortBy {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::CreatedAt => SortBy::CreatedAt,
            SortKey::ExpiresAt => SortBy::ExpiresAt,
            SortKey::AmountLimit => SortBy::AmountLimit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the lifecycle workers and outbound dispatcher until interrupted.
    Serve,
    /// Ingest a new authorization payload.
    Create {
        #[arg(long)]
        protocol: Protocol,
        /// Path to the raw payload (compact JWS for AP2, JSON for ACP). Reads stdin if omitted.
        #[arg(long)]
        payload_file: Option<PathBuf>,
        /// If set, the token's scope must match this exactly or verification fails SCOPE_INVALID.
        #[arg(long)]
        expected_scope: Option<String>,
    },
    /// Fetch a single authorization by id.
    Get {
        #[arg(long)]
        id: AuthorizationId,
    },
    /// Re-run verification against the stored payload without changing protocol outcome semantics.
    Reverify {
        #[arg(long)]
        id: AuthorizationId,
        #[arg(long)]
        expected_scope: Option<String>,
    },
    /// Revoke an authorization.
    Revoke {
        #[arg(long)]
        id: AuthorizationId,
        #[arg(long, default_value = "revoked via CLI")]
        reason: String,
    },
    /// Soft-delete a terminal authorization, starting its retention clock.
    Delete {
        #[arg(long)]
        id: AuthorizationId,
    },
    /// Search this tenant's authorizations.
    Search {
        #[arg(long)]
        status: Option<vault_core::AuthorizationStatus>,
        #[arg(long)]
        min_amount: Option<rust_decimal::Decimal>,
        #[arg(long)]
        max_amount: Option<rust_decimal::Decimal>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        include_deleted: bool,
        #[arg(long)]
        sort_by: Option<SortKey>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Export the evidence pack for an authorization to a file.
    Export {
        #[arg(long)]
        id: AuthorizationId,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vault=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut config = VaultConfig::from_env().context("loading configuration")?;
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.display().to_string();
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir))?;
    let db = Arc::new(StateDb::open(&config.data_dir).context("opening state database")?);
    let truststore = Arc::new(
        Truststore::new(&config.truststore_source).context("loading truststore")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let webhook_config = WebhookConfig {
        timeout: Duration::from_secs(config.webhook_timeout_secs),
        max_retries: config.webhook_max_retries,
        backoff_seed_secs: config.webhook_retry_backoff_seed_secs,
        backoff_max_secs: config.webhook_retry_backoff_seed_secs.saturating_mul(64).max(60),
        worker_count: config.webhook_worker_count,
    };
    let outbound = Arc::new(OutboundEngine::new(webhook_config));
    let queue = spawn_dispatcher_pool(db.clone(), outbound.clone(), clock.clone());

    let psp_allowlist = config.acp_psp_allowlist.clone();
    let service = AuthorizationService::new(
        db.clone(),
        truststore,
        Arc::new(move |psp: &str| psp_allowlist.iter().any(|p| p == psp)),
        outbound.clone(),
        queue,
        clock.clone(),
        AuthorizationServiceConfig {
            max_payload_bytes: config.max_payload_bytes,
            acp_enabled: config.acp_enabled,
            default_retention_days: config.retention_days,
        },
    );

    let caller = CallerContext::new(
        args.user,
        TenantId::new(args.tenant),
        if args.admin { CallerRole::Admin } else { CallerRole::Member },
    );

    match args.command {
        Command::Serve => serve(db, clock, outbound, &config).await,
        Command::Create { protocol, payload_file, expected_scope } => {
            let payload = read_payload(payload_file.as_deref())?;
            let (authorization, verification) =
                service.create(&caller, protocol, &payload, caller.tenant_id.clone(), expected_scope.as_deref())?;
            info!(status = %verification.status, "verification complete");
            print_json(&authorization)
        }
        Command::Get { id } => print_json(&service.get(&caller, &id)?),
        Command::Reverify { id, expected_scope } => {
            let verification = service.reverify(&caller, &id, expected_scope.as_deref())?;
            print_json(&verification)
        }
        Command::Revoke { id, reason } => print_json(&service.revoke(&caller, &id, &reason)?),
        Command::Delete { id } => print_json(&service.delete(&caller, &id)?),
        Command::Search { status, min_amount, max_amount, currency, include_deleted, sort_by, limit } => {
            let mut filter = SearchFilter::new();
            filter.status = status;
            filter.min_amount = min_amount;
            filter.max_amount = max_amount;
            filter.currency = currency;
            filter.include_deleted = include_deleted;
            filter.sort_by = sort_by.map(SortBy::from).unwrap_or_default();
            if let Some(limit) = limit {
                filter.limit = limit;
            }
            print_json(&service.search(&caller, &filter)?)
        }
        Command::Export { id, out_dir } => {
            let (filename, bytes) = service.export_evidence(&caller, &id)?;
            let path = out_dir.join(&filename);
            std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "evidence pack written");
            Ok(())
        }
    }
}

/// Runs the background lifecycle workers (C9) and the outbound retrier
/// until interrupted. There is no inbound transport in this binary, so
/// this mode exists for operators who want the sweep/alert/retention/retry
/// loops running against a shared data directory independent of any CLI
/// command.
async fn serve(
    db: Arc<StateDb>,
    clock: Arc<dyn Clock>,
    outbound: Arc<OutboundEngine>,
    config: &VaultConfig,
) -> anyhow::Result<()> {
    info!("starting lifecycle workers");

    let expiry_db = db.clone();
    let expiry_clock = clock.clone();
    let expiry = WorkerHandle::spawn(
        "expiry",
        Duration::from_secs(config.expiry_check_interval_secs),
        move || vault_workers::expiry::run(expiry_db.clone(), expiry_clock.clone()),
    );

    let alerts_db = db.clone();
    let alerts_clock = clock.clone();
    let alerts = WorkerHandle::spawn(
        "alerts",
        Duration::from_secs(config.expiry_check_interval_secs),
        move || vault_workers::alerts::run(alerts_db.clone(), alerts_clock.clone(), chrono::Duration::hours(24)),
    );

    let retention_db = db.clone();
    let retention_clock = clock.clone();
    let retention_days = config.retention_days;
    let retention = WorkerHandle::spawn(
        "retention",
        Duration::from_secs(config.cleanup_interval_secs),
        move || vault_workers::retention::run(retention_db.clone(), retention_clock.clone(), chrono::Duration::days(retention_days)),
    );

    let retrier_db = db.clone();
    let retrier_clock = clock.clone();
    let retrier_engine = outbound.clone();
    let retrier = WorkerHandle::spawn(
        "retrier",
        Duration::from_secs(config.retry_sweep_interval_secs),
        move || vault_workers::retrier::run(retrier_db.clone(), retrier_engine.clone(), retrier_clock.clone()),
    );

    info!("vault-node ready, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");

    expiry.shutdown().await;
    alerts.shutdown().await;
    retention.shutdown().await;
    retrier.shutdown().await;
    Ok(())
}

fn read_payload(path: Option<&std::path::Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload from {}", path.display())),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading payload from stdin")?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
