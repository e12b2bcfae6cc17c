use std::sync::Arc;

use vault_core::{Clock, VaultError};
use vault_store::{DeliveryStore, StateDb};
use vault_webhooks::OutboundEngine;

/// Re-sends every delivery attempt whose backoff window has elapsed.
/// Attempts run sequentially: the volume handled by a background sweep is
/// small relative to the dispatcher pool's steady-state traffic, and
/// sequential execution keeps this worker's failure modes easy to reason
/// about.
pub async fn run(db: Arc<StateDb>, engine: Arc<OutboundEngine>, clock: Arc<dyn Clock>) -> Result<usize, VaultError> {
    let now = clock.now();
    let due = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || DeliveryStore::new(&db).due_for_retry(now))
            .await
            .map_err(|e| VaultError::Internal(e.to_string()))??
    };

    let mut retried = 0;
    for attempt in due {
        let authorization_id = attempt.authorization_id;
        match engine.redeliver(&db, attempt, clock.as_ref()).await {
            Ok(_) => retried += 1,
            Err(e) => tracing::warn!(authorization_id = %authorization_id, error = %e, "retry attempt failed"),
        }
    }
    Ok(retried)
}
