use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use vault_core::{
    AuthorizationId, Clock, DeliveryAttempt, DeliveryAttemptId, DeliveryStatus, EventId,
    Subscription, TenantId, VaultError, OUTBOUND_QUEUE_MULTIPLIER,
};
use vault_store::{DeliveryStore, StateDb, SubscriptionStore};

/// A logical outbound notification (one lifecycle event), fanned out to
/// every active subscription for its tenant (C8).
#[derive(Clone)]
pub struct OutboundEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub authorization_id: AuthorizationId,
    pub event_type: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The wire envelope posted to a subscriber (§6.1): `data` carries the
/// event's own body, never the bare payload.
#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    event_id: EventId,
    event_type: &'a str,
    timestamp: String,
    data: &'a serde_json::Value,
}

#[derive(Clone)]
pub struct WebhookConfig {
    pub timeout: std::time::Duration,
    pub max_retries: u32,
    pub backoff_seed_secs: u64,
    pub backoff_max_secs: u64,
    pub worker_count: usize,
}

struct QueuedDelivery {
    subscription: Subscription,
    attempt: DeliveryAttempt,
    event: OutboundEvent,
}

/// The bounded in-process queue feeding the dispatcher pool (§5). When
/// full, `publish` still persists the `DeliveryAttempt` row and moves on —
/// the periodic retrier worker (C9) picks up anything dropped here.
#[derive(Clone)]
pub struct OutboundQueue {
    sender: mpsc::Sender<QueuedDelivery>,
}

pub struct OutboundEngine {
    http: reqwest::Client,
    config: WebhookConfig,
}

impl OutboundEngine {
    pub fn new(config: WebhookConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { http, config }
    }

    /// Writes one `DeliveryAttempt` per active subscription and tries to
    /// enqueue it for immediate dispatch.
    pub fn publish(
        &self,
        db: &StateDb,
        queue: &OutboundQueue,
        event: OutboundEvent,
        clock: &dyn Clock,
    ) -> Result<Vec<DeliveryAttempt>, VaultError> {
        let subs = SubscriptionStore::new(db).active_for_tenant(&event.tenant_id)?;
        let delivery_store = DeliveryStore::new(db);
        let now = clock.now();
        let mut attempts = Vec::with_capacity(subs.len());
        for sub in subs {
            let attempt = DeliveryAttempt {
                id: DeliveryAttemptId::new(),
                subscription_id: sub.id,
                event_id: event.event_id,
                authorization_id: event.authorization_id,
                tenant_id: event.tenant_id.clone(),
                event_type: event.event_type.clone(),
                payload: event.body.clone(),
                attempt_number: 0,
                status: DeliveryStatus::Pending,
                next_attempt_at: now,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            delivery_store.put(&attempt)?;
            let queued = QueuedDelivery { subscription: sub.clone(), attempt: attempt.clone(), event: event.clone() };
            if queue.sender.try_send(queued).is_err() {
                tracing::warn!(
                    authorization_id = %event.authorization_id,
                    subscription_id = %sub.id,
                    "outbound queue full, deferring delivery to the retry worker"
                );
            }
            attempts.push(attempt);
        }
        Ok(attempts)
    }

    async fn attempt_delivery(&self, sub: &Subscription, event: &OutboundEvent) -> Result<(), String> {
        let envelope = WebhookEnvelope {
            event_id: event.event_id,
            event_type: &event.event_type,
            timestamp: event.created_at.to_rfc3339(),
            data: &event.body,
        };
        let body = serde_json::to_vec(&envelope).map_err(|e| e.to_string())?;
        let signature = vault_crypto::sign_hex(sub.signing_secret.as_bytes(), &body);
        let response = self
            .http
            .post(&sub.target_url)
            .header("X-Event-Id", event.event_id.0.to_string())
            .header("X-Event-Type", &event.event_type)
            .header("X-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("unexpected status {}", response.status()))
        }
    }

    /// Redelivers a single previously-recorded attempt, used by the
    /// failed-delivery retrier worker (C9) rather than the dispatcher
    /// pool's queue — a retry is driven by the store's due list, not the
    /// in-process channel.
    pub async fn redeliver(
        &self,
        db: &StateDb,
        mut attempt: DeliveryAttempt,
        clock: &dyn Clock,
    ) -> Result<DeliveryAttempt, VaultError> {
        let subscription = SubscriptionStore::new(db)
            .get(&attempt.tenant_id, &attempt.subscription_id)?
            .ok_or_else(|| VaultError::not_found(format!("subscription {}", attempt.subscription_id)))?;
        let event = OutboundEvent {
            event_id: attempt.event_id,
            tenant_id: attempt.tenant_id.clone(),
            authorization_id: attempt.authorization_id,
            event_type: attempt.event_type.clone(),
            body: attempt.payload.clone(),
            created_at: attempt.created_at,
        };
        match self.attempt_delivery(&subscription, &event).await {
            Ok(()) => {
                attempt.status = DeliveryStatus::Delivered;
                attempt.updated_at = clock.now();
            }
            Err(reason) => mark_retry(&mut attempt, reason, &self.config, clock),
        }
        DeliveryStore::new(db).put(&attempt)?;
        Ok(attempt)
    }
}

/// Starts the fixed-size worker pool that drains the outbound queue, and
/// returns the handle callers use to `publish` onto it. Workers run until
/// the queue (and every clone of it) is dropped.
pub fn spawn_dispatcher_pool(
    db: Arc<StateDb>,
    engine: Arc<OutboundEngine>,
    clock: Arc<dyn Clock>,
) -> OutboundQueue {
    let capacity = engine.config.worker_count * OUTBOUND_QUEUE_MULTIPLIER;
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let receiver = Arc::new(Mutex::new(receiver));

    for worker_id in 0..engine.config.worker_count {
        let db = db.clone();
        let engine = engine.clone();
        let clock = clock.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            loop {
                let queued = {
                    let mut guard = receiver.lock().await;
                    guard.recv().await
                };
                let Some(mut queued) = queued else { break };
                match engine.attempt_delivery(&queued.subscription, &queued.event).await {
                    Ok(()) => {
                        queued.attempt.status = DeliveryStatus::Delivered;
                        queued.attempt.updated_at = clock.now();
                    }
                    Err(reason) => mark_retry(&mut queued.attempt, reason, &engine.config, clock.as_ref()),
                }
                if let Err(e) = DeliveryStore::new(&db).put(&queued.attempt) {
                    tracing::error!(worker_id, error = %e, "failed to persist delivery attempt outcome");
                }
            }
        });
    }

    OutboundQueue { sender }
}

fn mark_retry(attempt: &mut DeliveryAttempt, reason: String, config: &WebhookConfig, clock: &dyn Clock) {
    attempt.attempt_number += 1;
    attempt.last_error = Some(reason);
    attempt.updated_at = clock.now();
    if attempt.attempt_number >= config.max_retries {
        attempt.status = DeliveryStatus::Dead;
    } else {
        attempt.status = DeliveryStatus::Failed;
        attempt.next_attempt_at = clock.now() + backoff_with_jitter(config, attempt.attempt_number);
    }
}

/// Exponential backoff seeded by `backoff_seed_secs`, capped at
/// `backoff_max_secs`, with up to 25% jitter so many failing subscriptions
/// don't all retry in lockstep: `min(cap, seed*2^(attempt-1) + jitter)`,
/// jitter in `[0, 0.25*seed*2^(attempt-1))`.
fn backoff_with_jitter(config: &WebhookConfig, attempt_number: u32) -> chrono::Duration {
    let exponent = attempt_number.saturating_sub(1).min(20);
    let raw_ms = config.backoff_seed_secs.saturating_mul(1u64 << exponent).saturating_mul(1000);
    let jitter_span_ms = (raw_ms / 4).max(1);
    let jitter_ms = rand::thread_rng().gen_range(0..jitter_span_ms);
    let capped_ms = (raw_ms + jitter_ms).min(config.backoff_max_secs.saturating_mul(1000)).max(1000);
    chrono::Duration::milliseconds(capped_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = WebhookConfig {
            timeout: std::time::Duration::from_secs(1),
            max_retries: 10,
            backoff_seed_secs: 2,
            backoff_max_secs: 60,
            worker_count: 1,
        };
        let small = backoff_with_jitter(&config, 1);
        let large = backoff_with_jitter(&config, 10);
        assert!(small.num_seconds() >= 1);
        assert!(large.num_seconds() <= 60);
    }

    #[test]
    fn second_attempt_window_matches_seed_and_quarter_jitter() {
        let config = WebhookConfig {
            timeout: std::time::Duration::from_secs(1),
            max_retries: 10,
            backoff_seed_secs: 1,
            backoff_max_secs: 10,
            worker_count: 1,
        };
        for _ in 0..50 {
            let delay = backoff_with_jitter(&config, 1);
            let ms = delay.num_milliseconds();
            assert!((1000..=1250).contains(&ms), "got {ms}ms");
        }
    }

    #[test]
    fn retry_marks_dead_after_max_attempts() {
        let config = WebhookConfig {
            timeout: std::time::Duration::from_secs(1),
            max_retries: 2,
            backoff_seed_secs: 1,
            backoff_max_secs: 60,
            worker_count: 1,
        };
        let clock = vault_core::SystemClock;
        let mut attempt = DeliveryAttempt {
            id: DeliveryAttemptId::new(),
            subscription_id: vault_core::SubscriptionId::new(),
            event_id: EventId::new(),
            authorization_id: AuthorizationId::new(),
            tenant_id: TenantId::new("tenant-a"),
            event_type: "token.used".into(),
            payload: serde_json::json!({}),
            attempt_number: 1,
            status: DeliveryStatus::Failed,
            next_attempt_at: clock.now(),
            last_error: None,
            created_at: clock.now(),
            updated_at: clock.now(),
        };
        mark_retry(&mut attempt, "timeout".into(), &config, &clock);
        assert_eq!(attempt.status, DeliveryStatus::Dead);
    }
}
