use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, now_ms};
use crate::model::*;
use crate::observability;

/// Durable queue of pending notification deliveries. Rows are created in the
/// same WAL transaction as the status change that requires them; the worker
/// loop drains them with at-least-once semantics.
pub struct Outbox {
    deliveries: DashMap<Ulid, Delivery>,
    by_reservation: DashMap<Ulid, Vec<Ulid>>,
    /// Wakes the worker as soon as something is enqueued, instead of waiting
    /// out the poll interval.
    nudge: Notify,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            deliveries: DashMap::new(),
            by_reservation: DashMap::new(),
            nudge: Notify::new(),
        }
    }

    /// Apply a delivery WAL event. Shared by live commits and replay.
    pub(crate) fn apply(&self, event: &Event) {
        match event {
            Event::DeliveryEnqueued { delivery } => {
                self.by_reservation
                    .entry(delivery.reservation_id)
                    .or_default()
                    .push(delivery.id);
                self.deliveries.insert(delivery.id, delivery.clone());
                self.nudge.notify_one();
            }
            Event::DeliveryAttempted {
                id,
                outcome,
                response_code,
                error,
                at,
                attempt_count,
                next_attempt_at,
                status,
            } => {
                if let Some(mut entry) = self.deliveries.get_mut(id) {
                    let d = entry.value_mut();
                    d.status = *status;
                    d.attempt_count = *attempt_count;
                    d.next_attempt_at = *next_attempt_at;
                    d.last_attempt_at = Some(*at);
                    d.last_error = error.clone();
                    d.attempts.push(Attempt {
                        outcome: *outcome,
                        response_code: *response_code,
                        error: error.clone(),
                        at: *at,
                    });
                }
            }
            Event::DeliveryCancelled { id, .. } => {
                if let Some(mut entry) = self.deliveries.get_mut(id) {
                    entry.value_mut().status = DeliveryStatus::Cancelled;
                }
            }
            _ => {}
        }
    }

    /// Claim up to `limit` due deliveries by flipping pending → in_progress
    /// under the map entry. Two workers can never claim the same row: the
    /// flip and the status re-check happen under the entry's exclusive ref.
    pub fn claim_due(&self, now: Ms, limit: usize) -> Vec<Delivery> {
        let candidates: Vec<Ulid> = self
            .deliveries
            .iter()
            .filter(|e| {
                e.value().status == DeliveryStatus::Pending && e.value().next_attempt_at <= now
            })
            .map(|e| *e.key())
            .take(limit)
            .collect();

        let mut claimed = Vec::new();
        for id in candidates {
            if let Some(mut entry) = self.deliveries.get_mut(&id) {
                let d = entry.value_mut();
                if d.status == DeliveryStatus::Pending && d.next_attempt_at <= now {
                    d.status = DeliveryStatus::InProgress;
                    claimed.push(d.clone());
                }
            }
        }
        claimed
    }

    pub fn get(&self, id: &Ulid) -> Option<Delivery> {
        self.deliveries.get(id).map(|e| e.value().clone())
    }

    pub fn for_reservation(&self, reservation_id: &Ulid) -> Vec<Delivery> {
        let Some(ids) = self.by_reservation.get(reservation_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|e| !e.value().status.is_terminal())
            .count()
    }

    /// Cascade cleanup when the owning reservation disappears with its venue.
    pub(crate) fn cancel_for_reservation(&self, reservation_id: &Ulid) {
        let Some(ids) = self.by_reservation.get(reservation_id) else {
            return;
        };
        for id in ids.iter() {
            if let Some(mut entry) = self.deliveries.get_mut(id) {
                let d = entry.value_mut();
                if !d.status.is_terminal() {
                    d.status = DeliveryStatus::Cancelled;
                }
            }
        }
    }

    /// Full dump for WAL compaction. In-flight claims are snapshotted back to
    /// pending — a claim is not durable state.
    pub(crate) fn snapshot(&self) -> Vec<Delivery> {
        self.deliveries
            .iter()
            .map(|e| {
                let mut d = e.value().clone();
                if d.status == DeliveryStatus::InProgress {
                    d.status = DeliveryStatus::Pending;
                }
                d
            })
            .collect()
    }

    pub(crate) async fn nudged(&self) {
        self.nudge.notified().await;
    }
}

// ── Channels ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChannelError {
    pub response_code: Option<u16>,
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            response_code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            response_code: Some(code),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.response_code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// One transport for notification payloads. Email/Slack/LINE senders live in
/// the outer services and register here; the core ships the log channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn key(&self) -> ChannelKey;

    /// Attempt one send. `Ok` carries an optional transport response code.
    async fn deliver(&self, payload: &serde_json::Value) -> Result<Option<u16>, ChannelError>;
}

/// Writes the payload to the structured log. Useful as a development channel
/// and as the audit trail of last resort.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn key(&self) -> ChannelKey {
        ChannelKey::Log
    }

    async fn deliver(&self, payload: &serde_json::Value) -> Result<Option<u16>, ChannelError> {
        info!(payload = %payload, "notification");
        Ok(None)
    }
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKey, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in log channel.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LogChannel));
        registry
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.key(), channel);
    }

    pub fn get(&self, key: ChannelKey) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.get(&key)
    }
}

// ── Engine-side delivery bookkeeping ─────────────────────

impl Engine {
    /// Record one attempt outcome and compute the delivery's next state:
    /// success terminates, failure backs off until the attempt ceiling.
    pub async fn record_attempt(
        &self,
        id: Ulid,
        result: Result<Option<u16>, ChannelError>,
        now: Ms,
    ) -> Result<DeliveryStatus, EngineError> {
        let current = self.outbox.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.status.is_terminal() {
            return Err(EngineError::DeliveryTerminal(id));
        }

        let attempt_count = current.attempt_count + 1;
        let (outcome, response_code, error) = match &result {
            Ok(code) => (AttemptOutcome::Success, *code, None),
            Err(e) => (AttemptOutcome::Failure, e.response_code, Some(e.message.clone())),
        };
        let policy = &self.config().backoff;
        let (status, next_attempt_at) = match outcome {
            AttemptOutcome::Success => (DeliveryStatus::Succeeded, current.next_attempt_at),
            AttemptOutcome::Failure => {
                if attempt_count < policy.max_attempts {
                    (
                        DeliveryStatus::Pending,
                        policy.next_attempt_at(now, attempt_count),
                    )
                } else {
                    (DeliveryStatus::Failed, current.next_attempt_at)
                }
            }
        };

        let event = Event::DeliveryAttempted {
            id,
            outcome,
            response_code,
            error,
            at: now,
            attempt_count,
            next_attempt_at,
            status,
        };
        self.commit_unowned(&event).await?;

        metrics::counter!(
            observability::OUTBOX_ATTEMPTS_TOTAL,
            "channel" => current.channel.as_str()
        )
        .increment(1);
        if status == DeliveryStatus::Failed {
            metrics::counter!(observability::OUTBOX_FAILED_TOTAL).increment(1);
            warn!(
                delivery = %id,
                channel = current.channel.as_str(),
                attempts = attempt_count,
                "delivery exhausted its attempt ceiling"
            );
        }
        Ok(status)
    }

    /// Operator stop: no further attempts for this delivery.
    pub async fn cancel_delivery(&self, id: Ulid) -> Result<(), EngineError> {
        let current = self.outbox.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.status.is_terminal() {
            return Err(EngineError::DeliveryTerminal(id));
        }
        let event = Event::DeliveryCancelled { id, at: now_ms() };
        self.commit_unowned(&event).await
    }
}

// ── Worker loop ──────────────────────────────────────────

/// At-least-once delivery loop. Runs until the process shuts down; safe to
/// run as a pool — claims are exclusive per delivery.
pub async fn run_outbox_worker(engine: Arc<Engine>, registry: Arc<ChannelRegistry>) {
    let poll = Duration::from_millis(engine.config().outbox_poll_ms as u64);
    let attempt_timeout = Duration::from_millis(engine.config().attempt_timeout_ms as u64);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = engine.outbox.nudged() => {}
        }
        loop {
            let now = now_ms();
            let batch = engine.outbox.claim_due(now, engine.config().outbox_batch);
            if batch.is_empty() {
                break;
            }
            for delivery in batch {
                attempt_one(&engine, &registry, delivery, attempt_timeout).await;
            }
        }
        metrics::gauge!(observability::OUTBOX_DEPTH).set(engine.outbox.pending_count() as f64);
    }
}

async fn attempt_one(
    engine: &Engine,
    registry: &ChannelRegistry,
    delivery: Delivery,
    attempt_timeout: Duration,
) {
    let result = match registry.get(delivery.channel) {
        None => Err(ChannelError::new("channel not configured")),
        Some(channel) => {
            match tokio::time::timeout(attempt_timeout, channel.deliver(&delivery.payload)).await {
                Ok(outcome) => outcome,
                // A timed-out attempt counts as a failed attempt and follows
                // the normal backoff path.
                Err(_) => Err(ChannelError::new("attempt timed out")),
            }
        }
    };
    if let Err(e) = engine.record_attempt(delivery.id, result, now_ms()).await {
        warn!(delivery = %delivery.id, "failed to record attempt: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(status: DeliveryStatus, next_attempt_at: Ms) -> Delivery {
        Delivery {
            id: Ulid::new(),
            reservation_id: Ulid::new(),
            channel: ChannelKey::Log,
            status,
            payload: json!({"status": "pending"}),
            attempt_count: 0,
            next_attempt_at,
            last_attempt_at: None,
            last_error: None,
            attempts: Vec::new(),
        }
    }

    fn enqueue(outbox: &Outbox, d: &Delivery) {
        outbox.apply(&Event::DeliveryEnqueued {
            delivery: d.clone(),
        });
    }

    #[test]
    fn claim_flips_to_in_progress() {
        let outbox = Outbox::new();
        let d = delivery(DeliveryStatus::Pending, 100);
        enqueue(&outbox, &d);

        let claimed = outbox.claim_due(100, 10);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, DeliveryStatus::InProgress);
        assert_eq!(outbox.get(&d.id).unwrap().status, DeliveryStatus::InProgress);

        // Already claimed — nothing left.
        assert!(outbox.claim_due(100, 10).is_empty());
    }

    #[test]
    fn claim_respects_next_attempt_at() {
        let outbox = Outbox::new();
        let d = delivery(DeliveryStatus::Pending, 5_000);
        enqueue(&outbox, &d);

        assert!(outbox.claim_due(4_999, 10).is_empty());
        assert_eq!(outbox.claim_due(5_000, 10).len(), 1);
    }

    #[test]
    fn claim_honors_limit() {
        let outbox = Outbox::new();
        for _ in 0..5 {
            enqueue(&outbox, &delivery(DeliveryStatus::Pending, 0));
        }
        assert_eq!(outbox.claim_due(100, 3).len(), 3);
        assert_eq!(outbox.claim_due(100, 3).len(), 2);
    }

    #[test]
    fn attempted_event_appends_attempt_row() {
        let outbox = Outbox::new();
        let d = delivery(DeliveryStatus::Pending, 0);
        enqueue(&outbox, &d);

        outbox.apply(&Event::DeliveryAttempted {
            id: d.id,
            outcome: AttemptOutcome::Failure,
            response_code: Some(503),
            error: Some("upstream unavailable".into()),
            at: 1_000,
            attempt_count: 1,
            next_attempt_at: 2_000,
            status: DeliveryStatus::Pending,
        });

        let after = outbox.get(&d.id).unwrap();
        assert_eq!(after.status, DeliveryStatus::Pending);
        assert_eq!(after.attempt_count, 1);
        assert_eq!(after.next_attempt_at, 2_000);
        assert_eq!(after.last_attempt_at, Some(1_000));
        assert_eq!(after.last_error.as_deref(), Some("upstream unavailable"));
        assert_eq!(after.attempts.len(), 1);
        assert_eq!(after.attempts[0].response_code, Some(503));
    }

    #[test]
    fn cancel_for_reservation_spares_terminal_rows() {
        let outbox = Outbox::new();
        let mut succeeded = delivery(DeliveryStatus::Succeeded, 0);
        let pending = delivery(DeliveryStatus::Pending, 0);
        succeeded.reservation_id = pending.reservation_id;
        enqueue(&outbox, &succeeded);
        enqueue(&outbox, &pending);

        outbox.cancel_for_reservation(&pending.reservation_id);
        assert_eq!(
            outbox.get(&pending.id).unwrap().status,
            DeliveryStatus::Cancelled
        );
        assert_eq!(
            outbox.get(&succeeded.id).unwrap().status,
            DeliveryStatus::Succeeded
        );
    }

    #[test]
    fn snapshot_reverts_claims_to_pending() {
        let outbox = Outbox::new();
        let d = delivery(DeliveryStatus::Pending, 0);
        enqueue(&outbox, &d);
        outbox.claim_due(100, 10);

        let snap = outbox.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].status, DeliveryStatus::Pending);
    }

    #[test]
    fn for_reservation_groups_rows() {
        let outbox = Outbox::new();
        let a = delivery(DeliveryStatus::Pending, 0);
        let mut b = delivery(DeliveryStatus::Pending, 0);
        b.reservation_id = a.reservation_id;
        let other = delivery(DeliveryStatus::Pending, 0);
        enqueue(&outbox, &a);
        enqueue(&outbox, &b);
        enqueue(&outbox, &other);

        assert_eq!(outbox.for_reservation(&a.reservation_id).len(), 2);
        assert_eq!(outbox.for_reservation(&other.reservation_id).len(), 1);
    }
}
