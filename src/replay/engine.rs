//! Replay engine.
//!
//! # Responsibilities
//! - Pull queued requests in bounded batches
//! - Hold back requests scheduled for later by re-queueing them
//! - Deliver due requests with bounded concurrency
//! - Retry failures, notify callbacks, back off when idle
//!
//! # Design Decisions
//! - Backoff state lives on the engine and is advanced by `run`
//! - A refill cycle stops when it sees a key it already put back, so a
//!   queue holding only future requests is not spun through
//! - Storage failures abort the cycle and surface as error events; the
//!   next cycle is scheduled as if the queue were empty

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ReplayConfig;
use crate::events::{EventBus, LaterEvent};
use crate::observability::metrics;
use crate::relay::{SerializedRequest, TransportError};
use crate::replay::sender::{CallbackPayload, Sender};
use crate::resilience::{is_success, IdleBackoff, RetryPolicy};
use crate::storage::{Storage, StorageError};

/// What one refill cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// Requests handed to workers.
    pub pulled: usize,
    /// Future-dated requests put back.
    pub waited: usize,
}

impl RefillReport {
    pub fn is_idle(&self) -> bool {
        self.pulled == 0
    }
}

/// Terminal result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// No attempts were left; nothing was sent.
    Dropped,
    /// Final response, successful or with attempts exhausted.
    Delivered { status: u16 },
    /// Final transport failure with attempts exhausted.
    Failed { error: TransportError },
    /// Queued again under `key` with `attempts_left` remaining.
    Retried { key: String, attempts_left: u32 },
    /// The retry could not be stored.
    Lost { error: String },
}

/// Shared by every worker task.
struct DeliveryContext {
    storage: Arc<dyn Storage>,
    sender: Arc<dyn Sender>,
    events: EventBus,
    retry: RetryPolicy,
}

pub struct ReplayEngine {
    ctx: Arc<DeliveryContext>,
    batch_size: usize,
    permits: Arc<Semaphore>,
    backoff: IdleBackoff,
    in_flight: JoinSet<AttemptOutcome>,
}

impl ReplayEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        sender: Arc<dyn Sender>,
        config: &ReplayConfig,
        events: EventBus,
    ) -> Self {
        Self {
            ctx: Arc::new(DeliveryContext {
                storage,
                sender,
                events,
                retry: RetryPolicy::from_config(config),
            }),
            batch_size: config.batch_size.max(1),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: IdleBackoff::new(
                Duration::from_millis(config.backoff_unit_ms),
                Duration::from_millis(config.backoff_max_ms),
            ),
            in_flight: JoinSet::new(),
        }
    }

    /// Pull up to one batch from storage and dispatch due requests.
    ///
    /// Dispatched deliveries keep running after this returns; see `drain`.
    pub async fn refill(&mut self) -> Result<RefillReport, StorageError> {
        let ctx = &self.ctx;
        ctx.events.emit(LaterEvent::Refill);

        let mut report = RefillReport::default();
        let mut parked: HashSet<String> = HashSet::new();

        while report.pulled + report.waited < self.batch_size {
            let (req, key) = match ctx.storage.unqueue().await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) => {
                    metrics::record_queue_error("unqueue");
                    return Err(e);
                }
            };

            let meta = req.meta();
            if let Some(until) = meta.not_before.filter(|_| meta.is_future(Utc::now())) {
                let seen = parked.contains(&key);
                let requeued = ctx.storage.queue(&req).await.map_err(|e| {
                    metrics::record_queue_error("queue");
                    e
                })?;
                ctx.events.emit(LaterEvent::Wait {
                    key: meta.key.clone().unwrap_or_else(|| requeued.clone()),
                    until,
                });
                report.waited += 1;
                if seen {
                    break;
                }
                parked.insert(requeued);
                continue;
            }

            let request = Arc::new(req);
            ctx.events.emit(LaterEvent::Pull {
                key: meta.key.clone().unwrap_or_else(|| key.clone()),
                request: request.clone(),
            });
            report.pulled += 1;

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let ctx = self.ctx.clone();
            self.in_flight.spawn(async move {
                let outcome = attempt(&ctx, key, request).await;
                drop(permit);
                outcome
            });
        }

        Ok(report)
    }

    /// Wait for every dispatched delivery to finish.
    pub async fn drain(&mut self) -> Vec<AttemptOutcome> {
        let mut outcomes = Vec::with_capacity(self.in_flight.len());
        while let Some(joined) = self.in_flight.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.ctx.events.emit(LaterEvent::error("delivery task", &e));
                }
            }
        }
        self.ctx.events.emit(LaterEvent::Drain);
        outcomes
    }

    /// One refill followed by a full drain.
    pub async fn cycle(&mut self) -> Result<(RefillReport, Vec<AttemptOutcome>), StorageError> {
        let refilled = self.refill().await;
        let outcomes = self.drain().await;
        Ok((refilled?, outcomes))
    }

    /// Delay before the next cycle given how the last one went.
    pub fn next_delay(&mut self, last: &Result<RefillReport, StorageError>) -> Duration {
        match last {
            Ok(report) if !report.is_idle() => {
                self.backoff.reset();
                Duration::ZERO
            }
            _ => self.backoff.next_delay(),
        }
    }

    /// Replay until `shutdown` fires; in-flight deliveries finish first.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        self.ctx.events.emit(LaterEvent::Replaying);

        loop {
            let result = self.cycle().await.map(|(report, _)| report);
            if let Err(e) = &result {
                self.ctx.events.emit(LaterEvent::error("storage", e));
            }

            let delay = self.next_delay(&result);
            if delay.is_zero() {
                if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                continue;
            }

            self.ctx.events.emit(LaterEvent::Backoff { delay });
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.drain().await;
        tracing::info!("Replay stopped");
    }
}

/// Deliver one request and settle its fate.
async fn attempt(ctx: &DeliveryContext, key: String, request: Arc<SerializedRequest>) -> AttemptOutcome {
    let meta = request.meta();
    let remaining = meta.remaining_attempts();
    let correlation = meta.key.clone().unwrap_or_else(|| key.clone());

    if remaining == 0 {
        tracing::debug!(key = %correlation, "no attempts left, dropping");
        metrics::record_replay("dropped");
        return AttemptOutcome::Dropped;
    }

    ctx.events.emit(LaterEvent::Replay {
        key: correlation.clone(),
        request: request.clone(),
    });
    let outcome = ctx.sender.send(&request).await;

    if let Err(e) = ctx.storage.log(&key, &outcome).await {
        metrics::record_queue_error("log");
        ctx.events.emit(LaterEvent::error("storage log", e));
    }

    if is_success(&meta, &outcome) || remaining <= 1 {
        if let Some(url) = &meta.callback {
            let payload = CallbackPayload::new(&request, &outcome);
            if let Err(e) = ctx.sender.notify(url, &payload).await {
                tracing::warn!(key = %correlation, callback = %url, error = %e, "Callback failed");
            }
        }

        return match outcome {
            Ok(response) => {
                metrics::record_replay("delivered");
                ctx.events.emit(LaterEvent::Response {
                    key: correlation,
                    request,
                    status: response.status_code,
                });
                AttemptOutcome::Delivered {
                    status: response.status_code,
                }
            }
            Err(error) => {
                metrics::record_replay("failed");
                ctx.events.emit(LaterEvent::Failure {
                    key: correlation,
                    request,
                    error: error.to_string(),
                });
                AttemptOutcome::Failed { error }
            }
        };
    }

    let mut next = ctx.retry.schedule(&meta, Utc::now());
    next.key = Some(correlation.clone());
    let attempts_left = next.remaining_attempts();

    let mut retried = (*request).clone();
    retried.apply_meta(&next);

    match ctx.storage.queue(&retried).await {
        Ok(new_key) => {
            metrics::record_retry();
            let (status, error) = match &outcome {
                Ok(response) => (Some(response.status_code), None),
                Err(e) => (None, Some(e.to_string())),
            };
            ctx.events.emit(LaterEvent::Retry {
                key: correlation,
                request: Arc::new(retried),
                status,
                error,
            });
            AttemptOutcome::Retried {
                key: new_key,
                attempts_left,
            }
        }
        Err(e) => {
            metrics::record_queue_error("queue");
            ctx.events.emit(LaterEvent::error("storage retry", &e));
            AttemptOutcome::Lost { error: e.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::meta::{format_http_date, parse_http_date};
    use crate::relay::{Outcome, SerializedResponse};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use url::Url;

    /// Sender returning scripted outcomes (200 once the script runs out).
    #[derive(Default)]
    struct ScriptedSender {
        script: Mutex<VecDeque<Outcome>>,
        sent: Mutex<Vec<SerializedRequest>>,
        notified: Mutex<Vec<(Url, CallbackPayload)>>,
    }

    impl ScriptedSender {
        fn with(outcomes: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.into()),
                ..Default::default()
            })
        }

        fn sent(&self) -> Vec<SerializedRequest> {
            self.sent.lock().unwrap().clone()
        }

        fn notified(&self) -> Vec<(Url, CallbackPayload)> {
            self.notified.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sender for ScriptedSender {
        async fn send(&self, req: &SerializedRequest) -> Outcome {
            self.sent.lock().unwrap().push(req.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SerializedResponse::new(200)))
        }

        async fn notify(&self, url: &Url, payload: &CallbackPayload) -> Result<(), TransportError> {
            self.notified.lock().unwrap().push((url.clone(), payload.clone()));
            Ok(())
        }
    }

    fn engine(storage: &Arc<MemoryStorage>, sender: &Arc<ScriptedSender>) -> ReplayEngine {
        ReplayEngine::new(
            storage.clone(),
            sender.clone(),
            &ReplayConfig::default(),
            EventBus::default(),
        )
    }

    fn hook(attempts: Option<&str>) -> SerializedRequest {
        let req = SerializedRequest::new("POST", "/hook")
            .with_header("Host", "origin.test")
            .with_header("X-Later-Retry-On", "503")
            .with_body("payload");
        match attempts {
            Some(n) => req.with_header("X-Later-Attempts", n),
            None => req,
        }
    }

    #[tokio::test]
    async fn test_single_attempt_not_requeued() {
        let storage = Arc::new(MemoryStorage::new("t:"));
        let sender = ScriptedSender::with(vec![Ok(SerializedResponse::new(200))]);
        let key = storage
            .queue(&hook(Some("1")).with_header("X-Later-Callback", "http://cb.test/done"))
            .await
            .unwrap();

        let (report, outcomes) = engine(&storage, &sender).cycle().await.unwrap();

        assert_eq!(report, RefillReport { pulled: 1, waited: 0 });
        assert_eq!(outcomes, vec![AttemptOutcome::Delivered { status: 200 }]);
        assert_eq!(storage.len().await, 0);
        assert_eq!(sender.sent().len(), 1);

        let notified = sender.notified();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].0.as_str(), "http://cb.test/done");
        assert_eq!(notified[0].1.res.as_ref().map(|r| r.status_code), Some(200));

        let log = storage.log_entries().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].key, key);
    }

    #[tokio::test]
    async fn test_last_attempt_with_retry_status_is_final() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![Ok(SerializedResponse::new(503))]);
        storage.queue(&hook(Some("1"))).await.unwrap();

        let (_, outcomes) = engine(&storage, &sender).cycle().await.unwrap();

        assert_eq!(outcomes, vec![AttemptOutcome::Delivered { status: 503 }]);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_retry_requeues_once_with_later_date() {
        let storage = Arc::new(MemoryStorage::new("t:"));
        let sender = ScriptedSender::with(vec![Ok(SerializedResponse::new(503))]);
        let original_key = storage.queue(&hook(Some("2"))).await.unwrap();
        let before = Utc::now();

        let (_, outcomes) = engine(&storage, &sender).cycle().await.unwrap();

        let keys = storage.keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(
            outcomes,
            vec![AttemptOutcome::Retried {
                key: keys[0].clone(),
                attempts_left: 1
            }]
        );

        let stored = storage.peek(&keys[0]).unwrap();
        assert_eq!(stored.headers.get("X-Later-Attempts"), Some("1"));
        assert_eq!(stored.headers.get("X-Later-Key"), Some(original_key.as_str()));
        assert_eq!(stored.headers.get("X-Later-Retry-After"), Some("60"));
        let date = parse_http_date(stored.headers.get("Date").unwrap()).unwrap();
        assert!(date > before);
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![Err(TransportError::Connect("refused".into()))]);
        storage.queue(&hook(Some("3"))).await.unwrap();

        let (_, outcomes) = engine(&storage, &sender).cycle().await.unwrap();

        assert!(matches!(
            outcomes.as_slice(),
            [AttemptOutcome::Retried { attempts_left: 2, .. }]
        ));
        assert_eq!(storage.len().await, 1);
        assert!(storage.log_entries().await[0].err.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_transport_error_notifies_callback() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![Err(TransportError::Timeout("slow".into()))]);
        storage
            .queue(&hook(None).with_header("X-Later-Callback", "http://cb.test/"))
            .await
            .unwrap();

        let (_, outcomes) = engine(&storage, &sender).cycle().await.unwrap();

        assert!(matches!(outcomes.as_slice(), [AttemptOutcome::Failed { .. }]));
        let notified = sender.notified();
        assert!(notified[0].1.res.is_none());
        assert!(notified[0].1.err.as_deref().unwrap().contains("slow"));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_attempts_dropped_without_sending() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![]);
        storage.queue(&hook(Some("0"))).await.unwrap();
        storage.queue(&hook(Some("-4"))).await.unwrap();

        let (_, outcomes) = engine(&storage, &sender).cycle().await.unwrap();

        assert_eq!(outcomes, vec![AttemptOutcome::Dropped, AttemptOutcome::Dropped]);
        assert!(sender.sent().is_empty());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_future_request_waits() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![]);
        let later = Utc::now() + chrono::Duration::hours(1);
        storage
            .queue(&hook(None).with_header("Date", format_http_date(later)))
            .await
            .unwrap();

        let mut engine = engine(&storage, &sender);
        let mut events = engine.ctx.events.subscribe();
        let (report, outcomes) = engine.cycle().await.unwrap();

        assert!(report.is_idle());
        assert!(report.waited >= 1);
        assert!(outcomes.is_empty());
        assert!(sender.sent().is_empty());
        assert_eq!(storage.len().await, 1);

        let mut saw_wait = false;
        while let Ok(event) = events.try_recv() {
            saw_wait |= matches!(event, LaterEvent::Wait { .. });
        }
        assert!(saw_wait);
    }

    #[tokio::test]
    async fn test_past_date_is_sent() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![]);
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        storage
            .queue(&hook(None).with_header("Date", format_http_date(earlier)))
            .await
            .unwrap();

        let (report, _) = engine(&storage, &sender).cycle().await.unwrap();

        assert_eq!(report.pulled, 1);
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_cycle() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![]);
        for n in 0..5 {
            storage
                .queue(&SerializedRequest::new("POST", format!("/n/{}", n)).with_header("Host", "o.test"))
                .await
                .unwrap();
        }
        let config = ReplayConfig {
            batch_size: 3,
            concurrency: 2,
            ..Default::default()
        };
        let mut engine = ReplayEngine::new(storage.clone(), sender.clone(), &config, EventBus::default());

        let (report, _) = engine.cycle().await.unwrap();
        assert_eq!(report.pulled, 3);
        assert_eq!(storage.len().await, 2);

        let (report, _) = engine.cycle().await.unwrap();
        assert_eq!(report.pulled, 2);
        assert_eq!(sender.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_idle_backoff_grows_and_resets() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![]);
        let mut engine = engine(&storage, &sender);
        let unit = Duration::from_millis(ReplayConfig::default().backoff_unit_ms);

        let mut delays = Vec::new();
        for _ in 0..6 {
            let result = engine.cycle().await.map(|(report, _)| report);
            delays.push(engine.next_delay(&result));
        }
        assert_eq!(
            delays,
            vec![0, 1, 1, 2, 3, 5].into_iter().map(|n| unit * n).collect::<Vec<_>>()
        );

        storage.queue(&hook(None)).await.unwrap();
        let result = engine.cycle().await.map(|(report, _)| report);
        assert_eq!(engine.next_delay(&result), Duration::ZERO);

        let result = engine.cycle().await.map(|(report, _)| report);
        assert_eq!(engine.next_delay(&result), Duration::ZERO);
        let result = engine.cycle().await.map(|(report, _)| report);
        assert_eq!(engine.next_delay(&result), unit);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let storage = Arc::new(MemoryStorage::new(""));
        let sender = ScriptedSender::with(vec![]);
        storage.queue(&hook(None)).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(engine(&storage, &sender).run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert_eq!(sender.sent().len(), 1);
        assert!(storage.is_empty().await);
    }
}
