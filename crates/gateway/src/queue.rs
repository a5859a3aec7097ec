//! Durable, retryable processing queue over verified inbound events.
//!
//! The queue claims one item at a time (the store's atomic claim is the
//! pipeline's only cross-process concurrency control), runs the processor,
//! and folds the outcome back into persisted state. Processing failures are
//! captured on the item and the event — they never escape the drain loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use feedgate_core::{CatalogError, EventId, InboundEvent, QueueItem, QueueStats};
use feedgate_state::{EventStore, QueueStore};

use crate::error::GatewayError;

/// Errors surfaced by event processing.
///
/// `Downstream` is the circuit breaker's open rejection — distinct from a
/// processing failure so callers can treat "dependency is resting" and
/// "this event is bad" differently.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The payload does not parse for its event kind.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// The protected downstream call was rejected by an open circuit.
    #[error("downstream unavailable: {0}")]
    Downstream(String),

    /// The catalog rejected or failed the change.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// The function applied to each claimed event.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Process one event to completion or failure.
    async fn process(&self, event: &InboundEvent) -> Result<(), ProcessorError>;
}

/// Configuration for the processing queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Interval between drain passes of the background loop.
    pub poll_interval: Duration,
    /// Attempt budget per item before it is parked as failed.
    pub max_attempts: u32,
    /// Base unit of the exponential backoff (`2^attempts * base`).
    pub backoff_base: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Handle to the owned background drain task.
struct Worker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Durable work queue of verified inbound events.
pub struct ProcessingQueue {
    queue: Arc<dyn QueueStore>,
    events: Arc<dyn EventStore>,
    processor: Arc<dyn EventProcessor>,
    config: QueueConfig,
    worker: Mutex<Option<Worker>>,
}

impl ProcessingQueue {
    /// Create a queue over the given stores and processor.
    pub fn new(
        queue: Arc<dyn QueueStore>,
        events: Arc<dyn EventStore>,
        processor: Arc<dyn EventProcessor>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            events,
            processor,
            config,
            worker: Mutex::new(None),
        }
    }

    /// Enqueue an accepted event for processing.
    ///
    /// `scheduled_for` defaults to now; higher `priority` is claimed sooner.
    pub async fn enqueue(
        &self,
        event_id: impl Into<EventId>,
        priority: i32,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<QueueItem, GatewayError> {
        let item = QueueItem::new(
            event_id,
            priority,
            scheduled_for.unwrap_or_else(Utc::now),
        )
        .with_max_attempts(self.config.max_attempts);
        self.queue.enqueue(item.clone()).await?;
        debug!(item = %item.id, event = %item.event_id, priority, "enqueued event");
        Ok(item)
    }

    /// Claim and process the next eligible item.
    ///
    /// Returns `Ok(true)` when an item was claimed (regardless of the
    /// processing outcome — failures are folded into persisted state) and
    /// `Ok(false)` when nothing is eligible. Only store access errors
    /// surface as `Err`.
    pub async fn process_next(&self) -> Result<bool, GatewayError> {
        let Some(item) = self.queue.claim_next(Utc::now()).await? else {
            return Ok(false);
        };

        let outcome = match self.events.get_event(&item.event_id).await? {
            Some(event) => self.processor.process(&event).await,
            // The queue row outlived its event record; unprocessable.
            None => Err(ProcessorError::Payload(format!(
                "event record {} missing",
                item.event_id
            ))),
        };

        match outcome {
            Ok(()) => {
                self.queue.complete(&item.id).await?;
                self.events.mark_processed(&item.event_id).await?;
                debug!(item = %item.id, event = %item.event_id, "event processed");
            }
            Err(e) => self.handle_failure(&item, &e).await?,
        }

        Ok(true)
    }

    /// Fold a processing failure into item and event state: park the item
    /// as failed once attempts are exhausted, otherwise reschedule it with
    /// exponential backoff.
    async fn handle_failure(
        &self,
        item: &QueueItem,
        cause: &ProcessorError,
    ) -> Result<(), GatewayError> {
        let attempts = item.attempts + 1;
        let detail = cause.to_string();

        self.events
            .record_failure(&item.event_id, &detail, attempts)
            .await?;

        if attempts >= item.max_attempts {
            self.queue.fail(&item.id, &detail, attempts).await?;
            warn!(
                item = %item.id,
                event = %item.event_id,
                attempts,
                error = %detail,
                "attempts exhausted, item parked as failed"
            );
        } else {
            let delay = self.backoff_delay(attempts);
            let scheduled_for = Utc::now() + delay;
            self.queue
                .reschedule(&item.id, &detail, attempts, scheduled_for)
                .await?;
            debug!(
                item = %item.id,
                event = %item.event_id,
                attempts,
                delay_ms = delay.num_milliseconds(),
                error = %detail,
                "item rescheduled with backoff"
            );
        }
        Ok(())
    }

    /// Exponential backoff: `2^attempts * base` (2s, 4s, 8s, ... for the
    /// default base). The exponent is capped to keep the arithmetic sane
    /// for absurd attempt counts.
    fn backoff_delay(&self, attempts: u32) -> ChronoDuration {
        let factor = 2u64.saturating_pow(attempts.min(20));
        let millis = u64::try_from(self.config.backoff_base.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(factor);
        ChronoDuration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Start the owned background drain loop.
    ///
    /// Each tick drains every currently-eligible item before sleeping
    /// again, bounding latency under burst load without busy-spinning.
    /// Idempotent: a second call while running is a logged no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            info!("queue processing already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let queue = Arc::clone(self);
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            info!(interval_ms = poll_interval.as_millis() as u64, "queue processing started");
            let mut ticker = interval(poll_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("queue processing received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        queue.drain().await;
                    }
                }
            }
            info!("queue processing stopped");
        });

        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });
    }

    /// Drain all currently-eligible items. Store errors end the pass early;
    /// the next tick retries.
    async fn drain(&self) {
        loop {
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, "queue drain pass aborted");
                    break;
                }
            }
        }
    }

    /// Stop the background drain loop and join it. Idempotent: a call while
    /// stopped is a logged no-op. An already-claimed item finishes its
    /// in-flight attempt; it is not forcibly cancelled.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            info!("queue processing already stopped");
            return;
        };
        // The task may already have exited; a send failure is fine.
        let _ = worker.shutdown_tx.send(()).await;
        if let Err(e) = worker.handle.await {
            error!(error = %e, "queue worker task join failed");
        }
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Aggregate queue counters.
    pub async fn stats(&self) -> Result<QueueStats, GatewayError> {
        Ok(self.queue.stats().await?)
    }

    /// Hard-delete terminal items older than `retention`. Returns how many
    /// were deleted.
    pub async fn cleanup(&self, retention: ChronoDuration) -> Result<u64, GatewayError> {
        let cutoff = Utc::now() - retention;
        let deleted = self.queue.delete_terminal_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "queue retention cleanup removed terminal items");
        }
        Ok(deleted)
    }

    /// Reset failed items back to pending for manual recovery, optionally
    /// only those under an attempt ceiling. Returns how many were reset.
    pub async fn retry_failed(&self, max_attempts: Option<u32>) -> Result<u64, GatewayError> {
        let reset = self.queue.reset_failed(max_attempts).await?;
        if reset > 0 {
            info!(reset, "failed queue items reset to pending");
        }
        Ok(reset)
    }
}

impl std::fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use feedgate_core::{EventKind, QueueStatus};
    use feedgate_state_memory::MemoryStore;

    use super::*;

    /// Processor that fails its first `fail_times` invocations.
    struct ScriptedProcessor {
        remaining_failures: AtomicU32,
        processed: AtomicU32,
    }

    impl ScriptedProcessor {
        fn failing(times: u32) -> Self {
            Self {
                remaining_failures: AtomicU32::new(times),
                processed: AtomicU32::new(0),
            }
        }

        fn succeeding() -> Self {
            Self::failing(0)
        }
    }

    #[async_trait]
    impl EventProcessor for ScriptedProcessor {
        async fn process(&self, _event: &InboundEvent) -> Result<(), ProcessorError> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ProcessorError::Payload("scripted failure".into()));
            }
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        processor: Arc<ScriptedProcessor>,
        queue: Arc<ProcessingQueue>,
    }

    fn fixture(processor: ScriptedProcessor, config: QueueConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(processor);
        let queue = Arc::new(ProcessingQueue::new(
            Arc::clone(&store) as Arc<dyn QueueStore>,
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::clone(&processor) as Arc<dyn EventProcessor>,
            config,
        ));
        Fixture {
            store,
            processor,
            queue,
        }
    }

    async fn seed_event(store: &MemoryStore, id: &str) {
        store
            .insert_event(InboundEvent::new(
                id,
                EventKind::PriceChange,
                serde_json::json!({"sku": "SKU-1", "price_cents": 999}),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn process_next_reports_no_work() {
        let f = fixture(ScriptedProcessor::succeeding(), QueueConfig::default());
        assert!(!f.queue.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn success_completes_item_and_marks_event() {
        let f = fixture(ScriptedProcessor::succeeding(), QueueConfig::default());
        seed_event(&f.store, "evt-1").await;
        let item = f.queue.enqueue("evt-1", 0, None).await.unwrap();

        assert!(f.queue.process_next().await.unwrap());

        let item = f.store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        let event = f
            .store
            .get_event(&EventId::new("evt-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(event.processed);
        assert_eq!(f.processor.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_reschedules_with_exponential_backoff() {
        let f = fixture(ScriptedProcessor::failing(10), QueueConfig::default());
        seed_event(&f.store, "evt-1").await;
        let item = f.queue.enqueue("evt-1", 0, None).await.unwrap();

        let before = Utc::now();
        assert!(f.queue.process_next().await.unwrap());

        let item = f.store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.last_error.as_deref(), Some("malformed payload: scripted failure"));

        // First retry: 2^1 * 1s = 2s out, within scheduling slop.
        let delay_ms = (item.scheduled_for - before).num_milliseconds();
        assert!((1900..=2500).contains(&delay_ms), "delay was {delay_ms}ms");

        // The rescheduled item is not yet eligible.
        assert!(!f.queue.process_next().await.unwrap());

        // Failure metadata landed on the event record too.
        let event = f
            .store
            .get_event(&EventId::new("evt-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.retry_count, 1);
        assert!(!event.processed);
    }

    #[tokio::test]
    async fn exhausted_attempts_park_item_as_failed() {
        // Base of zero makes every retry immediately eligible.
        let config = QueueConfig {
            backoff_base: Duration::ZERO,
            ..QueueConfig::default()
        };
        let f = fixture(ScriptedProcessor::failing(10), config);
        seed_event(&f.store, "evt-1").await;
        let item = f.queue.enqueue("evt-1", 0, None).await.unwrap();

        // Attempts 1 and 2 reschedule, attempt 3 parks the item.
        for _ in 0..3 {
            assert!(f.queue.process_next().await.unwrap());
        }

        let item = f.store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 3);

        // Terminal: never rescheduled again.
        assert!(!f.queue.process_next().await.unwrap());

        // Manual recovery path.
        assert_eq!(f.queue.retry_failed(None).await.unwrap(), 1);
        let item = f.store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn missing_event_record_is_a_processing_failure() {
        let config = QueueConfig {
            backoff_base: Duration::ZERO,
            ..QueueConfig::default()
        };
        let f = fixture(ScriptedProcessor::succeeding(), config);
        // Enqueue without seeding the event record.
        f.queue.enqueue("evt-ghost", 0, None).await.unwrap();

        for _ in 0..3 {
            assert!(f.queue.process_next().await.unwrap());
        }
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(f.processor.processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_drains_bursts_and_stops() {
        let f = fixture(ScriptedProcessor::succeeding(), QueueConfig::default());
        for i in 0..5 {
            let id = format!("evt-{i}");
            seed_event(&f.store, &id).await;
            f.queue.enqueue(id, 0, None).await.unwrap();
        }

        f.queue.start();
        assert!(f.queue.is_running());
        // Idempotent start.
        f.queue.start();

        // First tick fires immediately; let the drain run.
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.completed, 5, "one tick drains every eligible item");

        f.queue.stop().await;
        assert!(!f.queue.is_running());
        // Idempotent stop.
        f.queue.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn poison_item_terminates_without_crashing_the_loop() {
        let config = QueueConfig {
            poll_interval: Duration::from_secs(1),
            // Zero base keeps retries immediately eligible: chrono runs on
            // the real clock even when tokio's clock is paused.
            backoff_base: Duration::ZERO,
            ..QueueConfig::default()
        };
        let f = fixture(ScriptedProcessor::failing(u32::MAX), config);
        seed_event(&f.store, "evt-poison").await;
        let item = f.queue.enqueue("evt-poison", 0, None).await.unwrap();

        f.queue.start();
        // A few ticks cover all three attempts plus their tiny backoffs.
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        f.queue.stop().await;

        let item = f.store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed, "poison reaches a terminal state");
    }

    #[tokio::test]
    async fn cleanup_removes_only_terminal_items() {
        let f = fixture(ScriptedProcessor::succeeding(), QueueConfig::default());
        seed_event(&f.store, "evt-1").await;
        seed_event(&f.store, "evt-2").await;
        f.queue.enqueue("evt-1", 0, None).await.unwrap();
        f.queue.process_next().await.unwrap();
        f.queue.enqueue("evt-2", 0, None).await.unwrap();

        // Zero retention: anything terminal is old enough.
        let deleted = f.queue.cleanup(ChronoDuration::zero()).await.unwrap();
        assert_eq!(deleted, 1);
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 0);
    }
}
