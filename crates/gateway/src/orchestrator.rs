//! Top-level coordinator for the inbound event pipeline.
//!
//! Owns the queue lifecycle, the periodic health-check and housekeeping
//! timers, the enable/disable workflow for per-entity monitoring, and
//! maintenance. Built explicitly via [`OrchestratorBuilder`]; everything is
//! injected, nothing is global.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use feedgate_audit::{AuditEvent, AuditSink, Severity};
use feedgate_core::{
    EntityId, EventStats, InventoryService, MonitorConfig, MonitorKind, MonitoringChange,
    QueueStats,
};
use feedgate_state::{EventStore, MonitorStore};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus};
use crate::error::GatewayError;
use crate::flags::{FeatureFlags, FlagKey, MonitoringSettings};
use crate::queue::ProcessingQueue;
use crate::ratelimit::RateLimiter;

const AUDIT_SOURCE: &str = "orchestrator";

/// Configuration for the orchestrator's timers.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often dependency health is checked.
    pub health_check_interval: Duration,
    /// How often expired stock reservations are swept (also evicts idle
    /// rate-limiter sources).
    pub housekeeping_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(300),
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

/// A request to enable monitoring for one entity.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    /// What to track.
    pub kind: MonitorKind,
    /// Marketplace listing id this entity maps to, if known.
    pub external_ref: Option<String>,
}

/// One aggregated status section; collaborator failures degrade the section
/// instead of failing the whole status call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SectionStatus<T> {
    Ok(T),
    Unavailable { error: String },
}

impl<T> SectionStatus<T> {
    fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::Unavailable {
                error: e.to_string(),
            },
        }
    }

    /// The section value, when available.
    pub fn ok(&self) -> Option<&T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Aggregate system status for observability.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub queue: SectionStatus<QueueStats>,
    pub events: SectionStatus<EventStats>,
    pub monitoring: SectionStatus<MonitoringStats>,
    pub settings: MonitoringSettings,
    pub circuit_breaker: CircuitBreakerStatus,
    pub rate_limited_sources: usize,
}

/// Monitoring statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitoringStats {
    pub enabled_monitors: u64,
    pub events: EventStats,
}

/// Health of one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn up() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    fn down(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregated dependency health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub store: ComponentHealth,
    pub audit_sink: ComponentHealth,
    pub queue: ComponentHealth,
    pub checked_at: DateTime<Utc>,
}

/// Summary of one maintenance pass.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MaintenanceReport {
    pub audit_events_removed: u64,
    pub queue_items_removed: u64,
    pub reservations_released: u64,
}

/// Handle to one owned background timer task.
struct BackgroundTask {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Top-level pipeline coordinator.
pub struct Orchestrator {
    queue: Arc<ProcessingQueue>,
    flags: Arc<FeatureFlags>,
    inventory: Arc<dyn InventoryService>,
    audit: Arc<dyn AuditSink>,
    monitors: Arc<dyn MonitorStore>,
    events: Arc<dyn EventStore>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    config: OrchestratorConfig,
    running: Mutex<bool>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl Orchestrator {
    /// Start building an orchestrator.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Whether the orchestrator is running.
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Start the pipeline: seed flag defaults, start the queue loop, start
    /// the health-check and housekeeping timers, and emit `system_started`.
    ///
    /// Idempotent: calling start while running is a logged no-op. If any
    /// step fails, partial progress is rolled back, a `system_start_failed`
    /// critical audit event is emitted, and the error propagates.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        {
            let mut running = self.running.lock();
            if *running {
                info!("orchestrator already running");
                return Ok(());
            }
            *running = true;
        }

        if let Err(e) = self.try_start().await {
            error!(error = %e, "orchestrator start failed");
            *self.running.lock() = false;
            self.queue.stop().await;
            self.shutdown_background().await;
            self.log_audit_best_effort(
                AuditEvent::new("system_start_failed", "system", "start")
                    .with_source(AUDIT_SOURCE)
                    .with_severity(Severity::Critical)
                    .with_metadata(serde_json::json!({ "error": e.to_string() })),
            )
            .await;
            return Err(e);
        }

        info!("orchestrator started");
        Ok(())
    }

    async fn try_start(self: &Arc<Self>) -> Result<(), GatewayError> {
        let seeded = self.flags.ensure_defaults().await?;
        if seeded > 0 {
            info!(seeded, "seeded missing flag defaults");
        }

        self.queue.start();
        self.spawn_health_task();
        self.spawn_housekeeping_task();

        self.audit
            .log_event(
                AuditEvent::new("system_started", "system", "start")
                    .with_source(AUDIT_SOURCE)
                    .with_metadata(serde_json::json!({ "seeded_flags": seeded })),
            )
            .await?;
        Ok(())
    }

    /// Stop the pipeline: stop the queue loop, cancel and join the timers,
    /// and emit `system_stopped`.
    ///
    /// Idempotent: calling stop while stopped is a logged no-op. Stop-path
    /// failures are logged as error audit events, but stop completes.
    pub async fn stop(&self) {
        {
            let mut running = self.running.lock();
            if !*running {
                info!("orchestrator already stopped");
                return;
            }
            *running = false;
        }

        self.queue.stop().await;
        self.shutdown_background().await;

        self.log_audit_best_effort(
            AuditEvent::new("system_stopped", "system", "stop").with_source(AUDIT_SOURCE),
        )
        .await;
        info!("orchestrator stopped");
    }

    fn spawn_health_task(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let orchestrator = Arc::clone(self);
        let period = self.config.health_check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let report = orchestrator.perform_health_check().await;
                        if !report.healthy {
                            warn!("health check found unhealthy dependencies");
                        }
                    }
                }
            }
        });

        self.tasks.lock().push(BackgroundTask {
            name: "health_check",
            shutdown_tx,
            handle,
        });
    }

    fn spawn_housekeeping_task(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let orchestrator = Arc::clone(self);
        let period = self.config.housekeeping_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match orchestrator.inventory.cleanup_expired_reservations().await {
                            Ok(report) => {
                                if report.released > 0 {
                                    info!(released = report.released, "released expired stock reservations");
                                }
                            }
                            Err(e) => error!(error = %e, "reservation cleanup failed"),
                        }
                        let evicted = orchestrator.limiter.cleanup();
                        if evicted > 0 {
                            debug!(evicted, "evicted idle rate limit sources");
                        }
                    }
                }
            }
        });

        self.tasks.lock().push(BackgroundTask {
            name: "housekeeping",
            shutdown_tx,
            handle,
        });
    }

    /// Cancel and join every owned background task.
    async fn shutdown_background(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if task.shutdown_tx.send(()).await.is_err() {
                // Task already exited; joining below surfaces any panic.
                debug!(task = task.name, "background task was already gone");
            }
            if let Err(e) = task.handle.await {
                error!(task = task.name, error = %e, "background task join failed");
                self.log_audit_best_effort(
                    AuditEvent::new("system_stop_failed", "system", "stop")
                        .with_source(AUDIT_SOURCE)
                        .with_severity(Severity::Error)
                        .with_metadata(serde_json::json!({
                            "task": task.name,
                            "error": e.to_string(),
                        })),
                )
                .await;
            }
        }
    }

    /// Enable monitoring for an entity.
    ///
    /// Re-checks the flag gate for the requested monitor kind first; a
    /// globally disabled capability is refused with a reason and produces
    /// no "enabled" audit event. This is the enforcement point for the
    /// stock-mutation invariant.
    pub async fn enable_product_monitoring(
        &self,
        entity_id: &EntityId,
        request: MonitorRequest,
    ) -> Result<MonitoringChange, GatewayError> {
        let settings = self.flags.monitoring_settings().await;
        let allowed = match request.kind {
            MonitorKind::Price => settings.price_updates_enabled,
            MonitorKind::Stock => settings.stock_monitoring_enabled,
        };
        if !allowed {
            info!(entity = %entity_id, kind = %request.kind, "monitoring enable refused: capability disabled");
            return Ok(MonitoringChange::refused(format!(
                "{} monitoring is globally disabled",
                request.kind
            )));
        }

        let config = match self.monitors.get_monitor(entity_id).await? {
            Some(mut existing) => {
                existing.kind = request.kind;
                existing.enabled = true;
                existing.external_ref = request.external_ref.or(existing.external_ref);
                existing.updated_at = Utc::now();
                existing
            }
            None => {
                let mut config = MonitorConfig::new(entity_id.clone(), request.kind);
                config.external_ref = request.external_ref;
                config
            }
        };
        self.monitors.put_monitor(config.clone()).await?;

        self.audit
            .log_event(
                AuditEvent::new("monitoring_enabled", "product", "enable")
                    .with_entity_id(entity_id.as_str())
                    .with_source(AUDIT_SOURCE)
                    .with_metadata(serde_json::json!({
                        "kind": config.kind.as_str(),
                        "external_ref": config.external_ref,
                    })),
            )
            .await?;
        Ok(MonitoringChange::applied())
    }

    /// Disable monitoring for an entity, preserving the previous
    /// configuration in the audit trail.
    pub async fn disable_product_monitoring(
        &self,
        entity_id: &EntityId,
    ) -> Result<MonitoringChange, GatewayError> {
        let Some(current) = self.monitors.get_monitor(entity_id).await? else {
            return Ok(MonitoringChange::refused("no monitor registered for entity"));
        };

        self.monitors.set_monitor_enabled(entity_id, false).await?;

        self.audit
            .log_event(
                AuditEvent::new("monitoring_disabled", "product", "disable")
                    .with_entity_id(entity_id.as_str())
                    .with_source(AUDIT_SOURCE)
                    .with_metadata(serde_json::json!({
                        "previous": serde_json::to_value(&current)
                            .unwrap_or(serde_json::Value::Null),
                    })),
            )
            .await?;
        Ok(MonitoringChange::applied())
    }

    /// Run retention maintenance: audit-log cleanup, queue cleanup, and
    /// reservation cleanup, concurrently. Retention windows come from the
    /// flag gate. Emits one summary audit event; any failure is logged as a
    /// `maintenance_failed` critical event and re-raised.
    pub async fn perform_maintenance(&self) -> Result<MaintenanceReport, GatewayError> {
        let log_days = self.flags.get_integer(FlagKey::LogRetentionDays).await;
        let queue_days = self.flags.get_integer(FlagKey::QueueRetentionDays).await;
        let log_cutoff = Utc::now() - ChronoDuration::days(log_days);

        let (audit_result, queue_result, reservation_result) = tokio::join!(
            self.audit.cleanup_before(log_cutoff),
            self.queue.cleanup(ChronoDuration::days(queue_days)),
            self.inventory.cleanup_expired_reservations(),
        );

        let outcome: Result<MaintenanceReport, GatewayError> = (|| {
            Ok(MaintenanceReport {
                audit_events_removed: audit_result?,
                queue_items_removed: queue_result?,
                reservations_released: reservation_result?.released,
            })
        })();

        match outcome {
            Ok(report) => {
                self.audit
                    .log_event(
                        AuditEvent::new("maintenance_completed", "system", "maintenance")
                            .with_source(AUDIT_SOURCE)
                            .with_metadata(
                                serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
                            ),
                    )
                    .await?;
                info!(
                    audit_removed = report.audit_events_removed,
                    queue_removed = report.queue_items_removed,
                    reservations_released = report.reservations_released,
                    "maintenance completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "maintenance failed");
                self.log_audit_best_effort(
                    AuditEvent::new("maintenance_failed", "system", "maintenance")
                        .with_source(AUDIT_SOURCE)
                        .with_severity(Severity::Critical)
                        .with_metadata(serde_json::json!({ "error": e.to_string() })),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Aggregate sub-component statistics. Collaborator failures degrade
    /// the affected section rather than failing the call.
    pub async fn get_system_status(&self) -> SystemStatus {
        let queue = SectionStatus::from_result(self.queue.stats().await);
        let events = SectionStatus::from_result(self.events.event_stats().await);
        let monitoring = SectionStatus::from_result(self.monitoring_stats().await);
        let settings = self.flags.monitoring_settings().await;

        SystemStatus {
            running: self.is_running(),
            queue,
            events,
            monitoring,
            settings,
            circuit_breaker: self.breaker.snapshot(),
            rate_limited_sources: self.limiter.tracked_sources(),
        }
    }

    /// Monitoring statistics: enabled monitors plus event log counters.
    pub async fn monitoring_stats(&self) -> Result<MonitoringStats, GatewayError> {
        Ok(MonitoringStats {
            enabled_monitors: self.monitors.count_enabled_monitors().await?,
            events: self.events.event_stats().await?,
        })
    }

    /// Probe each dependency. Every unhealthy dependency produces a
    /// severity-error audit event; the probe itself never fails.
    pub async fn perform_health_check(&self) -> HealthReport {
        let store = match self.events.event_stats().await {
            Ok(_) => ComponentHealth::up(),
            Err(e) => ComponentHealth::down(e.to_string()),
        };
        let audit_sink = match self.audit.metrics("system_started", 1).await {
            Ok(_) => ComponentHealth::up(),
            Err(e) => ComponentHealth::down(e.to_string()),
        };
        let queue = match self.queue.stats().await {
            Ok(stats) => ComponentHealth {
                healthy: true,
                detail: Some(format!(
                    "pending={} processing={} failed={}",
                    stats.pending, stats.processing, stats.failed
                )),
            },
            Err(e) => ComponentHealth::down(e.to_string()),
        };

        let report = HealthReport {
            healthy: store.healthy && audit_sink.healthy && queue.healthy,
            store,
            audit_sink,
            queue,
            checked_at: Utc::now(),
        };

        for (component, health) in [
            ("store", &report.store),
            ("audit_sink", &report.audit_sink),
            ("queue", &report.queue),
        ] {
            if !health.healthy {
                self.log_audit_best_effort(
                    AuditEvent::new("health_check_failed", "system", "health_check")
                        .with_source(AUDIT_SOURCE)
                        .with_severity(Severity::Error)
                        .with_metadata(serde_json::json!({
                            "component": component,
                            "detail": health.detail,
                        })),
                )
                .await;
            }
        }

        report
    }

    /// Manually drain one queue item (testing/operations hook). Returns
    /// whether work was found.
    pub async fn process_queue_once(&self) -> Result<bool, GatewayError> {
        self.queue.process_next().await
    }

    /// Audit writes on failure paths must not mask the original error.
    async fn log_audit_best_effort(&self, event: AuditEvent) {
        if let Err(e) = self.audit.log_event(event).await {
            error!(error = %e, "audit write failed");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Orchestrator`]. All collaborators are required; there is
/// no global instance.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    queue: Option<Arc<ProcessingQueue>>,
    flags: Option<Arc<FeatureFlags>>,
    inventory: Option<Arc<dyn InventoryService>>,
    audit: Option<Arc<dyn AuditSink>>,
    monitors: Option<Arc<dyn MonitorStore>>,
    events: Option<Arc<dyn EventStore>>,
    breaker: Option<Arc<CircuitBreaker>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl OrchestratorBuilder {
    /// Create a builder with default timer configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the timer configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the processing queue.
    #[must_use]
    pub fn queue(mut self, queue: Arc<ProcessingQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the feature flag gate.
    #[must_use]
    pub fn flags(mut self, flags: Arc<FeatureFlags>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Set the external inventory service.
    #[must_use]
    pub fn inventory(mut self, inventory: Arc<dyn InventoryService>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Set the audit sink.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Set the monitor store.
    #[must_use]
    pub fn monitors(mut self, monitors: Arc<dyn MonitorStore>) -> Self {
        self.monitors = Some(monitors);
        self
    }

    /// Set the event store.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the circuit breaker shared with the event processor.
    #[must_use]
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Set the rate limiter shared with the intake boundary.
    #[must_use]
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<Orchestrator, GatewayError> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T, GatewayError> {
            value.ok_or_else(|| GatewayError::Configuration(format!("{name} is required")))
        }

        Ok(Orchestrator {
            queue: required(self.queue, "queue")?,
            flags: required(self.flags, "flags")?,
            inventory: required(self.inventory, "inventory")?,
            audit: required(self.audit, "audit")?,
            monitors: required(self.monitors, "monitors")?,
            events: required(self.events, "events")?,
            breaker: required(self.breaker, "breaker")?,
            limiter: required(self.limiter, "limiter")?,
            config: self.config,
            running: Mutex::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering as AtomicOrdering;

    use feedgate_core::{EventKind, InboundEvent};
    use feedgate_state::ConfigStore;
    use feedgate_state_memory::MemoryStore;

    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::flags::{FeatureFlagsConfig, FlagValue};
    use crate::queue::QueueConfig;
    use crate::ratelimit::RateLimiterConfig;
    use crate::test_support::{FlakyAuditSink, NoopProcessor, StubInventory};

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        flags: Arc<FeatureFlags>,
        audit: Arc<FlakyAuditSink>,
        inventory: Arc<StubInventory>,
        orchestrator: Arc<Orchestrator>,
    }

    fn fixture_with(config: OrchestratorConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let flags = Arc::new(FeatureFlags::new(
            Arc::clone(&store) as _,
            FeatureFlagsConfig::default(),
        ));
        let audit = Arc::new(FlakyAuditSink::new());
        let inventory = Arc::new(StubInventory::new(4));
        let queue = Arc::new(ProcessingQueue::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::new(NoopProcessor),
            QueueConfig::default(),
        ));
        let orchestrator = Arc::new(
            Orchestrator::builder()
                .config(config)
                .queue(queue)
                .flags(Arc::clone(&flags))
                .inventory(Arc::clone(&inventory) as _)
                .audit(Arc::clone(&audit) as _)
                .monitors(Arc::clone(&store) as _)
                .events(Arc::clone(&store) as _)
                .breaker(Arc::new(CircuitBreaker::new(
                    "catalog",
                    CircuitBreakerConfig::default(),
                )))
                .limiter(Arc::new(RateLimiter::new(RateLimiterConfig::default())))
                .build()
                .unwrap(),
        );
        Fixture {
            store,
            flags,
            audit,
            inventory,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(OrchestratorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let f = fixture();

        f.orchestrator.start().await.unwrap();
        assert!(f.orchestrator.is_running());
        // Second start is a no-op, not an error.
        f.orchestrator.start().await.unwrap();
        assert_eq!(f.audit.inner.by_event_type("system_started").len(), 1);

        f.orchestrator.stop().await;
        assert!(!f.orchestrator.is_running());
        f.orchestrator.stop().await;
        assert_eq!(f.audit.inner.by_event_type("system_stopped").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_seeds_flag_defaults_without_overwriting() {
        let f = fixture();
        // An operator value exists before start.
        f.store
            .put("log_retention_days", "14", None)
            .await
            .unwrap();

        f.orchestrator.start().await.unwrap();
        f.orchestrator.stop().await;

        let row = f.store.get("stock_updates_enabled").await.unwrap().unwrap();
        assert_eq!(row.value, "false", "security flag seeds disabled");
        let row = f.store.get("log_retention_days").await.unwrap().unwrap();
        assert_eq!(row.value, "14", "seeding never overwrites");
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_rolls_back_and_propagates() {
        let f = fixture();
        f.audit.fail_log.store(true, AtomicOrdering::SeqCst);

        let err = f.orchestrator.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::Audit(_)));
        assert!(!f.orchestrator.is_running());
        assert!(f.orchestrator.tasks.lock().is_empty(), "timers rolled back");
    }

    #[tokio::test(start_paused = true)]
    async fn housekeeping_timer_sweeps_reservations() {
        let f = fixture_with(OrchestratorConfig {
            health_check_interval: Duration::from_secs(3600),
            housekeeping_interval: Duration::from_secs(1),
        });

        f.orchestrator.start().await.unwrap();
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        f.orchestrator.stop().await;

        assert!(
            f.inventory.sweeps.load(AtomicOrdering::SeqCst) >= 2,
            "reservation cleanup runs on its timer"
        );
    }

    #[tokio::test]
    async fn enable_monitoring_refused_when_capability_disabled() {
        let f = fixture();
        f.flags
            .set(FlagKey::StockMonitoringEnabled, FlagValue::Bool(false))
            .await
            .unwrap();

        let change = f
            .orchestrator
            .enable_product_monitoring(
                &EntityId::new("prod-1"),
                MonitorRequest {
                    kind: MonitorKind::Stock,
                    external_ref: None,
                },
            )
            .await
            .unwrap();

        assert!(!change.success);
        assert!(change.reason.is_some());
        // No "enabled" audit event and no stored monitor.
        assert!(f.audit.inner.by_event_type("monitoring_enabled").is_empty());
        assert!(
            f.store
                .get_monitor(&EntityId::new("prod-1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn enable_monitoring_persists_and_audits() {
        let f = fixture();
        let change = f
            .orchestrator
            .enable_product_monitoring(
                &EntityId::new("prod-1"),
                MonitorRequest {
                    kind: MonitorKind::Price,
                    external_ref: Some("mk-listing-9".into()),
                },
            )
            .await
            .unwrap();

        assert!(change.success);
        let monitor = f
            .store
            .get_monitor(&EntityId::new("prod-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(monitor.enabled);
        assert_eq!(monitor.kind, MonitorKind::Price);
        assert_eq!(monitor.external_ref.as_deref(), Some("mk-listing-9"));
        assert_eq!(f.audit.inner.by_event_type("monitoring_enabled").len(), 1);
    }

    #[tokio::test]
    async fn disable_monitoring_records_previous_config() {
        let f = fixture();
        let entity = EntityId::new("prod-1");
        f.orchestrator
            .enable_product_monitoring(
                &entity,
                MonitorRequest {
                    kind: MonitorKind::Price,
                    external_ref: None,
                },
            )
            .await
            .unwrap();

        let change = f
            .orchestrator
            .disable_product_monitoring(&entity)
            .await
            .unwrap();
        assert!(change.success);

        let monitor = f.store.get_monitor(&entity).await.unwrap().unwrap();
        assert!(!monitor.enabled);

        let events = f.audit.inner.by_event_type("monitoring_disabled");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata["previous"]["kind"], "price");
    }

    #[tokio::test]
    async fn disable_unknown_monitor_is_refused() {
        let f = fixture();
        let change = f
            .orchestrator
            .disable_product_monitoring(&EntityId::new("ghost"))
            .await
            .unwrap();
        assert!(!change.success);
        assert!(f.audit.inner.by_event_type("monitoring_disabled").is_empty());
    }

    #[tokio::test]
    async fn maintenance_reports_summary() {
        let f = fixture();
        let report = f.orchestrator.perform_maintenance().await.unwrap();

        assert_eq!(report.reservations_released, 4);
        assert_eq!(f.inventory.sweeps.load(AtomicOrdering::SeqCst), 1);

        let summaries = f.audit.inner.by_event_type("maintenance_completed");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].metadata["reservations_released"], 4);
    }

    #[tokio::test]
    async fn maintenance_failure_audits_critical_and_propagates() {
        let f = fixture();
        f.audit.fail_cleanup.store(true, AtomicOrdering::SeqCst);

        let err = f.orchestrator.perform_maintenance().await.unwrap_err();
        assert!(matches!(err, GatewayError::Audit(_)));

        let failures = f.audit.inner.by_event_type("maintenance_failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].severity, Severity::Critical);
        assert!(f.audit.inner.by_event_type("maintenance_completed").is_empty());
    }

    #[tokio::test]
    async fn health_check_degrades_per_component() {
        let f = fixture();
        let report = f.orchestrator.perform_health_check().await;
        assert!(report.healthy);

        f.audit.fail_metrics.store(true, AtomicOrdering::SeqCst);
        let report = f.orchestrator.perform_health_check().await;
        assert!(!report.healthy);
        assert!(!report.audit_sink.healthy);
        assert!(report.store.healthy);
        assert!(report.queue.healthy);

        let failures = f.audit.inner.by_event_type("health_check_failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn system_status_aggregates_sections() {
        let f = fixture();
        let status = f.orchestrator.get_system_status().await;

        assert!(!status.running);
        assert!(status.queue.ok().is_some());
        assert!(status.events.ok().is_some());
        assert_eq!(status.monitoring.ok().unwrap().enabled_monitors, 0);
        assert!(!status.settings.stock_updates_enabled);
        assert_eq!(status.circuit_breaker.name, "catalog");
    }

    #[tokio::test]
    async fn process_queue_once_drains_one_item() {
        let f = fixture();
        f.store
            .insert_event(InboundEvent::new(
                "evt-1",
                EventKind::PriceChange,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        f.orchestrator
            .queue
            .enqueue("evt-1", 0, None)
            .await
            .unwrap();

        assert!(f.orchestrator.process_queue_once().await.unwrap());
        assert!(!f.orchestrator.process_queue_once().await.unwrap());
    }

    #[tokio::test]
    async fn builder_requires_every_collaborator() {
        let err = Orchestrator::builder().build().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
