use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
    fn record_gauge(&self, name: &str, value: f64);
}

/// Atomic counters for the reconciliation loop and the deletion controls.
pub struct LifecycleMetrics {
    pub ticks: AtomicU64,
    pub evicted_idle: AtomicU64,
    pub pruned_missing: AtomicU64,
    pub pruned_wrong_kind: AtomicU64,
    pub describe_failures: AtomicU64,
    pub delete_failures: AtomicU64,
    pub status_edit_failures: AtomicU64,
    pub manual_deletions: AtomicU64,
    pub rooms_created: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for LifecycleMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            evicted_idle: AtomicU64::new(0),
            pruned_missing: AtomicU64::new(0),
            pruned_wrong_kind: AtomicU64::new(0),
            describe_failures: AtomicU64::new(0),
            delete_failures: AtomicU64::new(0),
            status_edit_failures: AtomicU64::new(0),
            manual_deletions: AtomicU64::new(0),
            rooms_created: AtomicU64::new(0),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str, by: u64) {
        if by == 0 {
            return;
        }
        let val = counter.fetch_add(by, Ordering::Relaxed) + by;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn record_tick(&self, registered: usize) {
        self.bump(&self.ticks, "roomkeeper.reconcile.ticks", 1);
        if let Some(backend) = &self.backend {
            backend.record_gauge("roomkeeper.registry.rooms", registered as f64);
        }
    }

    pub fn record_evicted_idle(&self, count: u64) {
        self.bump(&self.evicted_idle, "roomkeeper.reconcile.evicted_idle", count);
    }

    pub fn record_pruned_missing(&self, count: u64) {
        self.bump(&self.pruned_missing, "roomkeeper.reconcile.pruned_missing", count);
    }

    pub fn record_pruned_wrong_kind(&self, count: u64) {
        self.bump(
            &self.pruned_wrong_kind,
            "roomkeeper.reconcile.pruned_wrong_kind",
            count,
        );
    }

    pub fn record_describe_failure(&self) {
        self.bump(&self.describe_failures, "roomkeeper.provider.describe_failures", 1);
    }

    pub fn record_delete_failure(&self) {
        self.bump(&self.delete_failures, "roomkeeper.provider.delete_failures", 1);
    }

    pub fn record_status_edit_failure(&self) {
        self.bump(
            &self.status_edit_failures,
            "roomkeeper.surface.status_edit_failures",
            1,
        );
    }

    pub fn record_manual_deletion(&self) {
        self.bump(&self.manual_deletions, "roomkeeper.controls.manual_deletions", 1);
    }

    pub fn record_room_created(&self) {
        self.bump(&self.rooms_created, "roomkeeper.commands.rooms_created", 1);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            evicted_idle: self.evicted_idle.load(Ordering::Relaxed),
            pruned_missing: self.pruned_missing.load(Ordering::Relaxed),
            pruned_wrong_kind: self.pruned_wrong_kind.load(Ordering::Relaxed),
            describe_failures: self.describe_failures.load(Ordering::Relaxed),
            delete_failures: self.delete_failures.load(Ordering::Relaxed),
            status_edit_failures: self.status_edit_failures.load(Ordering::Relaxed),
            manual_deletions: self.manual_deletions.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of lifecycle metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub evicted_idle: u64,
    pub pruned_missing: u64,
    pub pruned_wrong_kind: u64,
    pub describe_failures: u64,
    pub delete_failures: u64,
    pub status_edit_failures: u64,
    pub manual_deletions: u64,
    pub rooms_created: u64,
}

/// Logging-based metrics backend. Emits metrics as structured log events.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(metric = name, value = value, kind = "counter", "metric");
    }

    fn record_gauge(&self, name: &str, value: f64) {
        tracing::debug!(metric = name, value = value, kind = "gauge", "metric");
    }
}
