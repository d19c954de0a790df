//! Reconciliation loop.
//!
//! Every tick reads the whole registry, asks the provider about each room
//! concurrently, advances the empty timers, evicts rooms that have been empty
//! for the idle threshold, and applies every deregistration in one batched
//! write. A failure on one room is logged and never affects the others.
//!
//! # Graceful Shutdown
//!
//! The loop exits when its cancellation token fires. A tick that is already
//! running completes, including its registry write, before the loop exits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use roomkeeper_core::provider::VoiceProvider;
use roomkeeper_core::surface::{ControlSurface, ControlView, Notice};
use roomkeeper_core::tracker::{EmptyTimers, Idleness, DEFAULT_IDLE_THRESHOLD};
use roomkeeper_core::{ProviderError, ResourceId, ResourceRecord, RoomState};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::controls::DeletionControls;
use crate::metrics::LifecycleMetrics;
use crate::registry::RegistryStore;
use crate::teardown::{self, REASON_IDLE, TeardownOutcome};

/// Default tick interval (1 minute).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on a single provider or surface call.
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub tick_interval: Duration,
    pub idle_threshold: chrono::Duration,
    pub adapter_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }
}

/// What one tick did. Id lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    /// Records still registered after the tick.
    pub kept: usize,
    pub evicted_idle: Vec<ResourceId>,
    pub pruned_missing: Vec<ResourceId>,
    pub pruned_wrong_kind: Vec<ResourceId>,
    /// Records whose describe or delete failed; retried next tick.
    pub failed: Vec<ResourceId>,
}

struct Eviction {
    id: ResourceId,
    status_edit_failed: bool,
    result: Result<TeardownOutcome, ProviderError>,
}

pub struct Reconciler {
    registry: Arc<RegistryStore>,
    provider: Arc<dyn VoiceProvider>,
    surface: Arc<dyn ControlSurface>,
    metrics: Arc<LifecycleMetrics>,
    settings: ReconcileSettings,
    timers: EmptyTimers,
    controls: Option<Arc<DeletionControls>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<RegistryStore>,
        provider: Arc<dyn VoiceProvider>,
        surface: Arc<dyn ControlSurface>,
        metrics: Arc<LifecycleMetrics>,
        settings: ReconcileSettings,
    ) -> Self {
        let timers = EmptyTimers::new(settings.idle_threshold);
        Self {
            registry,
            provider,
            surface,
            metrics,
            settings,
            timers,
            controls: None,
        }
    }

    /// Retire the deletion controls of every room this loop deregisters.
    pub fn with_controls(mut self, controls: Arc<DeletionControls>) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn timers(&self) -> &EmptyTimers {
        &self.timers
    }

    /// Wait for `ready`, then tick every `tick_interval` until `shutdown`.
    pub async fn run(mut self, mut ready: watch::Receiver<bool>, shutdown: CancellationToken) {
        tracing::info!(
            provider = self.provider.provider_name(),
            tick_interval_secs = self.settings.tick_interval.as_secs(),
            idle_threshold_secs = self.settings.idle_threshold.num_seconds(),
            "Reconciliation loop waiting for provider readiness"
        );

        let became_ready = tokio::select! {
            r = ready.wait_for(|is_ready| *is_ready) => r.is_ok(),
            _ = shutdown.cancelled() => false,
        };
        if !became_ready {
            tracing::info!("Reconciliation loop stopped before provider became ready");
            return;
        }

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if report.examined > 0 {
                        tracing::info!(
                            examined = report.examined,
                            kept = report.kept,
                            evicted_idle = report.evicted_idle.len(),
                            pruned = report.pruned_missing.len() + report.pruned_wrong_kind.len(),
                            failed = report.failed.len(),
                            "Reconciliation tick complete"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Reconciliation loop received shutdown signal, exiting");
                    break;
                }
            }
        }
    }

    /// Run a single reconciliation pass as of `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let records = self.registry.list().await;
        let registered: HashSet<ResourceId> = records.iter().map(|r| r.resource_id).collect();
        self.timers.retain_registered(&registered);
        self.metrics.record_tick(records.len());

        let mut report = TickReport {
            examined: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return report;
        }

        let mut removals = HashSet::new();
        let mut idle = Vec::new();

        for (record, result) in self.describe_all(records).await {
            let id = record.resource_id;
            match result {
                Ok(RoomState::Missing) => {
                    tracing::info!(resource_id = %id, "Room no longer exists, deregistering");
                    removals.insert(id);
                    report.pruned_missing.push(id);
                }
                Ok(RoomState::WrongKind) => {
                    tracing::warn!(resource_id = %id, "Record points at a non-voice resource, deregistering");
                    removals.insert(id);
                    report.pruned_wrong_kind.push(id);
                }
                Ok(RoomState::Voice { occupants }) => {
                    match self.timers.observe(id, occupants, now) {
                        Idleness::Occupied => {}
                        Idleness::EmptySince(since) => {
                            tracing::debug!(resource_id = %id, %since, "Room empty");
                        }
                        Idleness::Idle(since) => idle.push((record, since)),
                    }
                }
                Err(e) => {
                    tracing::warn!(resource_id = %id, error = %e, "Describe failed, will retry next tick");
                    self.metrics.record_describe_failure();
                    report.failed.push(id);
                }
            }
        }

        for eviction in self.evict_all(idle, now).await {
            if eviction.status_edit_failed {
                self.metrics.record_status_edit_failure();
            }
            match eviction.result {
                Ok(_) => {
                    removals.insert(eviction.id);
                    report.evicted_idle.push(eviction.id);
                }
                Err(e) => {
                    tracing::warn!(
                        resource_id = %eviction.id,
                        error = %e,
                        "Idle eviction failed, will retry next tick"
                    );
                    self.metrics.record_delete_failure();
                    report.failed.push(eviction.id);
                }
            }
        }

        for id in &removals {
            self.timers.purge(*id);
        }

        match self.registry.remove_many(&removals).await {
            Ok(_) => {
                if let Some(controls) = &self.controls {
                    controls.forget(&removals);
                }
            }
            Err(e) => {
                tracing::error!(count = removals.len(), "Failed to write registry after tick: {e}");
            }
        }

        self.metrics.record_evicted_idle(report.evicted_idle.len() as u64);
        self.metrics.record_pruned_missing(report.pruned_missing.len() as u64);
        self.metrics.record_pruned_wrong_kind(report.pruned_wrong_kind.len() as u64);

        report.kept = report.examined - removals.len();
        report.evicted_idle.sort();
        report.pruned_missing.sort();
        report.pruned_wrong_kind.sort();
        report.failed.sort();
        report
    }

    async fn describe_all(
        &self,
        records: Vec<ResourceRecord>,
    ) -> Vec<(ResourceRecord, Result<RoomState, ProviderError>)> {
        let mut tasks = JoinSet::new();
        for record in records {
            let provider = Arc::clone(&self.provider);
            let timeout = self.settings.adapter_timeout;
            tasks.spawn(async move {
                let describe = provider.describe(record.resource_id);
                let result = match tokio::time::timeout(timeout, describe).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Unknown(format!(
                        "describe timed out after {}s",
                        timeout.as_secs()
                    ))),
                };
                (record, result)
            });
        }

        let mut observations = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(observation) => observations.push(observation),
                Err(e) => tracing::error!("Describe task aborted: {e}"),
            }
        }
        observations
    }

    async fn evict_all(
        &self,
        idle: Vec<(ResourceRecord, DateTime<Utc>)>,
        now: DateTime<Utc>,
    ) -> Vec<Eviction> {
        let mut tasks = JoinSet::new();
        for (record, since) in idle {
            let provider = Arc::clone(&self.provider);
            let surface = Arc::clone(&self.surface);
            let timeout = self.settings.adapter_timeout;
            let idle_minutes = (now - since).num_minutes();
            tasks.spawn(async move {
                let id = record.resource_id;
                tracing::info!(resource_id = %id, idle_minutes, "Evicting idle room");

                let mut status_edit_failed = false;
                if let Some(message) = record.status_message {
                    let notice = Notice::RoomAutoDeleted {
                        resource_id: id,
                        idle_minutes,
                    };
                    let edit = surface.edit(message, &notice, ControlView::Retired);
                    let outcome = match tokio::time::timeout(timeout, edit).await {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => Err("timed out".to_string()),
                    };
                    if let Err(e) = outcome {
                        tracing::warn!(
                            resource_id = %id,
                            message_id = %message.message_id,
                            "Could not update status message: {e}"
                        );
                        status_edit_failed = true;
                    }
                }

                let result =
                    teardown::delete_live(provider.as_ref(), id, REASON_IDLE, timeout).await;
                Eviction {
                    id,
                    status_edit_failed,
                    result,
                }
            });
        }

        let mut evictions = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(eviction) => evictions.push(eviction),
                Err(e) => tracing::error!("Eviction task aborted: {e}"),
            }
        }
        evictions
    }
}
