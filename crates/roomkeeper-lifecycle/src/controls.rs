//! Interactive deletion controls.
//!
//! Each managed room gets one [`DeletionWorkflow`] on an in-process board.
//! Button presses arrive as [`ControlEvent`]s; the board decides the
//! transition and this module performs the side effects: re-rendering the
//! control message, telling a non-owner they may not delete, and tearing the
//! room down on confirmation.
//!
//! The board is not persisted. After a restart the first press on an old
//! control message rebuilds the workflow from the registry record.
//!
//! Rooms the reconciliation loop deregisters leave the board through
//! [`DeletionControls::forget`]. A room evicted while its owner was being
//! asked to confirm keeps a tombstone until the confirmation deadline, so
//! a late Confirm is answered as a completed deletion.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use roomkeeper_core::provider::VoiceProvider;
use roomkeeper_core::surface::{ControlSurface, ControlView, Notice};
use roomkeeper_core::workflow::{
    DEFAULT_CONFIRM_TIMEOUT, DeletionWorkflow, Transition, WorkflowAction, WorkflowState,
};
use roomkeeper_core::{MessageRef, ResourceId, ResourceRecord, RoomState, UserId};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::metrics::LifecycleMetrics;
use crate::reconcile::DEFAULT_ADAPTER_TIMEOUT;
use crate::registry::RegistryStore;
use crate::teardown::{self, REASON_USER};

/// A button press on a control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub resource_id: ResourceId,
    pub action: WorkflowAction,
    pub invoker: UserId,
    /// The message the button belongs to, when the surface reports it.
    #[serde(default)]
    pub message: Option<MessageRef>,
}

/// What handling a [`ControlEvent`] amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    Prompted,
    Denied,
    Deleted,
    Reverted,
    Ignored,
    /// The room is not (or no longer) in the registry.
    NotManaged,
    /// Teardown failed; the record and the controls were restored.
    DeleteFailed,
}

struct Slot {
    workflow: DeletionWorkflow,
    message: Option<MessageRef>,
    /// The record is gone; the slot lives on only to answer a late Confirm.
    deregistered: bool,
}

impl Slot {
    fn new(workflow: DeletionWorkflow, message: Option<MessageRef>) -> Self {
        Self {
            workflow,
            message,
            deregistered: false,
        }
    }

    fn is_confirming(&self) -> bool {
        self.confirming_until().is_some()
    }

    fn confirming_until(&self) -> Option<DateTime<Utc>> {
        match self.workflow.state() {
            WorkflowState::ConfirmingDeletion { deadline } => Some(deadline),
            _ => None,
        }
    }
}

pub struct DeletionControls {
    registry: Arc<RegistryStore>,
    provider: Arc<dyn VoiceProvider>,
    surface: Arc<dyn ControlSurface>,
    metrics: Arc<LifecycleMetrics>,
    confirm_timeout: chrono::Duration,
    adapter_timeout: Duration,
    board: Mutex<HashMap<ResourceId, Slot>>,
}

impl DeletionControls {
    pub fn new(
        registry: Arc<RegistryStore>,
        provider: Arc<dyn VoiceProvider>,
        surface: Arc<dyn ControlSurface>,
        metrics: Arc<LifecycleMetrics>,
    ) -> Self {
        Self {
            registry,
            provider,
            surface,
            metrics,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            board: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeouts(
        mut self,
        confirm_timeout: chrono::Duration,
        adapter_timeout: Duration,
    ) -> Self {
        self.confirm_timeout = confirm_timeout;
        self.adapter_timeout = adapter_timeout;
        self
    }

    fn board(&self) -> MutexGuard<'_, HashMap<ResourceId, Slot>> {
        self.board.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put fresh controls on the board for a newly created room.
    pub fn attach(&self, id: ResourceId, owner: UserId, message: Option<MessageRef>) {
        self.board().insert(
            id,
            Slot::new(DeletionWorkflow::new(Some(owner), self.confirm_timeout), message),
        );
    }

    /// Drop the controls of rooms deregistered outside this module. A slot
    /// with a confirmation still open becomes a tombstone instead.
    pub fn forget(&self, ids: &HashSet<ResourceId>) {
        let mut board = self.board();
        for id in ids {
            let confirming = board.get(id).is_some_and(Slot::is_confirming);
            if confirming {
                if let Some(slot) = board.get_mut(id) {
                    slot.deregistered = true;
                }
            } else {
                board.remove(id);
            }
        }
    }

    /// Number of rooms with controls on the board.
    pub fn active(&self) -> usize {
        self.board().len()
    }

    pub async fn handle(
        &self,
        event: ControlEvent,
        now: DateTime<Utc>,
    ) -> Result<ControlOutcome, LifecycleError> {
        let id = event.resource_id;

        let Some(record) = self.registry.get(id).await else {
            return Ok(self.handle_unregistered(event, now).await);
        };

        let (transition, message, owner) = {
            let mut board = self.board();
            let slot = board.entry(id).or_insert_with(|| {
                Slot::new(
                    DeletionWorkflow::new(record.owner_id, self.confirm_timeout),
                    record.status_message,
                )
            });
            if slot.message.is_none() {
                slot.message = event.message;
            }
            let transition = slot.workflow.apply(event.action, event.invoker, now);
            (transition, slot.message, slot.workflow.owner())
        };

        tracing::debug!(
            resource_id = %id,
            invoker = %event.invoker,
            action = ?event.action,
            ?transition,
            "Control event applied"
        );

        match transition {
            Transition::PromptConfirmation => {
                let notice = Notice::ConfirmDeletion { resource_id: id };
                self.render(message, &notice, ControlView::Confirming).await;
                Ok(ControlOutcome::Prompted)
            }
            Transition::Denied => {
                tracing::info!(resource_id = %id, invoker = %event.invoker, "Non-owner denied");
                self.tell(event.invoker, &Notice::NotOwner { resource_id: id })
                    .await;
                Ok(ControlOutcome::Denied)
            }
            Transition::Reverted => {
                self.render(
                    message,
                    &Notice::ManagingRoom {
                        resource_id: id,
                        owner_id: owner,
                    },
                    ControlView::Managing,
                )
                .await;
                Ok(ControlOutcome::Reverted)
            }
            Transition::Teardown => self.teardown(record, message, event.invoker).await,
            Transition::Ignored => Ok(ControlOutcome::Ignored),
        }
    }

    /// A press for a room that is not in the registry. The owner confirming
    /// a deletion the loop already carried out gets the deletion they asked
    /// for; anything else is told the room is not managed.
    async fn handle_unregistered(
        &self,
        event: ControlEvent,
        now: DateTime<Utc>,
    ) -> ControlOutcome {
        let id = event.resource_id;
        let (transition, message, tombstone) = {
            let mut board = self.board();
            match board.get_mut(&id) {
                Some(slot) => {
                    let transition = slot.workflow.apply(event.action, event.invoker, now);
                    (Some(transition), slot.message.or(event.message), slot.deregistered)
                }
                None => (None, event.message, false),
            }
        };

        match transition {
            Some(Transition::Teardown) => {
                self.board().remove(&id);
                tracing::info!(resource_id = %id, "Confirmed deletion of a room already evicted");
                let notice = Notice::RoomDeleted { resource_id: id };
                self.render(message, &notice, ControlView::Retired).await;
                ControlOutcome::Deleted
            }
            Some(Transition::Denied) if tombstone => {
                self.tell(event.invoker, &Notice::NotOwner { resource_id: id })
                    .await;
                ControlOutcome::Denied
            }
            _ => {
                self.board().remove(&id);
                tracing::debug!(
                    resource_id = %id,
                    invoker = %event.invoker,
                    "Control pressed for unmanaged room"
                );
                self.tell(event.invoker, &Notice::RoomNotManaged { resource_id: id })
                    .await;
                ControlOutcome::NotManaged
            }
        }
    }

    async fn teardown(
        &self,
        record: ResourceRecord,
        message: Option<MessageRef>,
        invoker: UserId,
    ) -> Result<ControlOutcome, LifecycleError> {
        let id = record.resource_id;

        if let Err(e) = self.registry.remove(id).await {
            self.restore(id, message, invoker, &e.to_string()).await;
            return Err(e);
        }

        let deleted =
            teardown::delete_live(self.provider.as_ref(), id, REASON_USER, self.adapter_timeout)
                .await;
        let failure = match deleted {
            Ok(_) => None,
            Err(e) => {
                if self.confirmed_gone(id).await {
                    tracing::info!(resource_id = %id, error = %e, "Delete failed but the room is gone");
                    None
                } else {
                    Some(e)
                }
            }
        };

        match failure {
            None => {
                self.board().remove(&id);
                self.metrics.record_manual_deletion();
                let notice = Notice::RoomDeleted { resource_id: id };
                self.render(message, &notice, ControlView::Retired).await;
                Ok(ControlOutcome::Deleted)
            }
            Some(e) => {
                tracing::warn!(resource_id = %id, error = %e, "Manual deletion failed, restoring record");
                self.metrics.record_delete_failure();
                match self.registry.add(record).await {
                    Ok(()) | Err(LifecycleError::DuplicateResource(_)) => {}
                    Err(add_err) => {
                        tracing::error!(resource_id = %id, "Could not restore registry record: {add_err}");
                    }
                }
                self.restore(id, message, invoker, &e.to_string()).await;
                Ok(ControlOutcome::DeleteFailed)
            }
        }
    }

    /// Whether the provider positively reports the room as no longer a live
    /// voice room. An unreachable provider counts as "not confirmed".
    async fn confirmed_gone(&self, id: ResourceId) -> bool {
        let describe = self.provider.describe(id);
        let described = tokio::time::timeout(self.adapter_timeout, describe).await;
        matches!(described, Ok(Ok(RoomState::Missing | RoomState::WrongKind)))
    }

    async fn restore(
        &self,
        id: ResourceId,
        message: Option<MessageRef>,
        invoker: UserId,
        reason: &str,
    ) {
        let owner = {
            let mut board = self.board();
            board.get_mut(&id).and_then(|slot| {
                slot.workflow.reopen();
                slot.workflow.owner()
            })
        };
        self.render(
            message,
            &Notice::ManagingRoom {
                resource_id: id,
                owner_id: owner,
            },
            ControlView::Managing,
        )
        .await;
        self.tell(
            invoker,
            &Notice::DeleteFailed {
                resource_id: id,
                reason: reason.to_string(),
            },
        )
        .await;
    }

    /// Revert confirmations whose deadline has passed and re-render their
    /// messages. Returns how many were reverted.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(ResourceId, Option<MessageRef>, Option<UserId>)> = {
            let mut board = self.board();
            let expired: Vec<_> = board
                .iter_mut()
                .filter(|(_, slot)| !slot.deregistered)
                .filter_map(|(id, slot)| {
                    slot.workflow
                        .expire(now)
                        .then(|| (*id, slot.message, slot.workflow.owner()))
                })
                .collect();
            board.retain(|_, slot| {
                !slot.deregistered || slot.confirming_until().is_some_and(|deadline| now < deadline)
            });
            expired
        };

        let mut reverted = 0;
        for (id, message, owner) in expired {
            // Removed from the registry without going through `forget`.
            if self.registry.get(id).await.is_none() {
                self.board().remove(&id);
                continue;
            }
            tracing::debug!(resource_id = %id, "Deletion confirmation expired");
            self.render(
                message,
                &Notice::ManagingRoom {
                    resource_id: id,
                    owner_id: owner,
                },
                ControlView::Managing,
            )
            .await;
            reverted += 1;
        }
        reverted
    }

    async fn render(&self, message: Option<MessageRef>, notice: &Notice, view: ControlView) {
        let Some(message) = message else {
            return;
        };
        let edit = self.surface.edit(message, notice, view);
        match tokio::time::timeout(self.adapter_timeout, edit).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_status_edit_failure();
                tracing::warn!(message_id = %message.message_id, "Could not update control message: {e}");
            }
            Err(_) => {
                self.metrics.record_status_edit_failure();
                tracing::warn!(message_id = %message.message_id, "Control message update timed out");
            }
        }
    }

    async fn tell(&self, user: UserId, notice: &Notice) {
        if let Err(e) = self.surface.notify_ephemeral(user, notice).await {
            tracing::warn!(%user, "Could not send ephemeral notice: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use roomkeeper_core::provider::MemoryProvider;
    use roomkeeper_core::surface::MemorySurface;
    use roomkeeper_core::{ProviderError, SurfaceId};

    const OWNER: UserId = UserId(10);
    const STRANGER: UserId = UserId(20);
    const ROOM: ResourceId = ResourceId(500);

    struct Harness {
        registry: Arc<RegistryStore>,
        provider: Arc<MemoryProvider>,
        surface: Arc<MemorySurface>,
        metrics: Arc<LifecycleMetrics>,
        controls: DeletionControls,
        message: MessageRef,
    }

    async fn harness() -> Harness {
        let registry = Arc::new(RegistryStore::in_memory());
        let provider = Arc::new(MemoryProvider::new());
        let surface = Arc::new(MemorySurface::new());
        let metrics = Arc::new(LifecycleMetrics::new());
        let controls = DeletionControls::new(
            registry.clone(),
            provider.clone(),
            surface.clone(),
            metrics.clone(),
        );

        provider.insert_voice(ROOM, 0);
        let message = surface
            .post(
                SurfaceId(1),
                &Notice::ManagingRoom {
                    resource_id: ROOM,
                    owner_id: Some(OWNER),
                },
                ControlView::Managing,
            )
            .await
            .unwrap();
        registry
            .add(ResourceRecord::new(ROOM, OWNER, Some(message)))
            .await
            .unwrap();
        controls.attach(ROOM, OWNER, Some(message));

        Harness {
            registry,
            provider,
            surface,
            metrics,
            controls,
            message,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 2, 20, 0, 0).unwrap()
    }

    fn press(action: WorkflowAction, invoker: UserId) -> ControlEvent {
        ControlEvent {
            resource_id: ROOM,
            action,
            invoker,
            message: None,
        }
    }

    #[tokio::test]
    async fn owner_confirms_deletion() {
        let h = harness().await;

        let outcome = h
            .controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Prompted);
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Confirming);

        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Deleted);
        assert!(h.registry.get(ROOM).await.is_none());
        assert!(!h.provider.exists(ROOM));
        assert_eq!(h.provider.delete_calls()[0].reason, "user requested");

        let rendered = h.surface.message(h.message).unwrap();
        assert_eq!(rendered.view, ControlView::Retired);
        assert_eq!(rendered.notice, Notice::RoomDeleted { resource_id: ROOM });
        assert_eq!(h.controls.active(), 0);
        assert_eq!(h.metrics.snapshot().manual_deletions, 1);
    }

    #[tokio::test]
    async fn stranger_is_denied_without_side_effects() {
        let h = harness().await;

        let outcome = h
            .controls
            .handle(press(WorkflowAction::RequestDelete, STRANGER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Denied);
        assert!(h.provider.delete_calls().is_empty());
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Managing);
        assert_eq!(
            h.surface.ephemeral_notices(),
            vec![(STRANGER, Notice::NotOwner { resource_id: ROOM })]
        );
    }

    #[tokio::test]
    async fn stranger_cannot_confirm_owner_prompt() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();

        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, STRANGER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Denied);
        assert!(h.registry.get(ROOM).await.is_some());
        assert!(h.provider.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_rerenders_managing_for_owner() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Cancel, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Reverted);

        let rendered = h.surface.message(h.message).unwrap();
        assert_eq!(rendered.view, ControlView::Managing);
        assert_eq!(
            rendered.notice,
            Notice::ManagingRoom {
                resource_id: ROOM,
                owner_id: Some(OWNER)
            }
        );
    }

    #[tokio::test]
    async fn expired_confirmation_reverts() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();

        assert_eq!(h.controls.expire_due(t0() + chrono::Duration::seconds(59)).await, 0);
        assert_eq!(h.controls.expire_due(t0() + chrono::Duration::seconds(60)).await, 1);
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Managing);

        let outcome = h
            .controls
            .handle(
                press(WorkflowAction::Confirm, OWNER),
                t0() + chrono::Duration::seconds(61),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Ignored);
        assert!(h.registry.get(ROOM).await.is_some());
    }

    #[tokio::test]
    async fn failed_teardown_restores_record_and_controls() {
        let h = harness().await;
        h.provider
            .fail_delete(ROOM, Some(ProviderError::Forbidden("missing permission".into())));

        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::DeleteFailed);
        assert!(h.registry.get(ROOM).await.is_some());
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Managing);
        assert!(matches!(
            h.surface.ephemeral_notices().last(),
            Some((OWNER, Notice::DeleteFailed { .. }))
        ));

        // The owner can try again.
        h.provider.fail_delete(ROOM, None);
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Deleted);
    }

    #[tokio::test]
    async fn room_already_gone_counts_as_deleted() {
        let h = harness().await;
        h.provider.vanish(ROOM);
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Deleted);
        assert!(h.registry.get(ROOM).await.is_none());
    }

    #[tokio::test]
    async fn unregistered_room_is_not_managed() {
        let h = harness().await;
        h.registry.remove(ROOM).await.unwrap();

        let outcome = h
            .controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::NotManaged);
        assert_eq!(h.controls.active(), 0);
        assert!(h.provider.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn workflow_is_rebuilt_from_registry_after_restart() {
        let h = harness().await;
        let fresh = DeletionControls::new(
            h.registry.clone(),
            h.provider.clone(),
            h.surface.clone(),
            h.metrics.clone(),
        );

        let outcome = fresh
            .handle(press(WorkflowAction::RequestDelete, STRANGER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Denied);

        let outcome = fresh
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Prompted);
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Confirming);
    }

    #[tokio::test]
    async fn legacy_record_without_owner_cannot_be_deleted_manually() {
        let h = harness().await;
        h.registry.remove(ROOM).await.unwrap();
        let legacy: ResourceRecord = serde_json::from_value(serde_json::json!(ROOM.0)).unwrap();
        h.registry.add(legacy).await.unwrap();
        let fresh = DeletionControls::new(
            h.registry.clone(),
            h.provider.clone(),
            h.surface.clone(),
            h.metrics.clone(),
        );

        let outcome = fresh
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Denied);
        assert!(h.provider.delete_calls().is_empty());
    }

    /// What the loop does on eviction: retire the message, drop the record,
    /// then tell the board.
    async fn evict(h: &Harness) {
        h.surface
            .edit(
                h.message,
                &Notice::RoomAutoDeleted {
                    resource_id: ROOM,
                    idle_minutes: 10,
                },
                ControlView::Retired,
            )
            .await
            .unwrap();
        h.provider.vanish(ROOM);
        h.registry.remove(ROOM).await.unwrap();
        h.controls.forget(&HashSet::from([ROOM]));
    }

    #[tokio::test]
    async fn forget_drops_idle_controls() {
        let h = harness().await;
        evict(&h).await;
        assert_eq!(h.controls.active(), 0);
    }

    #[tokio::test]
    async fn late_confirm_after_eviction_is_a_deletion() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        evict(&h).await;
        assert_eq!(h.controls.active(), 1);

        let outcome = h
            .controls
            .handle(
                press(WorkflowAction::Confirm, OWNER),
                t0() + chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Deleted);
        let rendered = h.surface.message(h.message).unwrap();
        assert_eq!(rendered.view, ControlView::Retired);
        assert_eq!(rendered.notice, Notice::RoomDeleted { resource_id: ROOM });
        assert!(h.surface.ephemeral_notices().is_empty());
        assert_eq!(h.controls.active(), 0);
        assert!(h.provider.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn stranger_confirm_after_eviction_keeps_owner_tombstone() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        evict(&h).await;

        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, STRANGER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Denied);
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Deleted);
    }

    #[tokio::test]
    async fn expiry_after_eviction_leaves_controls_retired() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        evict(&h).await;

        let reverted = h
            .controls
            .expire_due(t0() + chrono::Duration::seconds(60))
            .await;
        assert_eq!(reverted, 0);
        assert_eq!(h.controls.active(), 0);
        let rendered = h.surface.message(h.message).unwrap();
        assert_eq!(rendered.view, ControlView::Retired);
        assert!(matches!(rendered.notice, Notice::RoomAutoDeleted { .. }));

        let outcome = h
            .controls
            .handle(
                press(WorkflowAction::Confirm, OWNER),
                t0() + chrono::Duration::seconds(61),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::NotManaged);
    }

    #[tokio::test]
    async fn expiry_skips_rooms_removed_behind_the_boards_back() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        h.registry.remove(ROOM).await.unwrap();

        let reverted = h
            .controls
            .expire_due(t0() + chrono::Duration::seconds(60))
            .await;
        assert_eq!(reverted, 0);
        assert_eq!(h.controls.active(), 0);
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Confirming);
    }

    #[tokio::test]
    async fn failed_delete_of_vanished_room_is_not_restored() {
        let h = harness().await;
        h.provider
            .fail_delete(ROOM, Some(ProviderError::Unknown("delete timed out".into())));
        h.provider.vanish(ROOM);

        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Deleted);
        assert!(h.registry.get(ROOM).await.is_none());
        assert_eq!(h.surface.message(h.message).unwrap().view, ControlView::Retired);
        assert_eq!(h.metrics.snapshot().delete_failures, 0);
    }

    #[tokio::test]
    async fn failed_delete_is_restored_when_provider_cannot_say() {
        let h = harness().await;
        h.provider
            .fail_delete(ROOM, Some(ProviderError::Unknown("delete timed out".into())));
        h.provider
            .fail_describe(ROOM, Some(ProviderError::Unknown("503".into())));

        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let outcome = h
            .controls
            .handle(press(WorkflowAction::Confirm, OWNER), t0())
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::DeleteFailed);
        assert!(h.registry.get(ROOM).await.is_some());
    }

    #[test]
    fn control_event_deserializes_without_message() {
        let event: ControlEvent = serde_json::from_str(
            r#"{"resource_id": 5, "action": "request_delete", "invoker": 9}"#,
        )
        .unwrap();
        assert_eq!(event.action, WorkflowAction::RequestDelete);
        assert_eq!(event.message, None);
    }

    #[tokio::test]
    async fn board_state_after_prompt() {
        let h = harness().await;
        h.controls
            .handle(press(WorkflowAction::RequestDelete, OWNER), t0())
            .await
            .unwrap();
        let state = h.controls.board().get(&ROOM).map(|s| s.workflow.state());
        assert!(matches!(state, Some(WorkflowState::ConfirmingDeletion { .. })));
    }
}
