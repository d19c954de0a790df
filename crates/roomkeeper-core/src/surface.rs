use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;
use crate::record::{MessageId, MessageRef, ResourceId, RoomSpec, SurfaceId, UserId};

/// Which interactive controls a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlView {
    /// A single "delete room" button.
    Managing,
    /// "Confirm" and "Cancel" buttons.
    Confirming,
    /// No controls; the message is final.
    Retired,
}

/// Something the user should be told. Rendering and wording belong to the
/// surface implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    RoomCreated { resource_id: ResourceId, spec: RoomSpec },
    /// Plain management controls after a cancelled or expired confirmation.
    ManagingRoom { resource_id: ResourceId, owner_id: Option<UserId> },
    ConfirmDeletion { resource_id: ResourceId },
    RoomDeleted { resource_id: ResourceId },
    RoomAutoDeleted { resource_id: ResourceId, idle_minutes: i64 },
    NotOwner { resource_id: ResourceId },
    DeleteFailed { resource_id: ResourceId, reason: String },
    RoomNotManaged { resource_id: ResourceId },
    NotPermitted,
    SurfaceNotAllowed { surface_id: SurfaceId },
    SurfaceAllowed { surface_id: SurfaceId },
    SurfaceAlreadyAllowed { surface_id: SurfaceId },
    SurfaceDisallowed { surface_id: SurfaceId },
    SurfaceNotRegistered { surface_id: SurfaceId },
    AllowedSurfaces { surfaces: Vec<SurfaceId> },
    CreateForbidden,
    CreateFailed { reason: String },
}

/// Interactive surface: posts and edits control messages and sends
/// notices only the invoking user can see.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait ControlSurface: Send + Sync {
    fn post<'a>(
        &'a self,
        surface_id: SurfaceId,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<MessageRef, SurfaceError>> + Send + 'a>>;

    fn edit<'a>(
        &'a self,
        message: MessageRef,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>>;

    fn notify_ephemeral<'a>(
        &'a self,
        user: UserId,
        notice: &'a Notice,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>>;
}

/// Surface that only emits structured log events. Used when no chat
/// gateway is configured.
pub struct LoggingSurface {
    next_message: AtomicU64,
}

impl Default for LoggingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingSurface {
    pub fn new() -> Self {
        Self {
            next_message: AtomicU64::new(1),
        }
    }
}

impl ControlSurface for LoggingSurface {
    fn post<'a>(
        &'a self,
        surface_id: SurfaceId,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<MessageRef, SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            let message_id = MessageId(self.next_message.fetch_add(1, Ordering::Relaxed));
            tracing::info!(%surface_id, %message_id, ?view, ?notice, "post");
            Ok(MessageRef {
                surface_id,
                message_id,
            })
        })
    }

    fn edit<'a>(
        &'a self,
        message: MessageRef,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                surface_id = %message.surface_id,
                message_id = %message.message_id,
                ?view,
                ?notice,
                "edit"
            );
            Ok(())
        })
    }

    fn notify_ephemeral<'a>(
        &'a self,
        user: UserId,
        notice: &'a Notice,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(%user, ?notice, "ephemeral");
            Ok(())
        })
    }
}

/// A message as last rendered by [`MemorySurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message: MessageRef,
    pub notice: Notice,
    pub view: ControlView,
}

/// In-memory surface that records everything it is asked to render.
#[derive(Default)]
pub struct MemorySurface {
    next_message: AtomicU64,
    messages: Mutex<Vec<RenderedMessage>>,
    ephemeral: Mutex<Vec<(UserId, Notice)>>,
    fail_edits: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `edit` fail with `MessageNotFound`.
    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::Relaxed);
    }

    pub fn message(&self, message: MessageRef) -> Option<RenderedMessage> {
        lock(&self.messages)
            .iter()
            .find(|m| m.message == message)
            .cloned()
    }

    pub fn messages(&self) -> Vec<RenderedMessage> {
        lock(&self.messages).clone()
    }

    pub fn ephemeral_notices(&self) -> Vec<(UserId, Notice)> {
        lock(&self.ephemeral).clone()
    }
}

impl ControlSurface for MemorySurface {
    fn post<'a>(
        &'a self,
        surface_id: SurfaceId,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<MessageRef, SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            let message = MessageRef {
                surface_id,
                message_id: MessageId(self.next_message.fetch_add(1, Ordering::Relaxed) + 1),
            };
            lock(&self.messages).push(RenderedMessage {
                message,
                notice: notice.clone(),
                view,
            });
            Ok(message)
        })
    }

    fn edit<'a>(
        &'a self,
        message: MessageRef,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_edits.load(Ordering::Relaxed) {
                return Err(SurfaceError::MessageNotFound);
            }
            let mut messages = lock(&self.messages);
            match messages.iter_mut().find(|m| m.message == message) {
                Some(existing) => {
                    existing.notice = notice.clone();
                    existing.view = view;
                    Ok(())
                }
                None => Err(SurfaceError::MessageNotFound),
            }
        })
    }

    fn notify_ephemeral<'a>(
        &'a self,
        user: UserId,
        notice: &'a Notice,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            lock(&self.ephemeral).push((user, notice.clone()));
            Ok(())
        })
    }
}
