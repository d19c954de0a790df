//! Slash-command handlers: room creation and the admin-only allowed-surface
//! commands. Every handler reports to the invoker through an ephemeral notice
//! and returns the same outcome to its caller.

use std::sync::Arc;
use std::time::Duration;

use roomkeeper_core::provider::VoiceProvider;
use roomkeeper_core::surface::{ControlSurface, ControlView, Notice};
use roomkeeper_core::{ProviderError, ResourceId, ResourceRecord, RoomSpec, SurfaceId, UserId};

use crate::allowed::AllowedSurfaces;
use crate::config::AdminSet;
use crate::controls::DeletionControls;
use crate::error::LifecycleError;
use crate::metrics::LifecycleMetrics;
use crate::reconcile::DEFAULT_ADAPTER_TIMEOUT;
use crate::registry::RegistryStore;
use crate::teardown;

pub const MIN_BITRATE_KBPS: u32 = 8;
pub const MAX_BITRATE_KBPS: u32 = 384;
pub const MAX_NAME_LEN: usize = 100;

const REASON_ROLLBACK: &str = "registration failed";

pub struct Commands {
    registry: Arc<RegistryStore>,
    allowed: Arc<AllowedSurfaces>,
    provider: Arc<dyn VoiceProvider>,
    surface: Arc<dyn ControlSurface>,
    controls: Arc<DeletionControls>,
    metrics: Arc<LifecycleMetrics>,
    admins: AdminSet,
    adapter_timeout: Duration,
}

impl Commands {
    pub fn new(
        registry: Arc<RegistryStore>,
        allowed: Arc<AllowedSurfaces>,
        provider: Arc<dyn VoiceProvider>,
        surface: Arc<dyn ControlSurface>,
        controls: Arc<DeletionControls>,
        metrics: Arc<LifecycleMetrics>,
        admins: AdminSet,
    ) -> Self {
        Self {
            registry,
            allowed,
            provider,
            surface,
            controls,
            metrics,
            admins,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Create a voice room from an allowed surface, post its control message
    /// and register it with the invoker as owner.
    pub async fn create_room(
        &self,
        invoker: UserId,
        surface_id: SurfaceId,
        spec: RoomSpec,
    ) -> Result<ResourceId, LifecycleError> {
        if !self.allowed.contains(surface_id).await {
            tracing::info!(%invoker, %surface_id, "Room creation from a surface that is not allowed");
            self.tell(invoker, &Notice::SurfaceNotAllowed { surface_id })
                .await;
            return Err(LifecycleError::SurfaceNotAllowed(surface_id));
        }

        if let Err(reason) = validate_spec(&spec) {
            self.tell(
                invoker,
                &Notice::CreateFailed {
                    reason: reason.clone(),
                },
            )
            .await;
            return Err(LifecycleError::InvalidRequest(reason));
        }

        let create = self.provider.create(&spec);
        let created = match tokio::time::timeout(self.adapter_timeout, create).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unknown(format!(
                "create timed out after {}s",
                self.adapter_timeout.as_secs()
            ))),
        };
        let id = match created {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(%invoker, name = %spec.name, error = %e, "Room creation failed");
                let notice = match &e {
                    ProviderError::Forbidden(_) => Notice::CreateForbidden,
                    other => Notice::CreateFailed {
                        reason: other.to_string(),
                    },
                };
                self.tell(invoker, &notice).await;
                return Err(e.into());
            }
        };

        let notice = Notice::RoomCreated {
            resource_id: id,
            spec: spec.clone(),
        };
        let message = match self.surface.post(surface_id, &notice, ControlView::Managing).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(resource_id = %id, %surface_id, "Could not post control message: {e}");
                None
            }
        };

        if let Err(e) = self
            .registry
            .add(ResourceRecord::new(id, invoker, message))
            .await
        {
            tracing::error!(resource_id = %id, "Could not register new room: {e}");
            if !matches!(e, LifecycleError::DuplicateResource(_)) {
                let provider = self.provider.as_ref();
                if let Err(rollback) =
                    teardown::delete_live(provider, id, REASON_ROLLBACK, self.adapter_timeout).await
                {
                    tracing::error!(resource_id = %id, "Unregistered room left behind: {rollback}");
                }
            }
            self.tell(
                invoker,
                &Notice::CreateFailed {
                    reason: e.to_string(),
                },
            )
            .await;
            return Err(e);
        }

        self.controls.attach(id, invoker, message);
        self.metrics.record_room_created();
        tracing::info!(
            resource_id = %id,
            owner = %invoker,
            name = %spec.name,
            occupant_limit = spec.occupant_limit,
            bitrate_kbps = spec.bitrate_kbps,
            "Room created"
        );
        Ok(id)
    }

    /// Allow room creation from `surface_id`. Returns false if it already was.
    pub async fn set_channel(
        &self,
        invoker: UserId,
        surface_id: SurfaceId,
    ) -> Result<bool, LifecycleError> {
        self.require_admin(invoker).await?;
        let added = self.allowed.allow(surface_id).await?;
        let notice = if added {
            Notice::SurfaceAllowed { surface_id }
        } else {
            Notice::SurfaceAlreadyAllowed { surface_id }
        };
        self.tell(invoker, &notice).await;
        Ok(added)
    }

    /// Stop allowing room creation from `surface_id`. Returns false if it was
    /// not allowed.
    pub async fn unset_channel(
        &self,
        invoker: UserId,
        surface_id: SurfaceId,
    ) -> Result<bool, LifecycleError> {
        self.require_admin(invoker).await?;
        let removed = self.allowed.disallow(surface_id).await?;
        let notice = if removed {
            Notice::SurfaceDisallowed { surface_id }
        } else {
            Notice::SurfaceNotRegistered { surface_id }
        };
        self.tell(invoker, &notice).await;
        Ok(removed)
    }

    pub async fn list_channels(&self, invoker: UserId) -> Result<Vec<SurfaceId>, LifecycleError> {
        self.require_admin(invoker).await?;
        let surfaces = self.allowed.list().await;
        self.tell(
            invoker,
            &Notice::AllowedSurfaces {
                surfaces: surfaces.clone(),
            },
        )
        .await;
        Ok(surfaces)
    }

    async fn require_admin(&self, invoker: UserId) -> Result<(), LifecycleError> {
        if self.admins.contains(invoker) {
            return Ok(());
        }
        tracing::info!(%invoker, "Admin command refused");
        self.tell(invoker, &Notice::NotPermitted).await;
        Err(LifecycleError::NotPermitted)
    }

    async fn tell(&self, user: UserId, notice: &Notice) {
        if let Err(e) = self.surface.notify_ephemeral(user, notice).await {
            tracing::warn!(%user, "Could not send ephemeral notice: {e}");
        }
    }
}

fn validate_spec(spec: &RoomSpec) -> Result<(), String> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err("room name must not be empty".into());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("room name must be at most {MAX_NAME_LEN} characters"));
    }
    if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&spec.bitrate_kbps) {
        return Err(format!(
            "bitrate must be between {MIN_BITRATE_KBPS} and {MAX_BITRATE_KBPS} kbps"
        ));
    }
    Ok(())
}
