use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProviderError;
use crate::record::{ResourceId, RoomSpec, RoomState};

/// Live-state adapter for the voice-room provider.
///
/// Every call is a suspension point and may take arbitrarily long; callers
/// bound them with their own timeouts.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait VoiceProvider: Send + Sync {
    /// Create a room. Fails with `Forbidden` or `Invalid`.
    fn create<'a>(
        &'a self,
        spec: &'a RoomSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ResourceId, ProviderError>> + Send + 'a>>;

    /// Delete a room. Fails with `NotFound`, `Forbidden` or `Unknown`.
    fn delete<'a>(
        &'a self,
        id: ResourceId,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>>;

    /// Report whether the room still exists, is a voice room, and how many
    /// occupants it has. A vanished room is `Ok(RoomState::Missing)`, not an
    /// error.
    fn describe<'a>(
        &'a self,
        id: ResourceId,
    ) -> Pin<Box<dyn Future<Output = Result<RoomState, ProviderError>> + Send + 'a>>;

    /// Backend name for logging.
    fn provider_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoryRoom {
    Voice { occupants: u32 },
    Other,
}

/// In-memory provider. Backs the `memory` provider kind and the test suites.
///
/// Failures can be scripted per room; a scripted failure stays in effect
/// until cleared.
#[derive(Default)]
pub struct MemoryProvider {
    rooms: Mutex<HashMap<ResourceId, MemoryRoom>>,
    next_id: AtomicU64,
    create_error: Mutex<Option<ProviderError>>,
    delete_errors: Mutex<HashMap<ResourceId, ProviderError>>,
    describe_errors: Mutex<HashMap<ResourceId, ProviderError>>,
    /// Every delete call, in order, with its reason and whether it succeeded.
    delete_log: Mutex<Vec<DeleteCall>>,
    created: Mutex<Vec<RoomSpec>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub id: ResourceId,
    pub reason: String,
    pub succeeded: bool,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1_000),
            ..Default::default()
        }
    }

    /// Insert (or replace) a voice room with the given occupancy.
    pub fn insert_voice(&self, id: ResourceId, occupants: u32) {
        lock(&self.rooms).insert(id, MemoryRoom::Voice { occupants });
    }

    /// Insert something that exists but is not a voice room.
    pub fn insert_other(&self, id: ResourceId) {
        lock(&self.rooms).insert(id, MemoryRoom::Other);
    }

    pub fn set_occupants(&self, id: ResourceId, occupants: u32) {
        if let Some(room) = lock(&self.rooms).get_mut(&id) {
            *room = MemoryRoom::Voice { occupants };
        }
    }

    /// Remove a room behind the manager's back.
    pub fn vanish(&self, id: ResourceId) {
        lock(&self.rooms).remove(&id);
    }

    pub fn exists(&self, id: ResourceId) -> bool {
        lock(&self.rooms).contains_key(&id)
    }

    pub fn fail_create(&self, error: Option<ProviderError>) {
        *lock(&self.create_error) = error;
    }

    pub fn fail_delete(&self, id: ResourceId, error: Option<ProviderError>) {
        let mut errors = lock(&self.delete_errors);
        match error {
            Some(e) => errors.insert(id, e),
            None => errors.remove(&id),
        };
    }

    pub fn fail_describe(&self, id: ResourceId, error: Option<ProviderError>) {
        let mut errors = lock(&self.describe_errors);
        match error {
            Some(e) => errors.insert(id, e),
            None => errors.remove(&id),
        };
    }

    pub fn delete_calls(&self) -> Vec<DeleteCall> {
        lock(&self.delete_log).clone()
    }

    pub fn successful_deletes(&self, id: ResourceId) -> usize {
        lock(&self.delete_log)
            .iter()
            .filter(|c| c.id == id && c.succeeded)
            .count()
    }

    pub fn created_specs(&self) -> Vec<RoomSpec> {
        lock(&self.created).clone()
    }
}

impl VoiceProvider for MemoryProvider {
    fn create<'a>(
        &'a self,
        spec: &'a RoomSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ResourceId, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(e) = lock(&self.create_error).clone() {
                return Err(e);
            }
            if spec.name.trim().is_empty() {
                return Err(ProviderError::Invalid("room name is empty".into()));
            }
            let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
            lock(&self.rooms).insert(id, MemoryRoom::Voice { occupants: 0 });
            lock(&self.created).push(spec.clone());
            tracing::debug!(resource_id = %id, name = %spec.name, "Memory room created");
            Ok(id)
        })
    }

    fn delete<'a>(
        &'a self,
        id: ResourceId,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let result = if let Some(e) = lock(&self.delete_errors).get(&id).cloned() {
                Err(e)
            } else if lock(&self.rooms).remove(&id).is_some() {
                Ok(())
            } else {
                Err(ProviderError::NotFound)
            };
            lock(&self.delete_log).push(DeleteCall {
                id,
                reason: reason.to_string(),
                succeeded: result.is_ok(),
            });
            result
        })
    }

    fn describe<'a>(
        &'a self,
        id: ResourceId,
    ) -> Pin<Box<dyn Future<Output = Result<RoomState, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(e) = lock(&self.describe_errors).get(&id).cloned() {
                return Err(e);
            }
            Ok(match lock(&self.rooms).get(&id) {
                None => RoomState::Missing,
                Some(MemoryRoom::Other) => RoomState::WrongKind,
                Some(MemoryRoom::Voice { occupants }) => RoomState::Voice {
                    occupants: *occupants,
                },
            })
        })
    }

    fn provider_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> RoomSpec {
        RoomSpec {
            name: name.into(),
            occupant_limit: 0,
            bitrate_kbps: 64,
            placement_hint: None,
        }
    }

    #[tokio::test]
    async fn create_then_describe_empty_voice() {
        let provider = MemoryProvider::new();
        let id = provider.create(&spec("lounge")).await.unwrap();
        assert_eq!(
            provider.describe(id).await.unwrap(),
            RoomState::Voice { occupants: 0 }
        );
        assert_eq!(provider.created_specs().len(), 1);
    }

    #[tokio::test]
    async fn create_assigns_unique_ids() {
        let provider = MemoryProvider::new();
        let a = provider.create(&spec("a")).await.unwrap();
        let b = provider.create(&spec("b")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn create_rejects_blank_name() {
        let provider = MemoryProvider::new();
        let err = provider.create(&spec("  ")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
    }

    #[tokio::test]
    async fn describe_distinguishes_missing_and_wrong_kind() {
        let provider = MemoryProvider::new();
        provider.insert_other(ResourceId(5));
        assert_eq!(
            provider.describe(ResourceId(5)).await.unwrap(),
            RoomState::WrongKind
        );
        assert_eq!(
            provider.describe(ResourceId(6)).await.unwrap(),
            RoomState::Missing
        );
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let provider = MemoryProvider::new();
        provider.insert_voice(ResourceId(1), 0);
        provider.delete(ResourceId(1), "first").await.unwrap();
        let err = provider.delete(ResourceId(1), "second").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(provider.successful_deletes(ResourceId(1)), 1);
        assert_eq!(provider.delete_calls().len(), 2);
    }

    #[tokio::test]
    async fn scripted_delete_failure_keeps_room() {
        let provider = MemoryProvider::new();
        provider.insert_voice(ResourceId(1), 0);
        provider.fail_delete(
            ResourceId(1),
            Some(ProviderError::Forbidden("missing permission".into())),
        );
        assert!(provider.delete(ResourceId(1), "x").await.is_err());
        assert!(provider.exists(ResourceId(1)));

        provider.fail_delete(ResourceId(1), None);
        provider.delete(ResourceId(1), "x").await.unwrap();
        assert!(!provider.exists(ResourceId(1)));
    }
}
