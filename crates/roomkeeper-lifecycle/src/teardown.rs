//! The one teardown rule shared by idle eviction and manual deletion: a live
//! delete that finds the room already gone counts as success.

use std::time::Duration;

use roomkeeper_core::provider::VoiceProvider;
use roomkeeper_core::{ProviderError, ResourceId};

/// Audit reason for rooms evicted by the reconciliation loop.
pub const REASON_IDLE: &str = "idle timeout";
/// Audit reason for rooms deleted through the deletion controls.
pub const REASON_USER: &str = "user requested";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Deleted,
    /// The provider no longer knew the room.
    AlreadyGone,
}

/// Delete the live room, bounded by `timeout`. A timeout is reported as
/// `ProviderError::Unknown` so callers retry it like any transient failure.
pub async fn delete_live(
    provider: &dyn VoiceProvider,
    id: ResourceId,
    reason: &str,
    timeout: Duration,
) -> Result<TeardownOutcome, ProviderError> {
    let result = match tokio::time::timeout(timeout, provider.delete(id, reason)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Unknown(format!(
            "delete timed out after {}s",
            timeout.as_secs()
        ))),
    };

    match result {
        Ok(()) => {
            tracing::info!(resource_id = %id, reason, "Room deleted");
            Ok(TeardownOutcome::Deleted)
        }
        Err(e) if e.is_not_found() => {
            tracing::info!(resource_id = %id, reason, "Room already gone");
            Ok(TeardownOutcome::AlreadyGone)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_core::provider::MemoryProvider;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn existing_room_is_deleted() {
        let provider = MemoryProvider::new();
        provider.insert_voice(ResourceId(1), 0);
        let outcome = delete_live(&provider, ResourceId(1), REASON_IDLE, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, TeardownOutcome::Deleted);
        assert_eq!(provider.delete_calls()[0].reason, "idle timeout");
    }

    #[tokio::test]
    async fn missing_room_counts_as_success() {
        let provider = MemoryProvider::new();
        let outcome = delete_live(&provider, ResourceId(1), REASON_USER, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome, TeardownOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn forbidden_is_propagated() {
        let provider = MemoryProvider::new();
        provider.insert_voice(ResourceId(1), 0);
        provider.fail_delete(ResourceId(1), Some(ProviderError::Forbidden("no".into())));
        let err = delete_live(&provider, ResourceId(1), REASON_USER, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Forbidden(_)));
    }
}
