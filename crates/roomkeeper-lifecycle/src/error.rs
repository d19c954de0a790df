use roomkeeper_core::{ProviderError, ResourceId, SurfaceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("resource {0} is already registered")]
    DuplicateResource(ResourceId),

    #[error("surface {0} is not allowed to create rooms")]
    SurfaceNotAllowed(SurfaceId),

    #[error("invoker is not permitted to run this command")]
    NotPermitted,

    #[error("invalid room request: {0}")]
    InvalidRequest(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
