use thiserror::Error;

/// Failures reported by the voice-room provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The room is already gone. Delete paths treat this as success.
    #[error("resource not found")]
    NotFound,

    #[error("provider refused the operation: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    /// Network or provider hiccup; retried on the next tick.
    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

/// Failures reported by the interactive surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("message not found")]
    MessageNotFound,

    #[error("surface unavailable: {0}")]
    Unavailable(String),
}
