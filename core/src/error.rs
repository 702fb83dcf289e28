use thiserror::Error;

/// Errors surfaced synchronously to edit callers (CLI and HTTP layers map
/// these onto exit codes and status codes). Per-recipe compute failures
/// inside a cascade are collected into the cascade report instead of being
/// raised through this type.
#[derive(Error, Debug)]
pub enum CmvError {
    #[error("{0}")]
    Validation(String),

    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CmvResult<T> = Result<T, CmvError>;

impl CmvError {
    /// Wrap a validator failure, keeping its message.
    #[must_use]
    pub fn validation(err: &anyhow::Error) -> Self {
        CmvError::Validation(format!("{err:#}"))
    }

    #[must_use]
    pub fn not_found(what: &str, key: &str) -> Self {
        CmvError::NotFound(format!("{what} not found: {key}"))
    }
}
