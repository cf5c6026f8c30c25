use thiserror::Error;

/// Failures of the audit log store.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation failed: {0}")]
    Storage(String),
}
