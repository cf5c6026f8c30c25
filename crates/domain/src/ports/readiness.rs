use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("{component} unreachable: {detail}")]
    Unreachable {
        component: &'static str,
        detail: String,
    },
    #[error("{component} misconfigured: {detail}")]
    Misconfigured {
        component: &'static str,
        detail: String,
    },
}

/// A backing service the process cannot serve traffic without.
pub trait ReadinessProbe: Send + Sync {
    fn component(&self) -> &'static str;
    fn probe(&self) -> BoxFuture<'_, Result<(), ReadinessError>>;
}
