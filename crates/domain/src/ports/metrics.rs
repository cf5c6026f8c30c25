#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    ProviderUnavailable,
    IdentityNotFound,
    UnexpectedError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ProviderUnavailable => "kratos_unavailable",
            FailureReason::IdentityNotFound => "identity_not_found",
            FailureReason::UnexpectedError => "unexpected_error",
        }
    }
}

pub trait IdentityMetrics: Send + Sync {
    fn record_lookup_hit(&self);
    fn record_provision(&self);
    fn record_failure(&self, reason: FailureReason);
}
