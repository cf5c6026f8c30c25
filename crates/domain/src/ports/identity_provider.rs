use thiserror::Error;

use super::BoxFuture;
use crate::identity::ExternalIdentity;

#[derive(Clone, Debug, Error)]
pub enum IdentityProviderError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("identity provider rejected request: {0}")]
    Rejected(String),
    #[error("identity provider returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("identity provider misconfigured: {0}")]
    Configuration(String),
}

/// Read-only view of the external identity system.
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// All identities registered under the email. Zero, one, or many.
    fn find_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Vec<ExternalIdentity>, IdentityProviderError>>;

    /// `Ok(None)` when the provider does not know the id.
    fn get_identity_by_id(
        &self,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<Option<ExternalIdentity>, IdentityProviderError>>;
}
