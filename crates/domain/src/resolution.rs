use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use crate::agent_info::build_agent_info;
use crate::ports::identity_provider::{IdentityProvider, IdentityProviderError};
use crate::ports::metrics::{FailureReason, IdentityMetrics};
use crate::ports::registration::{Registration, RegistrationError};
use crate::ports::users::{UserRepository, UserStoreError};
use crate::util::correlation_or_new;

#[derive(Clone, Debug, Default)]
pub struct ResolveContext {
    pub correlation_id: Option<String>,
}

impl ResolveContext {
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IdentityResolutionResult {
    pub user_id: String,
    pub created: bool,
    pub audit_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    ServiceUnavailable,
    Invalid,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::Invalid => "invalid",
            ErrorCategory::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("identity {0} not found in identity provider")]
    IdentityNotFound(String),
    #[error("user {0} has no agent")]
    AgentNotFound(String),
    #[error("identity provider unavailable")]
    ServiceUnavailable(#[source] IdentityProviderError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Store(#[from] UserStoreError),
    #[error("registered user {user_id} is not linked to identity {identity_id}")]
    IncompleteRegistration {
        user_id: String,
        identity_id: String,
    },
}

impl ResolutionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ResolutionError::IdentityNotFound(_) | ResolutionError::AgentNotFound(_) => {
                ErrorCategory::NotFound
            }
            ResolutionError::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
            ResolutionError::Registration(err) if err.is_conflict() => ErrorCategory::Conflict,
            ResolutionError::Registration(RegistrationError::Store(_)) => ErrorCategory::Internal,
            ResolutionError::Registration(_) | ResolutionError::IncompleteRegistration { .. } => {
                ErrorCategory::Invalid
            }
            ResolutionError::Store(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::ServiceUnavailable
    }
}

/// Maps an external identity id onto a local user id, provisioning on first sight.
#[derive(Clone)]
pub struct IdentityResolutionService {
    users: Arc<dyn UserRepository>,
    provider: Arc<dyn IdentityProvider>,
    registration: Arc<dyn Registration>,
    metrics: Arc<dyn IdentityMetrics>,
}

impl IdentityResolutionService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        provider: Arc<dyn IdentityProvider>,
        registration: Arc<dyn Registration>,
        metrics: Arc<dyn IdentityMetrics>,
    ) -> Self {
        Self {
            users,
            provider,
            registration,
            metrics,
        }
    }

    pub async fn resolve_identity(
        &self,
        identity_id: &str,
        context: ResolveContext,
    ) -> Result<IdentityResolutionResult, ResolutionError> {
        let audit_id = correlation_or_new(context.correlation_id.as_deref());
        let identity_id = identity_id.trim();
        let span = tracing::info_span!(
            "identity_resolution",
            audit_id = %audit_id,
            identity_id = %identity_id
        );
        self.resolve(identity_id, audit_id).instrument(span).await
    }

    async fn resolve(
        &self,
        identity_id: &str,
        audit_id: String,
    ) -> Result<IdentityResolutionResult, ResolutionError> {
        let existing = match self.users.find_by_authentication_id(identity_id).await {
            Ok(existing) => existing,
            Err(err) => return Err(self.fail(FailureReason::UnexpectedError, err.into())),
        };
        if let Some(user) = existing {
            if user.agent_id.as_deref().is_none_or(|agent| agent.trim().is_empty()) {
                return Err(self.fail(
                    FailureReason::IdentityNotFound,
                    ResolutionError::AgentNotFound(user.user_id),
                ));
            }
            self.metrics.record_lookup_hit();
            tracing::debug!(user_id = %user.user_id, "identity already linked");
            return Ok(IdentityResolutionResult {
                user_id: user.user_id,
                created: false,
                audit_id,
            });
        }

        let identity = match self.provider.get_identity_by_id(identity_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                return Err(self.fail(
                    FailureReason::IdentityNotFound,
                    ResolutionError::IdentityNotFound(identity_id.to_string()),
                ));
            }
            Err(err) => {
                return Err(self.fail(
                    FailureReason::ProviderUnavailable,
                    ResolutionError::ServiceUnavailable(err),
                ));
            }
        };

        let agent_info = build_agent_info(&identity, None).verified();
        if agent_info.email.is_empty() {
            return Err(self.fail(
                FailureReason::UnexpectedError,
                RegistrationError::InvalidEmail(String::new()).into(),
            ));
        }

        let user = match self.registration.register_new_user(&agent_info).await {
            Ok(user) => user,
            Err(err) => return Err(self.fail(FailureReason::UnexpectedError, err.into())),
        };
        if !user.is_linked_to(&agent_info.authentication_id) {
            return Err(self.fail(
                FailureReason::UnexpectedError,
                ResolutionError::IncompleteRegistration {
                    user_id: user.user_id,
                    identity_id: agent_info.authentication_id,
                },
            ));
        }

        self.metrics.record_provision();
        tracing::info!(user_id = %user.user_id, "provisioned user for identity");
        Ok(IdentityResolutionResult {
            user_id: user.user_id,
            created: true,
            audit_id,
        })
    }

    fn fail(&self, reason: FailureReason, err: ResolutionError) -> ResolutionError {
        self.metrics.record_failure(reason);
        match reason {
            FailureReason::UnexpectedError => {
                tracing::error!(reason = reason.as_str(), error = %err, "identity resolution failed")
            }
            _ => tracing::warn!(reason = reason.as_str(), error = %err, "identity resolution failed"),
        }
        err
    }
}
