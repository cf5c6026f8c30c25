use serde::Serialize;
use thiserror::Error;

use super::BoxFuture;
use super::users::UserStoreError;
use crate::agent_info::AgentInfo;
use crate::users::User;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("email {0} is already registered")]
    AlreadyRegistered(String),
    #[error("email {0} is not verified")]
    NotVerified(String),
    #[error("invalid email: {0:?}")]
    InvalidEmail(String),
    #[error("an authentication id is required to register a user")]
    MissingAuthenticationId,
    #[error("authentication id {0} is already linked to another user")]
    DuplicateAuthId(String),
    #[error(transparent)]
    Store(UserStoreError),
}

impl RegistrationError {
    /// Maps uniqueness violations onto registration outcomes.
    pub fn from_store(err: UserStoreError, email: &str) -> Self {
        match err {
            UserStoreError::AuthenticationIdTaken(id) => RegistrationError::DuplicateAuthId(id),
            UserStoreError::EmailTaken(_) | UserStoreError::AuthenticationIdLocked { .. } => {
                RegistrationError::AlreadyRegistered(email.to_string())
            }
            other => RegistrationError::Store(other),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RegistrationError::AlreadyRegistered(_) | RegistrationError::DuplicateAuthId(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Existing,
    Linked,
    Created,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedUser {
    pub user: User,
    pub outcome: LinkOutcome,
}

pub trait Registration: Send + Sync {
    fn register_new_user(
        &self,
        agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<User, RegistrationError>>;

    fn create_or_link(
        &self,
        agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<LinkedUser, RegistrationError>>;
}
