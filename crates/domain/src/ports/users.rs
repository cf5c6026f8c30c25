use thiserror::Error;

use super::BoxFuture;
use crate::users::{NewUser, User};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UserStoreError {
    #[error("authentication id {0} is already linked to another user")]
    AuthenticationIdTaken(String),
    #[error("user {user_id} is already linked to authentication id {existing}")]
    AuthenticationIdLocked { user_id: String, existing: String },
    #[error("email {0} is already registered")]
    EmailTaken(String),
    #[error("user {0} not found")]
    NotFound(String),
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error("user store operation failed: {0}")]
    Operation(String),
}

pub trait UserRepository: Send + Sync {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>>;

    fn find_by_email(&self, email: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>>;

    fn find_by_authentication_id(
        &self,
        authentication_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, UserStoreError>>;

    /// Assigns the user id and row id. Email and authentication id are unique.
    fn create(&self, user: &NewUser) -> BoxFuture<'_, Result<User, UserStoreError>>;

    /// Persists changes to an existing user. A non-empty authentication id never changes.
    fn save(&self, user: &User) -> BoxFuture<'_, Result<User, UserStoreError>>;

    /// Users with a row id greater than `cursor`, ascending, at most `limit`.
    fn list_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<User>, UserStoreError>>;
}
