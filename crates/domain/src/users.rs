use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent_info::AgentInfo;
use crate::identity::normalize_email;
use crate::ports::BoxFuture;
use crate::ports::users::{UserRepository, UserStoreError};
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    /// Insertion order, used as the paging cursor.
    pub row_id: i64,
    pub email: String,
    pub authentication_id: Option<String>,
    pub agent_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl User {
    pub fn linked_authentication_id(&self) -> Option<&str> {
        self.authentication_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    pub fn is_linked_to(&self, authentication_id: &str) -> bool {
        self.linked_authentication_id() == Some(authentication_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub authentication_id: Option<String>,
    pub agent_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
}

impl NewUser {
    pub fn from_agent_info(agent_info: &AgentInfo, email: String) -> Self {
        Self {
            email,
            authentication_id: Some(agent_info.authentication_id.trim().to_string()),
            agent_id: Some(uuid_v7_without_dashes()),
            first_name: agent_info.first_name.clone(),
            last_name: agent_info.last_name.clone(),
            avatar_url: agent_info.avatar_url.clone(),
        }
    }
}

#[derive(Default)]
struct UserTable {
    rows: BTreeMap<i64, User>,
    last_row_id: i64,
}

impl UserTable {
    fn find(&self, predicate: impl Fn(&User) -> bool) -> Option<&User> {
        self.rows.values().find(|user| predicate(user))
    }

    fn authentication_holder(&self, authentication_id: &str, except: Option<&str>) -> Option<&User> {
        self.find(|user| {
            user.is_linked_to(authentication_id) && Some(user.user_id.as_str()) != except
        })
    }

    fn email_holder(&self, email: &str, except: Option<&str>) -> Option<&User> {
        self.find(|user| user.email == email && Some(user.user_id.as_str()) != except)
    }
}

/// Process-local user store with the same uniqueness rules as the database adapter.
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    table: Arc<RwLock<UserTable>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds existing users in the given order, assigning row ids from 1.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let mut table = UserTable::default();
        for mut user in users {
            table.last_row_id += 1;
            user.row_id = table.last_row_id;
            user.email = normalize_email(&user.email);
            table.rows.insert(user.row_id, user);
        }
        Self {
            table: Arc::new(RwLock::new(table)),
        }
    }

    pub async fn all(&self) -> Vec<User> {
        self.table.read().await.rows.values().cloned().collect()
    }
}

impl UserRepository for InMemoryUserRepository {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        let user_id = user_id.to_string();
        let table = self.table.clone();
        Box::pin(async move {
            let guard = table.read().await;
            Ok(guard.find(|user| user.user_id == user_id).cloned())
        })
    }

    fn find_by_email(&self, email: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        let email = normalize_email(email);
        let table = self.table.clone();
        Box::pin(async move {
            let guard = table.read().await;
            Ok(guard.email_holder(&email, None).cloned())
        })
    }

    fn find_by_authentication_id(
        &self,
        authentication_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        let authentication_id = authentication_id.trim().to_string();
        let table = self.table.clone();
        Box::pin(async move {
            if authentication_id.is_empty() {
                return Ok(None);
            }
            let guard = table.read().await;
            Ok(guard.authentication_holder(&authentication_id, None).cloned())
        })
    }

    fn create(&self, user: &NewUser) -> BoxFuture<'_, Result<User, UserStoreError>> {
        let user = user.clone();
        let table = self.table.clone();
        Box::pin(async move {
            let mut guard = table.write().await;
            let email = normalize_email(&user.email);
            // A held authentication id outranks an email clash.
            if let Some(authentication_id) = user.authentication_id.as_deref()
                && guard.authentication_holder(authentication_id, None).is_some()
            {
                return Err(UserStoreError::AuthenticationIdTaken(
                    authentication_id.to_string(),
                ));
            }
            if guard.email_holder(&email, None).is_some() {
                return Err(UserStoreError::EmailTaken(email));
            }

            guard.last_row_id += 1;
            let now = now_ms();
            let created = User {
                user_id: uuid_v7_without_dashes(),
                row_id: guard.last_row_id,
                email,
                authentication_id: user.authentication_id,
                agent_id: user.agent_id,
                first_name: user.first_name,
                last_name: user.last_name,
                avatar_url: user.avatar_url,
                created_at_ms: now,
                updated_at_ms: now,
            };
            guard.rows.insert(created.row_id, created.clone());
            Ok(created)
        })
    }

    fn save(&self, user: &User) -> BoxFuture<'_, Result<User, UserStoreError>> {
        let user = user.clone();
        let table = self.table.clone();
        Box::pin(async move {
            let mut guard = table.write().await;
            let stored = guard
                .find(|candidate| candidate.user_id == user.user_id)
                .cloned()
                .ok_or_else(|| UserStoreError::NotFound(user.user_id.clone()))?;

            if let Some(existing) = stored.linked_authentication_id()
                && user.authentication_id.as_deref() != Some(existing)
            {
                return Err(UserStoreError::AuthenticationIdLocked {
                    user_id: stored.user_id.clone(),
                    existing: existing.to_string(),
                });
            }
            if let Some(authentication_id) = user.linked_authentication_id()
                && guard
                    .authentication_holder(authentication_id, Some(&user.user_id))
                    .is_some()
            {
                return Err(UserStoreError::AuthenticationIdTaken(
                    authentication_id.to_string(),
                ));
            }
            let email = normalize_email(&user.email);
            if guard.email_holder(&email, Some(&user.user_id)).is_some() {
                return Err(UserStoreError::EmailTaken(email));
            }

            let saved = User {
                row_id: stored.row_id,
                created_at_ms: stored.created_at_ms,
                email,
                ..user
            };
            guard.rows.insert(saved.row_id, saved.clone());
            Ok(saved)
        })
    }

    fn list_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<User>, UserStoreError>> {
        let table = self.table.clone();
        Box::pin(async move {
            let guard = table.read().await;
            let start = cursor.map_or(i64::MIN, |row_id| row_id.saturating_add(1));
            Ok(guard
                .rows
                .range(start..)
                .take(limit)
                .map(|(_, user)| user.clone())
                .collect())
        })
    }
}
