use std::sync::Arc;

use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::users::{UserRepository, UserStoreError};
use idlink_domain::users::{NewUser, User};
use idlink_domain::util::{format_ms_rfc3339, now_ms, parse_rfc3339_ms, uuid_v7_without_dashes};
use serde::Deserialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

const USER_FIELDS: &str = "user_id, row_id, email, authentication_id, agent_id, first_name, \
     last_name, avatar_url, <string>created_at AS created_at, <string>updated_at AS updated_at";
const ROW_ID_RETRY_LIMIT: usize = 3;

#[derive(Debug, Deserialize)]
struct SurrealUserRow {
    user_id: String,
    row_id: i64,
    email: String,
    #[serde(default)]
    authentication_id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SurrealUserRow {
    fn into_user(self) -> Result<User, UserStoreError> {
        Ok(User {
            created_at_ms: parse_timestamp(&self.created_at)?,
            updated_at_ms: parse_timestamp(&self.updated_at)?,
            user_id: self.user_id,
            row_id: self.row_id,
            email: self.email,
            authentication_id: self.authentication_id,
            agent_id: self.agent_id,
            first_name: self.first_name.unwrap_or_default(),
            last_name: self.last_name.unwrap_or_default(),
            avatar_url: self.avatar_url.unwrap_or_default(),
        })
    }
}

enum WriteConflict {
    RowId,
    Store(UserStoreError),
}

#[derive(Clone)]
pub struct SurrealUserRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealUserRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    async fn select_one(&self, filter: &str, value: String) -> Result<Option<User>, UserStoreError> {
        let query = format!("SELECT {USER_FIELDS} FROM identity_user WHERE {filter} = $value LIMIT 1");
        let mut response = self
            .client
            .query(query)
            .bind(("value", value))
            .await
            .map_err(|err| map_surreal_error(err, None))?;
        let rows: Vec<Value> = response
            .take(0)
            .map_err(|err| UserStoreError::Operation(format!("invalid query result: {err}")))?;
        Ok(decode_rows(rows)?.pop())
    }

    async fn insert(&self, user: &NewUser, user_id: &str) -> Result<(), WriteConflict> {
        let now = format_ms_rfc3339(now_ms());
        self.client
            .query(
                "BEGIN TRANSACTION; \
                 LET $last = (SELECT row_id FROM identity_user ORDER BY row_id DESC LIMIT 1); \
                 LET $next = IF array::len($last) > 0 { $last[0].row_id + 1 } ELSE { 1 }; \
                 CREATE identity_user SET \
                    user_id = $user_id, \
                    row_id = $next, \
                    email = $email, \
                    authentication_id = $authentication_id, \
                    agent_id = $agent_id, \
                    first_name = $first_name, \
                    last_name = $last_name, \
                    avatar_url = $avatar_url, \
                    created_at = <datetime>$now, \
                    updated_at = <datetime>$now \
                 RETURN NONE; \
                 COMMIT TRANSACTION;",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("email", user.email.clone()))
            .bind(("authentication_id", user.authentication_id.clone()))
            .bind(("agent_id", user.agent_id.clone()))
            .bind(("first_name", user.first_name.clone()))
            .bind(("last_name", user.last_name.clone()))
            .bind(("avatar_url", user.avatar_url.clone()))
            .bind(("now", now))
            .await
            .and_then(|response| response.check())
            .map_err(|err| classify_write_error(err, user))?;
        Ok(())
    }

    /// Both unique indexes can trip on one insert and the database only names
    /// the first, so a held authentication id is looked up before reporting
    /// the email.
    async fn email_conflict(&self, user: &NewUser, email: String) -> UserStoreError {
        let Some(authentication_id) = user
            .authentication_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return UserStoreError::EmailTaken(email);
        };
        let holder = self
            .select_one("authentication_id", authentication_id.to_string())
            .await
            .ok()
            .flatten();
        rank_create_conflict(email, authentication_id, holder.as_ref())
    }
}

impl UserRepository for SurrealUserRepository {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.select_one("user_id", user_id).await })
    }

    fn find_by_email(&self, email: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        let email = email.trim().to_lowercase();
        Box::pin(async move { self.select_one("email", email).await })
    }

    fn find_by_authentication_id(
        &self,
        authentication_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        let authentication_id = authentication_id.trim().to_string();
        Box::pin(async move {
            if authentication_id.is_empty() {
                return Ok(None);
            }
            self.select_one("authentication_id", authentication_id).await
        })
    }

    fn create(&self, user: &NewUser) -> BoxFuture<'_, Result<User, UserStoreError>> {
        let mut user = user.clone();
        user.email = user.email.trim().to_lowercase();
        Box::pin(async move {
            let user_id = uuid_v7_without_dashes();
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.insert(&user, &user_id).await {
                    Ok(()) => break,
                    Err(WriteConflict::RowId) if attempt < ROW_ID_RETRY_LIMIT => {
                        tracing::debug!(attempt, "row id collision, retrying insert");
                    }
                    Err(WriteConflict::RowId) => {
                        return Err(UserStoreError::Operation(
                            "could not allocate a row id".into(),
                        ));
                    }
                    Err(WriteConflict::Store(UserStoreError::EmailTaken(email))) => {
                        return Err(self.email_conflict(&user, email).await);
                    }
                    Err(WriteConflict::Store(err)) => return Err(err),
                }
            }
            self.select_one("user_id", user_id.clone())
                .await?
                .ok_or_else(|| UserStoreError::Operation(format!("created user {user_id} not found")))
        })
    }

    fn save(&self, user: &User) -> BoxFuture<'_, Result<User, UserStoreError>> {
        let user = user.clone();
        Box::pin(async move {
            let stored = self
                .select_one("user_id", user.user_id.clone())
                .await?
                .ok_or_else(|| UserStoreError::NotFound(user.user_id.clone()))?;
            if let Some(existing) = stored.linked_authentication_id()
                && user.authentication_id.as_deref() != Some(existing)
            {
                return Err(UserStoreError::AuthenticationIdLocked {
                    user_id: stored.user_id.clone(),
                    existing: existing.to_string(),
                });
            }

            let new_user = NewUser {
                email: user.email.trim().to_lowercase(),
                authentication_id: user.authentication_id.clone(),
                agent_id: user.agent_id.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                avatar_url: user.avatar_url.clone(),
            };
            // The guard keeps a concurrent link from being overwritten.
            self.client
                .query(
                    "UPDATE identity_user SET \
                        email = $email, \
                        authentication_id = $authentication_id, \
                        agent_id = $agent_id, \
                        first_name = $first_name, \
                        last_name = $last_name, \
                        avatar_url = $avatar_url, \
                        updated_at = <datetime>$updated_at \
                     WHERE user_id = $user_id \
                       AND (authentication_id = NONE OR authentication_id = NULL \
                            OR authentication_id = $authentication_id) \
                     RETURN NONE;",
                )
                .bind(("user_id", user.user_id.clone()))
                .bind(("email", new_user.email.clone()))
                .bind(("authentication_id", new_user.authentication_id.clone()))
                .bind(("agent_id", new_user.agent_id.clone()))
                .bind(("first_name", new_user.first_name.clone()))
                .bind(("last_name", new_user.last_name.clone()))
                .bind(("avatar_url", new_user.avatar_url.clone()))
                .bind(("updated_at", format_ms_rfc3339(user.updated_at_ms.max(now_ms()))))
                .await
                .and_then(|response| response.check())
                .map_err(|err| match classify_write_error(err, &new_user) {
                    WriteConflict::RowId => UserStoreError::Operation("row id changed".into()),
                    WriteConflict::Store(err) => err,
                })?;

            let saved = self
                .select_one("user_id", user.user_id.clone())
                .await?
                .ok_or_else(|| UserStoreError::NotFound(user.user_id.clone()))?;
            if saved.authentication_id != user.authentication_id
                && let Some(existing) = saved.linked_authentication_id()
            {
                return Err(UserStoreError::AuthenticationIdLocked {
                    user_id: saved.user_id.clone(),
                    existing: existing.to_string(),
                });
            }
            Ok(saved)
        })
    }

    fn list_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<User>, UserStoreError>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {USER_FIELDS} FROM identity_user WHERE row_id > $cursor \
                 ORDER BY row_id ASC LIMIT $limit"
            );
            let mut response = self
                .client
                .query(query)
                .bind(("cursor", cursor.unwrap_or(0)))
                .bind(("limit", limit as i64))
                .await
                .map_err(|err| map_surreal_error(err, None))?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| UserStoreError::Operation(format!("invalid query result: {err}")))?;
            decode_rows(rows)
        })
    }
}

fn decode_rows(rows: Vec<Value>) -> Result<Vec<User>, UserStoreError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<SurrealUserRow>(row)
                .map_err(|err| UserStoreError::Operation(format!("invalid user row: {err}")))
                .and_then(SurrealUserRow::into_user)
        })
        .collect()
}

fn parse_timestamp(value: &str) -> Result<i64, UserStoreError> {
    parse_rfc3339_ms(value)
        .ok_or_else(|| UserStoreError::Operation(format!("invalid timestamp '{value}'")))
}

fn classify_write_error(err: surrealdb::Error, user: &NewUser) -> WriteConflict {
    let message = err.to_string();
    if message.contains("identity_user_row_id") {
        return WriteConflict::RowId;
    }
    if message.contains("identity_user_authentication_id") {
        return WriteConflict::Store(UserStoreError::AuthenticationIdTaken(
            user.authentication_id.clone().unwrap_or_default(),
        ));
    }
    if message.contains("identity_user_email") {
        return WriteConflict::Store(UserStoreError::EmailTaken(user.email.clone()));
    }
    WriteConflict::Store(map_surreal_error(err, Some(message)))
}

fn rank_create_conflict(email: String, authentication_id: &str, holder: Option<&User>) -> UserStoreError {
    match holder {
        Some(holder) if holder.is_linked_to(authentication_id) => {
            UserStoreError::AuthenticationIdTaken(authentication_id.to_string())
        }
        _ => UserStoreError::EmailTaken(email),
    }
}

fn map_surreal_error(err: surrealdb::Error, message: Option<String>) -> UserStoreError {
    let message = message.unwrap_or_else(|| err.to_string()).to_lowercase();
    if message.contains("connection")
        || message.contains("websocket")
        || message.contains("timed out")
    {
        return UserStoreError::Unavailable(message);
    }
    UserStoreError::Operation(format!("surreal query failed: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_rows_without_optional_fields() {
        let users = decode_rows(vec![json!({
            "user_id": "user-1",
            "row_id": 7,
            "email": "a@example.com",
            "created_at": "2026-01-02T03:04:05Z",
            "updated_at": "2026-01-02T03:04:05.250Z"
        })])
        .unwrap();

        assert_eq!(users[0].row_id, 7);
        assert!(users[0].authentication_id.is_none());
        assert_eq!(users[0].first_name, "");
        assert_eq!(users[0].avatar_url, "");
        assert_eq!(users[0].updated_at_ms - users[0].created_at_ms, 250);
    }

    #[test]
    fn taken_authentication_id_outranks_email_conflict() {
        let holder = decode_rows(vec![json!({
            "user_id": "user-1",
            "row_id": 1,
            "email": "a@example.com",
            "authentication_id": "kratos-1",
            "created_at": "2026-01-02T03:04:05Z",
            "updated_at": "2026-01-02T03:04:05Z"
        })])
        .unwrap()
        .pop();

        assert_eq!(
            rank_create_conflict("a@example.com".into(), "kratos-1", holder.as_ref()),
            UserStoreError::AuthenticationIdTaken("kratos-1".into())
        );
        assert_eq!(
            rank_create_conflict("a@example.com".into(), "kratos-2", holder.as_ref()),
            UserStoreError::EmailTaken("a@example.com".into())
        );
        assert_eq!(
            rank_create_conflict("a@example.com".into(), "kratos-1", None),
            UserStoreError::EmailTaken("a@example.com".into())
        );
    }

    #[test]
    fn rejects_rows_with_bad_timestamps() {
        let result = decode_rows(vec![json!({
            "user_id": "user-1",
            "row_id": 1,
            "email": "a@example.com",
            "created_at": "yesterday",
            "updated_at": "2026-01-02T03:04:05Z"
        })]);
        assert!(matches!(result, Err(UserStoreError::Operation(_))));
    }
}
