use std::sync::Arc;

use idlink_domain::DomainResult;
use idlink_domain::audit::{AuditEntry, AuditStatus};
use idlink_domain::error::DomainError;
use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::audit::AuditLog;
use idlink_domain::util::{format_ms_rfc3339, parse_rfc3339_ms};
use serde::Deserialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

#[derive(Debug, Deserialize)]
struct SurrealAuditRow {
    user_id: String,
    email: String,
    status: String,
    #[serde(default)]
    identity_id: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    created_at: String,
}

#[derive(Clone)]
pub struct SurrealAuditLog {
    client: Arc<Surreal<Client>>,
}

impl SurrealAuditLog {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    fn map_surreal_error(err: surrealdb::Error) -> DomainError {
        let message = err.to_string().to_lowercase();
        if message.contains("connection") || message.contains("websocket") {
            return DomainError::Unavailable(message);
        }
        DomainError::Storage(format!("surreal query failed: {message}"))
    }

    fn decode_rows(rows: Vec<Value>) -> DomainResult<Vec<AuditEntry>> {
        rows.into_iter()
            .map(|row| -> DomainResult<AuditEntry> {
                let row = serde_json::from_value::<SurrealAuditRow>(row).map_err(|err| {
                    DomainError::Storage(format!("invalid audit row: {err}"))
                })?;
                let status = AuditStatus::parse(&row.status).ok_or_else(|| {
                    DomainError::Storage(format!("invalid audit status '{}'", row.status))
                })?;
                let created_at_ms = parse_rfc3339_ms(&row.created_at).ok_or_else(|| {
                    DomainError::Storage(format!("invalid timestamp '{}'", row.created_at))
                })?;
                Ok(AuditEntry {
                    user_id: row.user_id,
                    email: row.email,
                    status,
                    identity_id: row.identity_id,
                    detail: row.detail,
                    created_at_ms,
                })
            })
            .collect()
    }
}

impl AuditLog for SurrealAuditLog {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, DomainResult<()>> {
        let entry = entry.clone();
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query(
                    "CREATE identity_backfill_audit SET \
                        user_id = $user_id, \
                        email = $email, \
                        status = $status, \
                        identity_id = $identity_id, \
                        detail = $detail, \
                        created_at = <datetime>$created_at \
                     RETURN NONE;",
                )
                .bind(("user_id", entry.user_id))
                .bind(("email", entry.email))
                .bind(("status", entry.status.as_str().to_string()))
                .bind(("identity_id", entry.identity_id))
                .bind(("detail", entry.detail))
                .bind(("created_at", format_ms_rfc3339(entry.created_at_ms)))
                .await
                .and_then(|response| response.check())
                .map_err(Self::map_surreal_error)?;
            Ok(())
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<AuditEntry>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT user_id, email, status, identity_id, detail, \
                            <string>created_at AS created_at \
                     FROM identity_backfill_audit WHERE user_id = $user_id \
                     ORDER BY created_at ASC",
                )
                .bind(("user_id", user_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Storage(format!("invalid query result: {err}")))?;
            Self::decode_rows(rows)
        })
    }
}
