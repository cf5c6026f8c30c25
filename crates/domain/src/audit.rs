use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::ports::audit::AuditLog;
use crate::users::User;
use crate::util::now_ms;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Missing,
    Duplicate,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Missing => "missing",
            AuditStatus::Duplicate => "duplicate",
            AuditStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "missing" => Some(AuditStatus::Missing),
            "duplicate" => Some(AuditStatus::Duplicate),
            "error" => Some(AuditStatus::Error),
            _ => None,
        }
    }
}

/// A backfill attempt that left the user unlinked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: String,
    pub email: String,
    pub status: AuditStatus,
    pub identity_id: Option<String>,
    pub detail: Option<String>,
    pub created_at_ms: i64,
}

impl AuditEntry {
    fn for_user(
        user: &User,
        status: AuditStatus,
        identity_id: Option<String>,
        detail: String,
    ) -> Self {
        Self {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            status,
            identity_id,
            detail: Some(detail),
            created_at_ms: now_ms(),
        }
    }

    pub fn missing(user: &User) -> Self {
        Self::for_user(
            user,
            AuditStatus::Missing,
            None,
            "identity not found for email".into(),
        )
    }

    pub fn duplicate(user: &User, identity_ids: &[String]) -> Self {
        Self::for_user(
            user,
            AuditStatus::Duplicate,
            None,
            format!("multiple identities resolved: {}", identity_ids.join(", ")),
        )
    }

    pub fn conflict(user: &User, identity_id: &str, holder_user_id: &str) -> Self {
        Self::for_user(
            user,
            AuditStatus::Duplicate,
            Some(identity_id.to_string()),
            format!("authentication id already linked to {holder_user_id}"),
        )
    }

    pub fn linked_elsewhere(user: &User, identity_id: &str, resolved_user_id: &str) -> Self {
        Self::for_user(
            user,
            AuditStatus::Duplicate,
            Some(identity_id.to_string()),
            format!("link resolved to different user {resolved_user_id}"),
        )
    }

    pub fn not_persisted(user: &User, identity_id: &str) -> Self {
        Self::for_user(
            user,
            AuditStatus::Error,
            Some(identity_id.to_string()),
            "authentication id did not persist".into(),
        )
    }

    pub fn error(user: &User, identity_id: Option<&str>, detail: impl Into<String>) -> Self {
        Self::for_user(
            user,
            AuditStatus::Error,
            identity_id.map(ToString::to_string),
            detail.into(),
        )
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, DomainResult<()>> {
        let entry = entry.clone();
        let entries = self.entries.clone();
        Box::pin(async move {
            entries.write().await.push(entry);
            Ok(())
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<AuditEntry>>> {
        let user_id = user_id.to_string();
        let entries = self.entries.clone();
        Box::pin(async move {
            let guard = entries.read().await;
            Ok(guard
                .iter()
                .filter(|entry| entry.user_id == user_id)
                .cloned()
                .collect())
        })
    }
}
