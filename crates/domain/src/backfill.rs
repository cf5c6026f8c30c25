use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::agent_info::build_agent_info;
use crate::audit::AuditEntry;
use crate::error::DomainError;
use crate::identity::normalize_email;
use crate::ports::audit::AuditLog;
use crate::ports::cache::AgentInfoCache;
use crate::ports::identity_provider::IdentityProvider;
use crate::ports::registration::Registration;
use crate::ports::users::{UserRepository, UserStoreError};
use crate::users::User;

#[derive(Clone, Debug)]
pub struct BackfillConfig {
    pub batch_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOutcome {
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub retried_batches: u64,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("audit log write failed: {0}")]
    Audit(#[from] DomainError),
    #[error("user store failed: {0}")]
    Store(#[from] UserStoreError),
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("a backfill run is already in progress")]
    AlreadyRunning,
    #[error("failed to load users after row {cursor:?}: {source}")]
    Fetch {
        cursor: Option<i64>,
        outcome: BackfillOutcome,
        #[source]
        source: UserStoreError,
    },
    #[error("backfill page after row {cursor:?} failed after retry: {source}")]
    PageFailed {
        cursor: Option<i64>,
        outcome: BackfillOutcome,
        #[source]
        source: PageError,
    },
}

impl BackfillError {
    /// Counters accumulated by pages that completed before the failure.
    pub fn partial_outcome(&self) -> BackfillOutcome {
        match self {
            BackfillError::AlreadyRunning => BackfillOutcome::default(),
            BackfillError::Fetch { outcome, .. } | BackfillError::PageFailed { outcome, .. } => {
                *outcome
            }
        }
    }
}

/// Decision taken for one user during a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    AlreadyLinked,
    Updated {
        identity_id: String,
    },
    Missing,
    Duplicate {
        identity_ids: Vec<String>,
    },
    Conflict {
        identity_id: String,
        holder_user_id: String,
    },
    LinkedElsewhere {
        identity_id: String,
        resolved_user_id: String,
    },
    NotPersisted {
        identity_id: String,
    },
    Failed {
        identity_id: Option<String>,
        detail: String,
    },
}

impl Disposition {
    pub fn is_update(&self) -> bool {
        matches!(self, Disposition::Updated { .. })
    }

    pub fn audit_entry(&self, user: &User) -> Option<AuditEntry> {
        match self {
            Disposition::AlreadyLinked | Disposition::Updated { .. } => None,
            Disposition::Missing => Some(AuditEntry::missing(user)),
            Disposition::Duplicate { identity_ids } => {
                Some(AuditEntry::duplicate(user, identity_ids))
            }
            Disposition::Conflict {
                identity_id,
                holder_user_id,
            } => Some(AuditEntry::conflict(user, identity_id, holder_user_id)),
            Disposition::LinkedElsewhere {
                identity_id,
                resolved_user_id,
            } => Some(AuditEntry::linked_elsewhere(user, identity_id, resolved_user_id)),
            Disposition::NotPersisted { identity_id } => {
                Some(AuditEntry::not_persisted(user, identity_id))
            }
            Disposition::Failed {
                identity_id,
                detail,
            } => Some(AuditEntry::error(user, identity_id.as_deref(), detail.clone())),
        }
    }
}

/// Dispositions settled within the current page. A retried page replays these
/// instead of contacting the provider or writing audit entries again.
#[derive(Default)]
struct PageProgress {
    settled: Vec<Disposition>,
    users: HashSet<String>,
}

impl PageProgress {
    fn is_settled(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }

    fn settle(&mut self, user_id: &str, disposition: Disposition) {
        self.users.insert(user_id.to_string());
        self.settled.push(disposition);
    }

    fn apply(&self, mut outcome: BackfillOutcome) -> BackfillOutcome {
        for disposition in &self.settled {
            outcome.processed += 1;
            if disposition.is_update() {
                outcome.updated += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        outcome
    }
}

/// Links pre-existing users to their provider identity by email.
#[derive(Clone)]
pub struct BackfillService {
    users: Arc<dyn UserRepository>,
    provider: Arc<dyn IdentityProvider>,
    registration: Arc<dyn Registration>,
    audit: Arc<dyn AuditLog>,
    cache: Arc<dyn AgentInfoCache>,
    config: BackfillConfig,
    running: Arc<Mutex<()>>,
}

impl BackfillService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        provider: Arc<dyn IdentityProvider>,
        registration: Arc<dyn Registration>,
        audit: Arc<dyn AuditLog>,
        cache: Arc<dyn AgentInfoCache>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            users,
            provider,
            registration,
            audit,
            cache,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Runs one full pass over every user. Concurrent passes are rejected.
    pub async fn run(&self) -> Result<BackfillOutcome, BackfillError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| BackfillError::AlreadyRunning)?;
        let span = tracing::info_span!("identity_backfill", batch_size = self.config.batch_size);
        self.run_pages().instrument(span).await
    }

    async fn run_pages(&self) -> Result<BackfillOutcome, BackfillError> {
        let batch_size = self.config.batch_size.max(1);
        let mut outcome = BackfillOutcome::default();
        let mut cursor: Option<i64> = None;

        loop {
            let page = self
                .users
                .list_after(cursor, batch_size)
                .await
                .map_err(|source| BackfillError::Fetch {
                    cursor,
                    outcome,
                    source,
                })?;
            let Some(last) = page.last() else {
                break;
            };
            let next_cursor = Some(last.row_id);

            outcome = self.process_page_with_retry(&page, cursor, outcome).await?;
            cursor = next_cursor;
        }

        tracing::info!(
            processed = outcome.processed,
            updated = outcome.updated,
            skipped = outcome.skipped,
            retried_batches = outcome.retried_batches,
            "identity backfill pass complete"
        );
        Ok(outcome)
    }

    async fn process_page_with_retry(
        &self,
        page: &[User],
        cursor: Option<i64>,
        snapshot: BackfillOutcome,
    ) -> Result<BackfillOutcome, BackfillError> {
        let mut progress = PageProgress::default();
        let first = match self.process_page(page, &mut progress).await {
            Ok(()) => return Ok(progress.apply(snapshot)),
            Err(err) => err,
        };

        tracing::warn!(
            error = %first,
            users = page.len(),
            settled = progress.settled.len(),
            "backfill page failed, retrying once"
        );
        match self.process_page(page, &mut progress).await {
            Ok(()) => {
                let mut outcome = progress.apply(snapshot);
                outcome.retried_batches += 1;
                Ok(outcome)
            }
            Err(second) => {
                tracing::error!(
                    error = %second,
                    first_error = %first,
                    "backfill page failed again"
                );
                Err(BackfillError::PageFailed {
                    cursor,
                    outcome: snapshot,
                    source: first,
                })
            }
        }
    }

    async fn process_page(
        &self,
        page: &[User],
        progress: &mut PageProgress,
    ) -> Result<(), PageError> {
        for user in page {
            if progress.is_settled(&user.user_id) {
                continue;
            }
            let disposition = self.process_user(user).await?;
            if let Some(entry) = disposition.audit_entry(user) {
                self.audit.append(&entry).await?;
            }
            if let Disposition::Updated { identity_id } = &disposition {
                self.invalidate_agent_info(identity_id).await;
            }
            progress.settle(&user.user_id, disposition);
        }
        Ok(())
    }

    async fn process_user(&self, user: &User) -> Result<Disposition, PageError> {
        if let Some(existing) = user.linked_authentication_id() {
            tracing::debug!(
                user_id = %user.user_id,
                authentication_id = %existing,
                "user already linked, skipping"
            );
            return Ok(Disposition::AlreadyLinked);
        }

        let email = normalize_email(&user.email);
        if email.is_empty() {
            return Ok(Disposition::Missing);
        }
        let identities = match self.provider.find_by_email(&email).await {
            Ok(identities) => identities,
            Err(err) => {
                tracing::warn!(user_id = %user.user_id, error = %err, "identity lookup failed");
                return Ok(Disposition::Failed {
                    identity_id: None,
                    detail: err.to_string(),
                });
            }
        };

        let identity = match identities.as_slice() {
            [] => {
                tracing::info!(user_id = %user.user_id, "no identity found for user email");
                return Ok(Disposition::Missing);
            }
            [identity] => identity,
            many => {
                let identity_ids = many.iter().map(|identity| identity.id.clone()).collect();
                tracing::warn!(
                    user_id = %user.user_id,
                    "multiple identities share the user email"
                );
                return Ok(Disposition::Duplicate { identity_ids });
            }
        };

        if let Some(holder) = self.users.find_by_authentication_id(&identity.id).await?
            && holder.user_id != user.user_id
        {
            tracing::warn!(
                user_id = %user.user_id,
                identity_id = %identity.id,
                holder_user_id = %holder.user_id,
                "identity already linked to another user"
            );
            return Ok(Disposition::Conflict {
                identity_id: identity.id.clone(),
                holder_user_id: holder.user_id,
            });
        }

        let agent_info = build_agent_info(identity, Some(&user.email));
        let linked = match self.registration.create_or_link(&agent_info).await {
            Ok(linked) => linked,
            Err(err) => {
                tracing::error!(
                    user_id = %user.user_id,
                    identity_id = %identity.id,
                    error = %err,
                    "failed to link identity"
                );
                return Ok(Disposition::Failed {
                    identity_id: Some(identity.id.clone()),
                    detail: err.to_string(),
                });
            }
        };

        if linked.user.user_id != user.user_id {
            tracing::warn!(
                user_id = %user.user_id,
                resolved_user_id = %linked.user.user_id,
                "link resolved to a different user"
            );
            return Ok(Disposition::LinkedElsewhere {
                identity_id: identity.id.clone(),
                resolved_user_id: linked.user.user_id,
            });
        }
        if !linked.user.is_linked_to(&identity.id) {
            tracing::warn!(
                user_id = %user.user_id,
                identity_id = %identity.id,
                "authentication id did not persist"
            );
            return Ok(Disposition::NotPersisted {
                identity_id: identity.id.clone(),
            });
        }

        tracing::info!(
            user_id = %user.user_id,
            identity_id = %identity.id,
            "linked user to identity"
        );
        Ok(Disposition::Updated {
            identity_id: identity.id.clone(),
        })
    }

    async fn invalidate_agent_info(&self, identity_id: &str) {
        if let Err(err) = self.cache.invalidate(identity_id).await {
            tracing::warn!(identity_id = %identity_id, error = %err, "agent info cache invalidation failed");
        }
    }
}
