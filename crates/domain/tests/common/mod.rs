#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use idlink_domain::DomainResult;
use idlink_domain::agent_info::AgentInfo;
use idlink_domain::audit::{AuditEntry, InMemoryAuditLog};
use idlink_domain::error::DomainError;
use idlink_domain::identity::{
    ExternalIdentity, IdentityName, IdentityTraits, VerifiableAddress, normalize_email,
};
use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::audit::AuditLog;
use idlink_domain::ports::cache::{AgentInfoCache, CacheError};
use idlink_domain::ports::identity_provider::{IdentityProvider, IdentityProviderError};
use idlink_domain::ports::metrics::{FailureReason, IdentityMetrics};
use idlink_domain::ports::registration::{LinkedUser, Registration, RegistrationError};
use idlink_domain::registration::{RegistrationConfig, UserRegistrationService};
use idlink_domain::ports::users::{UserRepository, UserStoreError};
use idlink_domain::users::{InMemoryUserRepository, NewUser, User};

pub fn identity(id: &str, email: &str, verified: bool) -> ExternalIdentity {
    ExternalIdentity {
        id: id.into(),
        traits: IdentityTraits {
            email: Some(email.into()),
            name: Some(IdentityName {
                first: Some("Test".into()),
                last: Some("Person".into()),
            }),
            picture: None,
        },
        verifiable_addresses: vec![VerifiableAddress {
            value: Some(email.into()),
            via: "email".into(),
            verified,
        }],
    }
}

pub fn user(user_id: &str, email: &str, authentication_id: Option<&str>) -> User {
    User {
        user_id: user_id.into(),
        row_id: 0,
        email: email.into(),
        authentication_id: authentication_id.map(Into::into),
        agent_id: Some(format!("agent-{user_id}")),
        first_name: String::new(),
        last_name: String::new(),
        avatar_url: String::new(),
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

pub struct RecordingIdentityProvider {
    identities: Vec<ExternalIdentity>,
    failure: Option<IdentityProviderError>,
    by_id_calls: AtomicUsize,
    by_email_calls: AtomicUsize,
}

impl RecordingIdentityProvider {
    pub fn new(identities: Vec<ExternalIdentity>) -> Self {
        Self {
            identities,
            failure: None,
            by_id_calls: AtomicUsize::new(0),
            by_email_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(failure: IdentityProviderError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(Vec::new())
        }
    }

    pub fn by_id_calls(&self) -> usize {
        self.by_id_calls.load(Ordering::SeqCst)
    }

    pub fn by_email_calls(&self) -> usize {
        self.by_email_calls.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for RecordingIdentityProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn find_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Vec<ExternalIdentity>, IdentityProviderError>> {
        let email = normalize_email(email);
        Box::pin(async move {
            self.by_email_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            Ok(self
                .identities
                .iter()
                .filter(|identity| identity.email().as_deref() == Some(email.as_str()))
                .cloned()
                .collect())
        })
    }

    fn get_identity_by_id(
        &self,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<Option<ExternalIdentity>, IdentityProviderError>> {
        let identity_id = identity_id.to_string();
        Box::pin(async move {
            self.by_id_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            Ok(self
                .identities
                .iter()
                .find(|identity| identity.id == identity_id)
                .cloned())
        })
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl IdentityMetrics for RecordingMetrics {
    fn record_lookup_hit(&self) {
        self.push("lookup_hit".into());
    }

    fn record_provision(&self) {
        self.push("provision".into());
    }

    fn record_failure(&self, reason: FailureReason) {
        self.push(format!("failure:{}", reason.as_str()));
    }
}

/// Real registration service that counts calls.
pub struct CountingRegistration {
    inner: UserRegistrationService,
    register_calls: AtomicUsize,
    link_calls: AtomicUsize,
}

impl CountingRegistration {
    pub fn new(users: &InMemoryUserRepository) -> Self {
        Self {
            inner: UserRegistrationService::new(
                Arc::new(users.clone()),
                RegistrationConfig::default(),
            ),
            register_calls: AtomicUsize::new(0),
            link_calls: AtomicUsize::new(0),
        }
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> usize {
        self.link_calls.load(Ordering::SeqCst)
    }
}

impl Registration for CountingRegistration {
    fn register_new_user(
        &self,
        agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<User, RegistrationError>> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.register_new_user(agent_info)
    }

    fn create_or_link(
        &self,
        agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<LinkedUser, RegistrationError>> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_or_link(agent_info)
    }
}

/// Returns the same canned result for every call.
pub struct ScriptedRegistration {
    result: Result<LinkedUser, RegistrationError>,
}

impl ScriptedRegistration {
    pub fn new(result: Result<LinkedUser, RegistrationError>) -> Self {
        Self { result }
    }
}

impl Registration for ScriptedRegistration {
    fn register_new_user(
        &self,
        _agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<User, RegistrationError>> {
        let result = self.result.clone().map(|linked| linked.user);
        Box::pin(async move { result })
    }

    fn create_or_link(
        &self,
        _agent_info: &AgentInfo,
    ) -> BoxFuture<'_, Result<LinkedUser, RegistrationError>> {
        let result = self.result.clone();
        Box::pin(async move { result })
    }
}

/// Fails the next `failures` appends, then behaves like the in-memory log.
pub struct FlakyAuditLog {
    inner: InMemoryAuditLog,
    failures_remaining: AtomicUsize,
}

impl FlakyAuditLog {
    pub fn new(inner: InMemoryAuditLog, failures: usize) -> Self {
        Self {
            inner,
            failures_remaining: AtomicUsize::new(failures),
        }
    }
}

impl AuditLog for FlakyAuditLog {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, DomainResult<()>> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Box::pin(async {
                Err(DomainError::Unavailable("audit store offline".into()))
            });
        }
        self.inner.append(entry)
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<AuditEntry>>> {
        self.inner.list_by_user(user_id)
    }
}

pub struct UnavailableCache;

impl AgentInfoCache for UnavailableCache {
    fn invalidate(&self, _authentication_id: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".into())) })
    }
}

/// Lookups always miss; writes still hit the shared table and its uniqueness
/// rules, the way two requests look when both read before either writes.
#[derive(Clone)]
pub struct BlindLookupRepository {
    inner: InMemoryUserRepository,
}

impl BlindLookupRepository {
    pub fn new(inner: InMemoryUserRepository) -> Self {
        Self { inner }
    }
}

impl UserRepository for BlindLookupRepository {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        self.inner.find_by_id(user_id)
    }

    fn find_by_email(&self, _email: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        Box::pin(async { Ok(None) })
    }

    fn find_by_authentication_id(
        &self,
        _authentication_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        Box::pin(async { Ok(None) })
    }

    fn create(&self, user: &NewUser) -> BoxFuture<'_, Result<User, UserStoreError>> {
        self.inner.create(user)
    }

    fn save(&self, user: &User) -> BoxFuture<'_, Result<User, UserStoreError>> {
        self.inner.save(user)
    }

    fn list_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<User>, UserStoreError>> {
        self.inner.list_after(cursor, limit)
    }
}

/// Inserts `late` into the table right after the first page is read.
pub struct GrowingUserRepository {
    inner: InMemoryUserRepository,
    late: Mutex<Option<NewUser>>,
}

impl GrowingUserRepository {
    pub fn new(inner: InMemoryUserRepository, late: NewUser) -> Self {
        Self {
            inner,
            late: Mutex::new(Some(late)),
        }
    }
}

impl UserRepository for GrowingUserRepository {
    fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        self.inner.find_by_id(user_id)
    }

    fn find_by_email(&self, email: &str) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        self.inner.find_by_email(email)
    }

    fn find_by_authentication_id(
        &self,
        authentication_id: &str,
    ) -> BoxFuture<'_, Result<Option<User>, UserStoreError>> {
        self.inner.find_by_authentication_id(authentication_id)
    }

    fn create(&self, user: &NewUser) -> BoxFuture<'_, Result<User, UserStoreError>> {
        self.inner.create(user)
    }

    fn save(&self, user: &User) -> BoxFuture<'_, Result<User, UserStoreError>> {
        self.inner.save(user)
    }

    fn list_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<User>, UserStoreError>> {
        Box::pin(async move {
            let page = self.inner.list_after(cursor, limit).await?;
            let late = self.late.lock().unwrap().take();
            if let Some(late) = late {
                self.inner.create(&late).await?;
            }
            Ok(page)
        })
    }
}
