mod common;

use std::sync::Arc;

use common::{
    CountingRegistration, FlakyAuditLog, GrowingUserRepository, RecordingIdentityProvider,
    ScriptedRegistration, UnavailableCache, identity, user,
};
use idlink_domain::agent_info::InMemoryAgentInfoCache;
use idlink_domain::audit::{AuditStatus, InMemoryAuditLog};
use idlink_domain::backfill::{BackfillConfig, BackfillError, BackfillOutcome, BackfillService};
use idlink_domain::ports::audit::AuditLog;
use idlink_domain::ports::cache::AgentInfoCache;
use idlink_domain::ports::identity_provider::IdentityProviderError;
use idlink_domain::ports::registration::{LinkOutcome, LinkedUser, Registration, RegistrationError};
use idlink_domain::ports::users::UserRepository;
use idlink_domain::users::{InMemoryUserRepository, NewUser};

const CACHE_PREFIX: &str = "@agentInfo:authId";

struct Harness {
    users: InMemoryUserRepository,
    provider: Arc<RecordingIdentityProvider>,
    audit: InMemoryAuditLog,
    cache: InMemoryAgentInfoCache,
}

impl Harness {
    fn new(users: InMemoryUserRepository, provider: RecordingIdentityProvider) -> Self {
        Self {
            users,
            provider: Arc::new(provider),
            audit: InMemoryAuditLog::new(),
            cache: InMemoryAgentInfoCache::new(CACHE_PREFIX),
        }
    }

    fn service(&self, batch_size: usize) -> BackfillService {
        self.service_with(
            Arc::new(CountingRegistration::new(&self.users)),
            Arc::new(self.audit.clone()),
            Arc::new(self.cache.clone()),
            batch_size,
        )
    }

    fn service_with(
        &self,
        registration: Arc<dyn Registration>,
        audit: Arc<dyn AuditLog>,
        cache: Arc<dyn AgentInfoCache>,
        batch_size: usize,
    ) -> BackfillService {
        BackfillService::new(
            Arc::new(self.users.clone()),
            self.provider.clone(),
            registration,
            audit,
            cache,
            BackfillConfig { batch_size },
        )
    }
}

fn outcome(processed: u64, updated: u64, skipped: u64, retried_batches: u64) -> BackfillOutcome {
    BackfillOutcome {
        processed,
        updated,
        skipped,
        retried_batches,
    }
}

#[tokio::test]
async fn empty_store_reports_zero_counters() {
    let h = Harness::new(InMemoryUserRepository::new(), RecordingIdentityProvider::new(vec![]));
    assert_eq!(h.service(10).run().await.unwrap(), BackfillOutcome::default());
}

#[tokio::test]
async fn already_linked_users_are_skipped_without_provider_calls() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "a@example.com", Some("kratos-1"))]),
        RecordingIdentityProvider::new(vec![]),
    );

    assert_eq!(h.service(10).run().await.unwrap(), outcome(1, 0, 1, 0));
    assert_eq!(h.provider.by_email_calls(), 0);
    assert!(h.audit.entries().await.is_empty());
}

#[tokio::test]
async fn single_match_links_user_and_invalidates_cache() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "u@t.com", None)]),
        RecordingIdentityProvider::new(vec![identity("kratos-1", "u@t.com", false)]),
    );

    assert_eq!(h.service(10).run().await.unwrap(), outcome(1, 1, 0, 0));

    let linked = h.users.find_by_id("user-1").await.unwrap().unwrap();
    assert_eq!(linked.authentication_id.as_deref(), Some("kratos-1"));
    assert_eq!(
        h.cache.invalidated_keys().await,
        vec![format!("{CACHE_PREFIX}:kratos-1")]
    );
    assert!(h.audit.entries().await.is_empty());
}

#[tokio::test]
async fn missing_identity_is_audited() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "nobody@example.com", None)]),
        RecordingIdentityProvider::new(vec![]),
    );

    assert_eq!(h.service(10).run().await.unwrap(), outcome(1, 0, 1, 0));
    let entries = h.audit.list_by_user("user-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Missing);
    assert_eq!(entries[0].email, "nobody@example.com");
    assert_eq!(entries[0].detail.as_deref(), Some("identity not found for email"));
}

#[tokio::test]
async fn multiple_identities_are_audited_and_user_left_unlinked() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "dup@example.com", None)]),
        RecordingIdentityProvider::new(vec![
            identity("kratos-duplicate-1", "dup@example.com", true),
            identity("kratos-duplicate-2", "dup@example.com", true),
        ]),
    );

    assert_eq!(h.service(10).run().await.unwrap(), outcome(1, 0, 1, 0));

    let entries = h.audit.list_by_user("user-1").await.unwrap();
    assert_eq!(entries[0].status, AuditStatus::Duplicate);
    assert_eq!(
        entries[0].detail.as_deref(),
        Some("multiple identities resolved: kratos-duplicate-1, kratos-duplicate-2")
    );
    let unchanged = h.users.find_by_id("user-1").await.unwrap().unwrap();
    assert!(unchanged.authentication_id.is_none());
}

#[tokio::test]
async fn identity_held_by_another_user_is_a_conflict() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([
            user("user-conflict-existing", "first@example.com", Some("kratos-conflict")),
            user("user-conflict", "second@example.com", None),
        ]),
        RecordingIdentityProvider::new(vec![identity("kratos-conflict", "second@example.com", true)]),
    );

    assert_eq!(h.service(10).run().await.unwrap(), outcome(2, 0, 2, 0));

    let entries = h.audit.list_by_user("user-conflict").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Duplicate);
    assert_eq!(entries[0].identity_id.as_deref(), Some("kratos-conflict"));
    assert_eq!(
        entries[0].detail.as_deref(),
        Some("authentication id already linked to user-conflict-existing")
    );
    let holder = h.users.find_by_id("user-conflict-existing").await.unwrap().unwrap();
    assert_eq!(holder.authentication_id.as_deref(), Some("kratos-conflict"));
    let other = h.users.find_by_id("user-conflict").await.unwrap().unwrap();
    assert!(other.authentication_id.is_none());
}

#[tokio::test]
async fn provider_failure_for_one_user_does_not_stop_the_pass() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([
            user("user-1", "a@example.com", None),
            user("user-2", "b@example.com", None),
        ]),
        RecordingIdentityProvider::failing(IdentityProviderError::Unavailable("503".into())),
    );

    assert_eq!(h.service(10).run().await.unwrap(), outcome(2, 0, 2, 0));
    let entries = h.audit.entries().await;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.status == AuditStatus::Error));
    assert_eq!(
        entries[0].detail.as_deref(),
        Some("identity provider unavailable: 503")
    );
}

#[tokio::test]
async fn link_resolving_to_another_user_is_skipped() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "u@t.com", None)]),
        RecordingIdentityProvider::new(vec![identity("kratos-1", "u@t.com", true)]),
    );
    let registration = ScriptedRegistration::new(Ok(LinkedUser {
        user: user("someone-else", "u@t.com", Some("kratos-1")),
        outcome: LinkOutcome::Created,
    }));
    let service = h.service_with(
        Arc::new(registration),
        Arc::new(h.audit.clone()),
        Arc::new(h.cache.clone()),
        10,
    );

    assert_eq!(service.run().await.unwrap(), outcome(1, 0, 1, 0));
    let entries = h.audit.list_by_user("user-1").await.unwrap();
    assert_eq!(
        entries[0].detail.as_deref(),
        Some("link resolved to different user someone-else")
    );
    assert!(h.cache.invalidated_keys().await.is_empty());
}

#[tokio::test]
async fn link_that_did_not_persist_is_skipped() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "u@t.com", None)]),
        RecordingIdentityProvider::new(vec![identity("kratos-1", "u@t.com", true)]),
    );
    let registration = ScriptedRegistration::new(Ok(LinkedUser {
        user: user("user-1", "u@t.com", Some("kratos-other")),
        outcome: LinkOutcome::Linked,
    }));
    let service = h.service_with(
        Arc::new(registration),
        Arc::new(h.audit.clone()),
        Arc::new(h.cache.clone()),
        10,
    );

    assert_eq!(service.run().await.unwrap(), outcome(1, 0, 1, 0));
    let entries = h.audit.list_by_user("user-1").await.unwrap();
    assert_eq!(entries[0].status, AuditStatus::Error);
    assert_eq!(
        entries[0].detail.as_deref(),
        Some("authentication id did not persist")
    );
}

#[tokio::test]
async fn registration_error_is_audited_and_skipped() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "u@t.com", None)]),
        RecordingIdentityProvider::new(vec![identity("kratos-1", "u@t.com", true)]),
    );
    let registration =
        ScriptedRegistration::new(Err(RegistrationError::AlreadyRegistered("u@t.com".into())));
    let service = h.service_with(
        Arc::new(registration),
        Arc::new(h.audit.clone()),
        Arc::new(h.cache.clone()),
        10,
    );

    assert_eq!(service.run().await.unwrap(), outcome(1, 0, 1, 0));
    let entries = h.audit.entries().await;
    assert_eq!(entries[0].status, AuditStatus::Error);
    assert_eq!(entries[0].identity_id.as_deref(), Some("kratos-1"));
}

#[tokio::test]
async fn page_failure_is_retried_once_without_double_counting() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([
            user("user-1", "u@t.com", None),
            user("user-2", "gone@t.com", None),
        ]),
        RecordingIdentityProvider::new(vec![identity("kratos-1", "u@t.com", true)]),
    );
    let service = h.service_with(
        Arc::new(CountingRegistration::new(&h.users)),
        Arc::new(FlakyAuditLog::new(h.audit.clone(), 1)),
        Arc::new(h.cache.clone()),
        10,
    );

    assert_eq!(service.run().await.unwrap(), outcome(2, 1, 1, 1));
    // user-1 settled before the failure, so only user-2 hits the provider twice.
    assert_eq!(h.provider.by_email_calls(), 3);
    assert_eq!(h.audit.entries().await.len(), 1);
    assert_eq!(h.cache.invalidated_keys().await.len(), 1);
}

#[tokio::test]
async fn page_failing_twice_propagates_first_error() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([
            user("user-1", "a@t.com", Some("kratos-a")),
            user("user-2", "gone@t.com", None),
        ]),
        RecordingIdentityProvider::new(vec![]),
    );
    let service = h.service_with(
        Arc::new(CountingRegistration::new(&h.users)),
        Arc::new(FlakyAuditLog::new(h.audit.clone(), 2)),
        Arc::new(h.cache.clone()),
        1,
    );

    let err = service.run().await.unwrap_err();
    assert!(matches!(err, BackfillError::PageFailed { .. }));
    assert_eq!(err.partial_outcome(), outcome(1, 0, 1, 0));
}

#[tokio::test]
async fn cache_failure_does_not_undo_the_link() {
    let h = Harness::new(
        InMemoryUserRepository::with_users([user("user-1", "u@t.com", None)]),
        RecordingIdentityProvider::new(vec![identity("kratos-1", "u@t.com", true)]),
    );
    let service = h.service_with(
        Arc::new(CountingRegistration::new(&h.users)),
        Arc::new(h.audit.clone()),
        Arc::new(UnavailableCache),
        10,
    );

    assert_eq!(service.run().await.unwrap(), outcome(1, 1, 0, 0));
}

#[tokio::test]
async fn pages_cover_every_user_and_rerun_is_a_no_op() {
    let users = (1..=5).map(|n| user(&format!("user-{n}"), &format!("u{n}@t.com"), None));
    let identities = (1..=5)
        .map(|n| identity(&format!("kratos-{n}"), &format!("u{n}@t.com"), true))
        .collect();
    let h = Harness::new(
        InMemoryUserRepository::with_users(users),
        RecordingIdentityProvider::new(identities),
    );

    assert_eq!(h.service(2).run().await.unwrap(), outcome(5, 5, 0, 0));
    let calls = h.provider.by_email_calls();
    assert_eq!(h.service(2).run().await.unwrap(), outcome(5, 0, 5, 0));
    assert_eq!(h.provider.by_email_calls(), calls);
}

#[tokio::test]
async fn rows_inserted_mid_run_are_picked_up_after_a_short_page() {
    let users = InMemoryUserRepository::with_users([user("user-1", "a@t.com", None)]);
    let late = NewUser {
        email: "late@t.com".into(),
        authentication_id: None,
        agent_id: Some("agent-late".into()),
        first_name: String::new(),
        last_name: String::new(),
        avatar_url: String::new(),
    };
    let audit = InMemoryAuditLog::new();
    let service = BackfillService::new(
        Arc::new(GrowingUserRepository::new(users.clone(), late)),
        Arc::new(RecordingIdentityProvider::new(vec![
            identity("kratos-1", "a@t.com", true),
            identity("kratos-late", "late@t.com", true),
        ])),
        Arc::new(CountingRegistration::new(&users)),
        Arc::new(audit.clone()),
        Arc::new(InMemoryAgentInfoCache::new(CACHE_PREFIX)),
        BackfillConfig { batch_size: 10 },
    );

    assert_eq!(service.run().await.unwrap(), outcome(2, 2, 0, 0));

    let picked_up = users.find_by_email("late@t.com").await.unwrap().unwrap();
    assert_eq!(picked_up.authentication_id.as_deref(), Some("kratos-late"));
    assert!(audit.entries().await.is_empty());
}
