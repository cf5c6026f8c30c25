use crate::DomainResult;
use crate::audit::AuditEntry;
use crate::ports::BoxFuture;

pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, DomainResult<()>>;

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<AuditEntry>>>;
}
