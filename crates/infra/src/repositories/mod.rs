mod audit;
mod users;

pub use audit::SurrealAuditLog;
pub use users::SurrealUserRepository;
