pub mod agent_info;
pub mod audit;
pub mod auth;
pub mod backfill;
pub mod error;
pub mod identity;
pub mod ports;
pub mod registration;
pub mod resolution;
pub mod users;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
