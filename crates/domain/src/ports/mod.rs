use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod audit;
pub mod cache;
pub mod identity_provider;
pub mod metrics;
pub mod readiness;
pub mod registration;
pub mod users;
