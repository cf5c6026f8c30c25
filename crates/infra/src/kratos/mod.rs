mod client;
mod fixture;

pub use client::KratosIdentityClient;
pub use fixture::FixtureIdentityProvider;
