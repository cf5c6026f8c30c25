pub mod cache;
pub mod config;
pub mod db;
pub mod kratos;
pub mod logging;
pub mod repositories;
pub mod resolution_metrics;
pub mod services;
