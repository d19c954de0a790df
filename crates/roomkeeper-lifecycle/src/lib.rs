pub mod allowed;
pub mod commands;
pub mod config;
pub mod controls;
pub mod error;
pub mod json_file;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod teardown;

pub use error::LifecycleError;
