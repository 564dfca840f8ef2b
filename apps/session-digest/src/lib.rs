pub mod config;
pub mod digest;
pub mod error;
pub mod format;
pub mod reconcile;
pub mod repository;
pub mod session;
pub mod sinks;
pub mod time;
pub mod vault;
