//! Runtime adapters for Remedy (persistence, backups, config, discovery).

pub mod atomic;
pub mod backup;
pub mod config;
pub mod discover;
pub mod persist;
pub mod violations;
