//! Shared plumbing for the Glance workspace.
//!
//! Holds the centralised `tracing` initialisation and the wall-clock helper
//! the cache stamps entries with. Kept dependency-light so every crate can
//! depend on it.

pub mod observability;

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
