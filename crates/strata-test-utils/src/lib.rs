//! Shared test utilities for Strata integration tests.
//!
//! This crate provides:
//! - [`FaultyStore`]: In-memory document store with operation recording and
//!   failure injection
//! - Fixtures for the department/semester scenario and a six-level hierarchy
//! - Custom assertion helpers for run summaries and verification reports
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_test_utils::{FaultyStore, scenario_plan, scenario_source, assert_all_written};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = FaultyStore::new();
//!     let migrator = Migrator::new(store.shared(), scenario_plan(), RunOptions::default())?;
//!     let summary = migrator.run(&scenario_source()).await?;
//!     assert_all_written(&summary, 2);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("strata_migrate=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
