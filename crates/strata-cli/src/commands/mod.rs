//! CLI command implementations.

pub mod backup;
pub mod migrate;
pub mod plan;
pub mod rollback;
pub mod runs;
pub mod verify;
