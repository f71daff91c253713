//! # strata-core
//!
//! Core abstractions for the Strata hierarchical migration engine.
//!
//! This crate provides the foundational types shared by every Strata component:
//!
//! - **Document Store Contract**: The path-addressed store trait, batched atomic
//!   commits with per-write preconditions, and the bundled implementations
//! - **Identifiers**: Strongly-typed run identifiers
//! - **Error Types**: Store-level errors with transient/permanent classification
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! # async fn demo() -> strata_core::Result<()> {
//! let store = MemoryStore::new();
//! let mut doc = Document::new();
//! doc.insert("name".into(), serde_json::json!("Computer Science"));
//!
//! let batch = WriteBatch::new().set("departments/CS", doc);
//! store.commit(batch).await?;
//!
//! assert!(store.get("departments/CS").await?.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod file_store;
pub mod id;
pub mod observability;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::file_store::JsonFileStore;
    pub use crate::id::RunId;
    pub use crate::store::{
        CommitResult, Document, DocumentStore, MemoryStore, WriteBatch, WriteOp,
        WritePrecondition,
    };
}

pub use error::{Error, Result};
pub use file_store::JsonFileStore;
pub use id::RunId;
pub use observability::{LogFormat, init_logging};
pub use store::{
    CommitResult, Document, DocumentStore, MemoryStore, WriteBatch, WriteOp, WritePrecondition,
    validate_path,
};
