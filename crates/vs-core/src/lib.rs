//! vs-core: shared types, errors, and configuration.
//!
//! This crate is the foundational dependency for all other vs-* crates,
//! providing the unified error type, the stream identity types that the
//! orchestrator keys sessions by, and the application configuration tree.

pub mod config;
pub mod error;
pub mod language;
pub mod stream;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use stream::*;
