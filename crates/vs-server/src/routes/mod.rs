//! Route handlers.

pub mod debug;
pub mod files;
pub mod health;
pub mod streaming_helpers;
