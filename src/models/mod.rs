//! Data models for sqlkit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{BindStyle, DatabaseType};
pub use query::{MutationResult, Statement, Value};
