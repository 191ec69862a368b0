//! Store implementations.
//!
//! - [`postgres`]: PostgreSQL source and target
//! - [`memory`]: in-process source and target
//!
//! Object stores live in [`crate::storage`].

pub mod memory;
pub mod postgres;

pub use memory::{MemorySource, MemoryTarget};
pub use postgres::{PostgresSource, PostgresTarget};
