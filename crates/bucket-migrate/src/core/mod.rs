//! Core abstractions shared by every pipeline stage.
//!
//! - [`schema`]: column and relation metadata
//! - [`value`]: typed values, records and batches
//! - [`reject`]: rejected-record classification
//! - [`artifact`]: description of a staged extraction
//! - [`traits`]: source, target and object store traits

pub mod artifact;
pub mod reject;
pub mod schema;
pub mod traits;
pub mod value;

pub use artifact::{ShardInfo, StagedArtifact};
pub use reject::{RejectReason, RejectedRecord};
pub use schema::{Column, ColumnType, Schema};
pub use traits::{InsertOutcome, LoadSession, ObjectStore, SourceStore, TargetStore};
pub use value::{Batch, Record, Value};
