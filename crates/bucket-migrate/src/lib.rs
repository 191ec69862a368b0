//! # bucket-migrate
//!
//! Staged table migration through object storage.
//!
//! A migration runs in three stages:
//!
//! - **Extract** streams a source query into one or more shards in a bucket
//! - **Load** reads every shard a locator resolves to and inserts the records
//!   into a target table inside a single transaction, rejecting bad records
//!   up to a configured limit
//! - **Reconcile** compares source and committed counts and classifies the run
//!
//! ## Example
//!
//! ```rust,no_run
//! use bucket_migrate::{CancellationToken, Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let pipeline = Pipeline::connect(config).await?;
//!     let report = pipeline.run(&CancellationToken::new()).await?;
//!     println!("{}: {} of {} records", report.status, report.target_count, report.source_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod format;
pub mod load;
pub mod orchestrator;
pub mod reconcile;
pub mod storage;

// Re-exports for convenient access
pub use config::{Config, ConfigArgs, MigrationConfig, SourceConfig, StagingConfig, TargetConfig};
pub use core::{Batch, Column, ColumnType, Record, RejectReason, RejectedRecord, Schema, StagedArtifact, Value};
pub use error::{MigrateError, Result};
pub use extract::{ExtractRequest, Extractor, LargeTextPolicy};
pub use format::Format;
pub use load::{LoadRequest, LoadResult, Loader};
pub use orchestrator::{health_check, HealthCheckResult, Pipeline, ProbeResult};
pub use reconcile::{MigrationReport, MigrationStatus};
pub use storage::{AccessGrant, FsObjectStore, Locator, StagingLocation};
pub use tokio_util::sync::CancellationToken;
