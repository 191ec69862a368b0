//! Object storage for staged shards.
//!
//! - [`grant`]: time-limited access grants checked on every call
//! - [`locator`]: exact, wildcard and shard-set resolution
//! - [`fs`]: local directory as a bucket
//! - [`memory`]: in-process bucket for tests and dry runs

pub mod fs;
pub mod grant;
pub mod locator;
pub mod memory;

use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};

pub use fs::FsObjectStore;
pub use grant::{Access, AccessGrant};
pub use locator::Locator;
pub use memory::MemoryObjectStore;

/// A `<bucket directory>/<name or pattern>` staging location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLocation {
    pub bucket: PathBuf,
    pub name: String,
}

impl StagingLocation {
    /// Split a location at its last `/`. A bare name lives in the current
    /// directory.
    pub fn parse(location: &str) -> Result<Self> {
        let (bucket, name) = match location.rsplit_once('/') {
            Some((bucket, name)) if !bucket.is_empty() => (PathBuf::from(bucket), name),
            Some((_, name)) => (PathBuf::from("/"), name),
            None => (PathBuf::from("."), location),
        };
        if name.is_empty() {
            return Err(MigrateError::Config(format!(
                "staging location '{}' has no object name",
                location
            )));
        }
        Ok(Self {
            bucket,
            name: name.to_string(),
        })
    }

    pub fn bucket(&self) -> &Path {
        &self.bucket
    }

    /// Locator for the name part.
    pub fn locator(&self) -> Locator {
        Locator::parse(&self.name)
    }
}

impl std::fmt::Display for StagingLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket.display(), self.name)
    }
}
