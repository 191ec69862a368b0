//! Configuration loading and validation.

mod types;
pub mod validation;

pub use types::*;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::extract::{ExtractRequest, LargeTextPolicy};
use crate::format::Format;
use crate::load::LoadRequest;
use crate::storage::Locator;

/// Command-line overrides. `None` leaves the configured value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigArgs {
    pub source_url: Option<String>,
    pub query: Option<String>,
    pub target_url: Option<String>,
    pub target_table: Option<String>,
    pub bucket: Option<PathBuf>,
    pub destination: Option<String>,
    pub format: Option<Format>,
    pub shard_size: Option<u64>,
    pub reject_limit: Option<u64>,
    pub large_text: Option<LargeTextPolicy>,
    pub reject_log: Option<PathBuf>,
    pub truncate: bool,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from command-line values alone.
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        let config = Config::default().with_overrides(args);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of this configuration.
    #[must_use]
    pub fn with_overrides(mut self, args: &ConfigArgs) -> Self {
        if let Some(v) = &args.source_url {
            self.source.url = v.clone();
        }
        if let Some(v) = &args.query {
            self.source.query = v.clone();
        }
        if let Some(v) = &args.target_url {
            self.target.url = v.clone();
        }
        if let Some(v) = &args.target_table {
            self.target.table = v.clone();
        }
        if let Some(v) = &args.bucket {
            self.staging.bucket = v.clone();
        }
        if let Some(v) = &args.destination {
            self.staging.destination = v.clone();
        }
        if let Some(v) = args.format {
            self.staging.format = v;
        }
        if let Some(v) = args.shard_size {
            self.staging.shard_size = Some(v);
        }
        if let Some(v) = args.reject_limit {
            self.migration.reject_limit = v;
        }
        if let Some(v) = args.large_text {
            self.migration.large_text = v;
        }
        if let Some(v) = &args.reject_log {
            self.migration.reject_log = Some(v.clone());
        }
        if args.truncate {
            self.target.truncate_before_load = true;
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Extraction parameters described by this configuration.
    pub fn extract_request(&self) -> ExtractRequest {
        ExtractRequest {
            query: self.source.query.clone(),
            destination: self.staging.destination.clone(),
            format: self.staging.format,
            shard_size: self.staging.shard_size,
            large_text: self.migration.large_text,
            batch_size: self.migration.batch_size,
        }
    }

    /// Locator for the staged shards of the configured destination.
    ///
    /// A destination holding a wildcard is used as-is. A plain name matches
    /// every shard written under it.
    pub fn staged_locator(&self) -> Locator {
        let destination = &self.staging.destination;
        match Locator::parse(destination) {
            Locator::Exact(_) => Locator::Pattern(format!("{}_*", destination)),
            locator => locator,
        }
    }

    /// Load parameters for the given locator.
    pub fn load_request(&self, locator: Locator) -> LoadRequest {
        LoadRequest {
            locator,
            table: self.target.table.clone(),
            format: self.staging.format,
            reject_limit: self.migration.reject_limit,
            truncate_before_load: self.target.truncate_before_load,
        }
    }
}
