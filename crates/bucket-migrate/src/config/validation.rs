//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the parts of the configuration every command relies on.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'postgres', got '{}'",
            config.source.r#type
        )));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }

    if config.staging.destination.contains('/') {
        return Err(MigrateError::Config(
            "staging.destination must be a bare object name; put the directory in staging.bucket"
                .into(),
        ));
    }
    if let Some(0) = config.staging.shard_size {
        return Err(MigrateError::Config(
            "staging.shard_size must be at least 1".into(),
        ));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.max_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_connections must be at least 1".into(),
        ));
    }

    Ok(())
}

/// Check the settings needed to extract.
pub fn require_extract(config: &Config) -> Result<()> {
    if config.source.url.is_empty() {
        return Err(MigrateError::Config("source.url is required".into()));
    }
    if config.source.query.trim().is_empty() {
        return Err(MigrateError::Config("source.query is required".into()));
    }
    if config.staging.destination.is_empty() {
        return Err(MigrateError::Config(
            "staging.destination is required".into(),
        ));
    }
    Ok(())
}

/// Check the settings needed to load.
pub fn require_load(config: &Config) -> Result<()> {
    if config.target.url.is_empty() {
        return Err(MigrateError::Config("target.url is required".into()));
    }
    if config.target.table.is_empty() {
        return Err(MigrateError::Config("target.table is required".into()));
    }
    if config.staging.destination.is_empty() {
        return Err(MigrateError::Config(
            "staging.destination is required".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> Config {
        let mut config = Config::default();
        config.source.url = "postgres://src/db".into();
        config.source.query = "SELECT * FROM orders".into();
        config.target.url = "postgres://dst/db".into();
        config.target.table = "orders".into();
        config.staging.destination = "orders".into();
        config
    }

    #[test]
    fn test_full_config_is_valid() {
        let config = full();
        assert!(validate(&config).is_ok());
        assert!(require_extract(&config).is_ok());
        assert!(require_load(&config).is_ok());
    }

    #[test]
    fn test_rejects_unknown_store_type() {
        let mut config = full();
        config.source.r#type = "oracle".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_shard_size() {
        let mut config = full();
        config.staging.shard_size = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_path_in_destination() {
        let mut config = full();
        config.staging.destination = "bucket/orders".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_stage_requirements() {
        let mut config = full();
        config.source.query.clear();
        assert!(require_extract(&config).is_err());
        assert!(require_load(&config).is_ok());

        config.target.table.clear();
        assert!(require_load(&config).is_err());
    }
}
