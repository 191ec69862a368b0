//! Error types for the migration pipeline.
//!
//! The pipeline variants form a closed taxonomy: every stage surfaces the
//! first fatal error and stops. None of them is retried automatically.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source could not be reached, or the extraction query failed.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Staging location refused a write (permission, expired grant, I/O).
    #[error("Staging write rejected for '{object}': {reason}")]
    WriteRejected { object: String, reason: String },

    /// Staging location refused a read or listing.
    #[error("Staging read rejected for '{object}': {reason}")]
    ReadRejected { object: String, reason: String },

    /// Delimited-text output requested for a schema with large-text columns.
    #[error(
        "Format '{format}' cannot safely carry large-text columns [{}]; \
         use the structured format or opt in to lossy projection",
        columns.join(", ")
    )]
    UnsupportedColumnsForFormat { format: String, columns: Vec<String> },

    /// Locator resolved to zero staged objects.
    #[error("No staged artifact matches '{0}'")]
    NoMatchingArtifact(String),

    /// Target could not be reached or refused the session.
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    /// Target table missing or shaped differently from the staged records.
    #[error("Target schema mismatch for '{table}': {message}")]
    TargetSchemaMismatch { table: String, message: String },

    /// Too many rejected records; the load operation was rolled back.
    #[error("Reject limit exceeded: {rejected} rejected records (limit {limit}); load rolled back")]
    RejectLimitExceeded { rejected: u64, limit: u64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pipeline was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a SourceUnavailable error.
    pub fn source_unavailable(message: impl std::fmt::Display) -> Self {
        MigrateError::SourceUnavailable(message.to_string())
    }

    /// Create a TargetUnavailable error.
    pub fn target_unavailable(message: impl std::fmt::Display) -> Self {
        MigrateError::TargetUnavailable(message.to_string())
    }

    /// Create a WriteRejected error.
    pub fn write_rejected(object: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrateError::WriteRejected {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create a ReadRejected error.
    pub fn read_rejected(object: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrateError::ReadRejected {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create a TargetSchemaMismatch error.
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TargetSchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error. Every fatal error maps to 2.
    pub fn exit_code(&self) -> u8 {
        2
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_columns_message_lists_columns() {
        let err = MigrateError::UnsupportedColumnsForFormat {
            format: "delimited".into(),
            columns: vec!["notes".into(), "metadata_json".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("notes, metadata_json"));
        assert!(msg.contains("delimited"));
    }

    #[test]
    fn test_exit_code_is_fatal() {
        assert_eq!(MigrateError::Cancelled.exit_code(), 2);
        assert_eq!(
            MigrateError::RejectLimitExceeded {
                rejected: 2,
                limit: 1
            }
            .exit_code(),
            2
        );
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.yaml");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
    }
}
