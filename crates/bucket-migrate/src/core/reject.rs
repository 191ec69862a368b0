//! Rejected-record classification.

use serde::{Deserialize, Serialize};

/// Why a record was diverted to the reject log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The staged bytes could not be split into fields.
    ParseError,
    /// A field did not convert to the target column type.
    TypeMismatch,
    /// NULL in a NOT NULL target column.
    NotNullViolation,
    /// Duplicate key in the target.
    UniqueViolation,
    /// Any other integrity constraint (check, foreign key, exclusion).
    ConstraintViolation,
    /// Record names a column the target does not have.
    UnknownColumn,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RejectReason::ParseError => "parse_error",
            RejectReason::TypeMismatch => "type_mismatch",
            RejectReason::NotNullViolation => "not_null_violation",
            RejectReason::UniqueViolation => "unique_violation",
            RejectReason::ConstraintViolation => "constraint_violation",
            RejectReason::UnknownColumn => "unknown_column",
        };
        f.write_str(name)
    }
}

/// A record the loader refused, with enough context to find it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Shard the record was read from.
    pub shard: String,

    /// 1-based physical line where the record starts.
    pub line: u64,

    pub reason: RejectReason,

    /// Human-readable detail from the codec or the target.
    pub detail: String,

    /// Raw input bytes, lossily decoded as UTF-8.
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&RejectReason::NotNullViolation).unwrap();
        assert_eq!(json, "\"not_null_violation\"");
        assert_eq!(RejectReason::UniqueViolation.to_string(), "unique_violation");
        assert_eq!(
            RejectReason::ConstraintViolation.to_string(),
            "constraint_violation"
        );
    }
}
