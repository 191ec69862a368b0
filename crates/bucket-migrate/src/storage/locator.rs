//! Resolving staged artifacts by name or pattern.

use glob::Pattern;

use crate::core::ObjectStore;
use crate::error::{MigrateError, Result};

const WILDCARDS: [char; 3] = ['*', '?', '['];

/// Identifies the shards a load operation reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A single object name.
    Exact(String),

    /// A wildcard pattern (`*`, `?`, `[...]`) over object names.
    Pattern(String),

    /// The exact shard set of one extraction.
    Shards(Vec<String>),
}

impl Locator {
    /// Parse a locator string. Anything containing a wildcard is a pattern.
    pub fn parse(s: &str) -> Self {
        if s.contains(WILDCARDS) {
            Locator::Pattern(s.to_string())
        } else {
            Locator::Exact(s.to_string())
        }
    }

    /// Enumerate every matching object, sorted by name.
    ///
    /// Zero matches is a `NoMatchingArtifact` error, as is any missing member
    /// of a [`Locator::Shards`] set.
    pub async fn resolve(&self, store: &dyn ObjectStore) -> Result<Vec<String>> {
        let mut names = match self {
            Locator::Exact(name) => {
                if !store.exists(name).await? {
                    return Err(MigrateError::NoMatchingArtifact(name.clone()));
                }
                vec![name.clone()]
            }
            Locator::Pattern(pattern) => {
                let matcher = Pattern::new(pattern).map_err(|e| {
                    MigrateError::Config(format!("invalid pattern '{}': {}", pattern, e))
                })?;
                store
                    .list(literal_prefix(pattern))
                    .await?
                    .into_iter()
                    .filter(|name| matcher.matches(name))
                    .collect()
            }
            Locator::Shards(shards) => {
                for name in shards {
                    if !store.exists(name).await? {
                        return Err(MigrateError::NoMatchingArtifact(name.clone()));
                    }
                }
                shards.clone()
            }
        };

        if names.is_empty() {
            return Err(MigrateError::NoMatchingArtifact(self.to_string()));
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Exact(name) | Locator::Pattern(name) => f.write_str(name),
            Locator::Shards(shards) => write!(f, "[{}]", shards.join(", ")),
        }
    }
}

/// Part of a pattern before its first wildcard.
fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(WILDCARDS) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use bytes::Bytes;

    async fn store_with(names: &[&str]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for name in names {
            store.put(name, Bytes::from_static(b"x")).await.unwrap();
        }
        store
    }

    #[test]
    fn test_parse_detects_wildcards() {
        assert_eq!(
            Locator::parse("orders_*.csv"),
            Locator::Pattern("orders_*.csv".into())
        );
        assert_eq!(
            Locator::parse("orders_1.csv"),
            Locator::Exact("orders_1.csv".into())
        );
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("orders_*_2025*.csv"), "orders_");
        assert_eq!(literal_prefix("[ab]x"), "");
    }

    #[tokio::test]
    async fn test_pattern_matches_all_in_sorted_order() {
        let store = store_with(&[
            "orders_2_20251216T132352037131Z.csv",
            "orders_1_20251216T132352037130Z.csv",
            "customers_1_20251216T132352037130Z.csv",
            "orders_3_20251216T132352037132Z.jsonl",
        ])
        .await;
        let names = Locator::parse("orders_*.csv").resolve(&store).await.unwrap();
        assert_eq!(
            names,
            vec![
                "orders_1_20251216T132352037130Z.csv",
                "orders_2_20251216T132352037131Z.csv",
            ]
        );
    }

    #[tokio::test]
    async fn test_no_match_is_error() {
        let store = store_with(&["orders_1.csv"]).await;
        let err = Locator::parse("invoices_*.csv")
            .resolve(&store)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::NoMatchingArtifact(_)));

        let err = Locator::parse("orders_2.csv").resolve(&store).await.unwrap_err();
        assert!(matches!(err, MigrateError::NoMatchingArtifact(_)));
    }

    #[tokio::test]
    async fn test_shards_require_every_member() {
        let store = store_with(&["a.csv", "b.csv"]).await;
        let ok = Locator::Shards(vec!["b.csv".into(), "a.csv".into()])
            .resolve(&store)
            .await
            .unwrap();
        assert_eq!(ok, vec!["a.csv", "b.csv"]);

        let err = Locator::Shards(vec!["a.csv".into(), "c.csv".into()])
            .resolve(&store)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::NoMatchingArtifact(name) if name == "c.csv"));
    }
}
