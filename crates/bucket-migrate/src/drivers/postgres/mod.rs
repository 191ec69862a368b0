//! PostgreSQL driver.
//!
//! - [`PostgresSource`]: streams query results as record batches
//! - [`PostgresTarget`]: loads records inside one transaction, with a
//!   savepoint around every insert

mod reader;
mod writer;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;

pub use reader::PostgresSource;
pub use writer::PostgresTarget;

/// Build a connection pool from a `postgres://` URL or key-value string.
///
/// Errors come back as plain strings so each side can map them into its
/// own error variant.
pub(crate) async fn connect_pool(url: &str, max_conns: usize) -> Result<Pool, String> {
    let pg_config: PgConfig = url
        .parse()
        .map_err(|e| format!("invalid connection string: {}", e))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(max_conns.max(1))
        .build()
        .map_err(|e| format!("creating connection pool: {}", e))?;

    // Test connection
    let client = pool
        .get()
        .await
        .map_err(|e| format!("connecting: {}", e))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| format!("connection test failed: {}", e))?;

    Ok(pool)
}

/// Quote a PostgreSQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified relation name.
pub(crate) fn quote_relation(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_relation() {
        assert_eq!(quote_relation("sales.orders"), "\"sales\".\"orders\"");
        assert_eq!(quote_relation("orders"), "\"orders\"");
        assert_eq!(quote_relation("Sales.Orders"), "\"Sales\".\"Orders\"");
    }
}
