//! Time-limited access grants for object storage.
//!
//! Every object store call is authorized against a grant: the access kind
//! must cover the operation, the object name must fall under the grant's
//! prefix and the grant must not have expired.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// Default lifetime of an ephemeral grant.
pub const DEFAULT_GRANT_TTL_HOURS: i64 = 24;

/// Operations a grant permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl Access {
    pub fn allows_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// A credential scoped to a name prefix and a lifetime.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub token: String,

    #[serde(default)]
    pub access: Access,

    /// Object names must start with this prefix. Empty means the whole bucket.
    #[serde(default)]
    pub prefix: String,

    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGrant")
            .field("token", &"[REDACTED]")
            .field("access", &self.access)
            .field("prefix", &self.prefix)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Default for AccessGrant {
    fn default() -> Self {
        Self::ephemeral(Duration::hours(DEFAULT_GRANT_TTL_HOURS))
    }
}

impl AccessGrant {
    /// Mint a fresh read-write grant for the whole bucket.
    pub fn ephemeral(ttl: Duration) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            access: Access::ReadWrite,
            prefix: String::new(),
            expires_at: Utc::now() + ttl,
        }
    }

    /// Restrict the grant to an access kind.
    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Restrict the grant to a name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check that the grant allows writing `name`.
    pub fn authorize_write(&self, name: &str) -> Result<()> {
        self.check(name, self.access.allows_write(), "write")
            .map_err(|reason| MigrateError::write_rejected(name, reason))
    }

    /// Check that the grant allows reading `name`, or listing under it.
    pub fn authorize_read(&self, name: &str) -> Result<()> {
        self.check(name, self.access.allows_read(), "read")
            .map_err(|reason| MigrateError::read_rejected(name, reason))
    }

    fn check(&self, name: &str, allowed: bool, op: &str) -> std::result::Result<(), String> {
        if self.is_expired() {
            return Err(format!("access grant expired at {}", self.expires_at));
        }
        if !allowed {
            return Err(format!("access grant does not permit {}", op));
        }
        if !name.starts_with(&self.prefix) {
            return Err(format!(
                "name is outside the granted prefix '{}'",
                self.prefix
            ));
        }
        Ok(())
    }
}
