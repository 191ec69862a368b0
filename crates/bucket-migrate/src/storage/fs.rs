//! Filesystem-backed object store.
//!
//! A local directory plays the bucket. Objects are regular files directly
//! inside it. Writes go to a hidden temp file first and are hard-linked
//! into place, so a reader never sees a partial object and an existing
//! object is never replaced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::core::ObjectStore;
use crate::error::{MigrateError, Result};

use super::grant::AccessGrant;

/// Object store over a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    grant: AccessGrant,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, grant: AccessGrant) -> Self {
        Self {
            root: root.into(),
            grant,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> std::result::Result<PathBuf, String> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

/// Object names are flat: no separators, no hidden names.
fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("object name is empty".into());
    }
    if name.contains(['/', '\\']) {
        return Err("object names cannot contain path separators".into());
    }
    if name.starts_with('.') {
        return Err("object names cannot start with '.'".into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        self.grant.authorize_write(name)?;
        let path = self
            .object_path(name)
            .map_err(|reason| MigrateError::write_rejected(name, reason))?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| MigrateError::write_rejected(name, e.to_string()))?;

        // Atomic create: write a temp file, then link it under the final
        // name. Linking fails if the name is taken.
        let temp_path = self.root.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&temp_path, &data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(MigrateError::write_rejected(name, e.to_string()));
        }
        let linked = tokio::fs::hard_link(&temp_path, &path).await;
        let _ = tokio::fs::remove_file(&temp_path).await;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrateError::write_rejected(name, "object already exists"));
            }
            Err(e) => return Err(MigrateError::write_rejected(name, e.to_string())),
        }

        debug!("Stored {} ({} bytes) in {}", name, data.len(), self.root.display());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        self.grant.authorize_read(name)?;
        let path = self
            .object_path(name)
            .map_err(|reason| MigrateError::read_rejected(name, reason))?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(MigrateError::NoMatchingArtifact(name.to_string()))
            }
            Err(e) => Err(MigrateError::read_rejected(name, e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.grant.authorize_read(prefix)?;

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MigrateError::read_rejected(prefix, e.to_string())),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MigrateError::read_rejected(prefix, e.to_string()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && !name.starts_with('.') && name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.grant.authorize_read(name)?;
        let path = self
            .object_path(name)
            .map_err(|reason| MigrateError::read_rejected(name, reason))?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| MigrateError::read_rejected(name, e.to_string()))
    }

    fn store_type(&self) -> &str {
        "fs"
    }
}
