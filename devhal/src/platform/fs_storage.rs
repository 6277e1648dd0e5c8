//! Directory-backed storage platform.
//!
//! The configured `storage.roots` are the directories an operator has made
//! available; they count as granted once they exist. The capability
//! reference persisted in the fingerprint is the directory path.

use super::{Prompter, prompt_choice};
use crate::drivers::storage::{StorageDirectory, StoragePlatform, StorageRoot};
use async_trait::async_trait;
use devhal_common::hal::driver::HalError;
use devhal_common::hal::types::{DirEntry, EntryKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Storage platform over local directories.
pub struct FsStoragePlatform {
    roots: Vec<PathBuf>,
    prompter: Arc<dyn Prompter>,
}

impl FsStoragePlatform {
    /// Offer `roots` to the storage driver.
    pub fn new(roots: Vec<PathBuf>, prompter: Arc<dyn Prompter>) -> Self {
        Self { roots, prompter }
    }

    async fn existing_roots(&self) -> Vec<StorageRoot> {
        let mut found = Vec::new();
        for path in &self.roots {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_dir() => found.push(root_for(path)),
                Ok(_) => debug!("Storage root {} is not a directory", path.display()),
                Err(e) => debug!("Storage root {} unavailable: {}", path.display(), e),
            }
        }
        found
    }
}

fn root_for(path: &Path) -> StorageRoot {
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    StorageRoot {
        capability: path.display().to_string(),
        label,
    }
}

fn io_error(context: &str, e: std::io::Error) -> HalError {
    HalError::CommunicationError(format!("{context}: {e}"))
}

/// Entries are files; a subdirectory is a malformed request, not an I/O fault.
async fn reject_directory(path: &Path, name: &str) -> Result<(), HalError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(HalError::InvalidDataFormat(format!(
            "{name} is a directory"
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl StoragePlatform for FsStoragePlatform {
    fn is_supported(&self) -> bool {
        !self.roots.is_empty()
    }

    async fn granted_roots(&self) -> Result<Vec<StorageRoot>, HalError> {
        Ok(self.existing_roots().await)
    }

    async fn has_permission(&self, root: &StorageRoot) -> bool {
        match tokio::fs::metadata(&root.capability).await {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    async fn request_root(&self) -> Result<StorageRoot, HalError> {
        let candidates = self.existing_roots().await;
        prompt_choice(
            self.prompter.as_ref(),
            "Select a directory",
            candidates,
            |r| r.capability.clone(),
        )
        .await
    }

    async fn open(&self, root: &StorageRoot) -> Result<Box<dyn StorageDirectory>, HalError> {
        let path = PathBuf::from(&root.capability);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| HalError::NoDeviceAvailable(format!("{}: {e}", root.capability)))?;
        if !meta.is_dir() {
            return Err(HalError::NoDeviceAvailable(format!(
                "{} is not a directory",
                root.capability
            )));
        }
        Ok(Box::new(FsDirectory { path }))
    }
}

/// Open local directory.
struct FsDirectory {
    path: PathBuf,
}

#[async_trait]
impl StorageDirectory for FsDirectory {
    async fn entries(&self) -> Result<Vec<DirEntry>, HalError> {
        let mut dir = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| io_error("list directory", e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list directory", e))?
        {
            let is_dir = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta.is_dir(),
                // Dangling symlink
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_entry(&self, name: &str) -> Result<Vec<u8>, HalError> {
        let path = self.path.join(name);
        reject_directory(&path, name).await?;
        tokio::fs::read(path).await.map_err(|e| io_error(name, e))
    }

    async fn write_entry(&self, name: &str, content: &[u8]) -> Result<usize, HalError> {
        let path = self.path.join(name);
        reject_directory(&path, name).await?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| io_error(name, e))?;
        Ok(content.len())
    }
}
