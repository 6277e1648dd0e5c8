//! Writable local storage driver.
//!
//! The handle is a granted directory. `read` lists its entries (or returns
//! one entry's bytes when the request names it); `write` creates or
//! overwrites a named entry. The fingerprint is the platform's opaque
//! capability reference to the directory.

use crate::connection::{DriverContext, DriverCore, DriverIo};
use crate::orchestrator::Reacquire;
use async_trait::async_trait;
use devhal_common::hal::config::IoSettings;
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::fingerprint::StorageFingerprint;
use devhal_common::hal::types::{
    ConnectOptions, DirEntry, DriverKind, ReadOutput, ReadRequest, WriteOutcome, WriteRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Directory the platform can grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    /// Opaque capability reference, persisted as the fingerprint
    pub capability: String,
    /// Human-readable name
    pub label: String,
}

/// Open directory.
#[async_trait]
pub trait StorageDirectory: Send + Sync {
    /// List entries, sorted by name.
    async fn entries(&self) -> Result<Vec<DirEntry>, HalError>;

    /// Read a file entry.
    async fn read_entry(&self, name: &str) -> Result<Vec<u8>, HalError>;

    /// Create or overwrite a file entry. Returns the byte count.
    async fn write_entry(&self, name: &str, content: &[u8]) -> Result<usize, HalError>;
}

/// Host storage capability.
#[async_trait]
pub trait StoragePlatform: Send + Sync {
    /// Whether directory access exists on this host.
    fn is_supported(&self) -> bool;

    /// Directories already granted, without prompting.
    async fn granted_roots(&self) -> Result<Vec<StorageRoot>, HalError>;

    /// Whether read-write access to `root` is still granted.
    async fn has_permission(&self, root: &StorageRoot) -> bool;

    /// Ask the user to pick a directory.
    async fn request_root(&self) -> Result<StorageRoot, HalError>;

    /// Open a granted directory.
    async fn open(&self, root: &StorageRoot) -> Result<Box<dyn StorageDirectory>, HalError>;
}

/// Reject names that are empty or would escape the directory.
pub fn validate_entry_name(name: &str) -> Result<(), HalError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(HalError::InvalidDataFormat(format!(
            "invalid entry name: {name:?}"
        )));
    }
    Ok(())
}

/// Storage backend for [`DriverCore`].
pub struct StorageBackend {
    platform: Arc<dyn StoragePlatform>,
}

/// Storage driver.
pub type StorageDriver = DriverCore<StorageBackend>;

impl StorageBackend {
    /// Wrap a platform.
    pub fn new(platform: Arc<dyn StoragePlatform>) -> Self {
        Self { platform }
    }
}

/// Validated entry write.
pub struct EntryWrite {
    name: String,
    content: Vec<u8>,
}

#[async_trait]
impl Reacquire for StorageBackend {
    type Resource = StorageRoot;
    type Handle = Box<dyn StorageDirectory>;
    type Fingerprint = StorageFingerprint;

    fn kind(&self) -> DriverKind {
        DriverKind::Storage
    }

    async fn detect(&self) -> bool {
        self.platform.is_supported()
    }

    async fn authorized(&self) -> Result<Vec<StorageRoot>, HalError> {
        self.platform.granted_roots().await
    }

    fn matches(&self, root: &StorageRoot, fingerprint: &StorageFingerprint) -> bool {
        root.capability == fingerprint.capability
    }

    async fn verify(&self, root: &StorageRoot) -> bool {
        self.platform.has_permission(root).await
    }

    async fn request(&self, _options: &ConnectOptions) -> Result<StorageRoot, HalError> {
        self.platform.request_root().await
    }

    fn fingerprint(&self, root: &StorageRoot, _options: &ConnectOptions) -> StorageFingerprint {
        StorageFingerprint {
            capability: root.capability.clone(),
        }
    }

    async fn open(
        &self,
        root: &StorageRoot,
        _fingerprint: &StorageFingerprint,
    ) -> Result<Box<dyn StorageDirectory>, HalError> {
        self.platform.open(root).await
    }

    async fn close(&self, _handle: &Box<dyn StorageDirectory>) -> Result<(), HalError> {
        Ok(())
    }

    fn describe(
        &self,
        root: &StorageRoot,
        _fingerprint: &StorageFingerprint,
    ) -> (String, BTreeMap<String, String>) {
        let mut details = BTreeMap::new();
        details.insert("capability".to_string(), root.capability.clone());
        (root.label.clone(), details)
    }
}

#[async_trait]
impl DriverIo for StorageBackend {
    type Write = EntryWrite;

    async fn read(
        &self,
        handle: &Box<dyn StorageDirectory>,
        request: &ReadRequest,
        _io: &IoSettings,
    ) -> Result<ReadOutput, HalError> {
        match &request.entry {
            Some(name) => {
                validate_entry_name(name)?;
                handle.read_entry(name).await.map(ReadOutput::Bytes)
            }
            None => handle.entries().await.map(ReadOutput::Entries),
        }
    }

    fn prepare_write(&self, request: WriteRequest) -> Result<EntryWrite, HalError> {
        match request {
            WriteRequest::Entry { name, content } => {
                validate_entry_name(&name)?;
                Ok(EntryWrite {
                    name,
                    content: content.into_bytes()?,
                })
            }
            _ => Err(HalError::InvalidDataFormat(
                "storage writes take an entry name and content".to_string(),
            )),
        }
    }

    async fn write(
        &self,
        handle: &Box<dyn StorageDirectory>,
        write: EntryWrite,
    ) -> Result<(WriteOutcome, Option<StorageFingerprint>), HalError> {
        let bytes = handle.write_entry(&write.name, &write.content).await?;
        Ok((WriteOutcome::Written { bytes }, None))
    }
}

/// Factory function to create a storage driver instance.
pub fn create_driver(
    name: &str,
    platform: Arc<dyn StoragePlatform>,
    defaults: ConnectOptions,
    ctx: &DriverContext,
) -> Arc<dyn Driver> {
    Arc::new(StorageDriver::new(
        name,
        StorageBackend::new(platform),
        defaults,
        ctx,
    ))
}
