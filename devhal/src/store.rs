//! Persistent metadata store.
//!
//! Namespaced key/value storage that survives process restarts. Drivers
//! keep one fingerprint record per driver name inside the namespace of
//! their kind. The store has no policy of its own: every failure surfaces
//! as `HalError::PersistenceUnavailable` and callers decide how to degrade.
//!
//! Records are wrapped in a versioned envelope and encoded with bincode.

use async_trait::async_trait;
use devhal_common::hal::consts::FINGERPRINT_FORMAT_VERSION;
use devhal_common::hal::driver::HalError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Durable namespaced key/value store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Overwrite the value stored under `namespace`/`key`.
    async fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), HalError>;

    /// Last value saved under `namespace`/`key`, `None` if absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, HalError>;

    /// Delete the value under `namespace`/`key`. Absent keys are not an error.
    async fn remove(&self, namespace: &str, key: &str) -> Result<(), HalError>;
}

/// Versioned envelope around a persisted fingerprint.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord<T> {
    /// Format version (for migration)
    version: u32,
    /// Unix epoch seconds of the save
    saved_at: u64,
    fingerprint: T,
}

/// Encode and save a fingerprint.
pub async fn save_fingerprint<T>(
    store: &dyn MetadataStore,
    namespace: &str,
    key: &str,
    fingerprint: &T,
) -> Result<(), HalError>
where
    T: Serialize + Sync,
{
    let record = StoredRecord {
        version: FINGERPRINT_FORMAT_VERSION,
        saved_at: current_timestamp_secs(),
        fingerprint,
    };
    let bytes = bincode::serialize(&record).map_err(|e| {
        HalError::PersistenceUnavailable(format!("Failed to serialize fingerprint: {e}"))
    })?;
    store.save(namespace, key, &bytes).await
}

/// Load and decode a fingerprint.
///
/// Records written by a different format version read as absent.
pub async fn load_fingerprint<T>(
    store: &dyn MetadataStore,
    namespace: &str,
    key: &str,
) -> Result<Option<T>, HalError>
where
    T: DeserializeOwned,
{
    let Some(bytes) = store.get(namespace, key).await? else {
        return Ok(None);
    };

    let record: StoredRecord<T> = bincode::deserialize(&bytes).map_err(|e| {
        HalError::PersistenceUnavailable(format!("Failed to deserialize fingerprint: {e}"))
    })?;

    if record.version != FINGERPRINT_FORMAT_VERSION {
        warn!(
            "Fingerprint {}/{} has version {} (current {}), ignoring",
            namespace, key, record.version, FINGERPRINT_FORMAT_VERSION
        );
        return Ok(None);
    }

    debug!(
        "Loaded fingerprint {}/{} (saved at {})",
        namespace, key, record.saved_at
    );
    Ok(Some(record.fingerprint))
}

/// Directory-backed store: `<root>/<namespace>/<key>.bin`.
pub struct FileMetadataStore {
    root: PathBuf,
}

impl FileMetadataStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(encode_component(namespace))
            .join(format!("{}.bin", encode_component(key)))
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), HalError> {
        let path = self.record_path(namespace, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HalError::PersistenceUnavailable(format!("Failed to create directory: {e}"))
            })?;
        }

        // Write-then-rename so a crash never leaves a torn record.
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, value).await.map_err(|e| {
            HalError::PersistenceUnavailable(format!("Failed to write {tmp:?}: {e}"))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            HalError::PersistenceUnavailable(format!("Failed to replace {path:?}: {e}"))
        })?;

        debug!("Saved {} bytes to {:?}", value.len(), path);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, HalError> {
        let path = self.record_path(namespace, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HalError::PersistenceUnavailable(format!(
                "Failed to read {path:?}: {e}"
            ))),
        }
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), HalError> {
        let path = self.record_path(namespace, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HalError::PersistenceUnavailable(format!(
                "Failed to delete {path:?}: {e}"
            ))),
        }
    }
}

/// In-memory store for embedding hosts and tests.
///
/// `set_available(false)` makes every operation fail with
/// `PersistenceUnavailable`.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<(String, String), Vec<u8>>>,
    unavailable: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryMetadataStore {
    /// Empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated storage failure.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), HalError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(HalError::PersistenceUnavailable(
                "memory store disabled".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), HalError> {
        self.check()?;
        self.records
            .lock()
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, HalError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), HalError> {
        self.check()?;
        self.records
            .lock()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// Encode a namespace or key as a file name component.
///
/// Percent-encoding is injective, so distinct names never share a record.
/// A leading dot and the empty name get forms the encoder never emits
/// (`%2E`, a lone `%`), which keeps `.`/`..` out of the path.
fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    let encoded = urlencoding::encode(raw);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => encoded.into_owned(),
    }
}

/// Get current timestamp in seconds since UNIX epoch.
fn current_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use devhal_common::hal::fingerprint::SerialFingerprint;
    use tempfile::tempdir;

    fn arduino(baud_rate: u32) -> SerialFingerprint {
        SerialFingerprint {
            vendor_id: Some(0x2341),
            product_id: Some(0x0043),
            port_id: "/dev/ttyACM0".to_string(),
            baud_rate,
        }
    }

    #[tokio::test]
    async fn test_file_store_save_get_overwrite() {
        let dir = tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path());

        assert!(store.get("serial", "port").await.unwrap().is_none());

        store.save("serial", "port", b"one").await.unwrap();
        store.save("serial", "port", b"two").await.unwrap();
        assert_eq!(store.get("serial", "port").await.unwrap().unwrap(), b"two");
        assert!(dir.path().join("serial").join("port.bin").exists());

        store.remove("serial", "port").await.unwrap();
        store.remove("serial", "port").await.unwrap();
        assert!(store.get("serial", "port").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = MemoryMetadataStore::new();
        store.save("serial", "dev", b"s").await.unwrap();
        store.save("usb", "dev", b"u").await.unwrap();
        assert_eq!(store.get("serial", "dev").await.unwrap().unwrap(), b"s");
        assert_eq!(store.get("usb", "dev").await.unwrap().unwrap(), b"u");
    }

    #[tokio::test]
    async fn test_fingerprint_survives_store_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileMetadataStore::new(dir.path());
            save_fingerprint(&store, "serial", "arduino", &arduino(9600))
                .await
                .unwrap();
        }

        let reopened = FileMetadataStore::new(dir.path());
        let loaded: SerialFingerprint = load_fingerprint(&reopened, "serial", "arduino")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, arduino(9600));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_persistence_error() {
        let store = MemoryMetadataStore::new();
        store.save("serial", "arduino", &[0xff]).await.unwrap();
        let result = load_fingerprint::<SerialFingerprint>(&store, "serial", "arduino").await;
        assert!(matches!(result, Err(HalError::PersistenceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unavailable_memory_store() {
        let store = MemoryMetadataStore::new();
        store.set_available(false);
        assert!(matches!(
            store.save("a", "b", b"c").await,
            Err(HalError::PersistenceUnavailable(_))
        ));
        assert!(store.get("a", "b").await.is_err());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("serial"), "serial");
        assert_eq!(encode_component("bench port"), "bench%20port");
        assert_eq!(encode_component("../etc/passwd"), "%2E.%2Fetc%2Fpasswd");
        assert_eq!(encode_component(".."), "%2E.");
        assert_eq!(encode_component(""), "%");
    }

    #[tokio::test]
    async fn test_similar_names_keep_separate_records() {
        let dir = tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path());
        let names = ["bench port", "bench_port", ".x", "x", "...", "", "a%20b", "a b"];

        for (i, name) in names.iter().enumerate() {
            store.save("serial", name, &[i as u8]).await.unwrap();
        }
        for (i, name) in names.iter().enumerate() {
            assert_eq!(
                store.get("serial", name).await.unwrap(),
                Some(vec![i as u8]),
                "record for {name:?}"
            );
        }

        // Nothing escapes the namespace directory.
        let written = std::fs::read_dir(dir.path().join("serial")).unwrap().count();
        assert_eq!(written, names.len());
    }
}
