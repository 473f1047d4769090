//! Versioned JSON documents under a storage directory

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration required for {key}: from {from} to {to}")]
    MigrationRequired { key: String, from: u32, to: u32 },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk envelope
///
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "bridge.client_config",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Bumped on incompatible layout changes
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// `storage_dir` is used as is and created on first save
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    pub async fn ensure_dir(&self) -> StorageResult<()> {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
            debug!(dir = ?self.storage_dir, "Created storage directory");
        }
        Ok(())
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Write to `<key>.tmp` then rename over the target
    pub async fn save<T>(&self, storage_file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        self.ensure_dir().await?;

        let path = self.file_path(&storage_file.key);
        let temp_path = self.file_path(&format!("{}.tmp", storage_file.key));

        let content = serde_json::to_string_pretty(storage_file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            key = %storage_file.key,
            version = storage_file.version,
            "Saved storage file"
        );

        Ok(())
    }
}

/// A type persisted under a fixed key and version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;

    fn to_storage_file(&self) -> StorageFile<Self>
    where
        Self: Clone,
    {
        StorageFile::new(Self::KEY, self.clone(), Self::VERSION, Self::MINOR_VERSION)
    }
}

/// Converts the raw `data` of an older major version
///
/// Documents written before the envelope existed have no `version` field;
/// they are handed over whole as version 0.
pub type MigrationFn<T> = fn(Value, u32) -> StorageResult<T>;

pub async fn load_with_migration<T>(
    storage: &Storage,
    migrate: Option<MigrationFn<T>>,
) -> StorageResult<Option<T>>
where
    T: Storable,
{
    let path = storage.file_path(T::KEY);

    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path).await?;
    let raw: Value = serde_json::from_str(&content)?;

    let envelope_version = raw.get("version").and_then(Value::as_u64);
    let version = envelope_version.map_or(0, |v| v as u32);

    if version != T::VERSION {
        let Some(migrate_fn) = migrate else {
            return Err(StorageError::MigrationRequired {
                key: T::KEY.to_string(),
                from: version,
                to: T::VERSION,
            });
        };
        let data = match envelope_version {
            Some(_) => raw.get("data").cloned().unwrap_or(Value::Null),
            None => raw,
        };
        return migrate_fn(data, version).map(Some);
    }

    let storage_file: StorageFile<T> = serde_json::from_value(raw)?;

    if storage_file.minor_version < T::MINOR_VERSION {
        warn!(
            key = T::KEY,
            found = storage_file.minor_version,
            current = T::MINOR_VERSION,
            "Storage file has an older minor version"
        );
    }
    debug!(
        key = T::KEY,
        version = storage_file.version,
        "Loaded storage file"
    );

    Ok(Some(storage_file.data))
}
