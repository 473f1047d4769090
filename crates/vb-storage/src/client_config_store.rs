//! `ConfigStore` backed by a versioned JSON document

use async_trait::async_trait;
use tracing::{debug, info};
use vb_core::{ClientConfig, ConfigStore, StoreError};

use crate::storage::{load_with_migration, Storable, Storage, StorageError, StorageResult};

pub const CLIENT_CONFIG_KEY: &str = "bridge.client_config";

impl Storable for ClientConfig {
    const KEY: &'static str = CLIENT_CONFIG_KEY;
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

/// Older files carry the policy object directly, with or without an envelope.
/// Every field has a default, so missing ones are filled in.
fn migrate_client_config(data: serde_json::Value, from: u32) -> StorageResult<ClientConfig> {
    info!(from, "Migrating stored client config");
    Ok(serde_json::from_value(data)?)
}

#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    storage: Storage,
}

impl JsonConfigStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Json(e) => StoreError::Invalid(e.to_string()),
            StorageError::MigrationRequired { .. } => StoreError::Invalid(err.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load_client_config(&self) -> Result<ClientConfig, StoreError> {
        let loaded = load_with_migration(&self.storage, Some(migrate_client_config)).await?;
        match loaded {
            Some(config) => {
                debug!(charge_limit = config.charge_limit_pct, "Loaded client config");
                Ok(config)
            }
            None => Ok(ClientConfig::default()),
        }
    }

    async fn save_client_config(&self, config: &ClientConfig) -> Result<(), StoreError> {
        self.storage.save(&config.to_storage_file()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageFile;
    use tempfile::TempDir;
    use vb_core::ScheduleTime;

    #[tokio::test]
    async fn test_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = JsonConfigStore::new(Storage::new(dir.path()));

        let config = store.load_client_config().await.unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonConfigStore::new(Storage::new(dir.path()));

        let mut config = ClientConfig::default();
        config.charge_limit_pct = 80;
        config.climatisation_extend = true;
        config.charging_at = Some(ScheduleTime::new(23, 30).unwrap());
        store.save_client_config(&config).await.unwrap();

        assert!(dir.path().join(CLIENT_CONFIG_KEY).exists());
        assert_eq!(store.load_client_config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_version_zero_envelope_is_migrated() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let legacy = StorageFile::new(
            CLIENT_CONFIG_KEY,
            serde_json::json!({"chargeLimitPct": 70}),
            0,
            0,
        );
        storage.save(&legacy).await.unwrap();

        let config = JsonConfigStore::new(storage).load_client_config().await.unwrap();
        assert_eq!(config.charge_limit_pct, 70);
        assert!(!config.climatisation_extend);
    }

    #[tokio::test]
    async fn test_bare_policy_object_is_migrated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CLIENT_CONFIG_KEY), r#"{"chargeLimitPct":80}"#).unwrap();

        let store = JsonConfigStore::new(Storage::new(dir.path()));
        let config = store.load_client_config().await.unwrap();
        assert_eq!(config.charge_limit_pct, 80);
        assert_eq!(config.climatisation_at, None);

        // the next save writes the current envelope
        store.save_client_config(&config).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join(CLIENT_CONFIG_KEY)).unwrap();
        assert!(content.contains("\"version\": 1"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CLIENT_CONFIG_KEY), "{ not json").unwrap();

        let store = JsonConfigStore::new(Storage::new(dir.path()));
        assert!(matches!(
            store.load_client_config().await,
            Err(StoreError::Invalid(_))
        ));
    }
}
