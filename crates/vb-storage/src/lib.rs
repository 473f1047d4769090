//! Persistence for the vehicle bridge
//!
//! Small JSON documents under a `.storage/` directory, each wrapped with a
//! version header and written atomically.

mod client_config_store;
mod storage;

pub use client_config_store::{JsonConfigStore, CLIENT_CONFIG_KEY};
pub use storage::{
    load_with_migration, MigrationFn, Storable, Storage, StorageError, StorageFile, StorageResult,
};
