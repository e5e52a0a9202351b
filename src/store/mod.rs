//! Persistence backends. Both replace the whole dataset on every save; the
//! last writer wins.

pub mod json;
pub mod migrate;
pub mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{Backend, StorageArgs};
use crate::error::AppError;
use crate::model::Dataset;

pub use json::JsonStore;
pub use migrate::{MigrationReport, migrate_json_to_sqlite};
pub use sqlite::SqliteStore;

/// Blocking storage interface; call from `spawn_blocking`.
pub trait DataStore: Send + Sync {
    fn load(&self) -> Result<Dataset, AppError>;
    fn save(&self, data: &Dataset) -> Result<(), AppError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, AppError>;
    /// Write every entry or none of them.
    fn set_settings(&self, entries: &[(&str, &str)]) -> Result<(), AppError>;
    fn all_settings(&self) -> Result<BTreeMap<String, String>, AppError>;

    fn set_setting(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.set_settings(&[(key, value)])
    }

    fn describe(&self) -> String;
}

pub fn open_store(storage: &StorageArgs) -> Result<Arc<dyn DataStore>, AppError> {
    let path = storage.path();
    let store: Arc<dyn DataStore> = match storage.backend {
        Backend::Json => Arc::new(JsonStore::open(&path)?),
        Backend::Sqlite => Arc::new(SqliteStore::open(&path)?),
    };
    info!(store = %store.describe(), "Storage ready");
    Ok(store)
}
