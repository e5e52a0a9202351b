//! Flat-file backend: one pretty-printed JSON document holding the dataset
//! and a `settings` map.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::DataStore;
use crate::error::AppError;
use crate::model::Dataset;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(flatten)]
    data: Dataset,
    #[serde(default)]
    settings: BTreeMap<String, String>,
}

pub struct JsonStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonStore {
    /// Open the document, creating an empty one if the file is missing.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let store = Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        };
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            store.write(&Document::default())?;
            info!(path = %path.display(), "Created empty data file");
        }
        Ok(store)
    }

    fn read(&self) -> Result<Document, AppError> {
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Document::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, doc: &Document) -> Result<(), AppError> {
        let body = serde_json::to_string_pretty(doc)
            .map_err(|e| AppError::Internal(format!("failed to encode dataset: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Data file written");
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, AppError> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("data file lock poisoned".to_string()))
    }
}

impl DataStore for JsonStore {
    fn load(&self) -> Result<Dataset, AppError> {
        let _guard = self.guard()?;
        Ok(self.read()?.data)
    }

    fn save(&self, data: &Dataset) -> Result<(), AppError> {
        let _guard = self.guard()?;
        let mut doc = self.read()?;
        doc.data = data.clone();
        self.write(&doc)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        let _guard = self.guard()?;
        Ok(self.read()?.settings.remove(key))
    }

    fn set_settings(&self, entries: &[(&str, &str)]) -> Result<(), AppError> {
        let _guard = self.guard()?;
        let mut doc = self.read()?;
        for (key, value) in entries {
            doc.settings.insert(key.to_string(), value.to_string());
        }
        self.write(&doc)
    }

    fn all_settings(&self) -> Result<BTreeMap<String, String>, AppError> {
        let _guard = self.guard()?;
        Ok(self.read()?.settings)
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
