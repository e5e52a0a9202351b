//! One-shot copy of a JSON data file into a SQLite database.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::{DataStore, JsonStore, SqliteStore};
use crate::error::AppError;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub subnets: usize,
    pub ip_addresses: usize,
    pub nat_rules: usize,
    pub wifi_networks: usize,
    pub applications: usize,
    pub settings: usize,
    /// Copy of the SQLite file taken before it was overwritten.
    pub backup: Option<PathBuf>,
}

fn backup_path(sqlite: &Path) -> PathBuf {
    let mut name = sqlite.as_os_str().to_owned();
    name.push(format!(".backup-{}", chrono::Utc::now().timestamp_millis()));
    PathBuf::from(name)
}

/// Copy the dataset and settings from `json` into `sqlite`. The JSON file is
/// left untouched; an existing SQLite file is backed up first.
pub fn migrate_json_to_sqlite(json: &Path, sqlite: &Path) -> Result<MigrationReport, AppError> {
    if !json.exists() {
        return Err(AppError::NotFound(format!(
            "JSON data file '{}' not found",
            json.display()
        )));
    }

    let source = JsonStore::open(json)?;
    let data = source.load()?;
    let settings = source.all_settings()?;

    let backup = if sqlite.exists() {
        let target = backup_path(sqlite);
        fs::copy(sqlite, &target)?;
        info!(backup = %target.display(), "Backed up existing database");
        Some(target)
    } else {
        None
    };

    let dest = SqliteStore::open(sqlite)?;
    if let Err(e) = dest.replace_all(&data, &settings) {
        warn!(error = %e, "Migration aborted, database left unchanged");
        return Err(e);
    }

    let report = MigrationReport {
        subnets: data.subnets.len(),
        ip_addresses: data.ip_addresses.len(),
        nat_rules: data.nat_rules.len(),
        wifi_networks: data.wifi_networks.len(),
        applications: data.applications.len(),
        settings: settings.len(),
        backup,
    };
    info!(
        subnets = report.subnets,
        ip_addresses = report.ip_addresses,
        nat_rules = report.nat_rules,
        wifi_networks = report.wifi_networks,
        applications = report.applications,
        "Migration complete"
    );
    Ok(report)
}
