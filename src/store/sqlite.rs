//! SQLite backend. Each save deletes every row and reinserts the dataset
//! inside one transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Row, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::DataStore;
use crate::error::AppError;
use crate::model::{Application, Dataset, IpAddress, NatRule, Subnet, WifiNetwork};

pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path).map_err(|e| {
            AppError::Database(format!(
                "failed to open database at '{}': {}",
                path.display(),
                e
            ))
        })?;

        // Busy timeout first; it takes no locks.
        let _ = conn.execute("PRAGMA busy_timeout = 30000;", []);
        // WAL only needs to succeed once per database file.
        let _ = conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()));
        let _ = conn.execute("PRAGMA synchronous = NORMAL;", []);

        Self::bootstrap(&conn)?;
        info!(path = %path.display(), "SQLite database opened");

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    fn bootstrap(conn: &Connection) -> Result<(), AppError> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        create_tables_if_not_exist(conn)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database connection lock poisoned".to_string()))
    }

    /// Replace the dataset and every stored setting in one transaction.
    pub fn replace_all(
        &self,
        data: &Dataset,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_dataset(&tx, data)?;
        tx.execute("DELETE FROM settings", [])?;
        for (key, value) in settings {
            put_setting(&tx, key, value)?;
        }
        tx.commit()?;
        Ok(())
    }
}

pub fn create_tables_if_not_exist(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subnets (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            cidr TEXT NOT NULL,
            gateway TEXT NOT NULL DEFAULT '',
            vlan_id TEXT,
            vlan_name TEXT,
            vlan_description TEXT,
            description TEXT NOT NULL DEFAULT '',
            used_ips INTEGER NOT NULL DEFAULT 0,
            total_ips INTEGER NOT NULL DEFAULT 0,
            dhcp_enabled INTEGER NOT NULL DEFAULT 0,
            dhcp_start TEXT,
            dhcp_end TEXT,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_subnets_vlan ON subnets (vlan_id);

        CREATE TABLE IF NOT EXISTS ip_addresses (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            address TEXT NOT NULL,
            subnet_id TEXT NOT NULL,
            hostname TEXT NOT NULL DEFAULT '',
            mac TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            owner TEXT NOT NULL DEFAULT '',
            notes TEXT,
            is_online INTEGER,
            last_checked TEXT,
            monitor_enabled INTEGER,
            device_type TEXT,
            parent_device_id TEXT,
            connection_type TEXT,
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (subnet_id) REFERENCES subnets(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_ip_subnet ON ip_addresses (subnet_id);
        CREATE INDEX IF NOT EXISTS idx_ip_status ON ip_addresses (status);

        CREATE TABLE IF NOT EXISTS nat_rules (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            internal_ip TEXT NOT NULL,
            external_ip TEXT NOT NULL,
            internal_port INTEGER,
            external_port INTEGER,
            protocol TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS wifi_networks (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            ssid TEXT NOT NULL,
            password TEXT,
            security TEXT NOT NULL,
            band TEXT NOT NULL,
            vlan_id TEXT,
            description TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS applications (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            description TEXT,
            host TEXT,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER DEFAULT (strftime('%s', 'now'))
        );
        ",
    )
}

fn put_setting(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = strftime('%s', 'now')",
        params![key, value],
    )?;
    Ok(())
}

/// Serde wire name of a unit enum variant, e.g. `WPA2-PSK`.
fn to_text<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn from_text<T: DeserializeOwned>(text: Option<String>) -> Option<T> {
    text.and_then(|t| serde_json::from_value(serde_json::Value::String(t)).ok())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn insert_subnet(tx: &Transaction<'_>, position: usize, s: &Subnet) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO subnets (id, position, name, cidr, gateway, vlan_id, vlan_name,
            vlan_description, description, used_ips, total_ips, dhcp_enabled, dhcp_start, dhcp_end)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            s.id,
            position as i64,
            s.name,
            s.cidr,
            s.gateway,
            s.vlan_id,
            s.vlan_name,
            s.vlan_description,
            s.description,
            clamp_i64(s.used_ips),
            clamp_i64(s.total_ips),
            s.dhcp_enabled,
            s.dhcp_start,
            s.dhcp_end,
        ],
    )?;
    Ok(())
}

fn subnet_from_row(row: &Row<'_>) -> rusqlite::Result<Subnet> {
    Ok(Subnet {
        id: row.get("id")?,
        name: row.get("name")?,
        cidr: row.get("cidr")?,
        gateway: row.get("gateway")?,
        vlan_id: row.get("vlan_id")?,
        vlan_name: row.get("vlan_name")?,
        vlan_description: row.get("vlan_description")?,
        description: row.get("description")?,
        used_ips: row.get::<_, i64>("used_ips")?.max(0) as u64,
        total_ips: row.get::<_, i64>("total_ips")?.max(0) as u64,
        dhcp_enabled: row.get("dhcp_enabled")?,
        dhcp_start: row.get("dhcp_start")?,
        dhcp_end: row.get("dhcp_end")?,
    })
}

fn insert_ip(tx: &Transaction<'_>, position: usize, ip: &IpAddress) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO ip_addresses (id, position, address, subnet_id, hostname, mac, status, owner,
            notes, is_online, last_checked, monitor_enabled, device_type, parent_device_id,
            connection_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            ip.id,
            position as i64,
            ip.address,
            ip.subnet_id,
            ip.hostname,
            ip.mac,
            to_text(&ip.status),
            ip.owner,
            ip.notes,
            ip.is_online,
            ip.last_checked,
            ip.monitor_enabled,
            ip.device_type.as_ref().map(to_text),
            ip.parent_device_id,
            ip.connection_type.as_ref().map(to_text),
        ],
    )?;
    Ok(())
}

fn ip_from_row(row: &Row<'_>) -> rusqlite::Result<IpAddress> {
    Ok(IpAddress {
        id: row.get("id")?,
        address: row.get("address")?,
        subnet_id: row.get("subnet_id")?,
        hostname: row.get("hostname")?,
        mac: row.get("mac")?,
        status: from_text(row.get("status")?).unwrap_or_default(),
        owner: row.get("owner")?,
        notes: row.get("notes")?,
        is_online: row.get("is_online")?,
        last_checked: row.get("last_checked")?,
        monitor_enabled: row.get("monitor_enabled")?,
        device_type: from_text(row.get("device_type")?),
        parent_device_id: row.get("parent_device_id")?,
        connection_type: from_text(row.get("connection_type")?),
    })
}

fn insert_nat(tx: &Transaction<'_>, position: usize, n: &NatRule) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO nat_rules (id, position, internal_ip, external_ip, internal_port,
            external_port, protocol, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            n.id,
            position as i64,
            n.internal_ip,
            n.external_ip,
            n.internal_port,
            n.external_port,
            to_text(&n.protocol),
            n.description,
        ],
    )?;
    Ok(())
}

fn nat_from_row(row: &Row<'_>) -> rusqlite::Result<NatRule> {
    Ok(NatRule {
        id: row.get("id")?,
        internal_ip: row.get("internal_ip")?,
        external_ip: row.get("external_ip")?,
        internal_port: row.get("internal_port")?,
        external_port: row.get("external_port")?,
        protocol: from_text(row.get("protocol")?).unwrap_or_default(),
        description: row.get("description")?,
    })
}

fn insert_wifi(tx: &Transaction<'_>, position: usize, w: &WifiNetwork) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO wifi_networks (id, position, ssid, password, security, band, vlan_id,
            description, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            w.id,
            position as i64,
            w.ssid,
            w.password,
            to_text(&w.security),
            to_text(&w.band),
            w.vlan_id,
            w.description,
            w.is_active,
        ],
    )?;
    Ok(())
}

fn wifi_from_row(row: &Row<'_>) -> rusqlite::Result<WifiNetwork> {
    Ok(WifiNetwork {
        id: row.get("id")?,
        ssid: row.get("ssid")?,
        password: row.get("password")?,
        security: from_text(row.get("security")?).unwrap_or_default(),
        band: from_text(row.get("band")?).unwrap_or_default(),
        vlan_id: row.get("vlan_id")?,
        description: row.get("description")?,
        is_active: row.get("is_active")?,
    })
}

fn insert_application(
    tx: &Transaction<'_>,
    position: usize,
    a: &Application,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO applications (id, position, name, url, description, host)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![a.id, position as i64, a.name, a.url, a.description, a.host],
    )?;
    Ok(())
}

fn application_from_row(row: &Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        description: row.get("description")?,
        host: row.get("host")?,
    })
}

fn select_all<T>(
    conn: &Connection,
    table: &str,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY position", table))?;
    let rows = stmt.query_map([], map)?;
    rows.collect()
}

/// Delete every dataset row and reinsert `data`, leaving the commit to the
/// caller.
fn write_dataset(tx: &Transaction<'_>, data: &Dataset) -> Result<(), AppError> {
    // Children first so the cascade has nothing left to do.
    for table in [
        "ip_addresses",
        "subnets",
        "nat_rules",
        "wifi_networks",
        "applications",
    ] {
        tx.execute(&format!("DELETE FROM {}", table), [])?;
    }

    for (i, subnet) in data.subnets.iter().enumerate() {
        insert_subnet(tx, i, subnet)?;
    }
    for (i, ip) in data.ip_addresses.iter().enumerate() {
        insert_ip(tx, i, ip).map_err(|e| match AppError::from(e) {
            AppError::Conflict(msg) => AppError::Conflict(format!(
                "ip address '{}' cannot be stored ({}); check that subnet '{}' exists",
                ip.id, msg, ip.subnet_id
            )),
            other => other,
        })?;
    }
    for (i, rule) in data.nat_rules.iter().enumerate() {
        insert_nat(tx, i, rule)?;
    }
    for (i, wifi) in data.wifi_networks.iter().enumerate() {
        insert_wifi(tx, i, wifi)?;
    }
    for (i, app) in data.applications.iter().enumerate() {
        insert_application(tx, i, app)?;
    }
    Ok(())
}

impl DataStore for SqliteStore {
    fn load(&self) -> Result<Dataset, AppError> {
        let conn = self.conn()?;
        Ok(Dataset {
            subnets: select_all(&conn, "subnets", subnet_from_row)?,
            ip_addresses: select_all(&conn, "ip_addresses", ip_from_row)?,
            nat_rules: select_all(&conn, "nat_rules", nat_from_row)?,
            wifi_networks: select_all(&conn, "wifi_networks", wifi_from_row)?,
            applications: select_all(&conn, "applications", application_from_row)?,
        })
    }

    fn save(&self, data: &Dataset) -> Result<(), AppError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_dataset(&tx, data)?;

        // Dropping an uncommitted transaction rolls it back.
        tx.commit()?;
        debug!(
            subnets = data.subnets.len(),
            ip_addresses = data.ip_addresses.len(),
            "Dataset replaced"
        );
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value)
    }

    fn set_settings(&self, entries: &[(&str, &str)]) -> Result<(), AppError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            put_setting(&tx, key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn all_settings(&self) -> Result<BTreeMap<String, String>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }
}
