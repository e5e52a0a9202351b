//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_JSON_PATH: &str = "db.json";
pub const DEFAULT_SQLITE_PATH: &str = "netkeeper.db";
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Largest accepted JSON request body (whole-dataset saves included).
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "netkeeper")]
#[command(about = "Self-hosted network documentation: subnets, VLANs, NAT, WiFi and monitoring")]
pub struct Cli {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub serve: ServeArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create an empty data file or database schema and exit
    InitDb,
    /// Copy a JSON data file into a SQLite database
    Migrate {
        /// JSON data file to read
        #[arg(long, default_value = DEFAULT_JSON_PATH)]
        json: PathBuf,

        /// SQLite database to write (backed up first if it exists)
        #[arg(long, default_value = DEFAULT_SQLITE_PATH)]
        sqlite: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Json,
    Sqlite,
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Storage backend
    #[arg(long, env = "NETKEEPER_BACKEND", value_enum, default_value_t = Backend::Json)]
    pub backend: Backend,

    /// Data file or database path (`sqlite://` prefix accepted)
    #[arg(long, env = "DATABASE_URL")]
    pub database: Option<String>,
}

impl StorageArgs {
    pub fn path(&self) -> PathBuf {
        match self.database.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(url) => {
                let stripped = url
                    .strip_prefix("sqlite://")
                    .or_else(|| url.strip_prefix("sqlite:"))
                    .unwrap_or(url);
                PathBuf::from(stripped)
            }
            None => PathBuf::from(match self.backend {
                Backend::Json => DEFAULT_JSON_PATH,
                Backend::Sqlite => DEFAULT_SQLITE_PATH,
            }),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long, env = "NETKEEPER_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// HTTP port
    #[arg(long, env = "NETKEEPER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the built web UI
    #[arg(long, env = "NETKEEPER_STATIC_DIR", default_value = "dist")]
    pub static_dir: PathBuf,

    /// fping executable
    #[arg(long, env = "FPING_PATH", default_value = "fping")]
    pub fping: String,

    /// Seconds between monitoring polls; 0 disables the poller
    #[arg(long, env = "MONITOR_INTERVAL_SECS", default_value_t = DEFAULT_MONITOR_INTERVAL_SECS)]
    pub monitor_interval: u64,

    /// Public URL of this instance, used as the click target in alerts
    #[arg(long, env = "NETKEEPER_PUBLIC_URL")]
    pub public_url: Option<String>,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("dist"),
            fping: "fping".to_string(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL_SECS,
            public_url: None,
        }
    }
}
