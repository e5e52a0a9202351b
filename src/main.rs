pub mod auth;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod scanner;
pub mod state;
pub mod store;
pub mod topology;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Backend, Cli, Command, ServeArgs, StorageArgs};
use notify::Notifier;
use scanner::Fping;
use state::AppState;
use store::DataStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&cli.storage, &cli.serve).await,
        Command::InitDb => init_db(&cli.storage),
        Command::Migrate { json, sqlite } => {
            let report = store::migrate_json_to_sqlite(&json, &sqlite)
                .with_context(|| format!("migrating {} to {}", json.display(), sqlite.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn init_db(storage: &StorageArgs) -> anyhow::Result<()> {
    let store = store::open_store(storage).context("opening storage")?;
    let data = store.load()?;
    info!(
        store = %store.describe(),
        subnets = data.subnets.len(),
        ip_addresses = data.ip_addresses.len(),
        "Storage initialised"
    );
    if storage.backend == Backend::Json {
        println!("Data file ready at {}", storage.path().display());
    } else {
        println!("Database ready at {}", storage.path().display());
    }
    Ok(())
}

async fn serve(storage: &StorageArgs, args: &ServeArgs) -> anyhow::Result<()> {
    let store = store::open_store(storage).context("opening storage")?;
    let state = Arc::new(AppState::new(
        store,
        Fping::new(args.fping.clone()),
        Notifier::new(args.public_url.clone()),
        args.monitor_interval,
    ));

    let poller = if args.monitor_interval > 0 {
        Some(monitor::poller::spawn(
            Arc::clone(&state),
            Duration::from_secs(args.monitor_interval),
        ))
    } else {
        info!("Monitor poller disabled");
        None
    };

    let server = web::start(Arc::clone(&state), args);

    tokio::select! {
        result = server => {
            result
                .context("web server task panicked")?
                .context("web server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    if let Some(poller) = poller {
        poller.abort();
    }
    Ok(())
}
