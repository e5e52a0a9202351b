use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::auth::SessionStore;
use crate::error::AppError;
use crate::model::Dataset;
use crate::monitor::Monitor;
use crate::notify::{self, NotificationSettings, Notifier};
use crate::scanner::Fping;
use crate::store::DataStore;

/// Shared by every handler and the poller.
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub fping: Fping,
    pub monitor: RwLock<Monitor>,
    pub notifier: Notifier,
    pub sessions: SessionStore,
    /// Held for the duration of a monitoring cycle so manual refreshes and
    /// the poller never interleave.
    pub cycle: Mutex<()>,
    /// Serializes dataset read-modify-write within this process.
    pub writes: Mutex<()>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DataStore>,
        fping: Fping,
        notifier: Notifier,
        check_interval: u64,
    ) -> Self {
        Self {
            store,
            fping,
            monitor: RwLock::new(Monitor::new(check_interval)),
            notifier,
            sessions: SessionStore::default(),
            cycle: Mutex::new(()),
            writes: Mutex::new(()),
        }
    }

    /// Run blocking store work on the blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&dyn DataStore) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    pub async fn load(&self) -> Result<Dataset, AppError> {
        self.run_blocking(|store| store.load()).await
    }

    /// Load, change and save the dataset as one step.
    pub async fn modify<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Dataset) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.writes.lock().await;
        self.run_blocking(move |store| {
            let mut data = store.load()?;
            let result = f(&mut data)?;
            store.save(&data)?;
            Ok(result)
        })
        .await
    }

    /// Store `data` as given, replacing the whole dataset.
    pub async fn replace(&self, data: Dataset) -> Result<(), AppError> {
        let _guard = self.writes.lock().await;
        self.run_blocking(move |store| store.save(&data)).await
    }

    pub async fn notification_settings(&self) -> Result<NotificationSettings, AppError> {
        self.run_blocking(notify::load_settings).await
    }
}
