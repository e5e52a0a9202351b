//! Single admin account for the UI's login screen. Credentials live in the
//! settings table; sessions are opaque tokens held in memory and lost on
//! restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::model::new_id;
use crate::store::DataStore;

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";
pub const MIN_PASSWORD_LEN: usize = 4;

const USER_KEY: &str = "admin_user";
const PASS_KEY: &str = "admin_pass";

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub fn load_credentials(store: &dyn DataStore) -> Result<Credentials, AppError> {
    Ok(Credentials {
        username: store
            .get_setting(USER_KEY)?
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
        password: store
            .get_setting(PASS_KEY)?
            .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
    })
}

pub fn verify(store: &dyn DataStore, username: &str, password: &str) -> Result<bool, AppError> {
    let stored = load_credentials(store)?;
    Ok(stored.username == username && stored.password == password)
}

/// Settings-form rules: matching passwords of at least four characters; a
/// blank username means `admin`.
pub fn validate_new_credentials(
    username: &str,
    password: &str,
    confirm: &str,
) -> Result<Credentials, AppError> {
    if password != confirm {
        return Err(AppError::InvalidInput("Passwords do not match.".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidInput(format!(
            "Password too short (min {} chars).",
            MIN_PASSWORD_LEN
        )));
    }
    let username = username.trim();
    Ok(Credentials {
        username: if username.is_empty() {
            DEFAULT_USERNAME.to_string()
        } else {
            username.to_string()
        },
        password: password.to_string(),
    })
}

pub fn update_credentials(
    store: &dyn DataStore,
    username: &str,
    password: &str,
    confirm: &str,
) -> Result<String, AppError> {
    let creds = validate_new_credentials(username, password, confirm)?;
    store.set_settings(&[
        (USER_KEY, creds.username.as_str()),
        (PASS_KEY, creds.password.as_str()),
    ])?;
    info!(username = %creds.username, "Admin credentials updated");
    Ok(creds.username)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issue a new token for `username`.
    pub fn create(&self, username: &str) -> String {
        let token = new_id();
        self.sessions().insert(
            token.clone(),
            Session {
                username: username.to_string(),
                created_at: Utc::now(),
            },
        );
        token
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions().get(token).cloned()
    }

    pub fn remove(&self, token: &str) -> bool {
        self.sessions().remove(token).is_some()
    }

    /// Drop every session except `keep`.
    pub fn retain_only(&self, keep: &str) {
        self.sessions().retain(|token, _| token == keep);
    }
}
