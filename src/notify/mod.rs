//! Alert fan-out to Discord, Gotify, ntfy and SMTP.
//!
//! Each provider is attempted only when it is enabled and has the minimum
//! configuration it needs. Provider failures are reported per channel and
//! never stop the other channels.

pub mod discord;
pub mod gotify;
pub mod log;
pub mod ntfy;
pub mod smtp;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::store::DataStore;

pub use log::{Notification, NotificationLog};

/// Settings key holding the JSON-encoded `NotificationSettings`.
pub const SETTINGS_KEY: &str = "notification_settings";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Implicit TLS (usually port 465). Otherwise STARTTLS when offered.
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 587,
            secure: false,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            to_addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub username: String,
    pub avatar_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mention_role_id: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            username: "NetKeeper".to_string(),
            avatar_url: String::new(),
            mention_role_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GotifyConfig {
    pub enabled: bool,
    pub server_url: String,
    pub app_token: String,
    pub priority: u8,
}

impl Default for GotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: String::new(),
            app_token: String::new(),
            priority: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NtfyConfig {
    pub enabled: bool,
    pub server_url: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub priority: u8,
}

impl Default for NtfyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: "https://ntfy.sh".to_string(),
            topic: String::new(),
            username: None,
            password: None,
            priority: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub smtp: SmtpConfig,
    pub discord: DiscordConfig,
    pub gotify: GotifyConfig,
    pub ntfy: NtfyConfig,
    pub alert_on_offline: bool,
    pub alert_on_back_online: bool,
    pub alert_on_high_latency: bool,
    /// Milliseconds.
    pub high_latency_threshold: f64,
    pub cooldown_minutes: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            smtp: SmtpConfig::default(),
            discord: DiscordConfig::default(),
            gotify: GotifyConfig::default(),
            ntfy: NtfyConfig::default(),
            alert_on_offline: true,
            alert_on_back_online: true,
            alert_on_high_latency: false,
            high_latency_threshold: 200.0,
            cooldown_minutes: 5,
        }
    }
}

/// Stored settings merged over the defaults.
pub fn load_settings(store: &dyn DataStore) -> Result<NotificationSettings, AppError> {
    match store.get_setting(SETTINGS_KEY)? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(NotificationSettings::default()),
    }
}

pub fn save_settings(store: &dyn DataStore, settings: &NotificationSettings) -> Result<(), AppError> {
    let raw = serde_json::to_string(settings)
        .map_err(|e| AppError::Internal(format!("failed to encode settings: {}", e)))?;
    store.set_setting(SETTINGS_KEY, &raw)
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Offline,
    Online,
    HighLatency,
    Warning,
}

impl AlertType {
    pub fn emoji(self) -> &'static str {
        match self {
            AlertType::Offline => "🔴",
            AlertType::Online => "🟢",
            AlertType::HighLatency => "🟡",
            AlertType::Warning => "⚠️",
        }
    }

    /// Discord embed colour.
    pub fn colour(self) -> u32 {
        match self {
            AlertType::Offline => 0xff0000,
            AlertType::Online => 0x00ff00,
            AlertType::HighLatency => 0xffaa00,
            AlertType::Warning => 0xffff00,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Offline => "offline",
            AlertType::Online => "online",
            AlertType::HighLatency => "high_latency",
            AlertType::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub title: String,
    pub message: String,
    pub device_name: String,
    pub ip_address: String,
    pub alert_type: AlertType,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
}

impl AlertPayload {
    fn new(title: &str, message: String, device: &str, ip: &str, alert_type: AlertType) -> Self {
        Self {
            title: title.to_string(),
            message,
            device_name: device.to_string(),
            ip_address: ip.to_string(),
            alert_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
            latency: None,
        }
    }

    pub fn offline(device: &str, ip: &str) -> Self {
        Self::new(
            "Device Offline",
            format!("{} ({}) is no longer responding to network checks.", device, ip),
            device,
            ip,
            AlertType::Offline,
        )
    }

    pub fn back_online(device: &str, ip: &str) -> Self {
        Self::new(
            "Device Back Online",
            format!("{} ({}) is now responding again.", device, ip),
            device,
            ip,
            AlertType::Online,
        )
    }

    pub fn high_latency(device: &str, ip: &str, latency: f64) -> Self {
        let mut payload = Self::new(
            "High Latency Detected",
            format!("{} ({}) is experiencing high latency.", device, ip),
            device,
            ip,
            AlertType::HighLatency,
        );
        payload.latency = Some(latency);
        payload
    }

    pub fn test() -> Self {
        Self::new(
            "Test Notification",
            "This is a test notification from NetKeeper Pro. If you see this, your notification channel is configured correctly!".to_string(),
            "Test Device",
            "192.168.1.1",
            AlertType::Warning,
        )
    }

    /// `<emoji> <title>`
    pub fn decorated_title(&self) -> String {
        format!("{} {}", self.alert_type.emoji(), self.title)
    }
}

pub fn format_latency(latency: f64) -> String {
    format!("{}ms", (latency * 100.0).round() / 100.0)
}

/// Plain-text body shared by Gotify, ntfy and the mail text part.
pub fn alert_text(payload: &AlertPayload) -> String {
    let mut text = format!(
        "{}\n\nDevice: {}\nIP: {}",
        payload.message, payload.device_name, payload.ip_address
    );
    if let Some(latency) = payload.latency {
        text.push_str(&format!("\nLatency: {}", format_latency(latency)));
    }
    text
}

// ============================================================================
// Channels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Smtp,
    Discord,
    Gotify,
    Ntfy,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Discord,
        Channel::Gotify,
        Channel::Ntfy,
        Channel::Smtp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Smtp => "smtp",
            Channel::Discord => "discord",
            Channel::Gotify => "gotify",
            Channel::Ntfy => "ntfy",
        }
    }

    pub fn is_enabled(self, settings: &NotificationSettings) -> bool {
        match self {
            Channel::Smtp => settings.smtp.enabled,
            Channel::Discord => settings.discord.enabled,
            Channel::Gotify => settings.gotify.enabled,
            Channel::Ntfy => settings.ntfy.enabled,
        }
    }

    /// Minimum configuration needed to attempt delivery.
    pub fn is_configured(self, settings: &NotificationSettings) -> bool {
        match self {
            Channel::Smtp => {
                !settings.smtp.host.trim().is_empty() && !settings.smtp.to_addresses.is_empty()
            }
            Channel::Discord => !settings.discord.webhook_url.trim().is_empty(),
            Channel::Gotify => {
                !settings.gotify.server_url.trim().is_empty()
                    && !settings.gotify.app_token.trim().is_empty()
            }
            Channel::Ntfy => !settings.ntfy.topic.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub success: bool,
    /// Set when the alert was suppressed by the cooldown.
    pub cooldown: bool,
    pub results: BTreeMap<String, bool>,
}

// ============================================================================
// Notifier
// ============================================================================

pub struct Notifier {
    client: reqwest::Client,
    public_url: Option<String>,
    cooldowns: Mutex<HashMap<(String, AlertType), Instant>>,
    log: NotificationLog,
}

impl Notifier {
    pub fn new(public_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            public_url: public_url.filter(|u| !u.trim().is_empty()),
            cooldowns: Mutex::new(HashMap::new()),
            log: NotificationLog::default(),
        }
    }

    pub fn log(&self) -> &NotificationLog {
        &self.log
    }

    fn cooldowns(&self) -> MutexGuard<'_, HashMap<(String, AlertType), Instant>> {
        // A poisoned map only holds timestamps; keep using it.
        self.cooldowns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on_cooldown(&self, device_id: &str, alert_type: AlertType, minutes: u64) -> bool {
        let window = Duration::from_secs(minutes.saturating_mul(60));
        self.cooldowns()
            .get(&(device_id.to_string(), alert_type))
            .is_some_and(|sent| sent.elapsed() < window)
    }

    fn start_cooldown(&self, device_id: &str, alert_type: AlertType) {
        self.cooldowns()
            .insert((device_id.to_string(), alert_type), Instant::now());
    }

    /// Send `payload` to every enabled channel concurrently.
    pub async fn send_alert(
        &self,
        device_id: &str,
        payload: AlertPayload,
        settings: &NotificationSettings,
    ) -> DispatchOutcome {
        if self.on_cooldown(device_id, payload.alert_type, settings.cooldown_minutes) {
            debug!(device_id, alert = payload.alert_type.as_str(), "Alert on cooldown");
            return DispatchOutcome {
                success: false,
                cooldown: true,
                results: BTreeMap::new(),
            };
        }

        self.log.push(device_id, &payload);

        let channels: Vec<Channel> = Channel::ALL
            .into_iter()
            .filter(|c| c.is_enabled(settings))
            .collect();

        let deliveries = channels.iter().map(|&channel| {
            let payload = &payload;
            async move {
                let delivered = if channel.is_configured(settings) {
                    match self.deliver(channel, payload, settings).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(channel = channel.as_str(), error = %e, "Notification failed");
                            false
                        }
                    }
                } else {
                    debug!(channel = channel.as_str(), "Channel enabled but not configured");
                    false
                };
                (channel, delivered)
            }
        });

        let results: BTreeMap<String, bool> = join_all(deliveries)
            .await
            .into_iter()
            .map(|(channel, ok)| (channel.as_str().to_string(), ok))
            .collect();

        let success = results.values().any(|ok| *ok);
        if success {
            self.start_cooldown(device_id, payload.alert_type);
            info!(
                device_id,
                alert = payload.alert_type.as_str(),
                channels = results.len(),
                "Alert dispatched"
            );
        }

        DispatchOutcome {
            success,
            cooldown: false,
            results,
        }
    }

    /// Send a test alert to one channel, ignoring cooldowns and the enabled
    /// flag.
    pub async fn test_channel(
        &self,
        channel: Channel,
        settings: &NotificationSettings,
    ) -> Result<(), AppError> {
        if !channel.is_configured(settings) {
            return Err(AppError::InvalidInput(format!(
                "{} is not configured",
                channel.as_str()
            )));
        }
        self.deliver(channel, &AlertPayload::test(), settings).await
    }

    async fn deliver(
        &self,
        channel: Channel,
        payload: &AlertPayload,
        settings: &NotificationSettings,
    ) -> Result<(), AppError> {
        match channel {
            Channel::Discord => discord::send(&self.client, &settings.discord, payload).await,
            Channel::Gotify => {
                gotify::send(
                    &self.client,
                    &settings.gotify,
                    payload,
                    self.public_url.as_deref(),
                )
                .await
            }
            Channel::Ntfy => ntfy::send(&self.client, &settings.ntfy, payload).await,
            Channel::Smtp => smtp::send_alert(&settings.smtp, payload).await,
        }
    }
}
