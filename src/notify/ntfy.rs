use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use super::{AlertPayload, AlertType, NtfyConfig, alert_text};
use crate::error::AppError;

/// `{server}/{topic}`
pub fn topic_url(config: &NtfyConfig) -> Result<Url, AppError> {
    let server = config.server_url.trim().trim_end_matches('/');
    let topic = config.topic.trim().trim_matches('/');
    Ok(Url::parse(&format!("{}/{}", server, topic))?)
}

/// Emoji shortcodes ntfy renders in front of the title.
pub fn tags(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::Offline => "rotating_light",
        AlertType::Online => "white_check_mark",
        AlertType::HighLatency | AlertType::Warning => "warning",
    }
}

/// Request headers. Header values must be ASCII, so the title carries no
/// emoji; the tag supplies it.
pub fn headers(config: &NtfyConfig, payload: &AlertPayload) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Title", payload.title.clone()),
        ("Priority", config.priority.to_string()),
        ("Tags", tags(payload.alert_type).to_string()),
    ];
    if let (Some(user), Some(pass)) = (
        config.username.as_deref().filter(|u| !u.is_empty()),
        config.password.as_deref().filter(|p| !p.is_empty()),
    ) {
        let token = STANDARD.encode(format!("{}:{}", user, pass));
        headers.push(("Authorization", format!("Basic {}", token)));
    }
    headers
}

pub async fn send(
    client: &reqwest::Client,
    config: &NtfyConfig,
    payload: &AlertPayload,
) -> Result<(), AppError> {
    let mut request = client.post(topic_url(config)?).body(alert_text(payload));
    for (name, value) in headers(config, payload) {
        request = request.header(name, value);
    }
    request.send().await?.error_for_status()?;
    Ok(())
}
