use serde_json::{Value, json};

use super::{AlertPayload, DiscordConfig, format_latency};
use crate::error::AppError;

const FOOTER: &str = "NetKeeper Pro";

/// Webhook body with a single embed.
pub fn webhook_body(config: &DiscordConfig, payload: &AlertPayload) -> Value {
    let mut fields = vec![
        json!({ "name": "Device", "value": payload.device_name, "inline": true }),
        json!({ "name": "IP Address", "value": payload.ip_address, "inline": true }),
    ];
    if let Some(latency) = payload.latency {
        fields.push(json!({ "name": "Latency", "value": format_latency(latency), "inline": true }));
    }

    let username = if config.username.trim().is_empty() {
        "NetKeeper"
    } else {
        config.username.as_str()
    };

    let mut body = json!({
        "username": username,
        "embeds": [{
            "title": payload.decorated_title(),
            "description": payload.message,
            "color": payload.alert_type.colour(),
            "fields": fields,
            "timestamp": payload.timestamp,
            "footer": { "text": FOOTER },
        }],
    });

    if !config.avatar_url.trim().is_empty() {
        body["avatar_url"] = json!(config.avatar_url);
    }
    if let Some(role) = config.mention_role_id.as_deref().filter(|r| !r.trim().is_empty()) {
        body["content"] = json!(format!("<@&{}>", role.trim()));
    }
    body
}

pub async fn send(
    client: &reqwest::Client,
    config: &DiscordConfig,
    payload: &AlertPayload,
) -> Result<(), AppError> {
    let url = url::Url::parse(config.webhook_url.trim())?;
    client
        .post(url)
        .json(&webhook_body(config, payload))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
