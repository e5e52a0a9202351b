use serde_json::{Value, json};
use url::Url;

use super::{AlertPayload, GotifyConfig, alert_text};
use crate::error::AppError;

/// `{server}/message?token=<token>`
pub fn message_url(config: &GotifyConfig) -> Result<Url, AppError> {
    let server = config.server_url.trim().trim_end_matches('/');
    let mut url = Url::parse(&format!("{}/message", server))?;
    url.query_pairs_mut()
        .append_pair("token", config.app_token.trim());
    Ok(url)
}

pub fn message_body(config: &GotifyConfig, payload: &AlertPayload, click_url: Option<&str>) -> Value {
    let mut body = json!({
        "title": payload.decorated_title(),
        "message": alert_text(payload),
        "priority": config.priority,
    });
    if let Some(click) = click_url {
        body["extras"] = json!({
            "client::notification": { "click": { "url": click } }
        });
    }
    body
}

pub async fn send(
    client: &reqwest::Client,
    config: &GotifyConfig,
    payload: &AlertPayload,
    click_url: Option<&str>,
) -> Result<(), AppError> {
    client
        .post(message_url(config)?)
        .json(&message_body(config, payload, click_url))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GotifyConfig {
        GotifyConfig {
            enabled: true,
            server_url: "https://gotify.example.com/".into(),
            app_token: "A1b2&c".into(),
            priority: 8,
        }
    }

    #[test]
    fn test_message_url_trims_slash_and_encodes_token() {
        let url = message_url(&config()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gotify.example.com/message?token=A1b2%26c"
        );
    }

    #[test]
    fn test_message_url_rejects_garbage() {
        let mut c = config();
        c.server_url = "not a url".into();
        assert_eq!(message_url(&c).unwrap_err().kind(), "InvalidInput");
    }

    #[test]
    fn test_body_with_click_url() {
        let payload = AlertPayload::back_online("nas", "10.0.0.5");
        let body = message_body(&config(), &payload, Some("https://netkeeper.lan"));
        assert_eq!(body["title"], "🟢 Device Back Online");
        assert_eq!(body["priority"], 8);
        assert_eq!(
            body["extras"]["client::notification"]["click"]["url"],
            "https://netkeeper.lan"
        );
        assert!(body["message"].as_str().unwrap().ends_with("IP: 10.0.0.5"));

        let plain = message_body(&config(), &payload, None);
        assert!(plain.get("extras").is_none());
    }
}
