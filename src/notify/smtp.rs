//! Mail delivery through `lettre`. The HTML part is rendered with Tera and
//! autoescaping, so device names cannot inject markup.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::info;

use super::{AlertPayload, AlertType, SmtpConfig, alert_text, format_latency};
use crate::error::AppError;

const ALERT_TEMPLATE: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background: {{ banner }}; color: white; padding: 20px; border-radius: 8px 8px 0 0;">
    <h2 style="margin: 0;">{{ title }}</h2>
  </div>
  <div style="background: #1e293b; color: #e2e8f0; padding: 20px; border-radius: 0 0 8px 8px;">
    <p style="font-size: 16px; margin-bottom: 20px;">{{ message }}</p>
    <table style="width: 100%; border-collapse: collapse;">
      <tr>
        <td style="padding: 8px 0; border-bottom: 1px solid #334155; color: #94a3b8;">Device</td>
        <td style="padding: 8px 0; border-bottom: 1px solid #334155; text-align: right;">{{ device }}</td>
      </tr>
      <tr>
        <td style="padding: 8px 0; border-bottom: 1px solid #334155; color: #94a3b8;">IP Address</td>
        <td style="padding: 8px 0; border-bottom: 1px solid #334155; text-align: right; font-family: monospace;">{{ ip }}</td>
      </tr>
      {% if latency %}
      <tr>
        <td style="padding: 8px 0; border-bottom: 1px solid #334155; color: #94a3b8;">Latency</td>
        <td style="padding: 8px 0; border-bottom: 1px solid #334155; text-align: right;">{{ latency }}</td>
      </tr>
      {% endif %}
      <tr>
        <td style="padding: 8px 0; color: #94a3b8;">Time</td>
        <td style="padding: 8px 0; text-align: right;">{{ time }}</td>
      </tr>
    </table>
    <p style="margin-top: 20px; font-size: 12px; color: #64748b;">Sent by NetKeeper Pro</p>
  </div>
</div>
"#;

/// Body of `POST /api/notifications/smtp`'s `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub text: String,
}

fn banner_colour(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::Offline => "#dc2626",
        AlertType::Online => "#16a34a",
        AlertType::HighLatency | AlertType::Warning => "#ea580c",
    }
}

fn display_time(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|t| {
            t.with_timezone(&chrono::Utc)
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
        })
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Subject, HTML and text parts for an alert.
pub fn compose(payload: &AlertPayload) -> Result<MailMessage, AppError> {
    let time = display_time(&payload.timestamp);

    let mut ctx = Context::new();
    ctx.insert("banner", banner_colour(payload.alert_type));
    ctx.insert("title", &payload.decorated_title());
    ctx.insert("message", &payload.message);
    ctx.insert("device", &payload.device_name);
    ctx.insert("ip", &payload.ip_address);
    ctx.insert("latency", &payload.latency.map(format_latency));
    ctx.insert("time", &time);

    let html = Tera::one_off(ALERT_TEMPLATE, &ctx, true)
        .map_err(|e| AppError::Internal(format!("failed to render mail: {}", e)))?;

    Ok(MailMessage {
        subject: format!("{} NetKeeper: {}", payload.alert_type.emoji(), payload.title),
        html,
        text: format!("{}\n\n{}\nTime: {}", payload.title, alert_text(payload), time),
    })
}

fn mailbox(field: &str, address: &str) -> Result<Mailbox, AppError> {
    address
        .trim()
        .parse()
        .map_err(|e| AppError::InvalidInput(format!("invalid {} address '{}': {}", field, address, e)))
}

/// Build the message without sending it.
pub fn build_message(config: &SmtpConfig, mail: &MailMessage) -> Result<Message, AppError> {
    let from = if config.from_address.trim().is_empty() {
        &config.username
    } else {
        &config.from_address
    };
    if from.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "a from address or username is required".to_string(),
        ));
    }
    if config.to_addresses.is_empty() {
        return Err(AppError::InvalidInput(
            "at least one recipient is required".to_string(),
        ));
    }

    let mut builder = Message::builder()
        .from(mailbox("from", from)?)
        .subject(mail.subject.clone());
    for to in &config.to_addresses {
        builder = builder.to(mailbox("recipient", to)?);
    }

    let text = if mail.text.is_empty() {
        mail.subject.clone()
    } else {
        mail.text.clone()
    };
    builder
        .multipart(MultiPart::alternative_plain_html(text, mail.html.clone()))
        .map_err(|e| AppError::InvalidInput(format!("failed to build message: {}", e)))
}

fn transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, AppError> {
    let host = config.host.trim();
    if host.is_empty() {
        return Err(AppError::InvalidInput("SMTP host is required".to_string()));
    }
    let smtp_err = |e: lettre::transport::smtp::Error| AppError::Notification(e.to_string());

    let mut builder = if config.secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(smtp_err)?
    } else {
        let tls = TlsParameters::new(host.to_string()).map_err(smtp_err)?;
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).tls(Tls::Opportunistic(tls))
    };
    builder = builder.port(config.port);
    if !config.username.trim().is_empty() {
        builder = builder.credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ));
    }
    Ok(builder.build())
}

/// Deliver one message to every configured recipient.
pub async fn send(config: &SmtpConfig, mail: &MailMessage) -> Result<(), AppError> {
    let message = build_message(config, mail)?;
    let transport = transport(config)?;
    transport
        .send(message)
        .await
        .map_err(|e| AppError::Notification(format!("SMTP delivery failed: {}", e)))?;
    info!(
        host = %config.host,
        recipients = config.to_addresses.len(),
        "Mail sent"
    );
    Ok(())
}

pub async fn send_alert(config: &SmtpConfig, payload: &AlertPayload) -> Result<(), AppError> {
    send(config, &compose(payload)?).await
}
