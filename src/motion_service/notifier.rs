//! Notification transports

use super::types::{NotificationKind, NotificationTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Sends detection notifications to a target
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, target: &NotificationTarget, text: &str) -> Result<()>;

    async fn send_image(&self, target: &NotificationTarget, caption: &str, jpeg: &[u8]) -> Result<()>;

    async fn send_video(&self, target: &NotificationTarget, caption: &str, path: &Path) -> Result<()>;
}

/// Logs notifications instead of delivering them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, target: &NotificationTarget, text: &str) -> Result<()> {
        tracing::info!(destination = %target.destination, channel = %target.channel, text = %text, "Motion notification");
        Ok(())
    }

    async fn send_image(&self, target: &NotificationTarget, caption: &str, jpeg: &[u8]) -> Result<()> {
        tracing::info!(
            destination = %target.destination,
            channel = %target.channel,
            caption = %caption,
            size = jpeg.len(),
            "Motion image notification"
        );
        Ok(())
    }

    async fn send_video(&self, target: &NotificationTarget, caption: &str, path: &Path) -> Result<()> {
        tracing::info!(
            destination = %target.destination,
            channel = %target.channel,
            caption = %caption,
            path = %path.display(),
            "Motion video notification"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    destination: &'a str,
    channel: &'a str,
    kind: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_base64: Option<String>,
}

/// JSON POST per notification; media is inlined as base64
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn post(&self, payload: &WebhookPayload<'_>) -> Result<()> {
        let response = self.http.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Webhook returned {}: {}",
                status,
                body.trim()
            )));
        }
        tracing::debug!(destination = %payload.destination, kind = %payload.kind, "Webhook delivered");
        Ok(())
    }
}

fn encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_text(&self, target: &NotificationTarget, text: &str) -> Result<()> {
        self.post(&WebhookPayload {
            destination: &target.destination,
            channel: &target.channel,
            kind: NotificationKind::Text.as_str(),
            text,
            file_name: None,
            data_base64: None,
        })
        .await
    }

    async fn send_image(&self, target: &NotificationTarget, caption: &str, jpeg: &[u8]) -> Result<()> {
        self.post(&WebhookPayload {
            destination: &target.destination,
            channel: &target.channel,
            kind: NotificationKind::Image.as_str(),
            text: caption,
            file_name: Some("motion.jpg".to_string()),
            data_base64: Some(encode(jpeg)),
        })
        .await
    }

    async fn send_video(&self, target: &NotificationTarget, caption: &str, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        self.post(&WebhookPayload {
            destination: &target.destination,
            channel: &target.channel,
            kind: NotificationKind::Video.as_str(),
            text: caption,
            file_name,
            data_base64: Some(encode(&data)),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_payload_shape() {
        let payload = WebhookPayload {
            destination: "42",
            channel: "telegram",
            kind: "image",
            text: "Motion on Hallway",
            file_name: Some("motion.jpg".to_string()),
            data_base64: Some(encode(&[0xFF, 0xD8, 0xFF, 0xD9])),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "image");
        assert_eq!(json["data_base64"], "/9j/2Q==");

        let text_only = WebhookPayload {
            file_name: None,
            data_base64: None,
            kind: "text",
            ..payload
        };
        let json = serde_json::to_value(&text_only).unwrap();
        assert!(json.get("data_base64").is_none());
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        let target = NotificationTarget::new("42", "log", [NotificationKind::Text]);
        let notifier = LogNotifier;
        assert!(notifier.send_text(&target, "hello").await.is_ok());
        assert!(notifier.send_image(&target, "img", &[1, 2, 3]).await.is_ok());
    }
}
