//! Notification emails for new submissions.
//!
//! The `http` provider posts to a transactional-email JSON API
//! (`POST {url}/emails`, bearer auth) and returns the provider's message id.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{resolve_api_key, MailerConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notification; returns the provider message id.
    async fn send(&self, notification: &Notification) -> Result<String>;
}

pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _notification: &Notification) -> Result<String> {
        bail!("notifications are disabled")
    }
}

pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
    to: Vec<String>,
}

impl HttpMailer {
    pub fn new(config: &MailerConfig) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), &config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key,
            from: config.from.clone(),
            to: config.to.clone(),
        })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send(&self, notification: &Notification) -> Result<String> {
        let body = serde_json::json!({
            "from": self.from,
            "to": self.to,
            "subject": notification.subject,
            "text": notification.text,
            "reply_to": notification.reply_to,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Email request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Email API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Email API response missing id"))
    }
}

pub fn create_notifier(config: &MailerConfig) -> Result<Arc<dyn Notifier>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledNotifier)),
        "http" => Ok(Arc::new(HttpMailer::new(config)?)),
        other => bail!("Unknown mailer provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> MailerConfig {
        MailerConfig {
            provider: "http".to_string(),
            url: url.to_string(),
            api_key: Some("re_test".to_string()),
            to: vec!["team@example.com".to_string()],
            ..MailerConfig::default()
        }
    }

    fn notification() -> Notification {
        Notification {
            subject: "New contact inquiry".to_string(),
            text: "Hello".to_string(),
            reply_to: Some("jane@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_disabled_fails() {
        assert!(DisabledNotifier.send(&notification()).await.is_err());
    }

    #[tokio::test]
    async fn test_http_send_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .and(body_partial_json(serde_json::json!({
                "to": ["team@example.com"],
                "subject": "New contact inquiry",
                "reply_to": "jane@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "msg_1" })))
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(&config(&server.uri())).unwrap();
        assert_eq!(mailer.send(&notification()).await.unwrap(), "msg_1");
    }

    #[tokio::test]
    async fn test_http_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(&config(&server.uri())).unwrap();
        let err = mailer.send(&notification()).await.unwrap_err();
        assert!(err.to_string().contains("422"));
    }
}
