//! Operational Notifications
//!
//! One-way, best-effort alerts. Callers fire them on a detached task and
//! never branch on the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::NotifyError;

// == Notifier Contract ==
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

// == Webhook Notifier ==
/// Posts `{"text": message}` to an incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

// == Log Notifier ==
/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "completion_cache::notify", "{}", message);
        Ok(())
    }
}

/// Picks the notification channel for the configured mode.
pub fn notifier_for(config: &Config) -> Arc<dyn Notifier> {
    match (&config.notify_webhook_url, config.mode.is_development()) {
        (Some(url), false) => Arc::new(WebhookNotifier::new(url.clone())),
        _ => Arc::new(LogNotifier),
    }
}

/// Sends `message` on a detached task, logging delivery failures.
pub fn notify_detached(notifier: &Arc<dyn Notifier>, message: String) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(err) = notifier.notify(&message).await {
            warn!(error = %err, "Failed to deliver notification");
        }
    });
}
