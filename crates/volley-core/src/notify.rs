//! Lifecycle event notification
//!
//! Notification is best-effort: a failed delivery of an alert never affects
//! campaign state. Callers log the error and continue.

use async_trait::async_trait;
use tracing::debug;
use volley_common::config::TelegramConfig;
use volley_common::types::LifecycleEvent;
use volley_common::{Error, Result};

/// Notification collaborator for campaign lifecycle events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Notifier that drops every event; used when alerts are disabled and in tests
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: &LifecycleEvent) -> Result<()> {
        Ok(())
    }
}

/// Sends lifecycle alerts to a Telegram chat via the bot API
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn wants(&self, event: &LifecycleEvent) -> bool {
        if !self.config.enabled {
            return false;
        }
        match event {
            LifecycleEvent::Started { .. } => self.config.alert_started,
            _ => self.config.alert_state_changes,
        }
    }

    fn format(event: &LifecycleEvent) -> String {
        match event {
            LifecycleEvent::Started { name } => format!("Campaign <b>\"{}\"</b> started!", name),
            LifecycleEvent::Paused { name } => format!("Campaign <b>\"{}\"</b> paused.", name),
            LifecycleEvent::Resumed { name } => format!("Campaign <b>\"{}\"</b> resumed!", name),
            LifecycleEvent::Stopped { name } => format!("Campaign <b>\"{}\"</b> stopped.", name),
            LifecycleEvent::Completed { name } => {
                format!("Campaign <b>\"{}\"</b> completed!", name)
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
        if !self.wants(event) {
            debug!(event = %event, "Telegram alert suppressed by settings");
            return Ok(());
        }

        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let payload = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": Self::format(event),
            "parse_mode": "HTML",
        });

        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Telegram request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Notification(format!("Telegram rejected message: {}", e)))?;

        Ok(())
    }
}
