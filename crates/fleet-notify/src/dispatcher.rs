//! Multi-channel notification dispatch, grounded on the predecessor's
//! `AlertManager::send_to_channel` per-channel match and its webhook/Slack
//! `reqwest::Client` delivery shape, generalized to four concrete channels
//! with settings-driven enablement, a per-container cooldown, and SSRF
//! validation on every outbound destination.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use fleet_common::config::NotificationsConfig;
use fleet_common::{EndpointId, NotificationChannel, Result, Severity};

use crate::ssrf;

/// Per-channel enablement, read by the caller from settings-table
/// overrides before falling back to `NotificationsConfig`'s static flags.
#[derive(Debug, Clone, Default)]
pub struct ChannelOverrides {
    pub teams_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub discord_enabled: Option<bool>,
    pub telegram_enabled: Option<bool>,
}

impl ChannelOverrides {
    fn resolve(&self, channel: NotificationChannel, config: &NotificationsConfig) -> bool {
        match channel {
            NotificationChannel::Teams => self.teams_enabled.unwrap_or(config.teams_enabled),
            NotificationChannel::Email => self.email_enabled.unwrap_or(config.email_enabled),
            NotificationChannel::Discord => self.discord_enabled.unwrap_or(config.discord_enabled),
            NotificationChannel::Telegram => self.telegram_enabled.unwrap_or(config.telegram_enabled),
        }
    }
}

/// One row written for every delivery attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub channel: NotificationChannel,
    pub event_type: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub endpoint_id: Option<EndpointId>,
    pub status: fleet_common::DeliveryStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A notification request, independent of which channels end up firing.
pub struct NotificationRequest<'a> {
    pub event_type: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub severity: Severity,
    pub container_id: Option<&'a str>,
    pub container_name: Option<&'a str>,
    pub endpoint_id: Option<EndpointId>,
}

pub struct Notifier {
    config: NotificationsConfig,
    http: reqwest::Client,
    cooldowns: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Notifier {
    pub fn new(config: NotificationsConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            http: reqwest::Client::new(),
            cooldowns: RwLock::new(HashMap::new()),
        })
    }

    fn cooldown_key(request: &NotificationRequest) -> String {
        format!("{}:{}", request.container_id.unwrap_or("global"), request.event_type)
    }

    fn is_in_cooldown(&self, key: &str) -> bool {
        match self.cooldowns.read().get(key) {
            Some(last) => {
                let window = chrono::Duration::minutes(self.config.cooldown_minutes as i64);
                Utc::now() - *last < window
            }
            None => false,
        }
    }

    /// Dispatches `request` to every enabled, configured channel. Returns
    /// one log entry per attempted channel; an empty vec means the request
    /// was dropped entirely because it is still within its cooldown window.
    pub async fn dispatch(&self, request: NotificationRequest<'_>, overrides: &ChannelOverrides) -> Vec<NotificationLogEntry> {
        let key = Self::cooldown_key(&request);
        if self.is_in_cooldown(&key) {
            info!(cooldown_key = %key, "notification dropped: within cooldown window");
            return Vec::new();
        }

        let mut entries = Vec::new();
        let mut any_delivered = false;

        if overrides.resolve(NotificationChannel::Teams, &self.config) {
            if let Some(url) = &self.config.teams_webhook_url {
                let entry = self.attempt(&request, NotificationChannel::Teams, || self.send_teams(url, &request)).await;
                any_delivered |= entry.status == fleet_common::DeliveryStatus::Sent;
                entries.push(entry);
            }
        }

        if overrides.resolve(NotificationChannel::Discord, &self.config) {
            if let Some(url) = &self.config.discord_webhook_url {
                let entry = self
                    .attempt(&request, NotificationChannel::Discord, || self.send_discord(url, &request))
                    .await;
                any_delivered |= entry.status == fleet_common::DeliveryStatus::Sent;
                entries.push(entry);
            }
        }

        if overrides.resolve(NotificationChannel::Telegram, &self.config) {
            if let (Some(token), Some(chat_id)) = (&self.config.telegram_bot_token, &self.config.telegram_chat_id) {
                let entry = self
                    .attempt(&request, NotificationChannel::Telegram, || self.send_telegram(token, chat_id, &request))
                    .await;
                any_delivered |= entry.status == fleet_common::DeliveryStatus::Sent;
                entries.push(entry);
            }
        }

        if overrides.resolve(NotificationChannel::Email, &self.config) {
            if !self.config.email_recipients.is_empty() {
                let entry = self.attempt(&request, NotificationChannel::Email, || self.send_email(&request)).await;
                any_delivered |= entry.status == fleet_common::DeliveryStatus::Sent;
                entries.push(entry);
            }
        }

        if any_delivered {
            self.cooldowns.write().insert(key, Utc::now());
        }

        entries
    }

    async fn attempt<'a, F, Fut>(&self, request: &NotificationRequest<'a>, channel: NotificationChannel, send: F) -> NotificationLogEntry
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let result = send().await;
        let (status, error) = match &result {
            Ok(()) => (fleet_common::DeliveryStatus::Sent, None),
            Err(e) => {
                warn!(channel = %channel, error = %e, "notification delivery failed");
                (fleet_common::DeliveryStatus::Failed, Some(e.to_string()))
            }
        };

        NotificationLogEntry {
            id: Uuid::new_v4(),
            channel,
            event_type: request.event_type.to_string(),
            title: request.title.to_string(),
            body: request.body.to_string(),
            severity: request.severity,
            container_id: request.container_id.map(String::from),
            container_name: request.container_name.map(String::from),
            endpoint_id: request.endpoint_id,
            status,
            error,
            created_at: Utc::now(),
        }
    }

    async fn send_teams(&self, url: &str, request: &NotificationRequest<'_>) -> anyhow::Result<()> {
        ssrf::validate_teams_webhook_url(url)?;
        let payload = serde_json::json!({ "text": format!("**{}**\n\n{}", request.title, request.body) });
        let response = self.http.post(url).json(&payload).send().await?;
        anyhow::ensure!(response.status().is_success(), "teams webhook returned {}", response.status());
        Ok(())
    }

    async fn send_discord(&self, url: &str, request: &NotificationRequest<'_>) -> anyhow::Result<()> {
        ssrf::validate_discord_webhook_url(url)?;
        let payload = serde_json::json!({ "content": format!("**{}**\n\n{}", request.title, request.body) });
        let response = self.http.post(url).json(&payload).send().await?;
        anyhow::ensure!(response.status().is_success(), "discord webhook returned {}", response.status());
        Ok(())
    }

    async fn send_telegram(&self, token: &str, chat_id: &str, request: &NotificationRequest<'_>) -> anyhow::Result<()> {
        ssrf::validate_telegram_bot_token(token)?;
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": format!("{}\n\n{}", request.title, request.body),
        });
        let response = self.http.post(&url).json(&payload).send().await?;
        anyhow::ensure!(response.status().is_success(), "telegram api returned {}", response.status());
        Ok(())
    }

    async fn send_email(&self, request: &NotificationRequest<'_>) -> anyhow::Result<()> {
        let host = self
            .config
            .smtp_host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("smtp host not configured"))?;
        ssrf::validate_smtp_host(host).await?;

        let from: Mailbox = "fleet-observability@localhost".parse()?;
        let mut transport_builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(self.config.smtp_port);
        if let (Some(user), Some(pass)) = (&self.config.smtp_username, &self.config.smtp_password) {
            transport_builder = transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let transport = transport_builder.build();

        for recipient in &self.config.email_recipients {
            let to: Mailbox = recipient.parse()?;
            let message = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(request.title.to_string())
                .body(request.body.to_string())?;
            transport.send(message).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> NotificationsConfig {
        NotificationsConfig {
            cooldown_minutes: 15,
            teams_webhook_url: None,
            discord_webhook_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            email_recipients: Vec::new(),
            teams_enabled: false,
            email_enabled: false,
            discord_enabled: false,
            telegram_enabled: false,
        }
    }

    fn request<'a>() -> NotificationRequest<'a> {
        NotificationRequest {
            event_type: "anomaly",
            title: "CPU spike",
            body: "container web is at 95% cpu",
            severity: Severity::Warning,
            container_id: Some("web"),
            container_name: Some("web"),
            endpoint_id: Some(1),
        }
    }

    #[tokio::test]
    async fn dispatch_with_no_channels_configured_returns_no_entries() {
        let notifier = Notifier::new(base_config());
        let entries = notifier.dispatch(request(), &ChannelOverrides::default()).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_a_second_dispatch_within_the_window() {
        let notifier = Notifier::new(base_config());
        notifier.cooldowns.write().insert("web:anomaly".to_string(), Utc::now());
        let entries = notifier.dispatch(request(), &ChannelOverrides::default()).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn expired_cooldown_allows_dispatch_to_proceed() {
        let notifier = Notifier::new(base_config());
        notifier
            .cooldowns
            .write()
            .insert("web:anomaly".to_string(), Utc::now() - chrono::Duration::minutes(30));
        assert!(!notifier.is_in_cooldown("web:anomaly"));
    }

    #[test]
    fn channel_overrides_fall_back_to_config_when_unset() {
        let mut config = base_config();
        config.teams_enabled = true;
        let overrides = ChannelOverrides::default();
        assert!(overrides.resolve(NotificationChannel::Teams, &config));
        assert!(!overrides.resolve(NotificationChannel::Email, &config));
    }

    #[test]
    fn channel_overrides_take_priority_over_config() {
        let mut config = base_config();
        config.teams_enabled = true;
        let overrides = ChannelOverrides {
            teams_enabled: Some(false),
            ..Default::default()
        };
        assert!(!overrides.resolve(NotificationChannel::Teams, &config));
    }
}
