//! Alert publishing and outbound notifications
//!
//! [`AlertPublisher::publish`] is the last stage of a successful reading:
//!
//! 1. persist the alert with status `NEW` (failure is reported to the caller)
//! 2. broadcast the alert channel message to every subscriber
//! 3. notify the configured target through the publisher's breaker; a
//!    rejection or delivery failure is logged and otherwise ignored

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::breaker::CircuitBreaker;
use crate::config::NotificationTarget;
use crate::discord;
use crate::error::BreakerError;
use crate::storage::{StorageBackend, StorageError};
use crate::{Alert, AlertMessage};

/// Capacity of the alert broadcast channel
const ALERT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum NotifyError {
    Request(reqwest::Error),
    Status { status: StatusCode, body: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Request(err) => write!(f, "notification request failed: {err}"),
            NotifyError::Status { status, body } => {
                write!(f, "notification rejected with status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Request(err) => Some(err),
            NotifyError::Status { .. } => None,
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Request(err)
    }
}

/// A problem of the pipeline itself that an operator has to look at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationalNotice {
    pub title: String,
    pub detail: String,
}

/// Delivers alerts and operational notices to one Discord or webhook target
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    target: NotificationTarget,
}

impl Notifier {
    pub fn new(target: NotificationTarget) -> Self {
        Self {
            client: Client::new(),
            target,
        }
    }

    #[instrument(skip_all, fields(alert_id = %alert.alert_id))]
    pub async fn notify_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        match &self.target {
            NotificationTarget::Discord(discord) => {
                let message = discord::alert_message(alert, discord.user_id.as_deref());
                self.post(&discord.url, &message).await
            }
            NotificationTarget::Webhook(webhook) => {
                let payload = json!({
                    "kind": "alert",
                    "alert": alert.to_message(),
                    "source_id": alert.source_id,
                });
                self.post(&webhook.url, &payload).await
            }
        }
    }

    #[instrument(skip_all, fields(title = %notice.title))]
    pub async fn notify_operational(&self, notice: &OperationalNotice) -> Result<(), NotifyError> {
        match &self.target {
            NotificationTarget::Discord(discord) => {
                let message = discord::operational_message(notice, discord.user_id.as_deref());
                self.post(&discord.url, &message).await
            }
            NotificationTarget::Webhook(webhook) => {
                let payload = json!({
                    "kind": "operational",
                    "title": notice.title,
                    "detail": notice.detail,
                    "timestamp": Utc::now().to_rfc3339(),
                });
                self.post(&webhook.url, &payload).await
            }
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), NotifyError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("notification delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Status { status, body })
    }
}

/// A notifier together with the breaker guarding its endpoint
#[derive(Debug, Clone)]
pub struct GuardedNotifier {
    notifier: Notifier,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedNotifier {
    pub fn new(notifier: Notifier, breaker: Arc<CircuitBreaker>) -> Self {
        Self { notifier, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns whether the alert was delivered
    pub async fn alert(&self, alert: &Alert) -> bool {
        let result = self
            .breaker
            .call(|| self.notifier.notify_alert(alert))
            .await;
        log_delivery(&self.breaker, result)
    }

    /// Returns whether the notice was delivered
    pub async fn operational(&self, notice: &OperationalNotice) -> bool {
        let result = self
            .breaker
            .call(|| self.notifier.notify_operational(notice))
            .await;
        log_delivery(&self.breaker, result)
    }
}

fn log_delivery(breaker: &CircuitBreaker, result: Result<(), BreakerError<NotifyError>>) -> bool {
    match result {
        Ok(()) => true,
        Err(BreakerError::Open(err)) => {
            info!("skipping notification: {err}");
            false
        }
        Err(err) => {
            warn!("notification via '{}' failed: {err}", breaker.name());
            false
        }
    }
}

#[derive(Clone)]
pub struct AlertPublisher {
    store: Arc<dyn StorageBackend>,
    channel: broadcast::Sender<AlertMessage>,
    notifier: Option<GuardedNotifier>,
}

impl AlertPublisher {
    pub fn new(store: Arc<dyn StorageBackend>, notifier: Option<GuardedNotifier>) -> Self {
        let (channel, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            store,
            channel,
            notifier,
        }
    }

    /// Subscribe to the alert channel
    pub fn subscribe(&self) -> broadcast::Receiver<AlertMessage> {
        self.channel.subscribe()
    }

    #[instrument(skip_all, fields(alert_id = %alert.alert_id, severity = %alert.severity))]
    pub async fn publish(&self, alert: &Alert) -> Result<(), StorageError> {
        self.store.insert_alert(alert).await?;
        info!("alert recorded: {}", alert.message);

        match self.channel.send(alert.to_message()) {
            Ok(receivers) => debug!("alert broadcast to {receivers} subscribers"),
            Err(_) => debug!("no alert channel subscribers"),
        }

        if let Some(notifier) = &self.notifier {
            notifier.alert(alert).await;
        }

        Ok(())
    }
}
