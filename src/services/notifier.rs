//! Outbound notifications for alerts and geofence transitions.
//!
//! Delivery is best effort: callers log a failed notification and carry on.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::fetch::{HttpClient, post_json};
use crate::geofence::GeofenceEvent;
use crate::model::{AlertEvent, Severity};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, event: &AlertEvent) -> Result<()>;

    async fn geofence(&self, event: &GeofenceEvent) -> Result<()>;
}

/// Writes every notification to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn alert(&self, event: &AlertEvent) -> Result<()> {
        match event.severity {
            Severity::High => warn!(
                delivery_id = %event.delivery_id,
                issue = %event.issue_type,
                severity = %event.severity,
                "{}",
                event.description
            ),
            _ => info!(
                delivery_id = %event.delivery_id,
                issue = %event.issue_type,
                severity = %event.severity,
                "{}",
                event.description
            ),
        }
        Ok(())
    }

    async fn geofence(&self, event: &GeofenceEvent) -> Result<()> {
        info!(
            delivery_id = %event.delivery_id,
            geofence = %event.geofence,
            transition = ?event.transition,
            location = %event.location,
            "Geofence transition"
        );
        Ok(())
    }
}

/// What a [`ChannelNotifier`] or webhook emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "event")]
pub enum Notification {
    Alert(AlertEvent),
    Geofence(GeofenceEvent),
}

/// Forwards notifications to an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: Notification) -> Result<()> {
        self.tx
            .send(notification)
            .map_err(|_| anyhow::anyhow!("notification receiver dropped"))
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn alert(&self, event: &AlertEvent) -> Result<()> {
        self.send(Notification::Alert(event.clone()))
    }

    async fn geofence(&self, event: &GeofenceEvent) -> Result<()> {
        self.send(Notification::Geofence(event.clone()))
    }
}

/// POSTs each notification as JSON to a fixed URL.
pub struct WebhookNotifier<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> WebhookNotifier<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> Notifier for WebhookNotifier<C> {
    async fn alert(&self, event: &AlertEvent) -> Result<()> {
        post_json(&self.client, &self.url, &Notification::Alert(event.clone())).await
    }

    async fn geofence(&self, event: &GeofenceEvent) -> Result<()> {
        post_json(&self.client, &self.url, &Notification::Geofence(event.clone())).await
    }
}

/// Fans each notification out to several notifiers. Every target is tried;
/// the first failure is returned.
#[derive(Default)]
pub struct FanoutNotifier {
    targets: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: impl Notifier + 'static) -> Self {
        self.targets.push(Box::new(target));
        self
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn alert(&self, event: &AlertEvent) -> Result<()> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(e) = target.alert(event).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn geofence(&self, event: &GeofenceEvent) -> Result<()> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(e) = target.geofence(event).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
