//! Outbound notification delivery.

use serde_json::Value;

/// A message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Read a notification from a job payload.
    pub fn from_payload(payload: &Value) -> Result<Self, String> {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let recipient = field("recipient").ok_or("payload is missing 'recipient'")?;
        Ok(Self {
            recipient,
            subject: field("subject").unwrap_or_default(),
            body: field("body").unwrap_or_default(),
        })
    }
}

/// Delivery channel for notifications (email, push, ...).
pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

/// Sink that only logs what it would deliver.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification delivered"
        );
        Ok(())
    }
}
