//! Alert delivery over a JSON webhook.

use reconcile::{Alert, AlertSink};
use serde::Serialize;
use std::time::Duration;

use crate::error::Result;

/// Body posted to the webhook
#[derive(Debug, Serialize)]
struct Payload<'a> {
    stack: &'a str,
    subject: &'a str,
    message: &'a str,
    raised_at: String,
}

/// Posts alerts as JSON to a webhook URL.
pub struct WebhookAlert {
    url: String,
    stack: String,
    agent: ureq::Agent,
}

impl WebhookAlert {
    /// Create a sink posting to `url`.
    pub fn new(url: impl Into<String>, stack: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(10)))
            .build();
        Self {
            url: url.into(),
            stack: stack.into(),
            agent: config.into(),
        }
    }

    /// Deliver one alert.
    pub fn send(&self, alert: &Alert) -> Result<()> {
        let payload = Payload {
            stack: &self.stack,
            subject: &alert.subject,
            message: &alert.message,
            raised_at: alert.raised_at.to_rfc3339(),
        };
        self.agent.post(&self.url).send_json(&payload)?;
        log::debug!("Alert delivered to {}", self.url);
        Ok(())
    }
}

impl AlertSink for WebhookAlert {
    fn alert(&self, alert: &Alert) -> reconcile::Result<()> {
        self.send(alert).map_err(|e| reconcile::Error::Unreachable {
            component: "alert webhook".to_string(),
            message: e.to_string(),
        })
    }
}
