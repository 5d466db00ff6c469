//! One-shot fan-out of activation events to the push-delivery service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoordError;
use crate::models::{Coordinates, Emergency};

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn fan_out(&self, emergency: &Emergency) -> Result<(), CoordError>;
}

/// Used when no push service is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn fan_out(&self, emergency: &Emergency) -> Result<(), CoordError> {
        tracing::info!(
            emergency_id = %emergency.emergency_id,
            group_id = %emergency.group_id,
            "no dispatcher configured, activation not pushed"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ActivationNotice<'a> {
    emergency_id: &'a str,
    attendee_id: &'a str,
    group_id: &'a str,
    coordinates: Coordinates,
    message: Option<&'a str>,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a Emergency> for ActivationNotice<'a> {
    fn from(e: &'a Emergency) -> Self {
        Self {
            emergency_id: &e.emergency_id,
            attendee_id: &e.attendee_id,
            group_id: &e.group_id,
            coordinates: e.coordinates,
            message: e.message.as_deref(),
            created_at: e.created_at,
        }
    }
}

/// Posts activations as JSON to a push-delivery webhook.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    /// `timeout` bounds the whole request, so a stalled push service
    /// surfaces as `UpstreamUnavailable`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CoordError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn fan_out(&self, emergency: &Emergency) -> Result<(), CoordError> {
        self.client
            .post(&self.url)
            .json(&ActivationNotice::from(emergency))
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(emergency_id = %emergency.emergency_id, "activation pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_carries_location_and_message() {
        let e = Emergency::new(
            "a1",
            "g1",
            Coordinates::new(1.0, 2.0),
            Some("fell".into()),
            Utc::now(),
        );
        let json = serde_json::to_value(ActivationNotice::from(&e)).unwrap();
        assert_eq!(json["attendee_id"], "a1");
        assert_eq!(json["message"], "fell");
        assert_eq!(json["coordinates"]["longitude"], 2.0);
    }

    #[tokio::test]
    async fn stalled_webhook_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts connections and never answers.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dispatcher =
            WebhookDispatcher::new(format!("http://{addr}/push"), Duration::from_millis(200))
                .unwrap();
        let e = Emergency::new("a1", "g1", Coordinates::new(1.0, 2.0), None, Utc::now());

        let result = tokio::time::timeout(Duration::from_secs(5), dispatcher.fan_out(&e))
            .await
            .expect("fan-out did not honor its timeout");
        assert!(result.unwrap_err().is_retryable());
        server.abort();
    }
}
