use secrecy::ExposeSecret;
use serde_json::json;

use crate::config::Config;
use crate::models::Booking;

/// Fire-and-forget webhook dispatch for booking lifecycle events. Delivery
/// failures are logged and never affect the booking outcome.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    access_token: Option<String>,
}

impl Notifier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: config.notify_webhook_url.clone(),
            access_token: config
                .notify_access_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
        }
    }

    pub fn new(webhook_url: Option<String>, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            access_token,
        }
    }

    /// Dispatches a booking event in the background. No-op when no webhook
    /// is configured.
    pub fn booking_event(&self, event: &'static str, booking: &Booking) {
        if self.webhook_url.is_none() {
            return;
        }

        let notifier = self.clone();
        let payload = json!({
            "event": event,
            "booking_id": booking.id,
            "member_id": booking.member_id,
            "child_id": booking.child_id,
            "class_instance_id": booking.class_instance_id,
            "status": booking.status,
        });

        tokio::spawn(async move {
            if let Err(e) = notifier.send(&payload).await {
                tracing::warn!(event = event, error = %e, "Notification dispatch failed");
            }
        });
    }

    pub async fn send(&self, payload: &serde_json::Value) -> Result<(), reqwest::Error> {
        let Some(url) = &self.webhook_url else {
            return Ok(());
        };

        let mut request = self.client.post(url).json(payload);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        request.send().await?.error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_payload_with_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hooks/bookings"))
            .and(header("authorization", "Bearer hook-token"))
            .and(body_partial_json(json!({"event": "booking_confirmed"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            Some(format!("{}/hooks/bookings", server.uri())),
            Some("hook-token".to_string()),
        );

        notifier
            .send(&json!({"event": "booking_confirmed"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_surfaces_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = Notifier::new(Some(server.uri()), None);
        let result = notifier.send(&json!({"event": "booking_cancelled"})).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_is_noop_without_webhook() {
        let notifier = Notifier::new(None, None);

        notifier.send(&json!({"event": "ignored"})).await.unwrap();
    }
}
