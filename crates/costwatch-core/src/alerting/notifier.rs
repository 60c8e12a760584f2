//! Notification delivery for alerts

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::formatter::{Block, ChatMessage};
use crate::error::{DeliveryError, Error, Result};
use crate::retry::RetryPolicy;

/// Delivers rendered messages to a chat channel
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Post `message` to `channel`
    async fn send(&self, channel: &str, message: &ChatMessage) -> std::result::Result<(), DeliveryError>;

    /// Verify credentials; returns the identity the sender posts as
    async fn check_connection(&self) -> std::result::Result<String, DeliveryError>;
}

/// Slack Web API client using a bot token
pub struct SlackNotifier {
    client: Client,
    api_url: String,
    token: String,
    retry: RetryPolicy,
}

impl SlackNotifier {
    /// Create a notifier for `api_url` (normally `https://slack.com/api`)
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy used for each delivery
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post<P: Serialize + Sync>(
        &self,
        method: &str,
        payload: &P,
    ) -> std::result::Result<SlackResponse, DeliveryError> {
        let url = format!("{}/{method}", self.api_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(DeliveryError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http(format!("Slack returned {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!("Slack returned {status}: {body}")));
        }

        let body: SlackResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Http(format!("Invalid Slack response: {e}")))?;

        if body.ok {
            Ok(body)
        } else {
            let reason = body.error.unwrap_or_else(|| "unknown_error".to_string());
            if reason == "ratelimited" {
                Err(DeliveryError::RateLimited {
                    retry_after_secs: None,
                })
            } else {
                Err(DeliveryError::Rejected(reason))
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout
    } else {
        DeliveryError::Http(e.to_string())
    }
}

#[async_trait]
impl MessageSender for SlackNotifier {
    async fn send(&self, channel: &str, message: &ChatMessage) -> std::result::Result<(), DeliveryError> {
        let payload = SlackPayload::new(channel, message);

        self.retry
            .run("slack.chat.postMessage", || self.post("chat.postMessage", &payload))
            .await?;

        info!(channel, "Slack notification sent");
        Ok(())
    }

    async fn check_connection(&self) -> std::result::Result<String, DeliveryError> {
        let empty = serde_json::json!({});
        let body = self
            .retry
            .run("slack.auth.test", || self.post("auth.test", &empty))
            .await?;

        let identity = body.user.or(body.team).unwrap_or_else(|| "unknown".to_string());
        debug!(identity = %identity, "Slack auth.test succeeded");
        Ok(identity)
    }
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    text: &'a str,
    username: &'static str,
    icon_emoji: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<&'a [Block]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SlackAttachment<'a>>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment<'a> {
    color: &'a str,
    blocks: &'a [Block],
}

impl<'a> SlackPayload<'a> {
    // coloured messages put their blocks in an attachment so the sidebar shows
    fn new(channel: &'a str, message: &'a ChatMessage) -> Self {
        let (blocks, attachments) = match message.color.as_deref() {
            Some(color) => (
                None,
                vec![SlackAttachment {
                    color,
                    blocks: &message.blocks,
                }],
            ),
            None => (Some(message.blocks.as_slice()), Vec::new()),
        };

        Self {
            channel,
            text: &message.text,
            username: "AWS Cost Monitor",
            icon_emoji: ":money_with_wings:",
            blocks,
            attachments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    team: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::formatter::render_test_message;
    use crate::settings::Settings;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer) -> SlackNotifier {
        SlackNotifier::new(server.uri(), "xoxb-test", Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::exponential(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_send_posts_to_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(serde_json::json!({"channel": "#alerts"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let message = render_test_message(&Settings::default());
        notifier(&server).send("#alerts", &message).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": false, "error": "channel_not_found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = notifier(&server)
            .send("#missing", &render_test_message(&Settings::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(ref r) if r == "channel_not_found"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = notifier(&server)
            .send("#alerts", &render_test_message(&Settings::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_check_connection_returns_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "user": "costbot"})),
            )
            .mount(&server)
            .await;

        assert_eq!(notifier(&server).check_connection().await.unwrap(), "costbot");
    }

    #[test]
    fn test_coloured_payload_uses_attachment() {
        let mut message = render_test_message(&Settings::default());
        message.color = Some("#FF0000".to_string());
        let json = serde_json::to_value(SlackPayload::new("#alerts", &message)).unwrap();
        assert_eq!(json["attachments"][0]["color"], "#FF0000");
        assert!(json.get("blocks").is_none());
    }
}
