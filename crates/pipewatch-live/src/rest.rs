//! REST collaborators for channel, automation, and webhook state.
//!
//! The reconciliation layer only depends on the [`AutomationApi`] trait, so
//! tests (and alternative transports) inject their own implementation.
//! [`RestClient`] is the reqwest-backed implementation against the dashboard
//! backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pipewatch_core::automation::{
    AutomationSettings, AutomationStatistics, Channel, WebhookEventType, WebhookPage,
};

/// Error from a REST collaborator. One refresh or action surfaces at most
/// one of these.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure: connect, timeout, or undecodable body.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success HTTP status, with the server's message when it sent one.
    #[error("server rejected request with status {status}")]
    Status { status: u16, message: Option<String> },
}

impl ApiError {
    /// The message to surface to users: the server-supplied one when
    /// present, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Status {
                message: Some(message),
                ..
            } => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// Per-channel automation state as returned by the automation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatusResponse {
    pub enabled: bool,
    pub settings: AutomationSettings,
    pub statistics: AutomationStatistics,
}

/// Synthetic new-video payload posted to the webhook receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSimulation {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    /// Seconds.
    pub duration: u64,
    pub event_type: WebhookEventType,
}

/// Result of probing a channel's webhook connectivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookProbe {
    pub success: bool,
    pub message: String,
    /// Milliseconds, when the backend measured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
}

/// Everything the reconciliation layer needs from the backend.
#[async_trait]
pub trait AutomationApi: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError>;

    async fn automation_status(
        &self,
        channel_id: &str,
    ) -> Result<AutomationStatusResponse, ApiError>;

    async fn webhook_events(&self, page: u32, size: u32) -> Result<WebhookPage, ApiError>;

    async fn enable_automation(
        &self,
        channel_id: &str,
        settings: &AutomationSettings,
    ) -> Result<(), ApiError>;

    async fn disable_automation(&self, channel_id: &str) -> Result<(), ApiError>;

    async fn simulate_webhook(&self, payload: &WebhookSimulation) -> Result<(), ApiError>;

    async fn test_webhook(&self, channel_id: &str) -> Result<WebhookProbe, ApiError>;

    async fn resubscribe_webhook(&self, channel_id: &str) -> Result<(), ApiError>;
}

/// Error body shape the backend uses for rejected requests.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// reqwest-backed [`AutomationApi`] against the dashboard backend.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success responses to [`ApiError::Status`], extracting the
    /// server's `{"message": …}` body when present.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message);
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AutomationApi for RestClient {
    async fn list_channels(&self) -> Result<Vec<Channel>, ApiError> {
        let response = self.http.get(self.url("/api/v1/channels")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn automation_status(
        &self,
        channel_id: &str,
    ) -> Result<AutomationStatusResponse, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/downloads/automation/status/{channel_id}")))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn webhook_events(&self, page: u32, size: u32) -> Result<WebhookPage, ApiError> {
        let response = self
            .http
            .get(self.url("/api/v1/webhook/events"))
            .query(&[("page", page), ("size", size)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn enable_automation(
        &self,
        channel_id: &str,
        settings: &AutomationSettings,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/downloads/automation/enable/{channel_id}")))
            .json(settings)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn disable_automation(&self, channel_id: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/downloads/automation/disable/{channel_id}")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn simulate_webhook(&self, payload: &WebhookSimulation) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url("/api/webhook/youtube"))
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn test_webhook(&self, channel_id: &str) -> Result<WebhookProbe, ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/channels/{channel_id}/test-webhook")))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn resubscribe_webhook(&self, channel_id: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!(
                "/api/v1/channels/{channel_id}/resubscribe-webhook"
            )))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
