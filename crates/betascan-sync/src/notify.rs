use std::time::Duration;

use async_trait::async_trait;
use betascan_core::{DispatchResult, NotifyItem};
use betascan_storage::{FetchError, HttpFetcher};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const WEBHOOK_CHANNEL: &str = "webhook";
pub const EMAIL_CHANNEL: &str = "email";

/// Delivers one batch of qualifying transitions per scan. Every outcome,
/// failures included, comes back as a [`DispatchResult`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, batch: &[NotifyItem], target_override: Option<&str>) -> Vec<DispatchResult>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no endpoint configured")]
    NotConfigured,
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("endpoint answered http {status}")]
    Status { status: u16, body: Option<JsonValue> },
    #[error("endpoint answered 200 without a JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// POSTs `{"apps": [...]}` to the webhook and, when configured, the same
/// payload to an email endpoint in parallel.
pub struct WebhookNotifier {
    http: HttpFetcher,
    webhook_url: Option<String>,
    email_url: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(http: HttpFetcher, webhook_url: Option<String>, email_url: Option<String>) -> Self {
        Self {
            http,
            webhook_url,
            email_url,
            timeout: DISPATCH_TIMEOUT,
        }
    }

    async fn post_batch(&self, url: Option<&str>, batch: &[NotifyItem]) -> Result<JsonValue, DispatchError> {
        let url = url.ok_or(DispatchError::NotConfigured)?;
        let payload = serde_json::json!({ "apps": batch });
        let resp = self.http.post_json(url, &payload, self.timeout).await?;
        if resp.status != StatusCode::OK {
            return Err(DispatchError::Status {
                status: resp.status.as_u16(),
                body: serde_json::from_slice(&resp.body).ok(),
            });
        }
        Ok(serde_json::from_slice(&resp.body)?)
    }

    async fn send(&self, channel: &str, url: Option<&str>, batch: &[NotifyItem]) -> DispatchResult {
        match self.post_batch(url, batch).await {
            Ok(body) => {
                info!(channel, apps = batch.len(), "notification batch delivered");
                DispatchResult {
                    channel: channel.to_string(),
                    success: true,
                    message: format!("sent {} app(s)", batch.len()),
                    status_code: Some(StatusCode::OK.as_u16()),
                    response: Some(body),
                }
            }
            Err(err) => {
                warn!(channel, error = %err, "notification batch not delivered");
                let (status_code, response) = match &err {
                    DispatchError::Status { status, body } => (Some(*status), body.clone()),
                    DispatchError::InvalidBody(_) => (Some(StatusCode::OK.as_u16()), None),
                    _ => (None, None),
                };
                DispatchResult {
                    channel: channel.to_string(),
                    success: false,
                    message: err.to_string(),
                    status_code,
                    response,
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn dispatch(&self, batch: &[NotifyItem], target_override: Option<&str>) -> Vec<DispatchResult> {
        if batch.is_empty() {
            return vec![DispatchResult {
                channel: WEBHOOK_CHANNEL.to_string(),
                success: false,
                message: "no apps to notify".to_string(),
                status_code: None,
                response: None,
            }];
        }

        let webhook_url = target_override.or(self.webhook_url.as_deref());
        let webhook = self.send(WEBHOOK_CHANNEL, webhook_url, batch);
        let email = async {
            match self.email_url.as_deref() {
                Some(url) => Some(self.send(EMAIL_CHANNEL, Some(url), batch).await),
                None => None,
            }
        };
        let (webhook, email) = tokio::join!(webhook, email);

        let mut results = vec![webhook];
        results.extend(email);
        results
    }
}
