//! HTTP backends for the training-record store and the notification service.

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use skillsheet_core::result::FinalResult;
use skillsheet_core::traits::{NotificationSink, TrainingRecordStore};

use crate::error::ServiceError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn build_client() -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(Into::into)
}

/// Turn a non-success response into the matching [`ServiceError`],
/// consuming the body for the message.
async fn error_for(response: reqwest::Response) -> ServiceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ServiceError::from_status(status, body)
}

/// Training-record store over HTTP.
///
/// Deliveries carry an `Idempotency-Key` derived from the session id; a 409
/// from the store means the result is already on file and counts as success.
pub struct HttpRecordStore {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl HttpRecordStore {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            client: build_client()?,
        })
    }

    async fn deliver(&self, result: &FinalResult) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/completions", self.base_url))
            .bearer_auth(&self.api_token)
            .header("idempotency-key", result.session_id.to_string())
            .json(result)
            .send()
            .await?;

        if response.status().as_u16() == 409 {
            // Already on file from an earlier delivery.
            tracing::debug!(session_id = %result.session_id, "record store reported duplicate");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl TrainingRecordStore for HttpRecordStore {
    #[instrument(skip(self, result), fields(session_id = %result.session_id))]
    async fn record_completion(&self, result: &FinalResult) -> anyhow::Result<()> {
        Ok(self.deliver(result).await?)
    }
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    recipient: &'a str,
    subject: String,
    result: &'a FinalResult,
}

/// Result delivery by email, via the notification service.
pub struct HttpEmailSink {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl HttpEmailSink {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            client: build_client()?,
        })
    }

    async fn send(&self, recipient: &str, result: &FinalResult) -> Result<(), ServiceError> {
        let body = EmailRequest {
            recipient,
            subject: format!(
                "Practice assessment result: {}",
                if result.passed { "PASS" } else { "FAIL" }
            ),
            result,
        };
        let response = self
            .client
            .post(format!("{}/v1/emails", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for HttpEmailSink {
    #[instrument(skip(self, result), fields(session_id = %result.session_id))]
    async fn email_result(&self, recipient: &str, result: &FinalResult) -> anyhow::Result<()> {
        Ok(self.send(recipient, result).await?)
    }
}

/// Sink that drops every notification. For deployments without a
/// notification service.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn email_result(&self, recipient: &str, result: &FinalResult) -> anyhow::Result<()> {
        tracing::debug!(
            session_id = %result.session_id,
            recipient,
            "notification sink disabled, dropping email"
        );
        Ok(())
    }
}
