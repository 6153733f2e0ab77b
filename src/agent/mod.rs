//! Remote agent client
//!
//! Wraps `POST {base}/chat` with a request timeout and an iterative, bounded
//! retry loop. Only transient network failures (timeouts, connection errors)
//! are retried; HTTP-level and application-level failures surface
//! immediately with their status and any structured error payload.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::AppError;

/// Base delay between retry attempts; grows linearly with the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Outbound request to the agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub message: String,
    pub persona_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celebrity_id: Option<String>,
}

/// The agent's reply. `celebrity` is only set by the mystery persona, on the
/// turn that assigns its identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentReply {
    pub content: String,
    #[serde(default)]
    pub celebrity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    reply: AgentReply,
}

/// Seam between the coordinator and the backend agent, mockable in tests.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn send_message(&self, request: AgentRequest) -> Result<AgentReply, AppError>;
}

pub struct RemoteAgentClient {
    client: Client,
    config: ApiConfig,
}

impl RemoteAgentClient {
    pub fn new(config: ApiConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AppError::from)?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, request: &AgentRequest) -> Result<AgentReply, AppError> {
        let url = format!("{}/chat", self.config.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AppError::Network {
                message: format!("Agent returned HTTP {}", status),
                status: Some(status.as_u16()),
                details: serde_json::from_str::<Value>(&body).ok(),
            });
        }

        let parsed: ChatResponseBody = serde_json::from_str(&body).map_err(|e| AppError::Network {
            message: format!("Failed to parse agent response: {}", e),
            status: Some(status.as_u16()),
            details: None,
        })?;
        Ok(parsed.reply)
    }
}

/// Timeouts and connection failures carry no HTTP status; everything that
/// does reach the protocol level is treated as non-transient.
fn is_transient(err: &AppError) -> bool {
    matches!(err, AppError::Network { status: None, .. })
}

#[async_trait]
impl AgentApi for RemoteAgentClient {
    async fn send_message(&self, request: AgentRequest) -> Result<AgentReply, AppError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&request).await {
                Ok(reply) => return Ok(reply),
                Err(err) if attempt < attempts && is_transient(&err) => {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "transient agent failure, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
