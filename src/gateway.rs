//! Retrying front door to the chat model.
//!
//! The production contract is retry-forever: transport failures and empty
//! completions are never surfaced, the request is simply re-issued after a
//! fixed backoff. A finite `max_attempts` exists for tests and for operators
//! who would rather fail an example than wait on a dead service.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::llm::{ChatModel, Message};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model service gave no usable completion after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

pub struct Gateway {
    model: Arc<dyn ChatModel>,
    policy: RetryPolicy,
}

impl Gateway {
    pub fn new(model: Arc<dyn ChatModel>, policy: RetryPolicy) -> Self {
        Self { model, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Complete a chat, retrying on transport errors and empty completions.
    pub async fn complete(&self, messages: &[Message]) -> Result<String, GatewayError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last_error = match self.model.chat(messages).await {
                Ok(text) if !text.is_empty() => return Ok(text),
                Ok(_) => {
                    warn!(attempt, "Received incomplete response, retrying");
                    "empty completion".to_string()
                }
                Err(e) => {
                    warn!(attempt, error = %e, "LLM call failed, retrying");
                    format!("{:#}", e)
                }
            };

            if !self.policy.allows(attempt) {
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            tokio::time::sleep(self.policy.backoff).await;
        }
    }
}
