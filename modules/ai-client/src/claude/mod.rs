mod client;
pub(crate) mod types;

use std::time::Duration;

use anyhow::{anyhow, Result};

use client::ClaudeClient;
use types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Anthropic Messages API handle. Cheap to clone; one HTTP client is built per call.
#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    timeout: Duration,
    max_tokens: u32,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            max_tokens: 2048,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// HTTP-level timeout. Callers wanting a shorter bound wrap the call in
    /// `tokio::time::timeout` themselves.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> Result<ClaudeClient> {
        ClaudeClient::new(&self.api_key, self.base_url.as_deref(), self.timeout)
    }

    /// Single-turn completion at temperature 0. Returns the raw text reply.
    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<String> {
        let request = MessagesRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .max_tokens(self.max_tokens)
            .temperature(0.0);

        let response = self.client()?.messages(&request).await?;

        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %self.model, "Claude reply truncated at max_tokens");
        }

        response
            .text()
            .ok_or_else(|| anyhow!("No text in Claude response"))
    }
}
