use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::debug;

use super::types::*;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Longest slice of an error body kept in the returned error.
const MAX_ERROR_BODY: usize = 500;

/// One configured HTTP transport for the Messages endpoint.
pub(crate) struct ClaudeClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ClaudeClient {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).context("API key is not a valid header")?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: messages_endpoint(base_url.unwrap_or(DEFAULT_BASE_URL)),
        })
    }

    pub async fn messages(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        debug!(model = %request.model, prompt_bytes = request.prompt_len(), "Claude request");

        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = crate::truncate_to_char_boundary(&body, MAX_ERROR_BODY);
            bail!("Claude API returned {status}: {body}");
        }

        response
            .json()
            .await
            .context("Claude response was not a messages payload")
    }
}

fn messages_endpoint(base_url: &str) -> String {
    format!("{}/messages", base_url.trim_end_matches('/'))
}
