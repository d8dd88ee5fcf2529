use std::env;
use std::time::Duration;

use tracing::info;

/// Pipeline tunables. `Default` holds the production values, so tests can
/// build one without touching the environment.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Character budget for all source bodies in one extraction prompt.
    pub max_prompt_chars: usize,
    pub extraction_timeout: Duration,
    pub upsert_timeout: Duration,
    /// Attempts per single upsert before a commit step is reported failed.
    pub upsert_retries: u32,
    pub retry_backoff: Duration,
    pub enrichment_timeout: Duration,
    pub enrichment_queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_prompt_chars: 24_000,
            extraction_timeout: Duration::from_secs(60),
            upsert_timeout: Duration::from_secs(10),
            upsert_retries: 3,
            retry_backoff: Duration::from_millis(200),
            enrichment_timeout: Duration::from_secs(60),
            enrichment_queue_capacity: 64,
        }
    }
}

impl PipelineSettings {
    /// Defaults overridden by any of the optional tuning env vars.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_prompt_chars: parsed_env("MAX_PROMPT_CHARS").unwrap_or(d.max_prompt_chars),
            extraction_timeout: parsed_env("EXTRACTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.extraction_timeout),
            upsert_timeout: parsed_env("UPSERT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.upsert_timeout),
            upsert_retries: parsed_env("UPSERT_RETRIES").unwrap_or(d.upsert_retries).max(1),
            retry_backoff: parsed_env("UPSERT_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.retry_backoff),
            enrichment_timeout: parsed_env("ENRICHMENT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.enrichment_timeout),
            enrichment_queue_capacity: parsed_env("ENRICHMENT_QUEUE_CAPACITY")
                .unwrap_or(d.enrichment_queue_capacity)
                .max(1),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Completion service
    pub anthropic_api_key: String,
    pub extraction_model: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    pub pipeline: PipelineSettings,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            extraction_model: env::var("EXTRACTION_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            pipeline: PipelineSettings::from_env(),
        }
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = %self.neo4j_uri,
            neo4j_user = %self.neo4j_user,
            neo4j_password = %redact(&self.neo4j_password),
            anthropic_api_key = %redact(&self.anthropic_api_key),
            extraction_model = %self.extraction_model,
            api_host = %self.api_host,
            api_port = self.api_port,
            pipeline = ?self.pipeline,
            "Loaded configuration"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "(unset)".to_string();
    }
    if secret.chars().count() <= 4 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}****")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_masks_secrets() {
        assert_eq!(redact(""), "(unset)");
        assert_eq!(redact("abc"), "****");
        assert_eq!(redact("sk-ant-12345"), "sk-a****");
    }

    #[test]
    fn default_settings_are_sane() {
        let s = PipelineSettings::default();
        assert!(s.upsert_retries >= 1);
        assert!(s.enrichment_queue_capacity >= 1);
        assert!(s.max_prompt_chars > 0);
    }
}
