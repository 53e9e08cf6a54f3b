//! Process configuration, loaded from environment variables (optionally backed
//! by a `.env` file) via `clap`'s `env` feature, following the same
//! derive-plus-env idiom the teacher crate uses for its own CLI surface.

use std::collections::HashMap;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "abgatewayd", about = "Anthropic-compatible gateway over AWS Bedrock")]
pub struct Settings {
    #[arg(long, env = "APP_NAME", default_value = "anthropic-bedrock-gateway")]
    pub app_name: String,

    #[arg(long, env = "APP_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub app_version: String,

    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    pub environment: String,

    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "API_PREFIX", default_value = "/v1")]
    pub api_prefix: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY")]
    pub aws_secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN")]
    pub aws_session_token: Option<String>,

    #[arg(long, env = "BEDROCK_ENDPOINT_URL")]
    pub bedrock_endpoint_url: Option<String>,

    #[arg(long, env = "BEDROCK_CROSS_ACCOUNT_ROLE_ARN")]
    pub bedrock_cross_account_role_arn: Option<String>,

    #[arg(long, env = "BEDROCK_REGION", default_value = "us-east-1")]
    pub bedrock_region: String,

    #[arg(long, env = "DYNAMODB_API_KEYS_TABLE", default_value = "api_keys")]
    pub dynamodb_api_keys_table: String,

    #[arg(long, env = "DYNAMODB_USAGE_TABLE", default_value = "usage")]
    pub dynamodb_usage_table: String,

    #[arg(long, env = "DYNAMODB_MODEL_MAPPING_TABLE", default_value = "model_mapping")]
    pub dynamodb_model_mapping_table: String,

    #[arg(long, env = "DYNAMODB_MODEL_PRICING_TABLE", default_value = "model_pricing")]
    pub dynamodb_model_pricing_table: String,

    #[arg(long, env = "DYNAMODB_USAGE_STATS_TABLE", default_value = "usage_stats")]
    pub dynamodb_usage_stats_table: String,

    #[arg(long, env = "USAGE_TTL_DAYS", default_value_t = 90)]
    pub usage_ttl_days: u32,

    #[arg(long, env = "API_KEY_HEADER", default_value = "x-api-key")]
    pub api_key_header: String,

    #[arg(long, env = "REQUIRE_API_KEY", default_value_t = true)]
    pub require_api_key: bool,

    #[arg(long, env = "MASTER_API_KEY")]
    pub master_api_key: Option<String>,

    #[arg(long, env = "RATE_LIMIT_ENABLED", default_value_t = true)]
    pub rate_limit_enabled: bool,

    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value_t = 1000)]
    pub rate_limit_requests: u32,

    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = 60)]
    pub rate_limit_window: u32,

    #[arg(long, env = "PROMPT_CACHING_ENABLED", default_value_t = true)]
    pub prompt_caching_enabled: bool,

    #[arg(long, env = "STREAMING_CHUNK_SIZE", default_value_t = 1024)]
    pub streaming_chunk_size: u32,

    #[arg(long, env = "STREAMING_TIMEOUT", default_value_t = 1800)]
    pub streaming_timeout: u64,

    #[arg(long, env = "ENABLE_METRICS", default_value_t = false)]
    pub enable_metrics: bool,

    #[arg(long, env = "ENABLE_TRACING", default_value_t = true)]
    pub enable_tracing: bool,

    #[arg(long, env = "BEDROCK_TIMEOUT", default_value_t = 600)]
    pub bedrock_timeout: u64,

    #[arg(long, env = "DYNAMODB_TIMEOUT", default_value_t = 10)]
    pub dynamodb_timeout: u64,

    #[arg(long, env = "BEDROCK_THREAD_POOL_SIZE", default_value_t = 15)]
    pub bedrock_thread_pool_size: usize,

    #[arg(long, env = "BEDROCK_SEMAPHORE_SIZE", default_value_t = 15)]
    pub bedrock_semaphore_size: usize,

    #[arg(long, env = "ENABLE_TOOL_USE", default_value_t = true)]
    pub enable_tool_use: bool,

    #[arg(long, env = "ENABLE_EXTENDED_THINKING", default_value_t = true)]
    pub enable_extended_thinking: bool,

    #[arg(long, env = "ENABLE_DOCUMENT_SUPPORT", default_value_t = true)]
    pub enable_document_support: bool,

    #[arg(long, env = "DEFAULT_SERVICE_TIER", default_value = "default")]
    pub default_service_tier: String,

    #[arg(long, env = "ENABLE_PROGRAMMATIC_TOOL_CALLING", default_value_t = true)]
    pub enable_programmatic_tool_calling: bool,

    #[arg(long, env = "PTC_SANDBOX_IMAGE", default_value = "python:3.11-slim")]
    pub ptc_sandbox_image: String,

    #[arg(long, env = "PTC_SESSION_TIMEOUT", default_value_t = 270)]
    pub ptc_session_timeout: u64,

    #[arg(long, env = "PTC_EXECUTION_TIMEOUT", default_value_t = 60)]
    pub ptc_execution_timeout: u64,

    #[arg(long, env = "PTC_MEMORY_LIMIT", default_value = "256m")]
    pub ptc_memory_limit: String,

    #[arg(long, env = "PTC_NETWORK_DISABLED", default_value_t = true)]
    pub ptc_network_disabled: bool,

    #[arg(long, env = "PTC_CONTAINER_ID_HEADER", default_value = "x-ptc-container-id")]
    pub ptc_container_id_header: String,
}

impl Settings {
    /// Parse from `std::env::args()` and the process environment. Fails the
    /// process at startup (not silently) on invalid `log_level`/`environment`
    /// values, mirroring the field validators of the original settings object.
    pub fn load() -> anyhow::Result<Self> {
        let settings = Self::parse();
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        const LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
        if !LEVELS.contains(&self.log_level.to_uppercase().as_str()) {
            anyhow::bail!(
                "invalid log_level '{}': expected one of {:?}",
                self.log_level,
                LEVELS
            );
        }

        const ENVIRONMENTS: &[&str] = &["development", "staging", "production"];
        if !ENVIRONMENTS.contains(&self.environment.as_str()) {
            anyhow::bail!(
                "invalid environment '{}': expected one of {:?}",
                self.environment,
                ENVIRONMENTS
            );
        }

        Ok(())
    }

    /// Default Anthropic-model-id -> Bedrock-model-id mapping table.
    pub fn default_model_mapping() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            "claude-opus-4-5-20251101".to_string(),
            "us.anthropic.claude-opus-4-5-20251101-v1:0".to_string(),
        );
        map.insert(
            "claude-sonnet-4-5-20250929".to_string(),
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0".to_string(),
        );
        map.insert(
            "claude-haiku-4-5-20251001".to_string(),
            "us.anthropic.claude-haiku-4-5-20251001-v1:0".to_string(),
        );
        map.insert(
            "claude-opus-4-1-20250805".to_string(),
            "us.anthropic.claude-opus-4-1-20250805-v1:0".to_string(),
        );
        map.insert(
            "claude-3-7-sonnet-20250219".to_string(),
            "us.anthropic.claude-3-7-sonnet-20250219-v1:0".to_string(),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_only_required_env_defaults() {
        let settings = Settings::parse_from(["abgatewayd"]);
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.bedrock_semaphore_size, 15);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut settings = Settings::parse_from(["abgatewayd"]);
        settings.log_level = "NOISY".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_invalid_environment() {
        let mut settings = Settings::parse_from(["abgatewayd"]);
        settings.environment = "prod".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn default_model_mapping_has_known_entries() {
        let map = Settings::default_model_mapping();
        assert!(map.contains_key("claude-sonnet-4-5-20250929"));
    }
}
