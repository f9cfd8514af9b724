//! Configuration types for document parsing and provider calls.
//!
//! [`ProviderConfig`] is immutable once built and is passed explicitly into
//! every orchestrator call; nothing in the library reads provider settings
//! from global state. Environment and settings-file loading are convenience
//! constructors for the CLI and embedding hosts.
//!
//! [`ParseOptions`] carries the knobs of the source selector: fallback page
//! text, time budgets, and the size cap on downloaded attachments.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    #[default]
    #[serde(alias = "openai")]
    Openai,
    #[serde(alias = "azure", alias = "azure_openai", alias = "azure-openai")]
    AzureOpenai,
    #[serde(alias = "anthropic")]
    Anthropic,
    #[serde(alias = "custom")]
    Custom,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::AzureOpenai => "azure_openai",
            Provider::Anthropic => "anthropic",
            Provider::Custom => "custom",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai | Provider::AzureOpenai => "gpt-4.1-mini",
            Provider::Anthropic => "claude-sonnet-4-20250514",
            Provider::Custom => "default",
        }
    }

    /// Whether the provider authenticates with an API key at all.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Custom)
    }

    /// Whether `endpoint` must be set explicitly.
    pub fn requires_endpoint(&self) -> bool {
        matches!(self, Provider::AzureOpenai | Provider::Custom)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "openai" => Ok(Provider::Openai),
            "azure" | "azure_openai" | "azureopenai" => Ok(Provider::AzureOpenai),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "custom" => Ok(Provider::Custom),
            other => Err(AnalysisError::InvalidConfig(format!(
                "Unknown provider '{other}' (expected openai, azure_openai, anthropic, custom)"
            ))),
        }
    }
}

/// Optional threat-intelligence platform credentials, carried read-only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatPlatformConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

impl fmt::Debug for ThreatPlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatPlatformConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// Everything the orchestrator needs to talk to one provider.
///
/// Built via [`ProviderConfig::builder()`], [`ProviderConfig::from_json`] or
/// [`ProviderConfig::from_env`].
///
/// # Example
/// ```rust
/// use edgequake_threatmodel::{Provider, ProviderConfig};
///
/// let config = ProviderConfig::builder(Provider::Anthropic)
///     .api_key("sk-ant-test")
///     .model("claude-sonnet-4-20250514")
///     .timeout_secs(45)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 3);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub provider: Provider,

    /// Base URL or full URL of the provider endpoint. Required for Azure and
    /// custom providers; defaults to the public API otherwise.
    pub endpoint: Option<String>,

    pub api_key: String,

    pub model: String,

    /// Per-attempt HTTP timeout in seconds. Default: 30.
    pub timeout_secs: u64,

    /// Total attempts including the first. Default: 3.
    ///
    /// Only transient failures (connection errors, timeouts, 429, 5xx) are
    /// retried. Client errors and validation failures end the request at once.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds; doubles per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single backoff delay. Default: 8000.
    pub max_backoff_ms: u64,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum completion tokens. Default: 4096.
    pub max_tokens: u32,

    /// Document text beyond this many characters is truncated before it is
    /// placed in the prompt. Default: 100 000.
    pub max_document_chars: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    pub threat_platform: Option<ThreatPlatformConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Openai,
            endpoint: None,
            api_key: String::new(),
            model: String::new(),
            timeout_secs: 30,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            temperature: 0.2,
            max_tokens: 4096,
            max_document_chars: 100_000,
            system_prompt: None,
            threat_platform: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("threat_platform", &self.threat_platform)
            .finish()
    }
}

fn redact(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl ProviderConfig {
    /// Create a new builder for the given provider.
    pub fn builder(provider: Provider) -> ProviderConfigBuilder {
        ProviderConfigBuilder {
            config: Self {
                provider,
                ..Self::default()
            },
        }
    }

    /// Load the persisted settings shape
    /// `{provider, endpoint, apiKey, model, threatPlatform?}`.
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AnalysisError::InvalidConfig(format!("settings JSON: {e}")))?;
        config.validated()
    }

    /// Build from `THREATMODEL_*` environment variables.
    ///
    /// `THREATMODEL_API_KEY` falls back to the provider's conventional key
    /// variable (`OPENAI_API_KEY`, `AZURE_OPENAI_API_KEY`, `ANTHROPIC_API_KEY`).
    pub fn from_env() -> Result<Self, AnalysisError> {
        let provider = match env_var("THREATMODEL_PROVIDER") {
            Some(p) => p.parse()?,
            None if env_var("OPENAI_API_KEY").is_none()
                && env_var("ANTHROPIC_API_KEY").is_some() =>
            {
                Provider::Anthropic
            }
            None => Provider::Openai,
        };

        let fallback_key = match provider {
            Provider::Openai => env_var("OPENAI_API_KEY"),
            Provider::AzureOpenai => env_var("AZURE_OPENAI_API_KEY"),
            Provider::Anthropic => env_var("ANTHROPIC_API_KEY"),
            Provider::Custom => None,
        };

        let mut builder = Self::builder(provider);
        if let Some(key) = env_var("THREATMODEL_API_KEY").or(fallback_key) {
            builder = builder.api_key(key);
        }
        if let Some(endpoint) = env_var("THREATMODEL_ENDPOINT") {
            builder = builder.endpoint(endpoint);
        }
        if let Some(model) = env_var("THREATMODEL_MODEL") {
            builder = builder.model(model);
        }
        builder.build()
    }

    /// Re-open a built configuration for further changes; `build()` validates
    /// again.
    pub fn into_builder(self) -> ProviderConfigBuilder {
        ProviderConfigBuilder { config: self }
    }

    /// Effective model: configured, or the provider default.
    pub fn model_name(&self) -> &str {
        if self.model.trim().is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    fn validated(mut self) -> Result<Self, AnalysisError> {
        // Settings screens persist a cleared field as "".
        self.endpoint = self
            .endpoint
            .take()
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty());

        if self.max_attempts == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(AnalysisError::InvalidConfig(
                "timeout_secs must be > 0".into(),
            ));
        }
        if self.provider.requires_endpoint() && self.endpoint.is_none() {
            return Err(AnalysisError::InvalidConfig(format!(
                "provider '{}' requires an endpoint",
                self.provider
            )));
        }
        if let Some(ref endpoint) = self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "endpoint must be an HTTP/HTTPS URL, got '{endpoint}'"
                )));
            }
        }
        Ok(self)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`ProviderConfig`].
#[derive(Debug)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.config.provider = provider;
        self
    }

    /// Blank values clear the endpoint; a trailing `/` is dropped.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n.max(1);
        self
    }

    pub fn max_document_chars(mut self, n: usize) -> Self {
        self.config.max_document_chars = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn threat_platform(mut self, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.config.threat_platform = Some(ThreatPlatformConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
        });
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProviderConfig, AnalysisError> {
        self.config.validated()
    }
}

/// Options for the source selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParseOptions {
    /// Scraped page text used when no attachment is available.
    pub fallback_content: Option<String>,

    /// Substitute `fallback_content` when an attachment fails to download or
    /// decode. Default: false (the failure is returned as-is).
    pub fallback_on_failure: bool,

    /// Attachment download timeout in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Decode time budget in seconds. Default: 30.
    pub parse_timeout_secs: u64,

    /// Largest attachment accepted, in bytes. Default: 50 MiB.
    pub max_document_bytes: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            fallback_content: None,
            fallback_on_failure: false,
            download_timeout_secs: 60,
            parse_timeout_secs: 30,
            max_document_bytes: 50 * 1024 * 1024,
        }
    }
}

impl ParseOptions {
    pub fn with_fallback(content: impl Into<String>) -> Self {
        Self {
            fallback_content: Some(content.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ProviderConfig::default();
        assert_eq!(c.timeout_secs, 30);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.model_name(), "gpt-4.1-mini");
    }

    #[test]
    fn azure_requires_endpoint() {
        let err = ProviderConfig::builder(Provider::AzureOpenai)
            .api_key("k")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("requires an endpoint"));
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(ProviderConfig::builder(Provider::Openai)
            .max_attempts(0)
            .build()
            .is_err());
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let c = ProviderConfig::builder(Provider::Custom)
            .endpoint("https://llm.internal/v1/analyze/")
            .build()
            .unwrap();
        assert_eq!(c.endpoint.as_deref(), Some("https://llm.internal/v1/analyze"));
    }

    #[test]
    fn persisted_settings_shape() {
        let c = ProviderConfig::from_json(
            r#"{
                "provider": "ANTHROPIC",
                "apiKey": "sk-ant",
                "model": "claude-sonnet-4-20250514",
                "threatPlatform": {"baseUrl": "https://tp.example", "apiKey": "tp-key"}
            }"#,
        )
        .unwrap();
        assert_eq!(c.provider, Provider::Anthropic);
        assert_eq!(c.api_key, "sk-ant");
        assert_eq!(c.timeout_secs, 30);
        assert_eq!(
            c.threat_platform.as_ref().map(|t| t.base_url.as_str()),
            Some("https://tp.example")
        );
    }

    #[test]
    fn blank_endpoint_means_default() {
        let c = ProviderConfig::from_json(
            r#"{"provider":"openai","endpoint":"","apiKey":"sk-x","model":"gpt-4o"}"#,
        )
        .unwrap();
        assert_eq!(c.endpoint, None);

        let c = ProviderConfig::builder(Provider::Openai)
            .endpoint("   ")
            .build()
            .unwrap();
        assert_eq!(c.endpoint, None);
    }

    #[test]
    fn blank_endpoint_still_required_for_custom() {
        let err = ProviderConfig::from_json(r#"{"provider":"custom","endpoint":" "}"#).unwrap_err();
        assert!(err.to_string().contains("requires an endpoint"));
    }

    #[test]
    fn empty_model_uses_provider_default() {
        let c = ProviderConfig::from_json(r#"{"provider":"anthropic","apiKey":"k","model":""}"#)
            .unwrap();
        assert_eq!(c.model_name(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn lowercase_provider_alias() {
        let c = ProviderConfig::from_json(r#"{"provider":"openai","apiKey":"k"}"#).unwrap();
        assert_eq!(c.provider, Provider::Openai);
    }

    #[test]
    fn debug_redacts_key() {
        let c = ProviderConfig::builder(Provider::Openai)
            .api_key("sk-secret-value")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret-value"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn provider_from_str() {
        assert_eq!("Azure-OpenAI".parse::<Provider>().unwrap(), Provider::AzureOpenai);
        assert_eq!("claude".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!("gemini".parse::<Provider>().is_err());
    }
}
