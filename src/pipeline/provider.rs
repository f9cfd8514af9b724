//! Provider handlers: one request shape and one response shape per provider.
//!
//! Every provider implements the same two operations, so the orchestrator
//! never branches on the provider itself:
//!
//! | Provider | Endpoint | Auth |
//! |---|---|---|
//! | OpenAI | `{base}/chat/completions` | `Authorization: Bearer` |
//! | Azure OpenAI | `{endpoint}/openai/deployments/{model}/chat/completions` | `api-key` |
//! | Anthropic | `{base}/v1/messages` | `x-api-key` + `anthropic-version` |
//! | Custom | endpoint verbatim | `Authorization: Bearer` when a key is set |

use crate::config::{Provider, ProviderConfig};
use crate::error::AnalysisError;
use crate::pipeline::transport::HttpRequest;
use crate::prompts::ChatPrompt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const AZURE_API_VERSION: &str = "2024-02-15-preview";

/// What a provider returned once its envelope is removed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Model output text, expected to contain the analysis JSON.
    Text(String),
    /// The analysis object itself.
    Json(Value),
}

/// Request/response mapping for one provider.
pub trait ProviderHandler: Send + Sync {
    fn build_request(
        &self,
        config: &ProviderConfig,
        prompt: &ChatPrompt,
    ) -> Result<HttpRequest, AnalysisError>;

    fn parse_response(&self, body: &[u8]) -> Result<RawPayload, AnalysisError>;
}

/// Handler for `provider`.
pub fn handler_for(provider: Provider) -> &'static dyn ProviderHandler {
    match provider {
        Provider::Openai => &OpenAiHandler,
        Provider::AzureOpenai => &AzureOpenAiHandler,
        Provider::Anthropic => &AnthropicHandler,
        Provider::Custom => &CustomHandler,
    }
}

/// Reject keys that cannot possibly authenticate, before any request is sent.
pub fn validate_credentials(config: &ProviderConfig) -> Result<(), AnalysisError> {
    let key = config.api_key.as_str();
    let fail = |detail: &str| AnalysisError::Credentials {
        provider: config.provider.to_string(),
        detail: detail.to_string(),
    };

    if key.is_empty() {
        return if config.provider.requires_api_key() {
            Err(fail("API key is missing"))
        } else {
            Ok(())
        };
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(fail("API key contains whitespace or control characters"));
    }
    Ok(())
}

/// Whether the model benefits from the document-structure block.
pub fn is_vision_model(model: &str) -> bool {
    let m = model.to_ascii_lowercase();
    m.starts_with("gpt-4o")
        || m.starts_with("gpt-4.1")
        || m.starts_with("claude-3")
        || ["sonnet", "opus", "haiku", "vision"]
            .iter()
            .any(|tag| m.contains(tag))
}

// ── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn chat_messages(prompt: &ChatPrompt) -> Vec<ChatMessage<'_>> {
    vec![
        ChatMessage {
            role: "system",
            content: &prompt.system,
        },
        ChatMessage {
            role: "user",
            content: &prompt.user,
        },
    ]
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct CustomRequest<'a> {
    provider: &'static str,
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    prompt: &'a str,
    document: &'a str,
}

fn to_body<T: Serialize>(body: &T) -> Result<Value, AnalysisError> {
    serde_json::to_value(body).map_err(|e| AnalysisError::Internal(format!("request body: {e}")))
}

fn invalid(detail: impl Into<String>) -> AnalysisError {
    AnalysisError::Validation {
        detail: detail.into(),
    }
}

fn request(config: &ProviderConfig, url: String, headers: Vec<(String, String)>, body: Value) -> HttpRequest {
    HttpRequest {
        url,
        headers,
        body,
        timeout: Duration::from_secs(config.timeout_secs),
    }
}

fn chat_completion_body(config: &ProviderConfig, prompt: &ChatPrompt, with_model: bool) -> Result<Value, AnalysisError> {
    to_body(&ChatCompletionRequest {
        model: with_model.then(|| config.model_name()),
        messages: chat_messages(prompt),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    })
}

fn parse_chat_completion(body: &[u8]) -> Result<RawPayload, AnalysisError> {
    let resp: ChatCompletionResponse = serde_json::from_slice(body)
        .map_err(|e| invalid(format!("unexpected chat completion envelope: {e}")))?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(RawPayload::Text)
        .ok_or_else(|| invalid("response has no choices[0].message.content"))
}

fn parse_messages(body: &[u8]) -> Result<RawPayload, AnalysisError> {
    let resp: MessagesResponse = serde_json::from_slice(body)
        .map_err(|e| invalid(format!("unexpected messages envelope: {e}")))?;
    let text: String = resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    if text.is_empty() {
        return Err(invalid("response has no text content blocks"));
    }
    Ok(RawPayload::Text(text))
}

fn endpoint_or<'a>(config: &'a ProviderConfig, default: &'a str) -> &'a str {
    config
        .endpoint
        .as_deref()
        .map(|e| e.trim_end_matches('/'))
        .filter(|e| !e.is_empty())
        .unwrap_or(default)
}

// ── Handlers ────────────────────────────────────────────────────────────────

pub struct OpenAiHandler;

impl ProviderHandler for OpenAiHandler {
    fn build_request(&self, config: &ProviderConfig, prompt: &ChatPrompt) -> Result<HttpRequest, AnalysisError> {
        let base = endpoint_or(config, OPENAI_BASE_URL);
        let url = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        };
        let headers = vec![("Authorization".into(), format!("Bearer {}", config.api_key))];
        Ok(request(config, url, headers, chat_completion_body(config, prompt, true)?))
    }

    fn parse_response(&self, body: &[u8]) -> Result<RawPayload, AnalysisError> {
        parse_chat_completion(body)
    }
}

pub struct AzureOpenAiHandler;

impl ProviderHandler for AzureOpenAiHandler {
    fn build_request(&self, config: &ProviderConfig, prompt: &ChatPrompt) -> Result<HttpRequest, AnalysisError> {
        let endpoint = endpoint_or(config, "");
        if endpoint.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "azure_openai requires an endpoint".into(),
            ));
        }
        let url = if endpoint.contains("/chat/completions") {
            endpoint.to_string()
        } else {
            format!(
                "{endpoint}/openai/deployments/{}/chat/completions?api-version={AZURE_API_VERSION}",
                config.model_name()
            )
        };
        let headers = vec![("api-key".into(), config.api_key.clone())];
        Ok(request(config, url, headers, chat_completion_body(config, prompt, false)?))
    }

    fn parse_response(&self, body: &[u8]) -> Result<RawPayload, AnalysisError> {
        parse_chat_completion(body)
    }
}

pub struct AnthropicHandler;

impl ProviderHandler for AnthropicHandler {
    fn build_request(&self, config: &ProviderConfig, prompt: &ChatPrompt) -> Result<HttpRequest, AnalysisError> {
        let base = endpoint_or(config, ANTHROPIC_BASE_URL);
        let url = if base.ends_with("/v1/messages") {
            base.to_string()
        } else {
            format!("{base}/v1/messages")
        };
        let body = to_body(&MessagesRequest {
            model: config.model_name(),
            system: &prompt.system,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt.user,
            }],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })?;
        let headers = vec![
            ("x-api-key".into(), config.api_key.clone()),
            ("anthropic-version".into(), ANTHROPIC_VERSION.into()),
        ];
        Ok(request(config, url, headers, body))
    }

    fn parse_response(&self, body: &[u8]) -> Result<RawPayload, AnalysisError> {
        parse_messages(body)
    }
}

pub struct CustomHandler;

impl ProviderHandler for CustomHandler {
    fn build_request(&self, config: &ProviderConfig, prompt: &ChatPrompt) -> Result<HttpRequest, AnalysisError> {
        let url = endpoint_or(config, "");
        if url.is_empty() {
            return Err(AnalysisError::InvalidConfig("custom provider requires an endpoint".into()));
        }
        let mut headers = Vec::new();
        if !config.api_key.is_empty() {
            headers.push(("Authorization".into(), format!("Bearer {}", config.api_key)));
        }
        let body = to_body(&CustomRequest {
            provider: "custom",
            model: config.model_name(),
            messages: chat_messages(prompt),
            prompt: &prompt.prompt,
            document: &prompt.document,
        })?;
        Ok(request(config, url.to_string(), headers, body))
    }

    /// Accepts an OpenAI or Anthropic envelope, a `{content|response|result|output}`
    /// wrapper, or the analysis object itself.
    fn parse_response(&self, body: &[u8]) -> Result<RawPayload, AnalysisError> {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            // Plain-text answers still go through the normaliser.
            Err(_) => return Ok(RawPayload::Text(String::from_utf8_lossy(body).into_owned())),
        };
        if value.get("choices").is_some() {
            return parse_chat_completion(body);
        }
        if value.get("content").is_some_and(Value::is_array) {
            return parse_messages(body);
        }
        for key in ["content", "response", "result", "output"] {
            match value.get(key) {
                Some(Value::String(s)) => return Ok(RawPayload::Text(s.clone())),
                Some(inner @ Value::Object(_)) => return Ok(RawPayload::Json(inner.clone())),
                _ => {}
            }
        }
        match value {
            Value::Object(_) => Ok(RawPayload::Json(value)),
            Value::String(s) => Ok(RawPayload::Text(s)),
            other => Err(invalid(format!("unexpected custom response: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prompt() -> ChatPrompt {
        ChatPrompt {
            system: "sys".into(),
            user: "user turn".into(),
            prompt: "review".into(),
            document: "doc text".into(),
        }
    }

    fn config(provider: Provider) -> ProviderConfig {
        let mut b = ProviderConfig::builder(provider).api_key("sk-test");
        if provider.requires_endpoint() {
            b = b.endpoint("https://llm.internal.example/");
        }
        b.build().unwrap()
    }

    #[test]
    fn openai_request_shape() {
        let c = config(Provider::Openai);
        let req = handler_for(Provider::Openai).build_request(&c, &prompt()).unwrap();
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(req.header("authorization"), Some("Bearer sk-test"));
        assert_eq!(req.body["model"], "gpt-4.1-mini");
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["messages"][1]["content"], "user turn");
        assert_eq!(req.body["response_format"]["type"], "json_object");
        assert_eq!(req.timeout, Duration::from_secs(30));
    }

    #[test]
    fn azure_request_shape() {
        let c = config(Provider::AzureOpenai);
        let req = handler_for(Provider::AzureOpenai).build_request(&c, &prompt()).unwrap();
        assert_eq!(
            req.url,
            "https://llm.internal.example/openai/deployments/gpt-4.1-mini/chat/completions?api-version=2024-02-15-preview"
        );
        assert_eq!(req.header("api-key"), Some("sk-test"));
        assert!(req.header("authorization").is_none());
        assert!(req.body.get("model").is_none());
    }

    #[test]
    fn anthropic_request_shape() {
        let c = config(Provider::Anthropic);
        let req = handler_for(Provider::Anthropic).build_request(&c, &prompt()).unwrap();
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(req.header("x-api-key"), Some("sk-test"));
        assert_eq!(req.header("anthropic-version"), Some("2023-06-01"));
        assert_eq!(req.body["system"], "sys");
        assert_eq!(req.body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn custom_request_shape() {
        let c = ProviderConfig::builder(Provider::Custom)
            .endpoint("https://llm.internal.example/analyze")
            .build()
            .unwrap();
        let req = handler_for(Provider::Custom).build_request(&c, &prompt()).unwrap();
        assert_eq!(req.url, "https://llm.internal.example/analyze");
        assert!(req.header("authorization").is_none());
        assert_eq!(req.body["provider"], "custom");
        assert_eq!(req.body["prompt"], "review");
        assert_eq!(req.body["document"], "doc text");
    }

    #[test]
    fn parses_envelopes() {
        let openai = json!({"choices":[{"message":{"content":"{\"summary\":\"s\"}"}}]}).to_string();
        assert_eq!(
            OpenAiHandler.parse_response(openai.as_bytes()).unwrap(),
            RawPayload::Text("{\"summary\":\"s\"}".into())
        );

        let anthropic = json!({"content":[{"type":"text","text":"{\"a\":"},{"type":"text","text":"1}"}]}).to_string();
        assert_eq!(
            AnthropicHandler.parse_response(anthropic.as_bytes()).unwrap(),
            RawPayload::Text("{\"a\":1}".into())
        );

        let err = OpenAiHandler.parse_response(br#"{"choices":[]}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn custom_accepts_many_shapes() {
        let h = CustomHandler;
        assert_eq!(
            h.parse_response(br#"{"response":"{}"}"#).unwrap(),
            RawPayload::Text("{}".into())
        );
        assert_eq!(
            h.parse_response(br#"{"result":{"summary":"x"}}"#).unwrap(),
            RawPayload::Json(json!({"summary":"x"}))
        );
        assert_eq!(
            h.parse_response(br#"{"content":{"summary":"boxed","threats":[{"type":"XSS"}]}}"#)
                .unwrap(),
            RawPayload::Json(json!({"summary":"boxed","threats":[{"type":"XSS"}]}))
        );
        assert_eq!(
            h.parse_response(br#"{"summary":"x","threats":[]}"#).unwrap(),
            RawPayload::Json(json!({"summary":"x","threats":[]}))
        );
        assert!(h.parse_response(b"[1,2]").is_err());
    }

    #[test]
    fn credential_checks() {
        let mut c = config(Provider::Openai);
        assert!(validate_credentials(&c).is_ok());
        c.api_key = String::new();
        assert!(matches!(validate_credentials(&c), Err(AnalysisError::Credentials { .. })));
        c.api_key = "sk test".into();
        assert!(validate_credentials(&c).is_err());
        c.api_key = "sk-\n".into();
        assert!(validate_credentials(&c).is_err());

        let mut custom = config(Provider::Custom);
        custom.api_key = String::new();
        assert!(validate_credentials(&custom).is_ok());
    }

    #[test]
    fn vision_models() {
        assert!(is_vision_model("gpt-4o-mini"));
        assert!(is_vision_model("gpt-4.1-mini"));
        assert!(is_vision_model("claude-sonnet-4-20250514"));
        assert!(is_vision_model("llava-vision"));
        assert!(!is_vision_model("gpt-3.5-turbo"));
    }
}
