use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, system: Option<&str>, prompt: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let name = name.trim();
    let (provider, model_id) = match name {
        "sonnet" | "claude-sonnet" => (ProviderKind::Anthropic, "claude-sonnet-4-5-20250929"),
        "haiku" | "claude-haiku" => (ProviderKind::Anthropic, "claude-haiku-4-5-20251001"),
        "mini" => (ProviderKind::OpenAI, "gpt-4o-mini"),
        // Full model ids pass through to whichever API serves them
        id if id.starts_with("claude-") => (ProviderKind::Anthropic, id),
        id if id.starts_with("gpt-") || id.starts_with("o1") || id.starts_with("o3") || id.starts_with("o4") => {
            (ProviderKind::OpenAI, id)
        }
        _ => {
            return Err(anyhow!(
                "Unknown model '{}'. Use an OpenAI id (gpt-4o-mini, gpt-4o, o3), \
                 a claude-* id, or one of: mini, sonnet, haiku",
                name
            ));
        }
    };
    Ok(ModelSpec { provider, model_id: model_id.to_string() })
}

pub fn create_provider(spec: &ModelSpec) -> Result<Box<dyn AIProvider>> {
    match spec.provider {
        ProviderKind::Anthropic => Ok(Box::new(AnthropicProvider::new(spec.model_id.clone())?)),
        ProviderKind::OpenAI => Ok(Box::new(OpenAIProvider::new(spec.model_id.clone())?)),
    }
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

fn read_error_body(response: reqwest::blocking::Response, api: &str) -> anyhow::Error {
    let status = response.status();
    let error_text = response.text().unwrap_or_default();
    anyhow!("{} request failed with status {}: {}", api, status, error_text)
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;
        Ok(Self { api_key, model_id, client: http_client()? })
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, system: Option<&str>, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.model_id,
            max_tokens,
            temperature: 0.0,
            system,
            messages: vec![AnthropicMessage { role: "user", content: prompt }],
        };

        tracing::debug!(model = %self.model_id, prompt_chars = prompt.len(), "anthropic request");
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            return Err(read_error_body(response, "Anthropic API"));
        }

        let api_response: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;

        api_response
            .content
            .into_iter()
            .map(|block| block.text)
            .find(|text| !text.is_empty())
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<OpenAIMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self { api_key, model_id, client: http_client()? })
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, system: Option<&str>, prompt: &str, max_tokens: u32) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(OpenAIMessage { role: "system", content: system });
        }
        messages.push(OpenAIMessage { role: "user", content: prompt });

        let request = OpenAIRequest {
            model: &self.model_id,
            max_tokens,
            temperature: 0.0,
            messages,
        };

        tracing::debug!(model = %self.model_id, prompt_chars = prompt.len(), "openai request");
        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            return Err(read_error_body(response, "OpenAI API"));
        }

        let api_response: OpenAIResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Response helpers ---

/// Strips markdown code fences a model may wrap JSON in.
pub fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timeout_matches_other_collaborators() {
        assert_eq!(REQUEST_TIMEOUT, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_model_aliases() {
        let spec = resolve_model("mini").unwrap();
        assert_eq!(spec.model_id, "gpt-4o-mini");
        assert_eq!(spec.provider, ProviderKind::OpenAI);

        let spec = resolve_model("sonnet").unwrap();
        assert_eq!(spec.provider, ProviderKind::Anthropic);
        assert!(spec.model_id.starts_with("claude-sonnet"));
    }

    #[test]
    fn test_resolve_model_passthrough() {
        let spec = resolve_model("gpt-4o-mini").unwrap();
        assert_eq!(spec.model_id, "gpt-4o-mini");
        assert_eq!(spec.provider, ProviderKind::OpenAI);

        let spec = resolve_model("o3").unwrap();
        assert_eq!(spec.provider, ProviderKind::OpenAI);

        let spec = resolve_model("claude-opus-4-1").unwrap();
        assert_eq!(spec.provider, ProviderKind::Anthropic);
        assert_eq!(spec.model_id, "claude-opus-4-1");
    }

    #[test]
    fn test_resolve_model_unknown() {
        assert!(resolve_model("llama").is_err());
        assert!(resolve_model("").is_err());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAIProvider::new("gpt-4o-mini".to_string());

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("OPENAI_API_KEY"));
    }
}
