use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LlmGateway;
use crate::config::StageConfig;
use crate::error::{ColloquyError, ColloquyResult};

const OPENAI_API_BASE: &str = "https://api.openai.com";
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api";
const OLLAMA_API_BASE: &str = "http://localhost:11434";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;

/// Gateway speaking the providers' HTTP chat APIs.
///
/// `anthropic` uses the messages API. Every other provider is assumed to
/// expose an OpenAI-compatible chat-completions endpoint, which makes any
/// `base_url` usable as a custom provider.
#[derive(Debug, Clone, Default)]
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn base_url(stage: &StageConfig) -> ColloquyResult<String> {
        if let Some(ref url) = stage.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        match stage.provider.as_str() {
            "openai" => Ok(OPENAI_API_BASE.to_string()),
            "anthropic" => Ok(ANTHROPIC_API_BASE.to_string()),
            "openrouter" => Ok(OPENROUTER_API_BASE.to_string()),
            "ollama" => Ok(OLLAMA_API_BASE.to_string()),
            other => Err(ColloquyError::InvalidConfigValue {
                key: "base_url".to_string(),
                message: format!("Provider '{}' needs an explicit base_url", other),
            }),
        }
    }

    async fn complete_anthropic(&self, prompt: &str, stage: &StageConfig) -> ColloquyResult<String> {
        let url = format!("{}/v1/messages", Self::base_url(stage)?);
        let body = AnthropicRequest {
            model: &stage.model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            temperature: stage.temperature,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&body);
        if let Some(ref key) = stage.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ColloquyError::transport(&stage.provider, e.to_string()))?;
        let data: AnthropicResponse = read_json(response, &stage.provider).await?;

        data.content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| ColloquyError::InvalidResponse {
                provider: stage.provider.clone(),
                message: "Response contained no text content".to_string(),
            })
    }

    async fn complete_chat(&self, prompt: &str, stage: &StageConfig) -> ColloquyResult<String> {
        let url = format!("{}/v1/chat/completions", Self::base_url(stage)?);
        let body = ChatRequest {
            model: &stage.model,
            temperature: stage.temperature,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = stage.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ColloquyError::transport(&stage.provider, e.to_string()))?;
        let data: ChatResponse = read_json(response, &stage.provider).await?;

        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ColloquyError::InvalidResponse {
                provider: stage.provider.clone(),
                message: "Response contained no choices".to_string(),
            })
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn complete(&self, prompt: &str, stage: &StageConfig) -> ColloquyResult<String> {
        debug!(provider = %stage.provider, model = %stage.model, "Sending completion request");

        match stage.provider.as_str() {
            "anthropic" => self.complete_anthropic(prompt, stage).await,
            _ => self.complete_chat(prompt, stage).await,
        }
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    provider: &str,
) -> ColloquyResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ColloquyError::transport(
            provider,
            format!("HTTP {}: {}", status.as_u16(), body),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ColloquyError::InvalidResponse {
            provider: provider.to_string(),
            message: e.to_string(),
        })
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Debug, Deserialize)]
struct ChatMessageBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: Option<String>,
}
