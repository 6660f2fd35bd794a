//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{Completion, CompletionClient, CompletionError, CompletionRequest, ensure_slash, error_message};
use crate::config::CompletionConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

pub struct OpenAiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(client: Client, config: &CompletionConfig, api_key: String) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            base_url: config.endpoint()?,
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = request.prompt.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let url = ensure_slash(&self.base_url).join("v1/chat/completions")?;
        debug!("Sending completion request to {}", url);

        let body = ChatRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self.client.post(url).bearer_auth(&self.api_key).json(&body).send().await?;

        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message: error_message(&body_text),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body_text).map_err(|e| {
            tracing::error!("Failed to parse chat completion response as JSON. Error: {}", e);
            tracing::debug!("Response body was: {}", body_text);
            CompletionError::Decode(e.to_string())
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)?;

        Ok(Completion {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
