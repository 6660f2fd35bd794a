//! Anthropic Messages API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{Completion, CompletionClient, CompletionError, CompletionRequest, ensure_slash, error_message};
use crate::config::CompletionConfig;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

pub struct AnthropicClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    version: String,
}

impl AnthropicClient {
    pub fn new(client: Client, config: &CompletionConfig, api_key: String) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            base_url: config.endpoint()?,
            api_key,
            model: config.model.clone(),
            version: config.anthropic_version.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = request.prompt.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let url = ensure_slash(&self.base_url).join("v1/messages")?;
        debug!("Sending completion request to {}", url);

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message: error_message(&body_text),
            });
        }

        let parsed: MessagesResponse = serde_json::from_str(&body_text).map_err(|e| {
            tracing::error!("Failed to parse messages response as JSON. Error: {}", e);
            tracing::debug!("Response body was: {}", body_text);
            CompletionError::Decode(e.to_string())
        })?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        Ok(Completion {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: parsed.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: parsed.usage.as_ref().map(|u| u.output_tokens),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
