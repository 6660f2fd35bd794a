//! Clients for the hosted text-generation API.
//!
//! Handlers only see [`CompletionClient`]; the concrete implementation is picked from
//! [`CompletionConfig::provider`] by [`build_client`]. Both implementations send a single
//! user message and return the generated text. There are no retries: a failed call is
//! surfaced to the user as-is.

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error as ThisError;
use url::Url;

use crate::config::{CompletionConfig, Provider};

/// A single prompt to complete.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

/// Generated text plus whatever usage data the provider reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(ThisError, Debug)]
pub enum CompletionError {
    #[error("request to completion endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode completion response: {0}")]
    Decode(String),

    #[error("completion response contained no text")]
    EmptyResponse,

    #[error("invalid completion endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A trait for sending a prompt to a hosted model.
/// In practice this is an HTTP call made with `reqwest`; tests substitute a wiremock server
/// behind the same implementations.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;

    /// Model identifier, for logs and metrics
    fn model(&self) -> &str;
}

/// Build the configured client, or `None` when no API key is available.
pub fn build_client(config: &CompletionConfig, api_key: Option<String>) -> anyhow::Result<Option<Arc<dyn CompletionClient>>> {
    let Some(api_key) = api_key else {
        tracing::warn!("No completion API key configured; generation requests will fail");
        return Ok(None);
    };

    let http = Client::builder().timeout(config.request_timeout).build()?;

    let client: Arc<dyn CompletionClient> = match config.provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(http, config, api_key)?),
        Provider::OpenAi => Arc::new(OpenAiClient::new(http, config, api_key)?),
    };
    tracing::info!(provider = ?config.provider, model = %client.model(), "Completion client configured");
    Ok(Some(client))
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// Pull a human-readable message out of a provider error body.
///
/// Both providers use `{"error": {"message": "..."}}`; anything else is returned verbatim.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
