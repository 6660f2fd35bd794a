//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `LAWBRIEF_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `LAWBRIEF_` override YAML values
//! 3. **Provider variables** - `ANTHROPIC_API_KEY`, `ANTHROPIC_MODEL` and `OPENAI_API_KEY` map onto
//!    the `completion` section
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `LAWBRIEF_UPLOADS__MAX_FILE_SIZE=1048576` sets the `uploads.max_file_size` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! LAWBRIEF_PORT=8080
//!
//! # Credentials for the completion provider
//! ANTHROPIC_API_KEY="sk-ant-..."
//! ANTHROPIC_MODEL="claude-sonnet-4-20250514"
//!
//! # Switch to an OpenAI-compatible endpoint
//! LAWBRIEF_COMPLETION__PROVIDER=openai
//! LAWBRIEF_COMPLETION__BASE_URL="https://api.openai.com"
//! OPENAI_API_KEY="sk-..."
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "LAWBRIEF_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation, so an empty (or missing)
/// YAML file yields a runnable configuration once an API key is provided.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Title shown in the page header and browser tab
    pub title: String,
    /// Completion provider settings
    pub completion: CompletionConfig,
    /// Attachment upload settings
    pub uploads: UploadConfig,
    /// Session cookie and store settings
    pub session: SessionConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Which wire format the completion endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Messages API (`/v1/messages`)
    Anthropic,
    /// OpenAI-compatible chat completions (`/v1/chat/completions`)
    OpenAi,
}

impl Provider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAi => "https://api.openai.com",
        }
    }
}

impl CompletionConfig {
    /// The configured base URL, or the provider's public endpoint when none is set.
    pub fn endpoint(&self) -> Result<Url, url::ParseError> {
        match &self.base_url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(self.provider.default_base_url()),
        }
    }
}

/// Completion endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    pub provider: Provider,
    /// Base URL of the provider API, without the `/v1/...` suffix. Defaults to the
    /// provider's public endpoint.
    pub base_url: Option<Url>,
    /// API key. When absent, generation requests fail with a 500 response.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model identifier sent with every request
    pub model: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Timeout for a single completion call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Value of the `anthropic-version` header
    pub anthropic_version: String,
}

/// Attachment upload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Accept attachments on the generate form
    pub enabled: bool,
    /// Directory where attachments are written
    pub directory: PathBuf,
    /// Maximum size of a single attachment in bytes
    pub max_file_size: u64,
    /// Maximum number of attachments per submission
    pub max_files: usize,
    /// Lowercase file extensions (without the dot) that may be uploaded.
    /// An empty list accepts any extension.
    pub allowed_extensions: Vec<String>,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Name of the session cookie
    pub cookie_name: String,
    /// Mark the cookie `Secure` (requires HTTPS)
    pub cookie_secure: bool,
    /// Idle time after which a session and its last result are dropped
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum number of live sessions kept in memory
    pub max_sessions: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            title: "لایحه‌ساز".to_string(),
            completion: CompletionConfig::default(),
            uploads: UploadConfig::default(),
            session: SessionConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            base_url: None,
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1500,
            request_timeout: Duration::from_secs(120),
            anthropic_version: "2023-06-01".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("uploads"),
            max_file_size: 10 * 1024 * 1024, // 10 MiB
            max_files: 5,
            allowed_extensions: ["pdf", "doc", "docx", "txt", "jpg", "jpeg", "png"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "lawbrief_session".to_string(),
            cookie_secure: false,
            timeout: Duration::from_secs(2 * 60 * 60), // 2 hours
            max_sessions: 10_000,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    ///
    /// A missing API key is deliberately not rejected here: the server still starts and
    /// reports the problem on each generation request.
    pub fn validate(&self) -> Result<(), Error> {
        if self.completion.model.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: completion.model cannot be empty".to_string(),
            });
        }

        if self.completion.max_tokens == 0 {
            return Err(Error::Internal {
                operation: "Config validation: completion.max_tokens must be positive".to_string(),
            });
        }

        if self.completion.request_timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: completion.request_timeout must be positive".to_string(),
            });
        }

        if self.uploads.enabled {
            if self.uploads.max_file_size == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: uploads.max_file_size cannot be 0 when uploads are enabled".to_string(),
                });
            }
            if self.uploads.max_files == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: uploads.max_files cannot be 0 when uploads are enabled".to_string(),
                });
            }
        }

        if self.session.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: session.timeout must be positive".to_string(),
            });
        }

        if self.session.cookie_name.is_empty() || self.session.cookie_name.contains([';', '=', ' ']) {
            return Err(Error::Internal {
                operation: format!("Config validation: invalid session.cookie_name {:?}", self.session.cookie_name),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("LAWBRIEF_").split("__"))
            // Conventional provider variables
            .merge(Env::raw().only(&["ANTHROPIC_API_KEY"]).map(|_| "completion.api_key".into()))
            .merge(Env::raw().only(&["ANTHROPIC_MODEL"]).map(|_| "completion.model".into()))
    }

    /// Resolve the API key, falling back to `OPENAI_API_KEY` for the openai provider.
    pub fn api_key(&self) -> Option<String> {
        self.completion.api_key.clone().filter(|k| !k.trim().is_empty()).or_else(|| match self.completion.provider {
            Provider::OpenAi => std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            Provider::Anthropic => None,
        })
    }

    /// Largest request body the generate form may send.
    ///
    /// Attachments are bounded individually while streaming; this caps the whole body with one
    /// extra MiB for the text fields.
    pub fn body_limit(&self) -> usize {
        const TEXT_FIELDS_ALLOWANCE: u64 = 1024 * 1024;
        let attachments = if self.uploads.enabled {
            self.uploads.max_file_size.saturating_mul(self.uploads.max_files as u64)
        } else {
            0
        };
        usize::try_from(attachments.saturating_add(TEXT_FIELDS_ALLOWANCE)).unwrap_or(usize::MAX)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
