//! # lawbrief: court brief drafting service
//!
//! `lawbrief` serves a single web form that collects the details of a court case (case number,
//! court and branch, the parties, facts, evidence, legal argument and the request), optionally
//! together with document attachments. The details are turned into a prompt for a hosted
//! text-generation API and the drafted brief is shown back to the user, who can ask for a revision
//! with free-text feedback.
//!
//! ## Architecture
//!
//! The service is an [Axum](https://github.com/tokio-rs/axum) application with a few small,
//! independent parts:
//!
//! - **[`completion`]**: clients for the Anthropic Messages API and OpenAI-compatible chat
//!   completion endpoints behind the [`completion::CompletionClient`] trait
//! - **[`prompt`]**: the case model and the prompts built from it
//! - **[`uploads`]**: streaming attachment storage with size, count and type limits
//! - **[`session`]**: cookie-keyed in-memory sessions holding the last generated brief
//! - **[`templates`]**: embedded minijinja templates for pages and prompts
//! - **[`api`]**: route handlers and page models
//!
//! Nothing is persisted apart from the uploaded attachments; sessions live in memory and expire
//! after a configurable idle time.
//!
//! ## Request flow
//!
//! 1. `GET /` renders the case form.
//! 2. `POST /generate` streams attachments to disk, renders the brief prompt and sends it to the
//!    completion provider. The reply is rendered and stored as the session's last result.
//! 3. `POST /revise` sends the last result together with the user's feedback and replaces the
//!    stored result with the revision.
//! 4. `GET /result` shows the stored result again.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML file format and environment variable overrides. The API key is
//! usually provided through `ANTHROPIC_API_KEY`; without it the server still starts but every
//! generation request fails.

pub mod api;
pub mod completion;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod prompt;
pub mod session;
mod static_assets;
pub mod telemetry;
pub mod templates;
pub mod uploads;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

pub use config::Config;

use crate::completion::CompletionClient;
use crate::session::SessionStore;
use crate::templates::Templates;
use crate::uploads::UploadStore;

/// Shared state handed to every handler.
///
/// `completion` is `None` when no API key is configured; generation handlers answer with a 500
/// in that case.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub completion: Option<Arc<dyn CompletionClient>>,
    pub sessions: SessionStore,
    pub uploads: UploadStore,
    pub templates: Templates,
}

/// Build the application state from configuration: templates, upload directory, completion
/// client and the session store.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let templates = Templates::load()?;

    let uploads = UploadStore::new(&config.uploads);
    uploads.ensure_directory().await?;

    let completion = completion::build_client(&config.completion, config.api_key())?;
    let sessions = SessionStore::new(&config.session, uploads.clone());

    Ok(AppState::builder()
        .config(config)
        .maybe_completion(completion)
        .sessions(sessions)
        .uploads(uploads)
        .templates(templates)
        .build())
}

/// Build the application router with all routes and middleware.
pub fn build_router(state: &AppState) -> Router {
    // The generate form carries the attachments, so it gets a larger body limit than the default
    let generate = post(api::handlers::brief::generate).layer(DefaultBodyLimit::max(state.config.body_limit()));

    let mut router = Router::new()
        .route("/", get(api::handlers::brief::index))
        .route("/generate", generate)
        .route("/revise", post(api::handlers::brief::revise))
        .route("/result", get(api::handlers::brief::show_result))
        .route("/healthz", get(api::handlers::health::healthz))
        .route("/static/{*path}", get(api::handlers::static_assets::serve_static_asset))
        .with_state(state.clone());

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        info!(
            provider = ?config.completion.provider,
            model = %config.completion.model,
            uploads = config.uploads.enabled,
            "Starting lawbrief"
        );

        let state = build_state(config.clone()).await?;
        let router = build_router(&state);

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "lawbrief listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
