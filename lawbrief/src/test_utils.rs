//! Test utilities shared by the unit and HTTP tests.

use axum_test::{TestResponse, TestServer};
use std::path::Path;
use std::sync::Once;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{CompletionConfig, Config, UploadConfig};

/// reqwest is built without a bundled crypto provider; install the process default once.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Configuration pointing the completion client at `base_url` and storing uploads in `upload_dir`.
pub fn create_test_config(upload_dir: &Path, base_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        completion: CompletionConfig {
            base_url: Some(base_url.parse().expect("valid test base url")),
            api_key: Some("sk-test".to_string()),
            model: "claude-test".to_string(),
            request_timeout: std::time::Duration::from_secs(5),
            ..Default::default()
        },
        uploads: UploadConfig {
            directory: upload_dir.to_path_buf(),
            max_file_size: 64 * 1024,
            max_files: 3,
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    }
}

pub async fn create_test_app(config: Config) -> TestServer {
    install_crypto_provider();
    crate::Application::new(config)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

fn messages_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "model": "claude-test",
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 10, "output_tokens": 20}
    }))
}

/// Answer every Messages API call with `text`.
pub async fn mock_completion_success(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(messages_response(text))
        .mount(server)
        .await;
}

/// Answer only the next Messages API call with `text`; later calls fall through to mocks mounted
/// afterwards.
pub async fn mock_completion_success_once(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(messages_response(text))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

pub async fn mock_completion_error(server: &MockServer, status: u16, message: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "type": "error",
            "error": {"type": "api_error", "message": message}
        })))
        .mount(server)
        .await;
}

/// The prompt of the most recent completion call received by `server`.
pub async fn last_prompt(server: &MockServer) -> String {
    let requests = server.received_requests().await.expect("request recording enabled");
    let request = requests.last().expect("at least one completion request");
    let body: serde_json::Value = serde_json::from_slice(&request.body).expect("JSON request body");
    body.pointer("/messages/0/content")
        .and_then(|c| c.as_str())
        .expect("prompt in first message")
        .to_string()
}

/// `name=value` part of the session cookie set by a response, if any.
pub fn session_cookie(response: &TestResponse) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with("lawbrief_session="))
        .map(str::to_string)
}
