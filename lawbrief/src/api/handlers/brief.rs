//! The case form, brief generation and revision.

use axum::{
    extract::{Form, FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    api::models::{
        pages::{IndexPage, ResultPage},
        revise::ReviseForm,
    },
    completion::{Completion, CompletionClient, CompletionError, CompletionRequest},
    errors::{Error, Result},
    metrics,
    prompt::{CaseDetails, brief_prompt, revision_prompt},
    session::Session,
    templates::{INDEX_PAGE, RESULT_PAGE},
    uploads::{StoredUpload, UploadStore},
};

/// Multipart field carrying the attachments.
pub const ATTACHMENTS_FIELD: &str = "attachments";

const GENERATE_FAILED: &str = "❌ خطا در تولید لایحه";
const REVISE_FAILED: &str = "❌ خطا در اصلاح لایحه";

#[instrument(skip_all, fields(session_id = %session.id))]
pub async fn index(State(state): State<AppState>, session: Session) -> Result<Html<String>> {
    let page = IndexPage::new(&state.config.title, &state.uploads, session.data.last_result.is_some());
    Ok(Html(state.templates.render(INDEX_PAGE, page)?))
}

/// Generate a brief from the submitted case form.
///
/// The API key is checked before the body is read, so a missing key is reported as a 500 for
/// any request body. Attachments are streamed to disk as they arrive. If reading the form fails,
/// attachments already saved by this request are removed again. A failed completion renders an
/// error page, removes this request's attachments and leaves the session as it was.
#[instrument(skip_all, fields(session_id = %session.id))]
pub async fn generate(State(state): State<AppState>, mut session: Session, request: Request) -> Result<Response> {
    let client = state.completion.clone().ok_or(Error::MissingApiKey)?;
    let multipart = Multipart::from_request(request, &state).await?;

    let (case, uploads) = read_submission(&state.uploads, multipart).await?;
    debug!(attachments = uploads.len(), "Case form received");

    let prompt = match brief_prompt(&state.templates, &case, &uploads) {
        Ok(prompt) => prompt,
        Err(e) => {
            state.uploads.discard(&uploads).await;
            return Err(e);
        }
    };

    match run_completion(client.as_ref(), "generate", prompt, state.config.completion.max_tokens).await {
        Ok(completion) => {
            let replaced = session.data.record_result(completion.text, completion.model, Some(case), Some(uploads));
            state.sessions.save(session.id, session.data.clone()).await;
            state.uploads.discard(&replaced).await;
            render_stored_result(&state, &session)
        }
        Err(e) => {
            state.uploads.discard(&uploads).await;
            render_failure(&state, GENERATE_FAILED, &e)
        }
    }
}

/// Regenerate the last brief of this session with the user's feedback applied.
#[instrument(skip_all, fields(session_id = %session.id))]
pub async fn revise(State(state): State<AppState>, mut session: Session, Form(form): Form<ReviseForm>) -> Result<Response> {
    let client = state.completion.clone().ok_or(Error::MissingApiKey)?;

    let feedback = form.feedback.trim();
    if feedback.is_empty() {
        return Err(Error::BadRequest {
            message: "Feedback cannot be empty".to_string(),
        });
    }

    let previous = session.data.last_result.as_deref().ok_or(Error::NoPreviousResult)?;
    let prompt = revision_prompt(&state.templates, previous, feedback, session.data.case.as_ref())?;

    match run_completion(client.as_ref(), "revise", prompt, state.config.completion.max_tokens).await {
        Ok(completion) => {
            // Revisions keep the attachments of the generation they revise
            let _ = session.data.record_result(completion.text, completion.model, None, None);
            state.sessions.save(session.id, session.data.clone()).await;
            render_stored_result(&state, &session)
        }
        Err(e) => render_failure(&state, REVISE_FAILED, &e),
    }
}

/// Show the last brief again, or send the user back to the form when there is none.
#[instrument(skip_all, fields(session_id = %session.id))]
pub async fn show_result(State(state): State<AppState>, session: Session) -> Result<Response> {
    if session.data.last_result.is_none() {
        debug!("No stored result, redirecting to the form");
        return Ok(Redirect::to("/").into_response());
    }
    render_stored_result(&state, &session)
}

/// Read the case fields and stream the attachments of a submitted form.
async fn read_submission(store: &UploadStore, mut multipart: Multipart) -> Result<(CaseDetails, Vec<StoredUpload>)> {
    let mut case = CaseDetails::default();
    let mut uploads = Vec::new();

    let result: Result<()> = async {
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == ATTACHMENTS_FIELD {
                // Browsers send an empty part when no file was picked
                let file_name = field.file_name().unwrap_or_default().to_string();
                if file_name.is_empty() {
                    continue;
                }
                let upload = store.save(&file_name, uploads.len(), field).await?;
                uploads.push(upload);
            } else {
                let value = field.text().await?;
                if !case.set(&name, &value) {
                    debug!("Ignoring unknown form field {}", name);
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        store.discard(&uploads).await;
        return Err(e);
    }

    Ok((case, uploads))
}

/// Send one prompt to the completion provider, recording metrics for the call.
async fn run_completion(
    client: &dyn CompletionClient,
    kind: &'static str,
    prompt: String,
    max_tokens: u32,
) -> std::result::Result<Completion, CompletionError> {
    let started = Instant::now();
    let result = client.complete(&CompletionRequest { prompt, max_tokens }).await;
    let elapsed = started.elapsed();
    metrics::record_completion(kind, result.is_ok(), elapsed);

    match &result {
        Ok(completion) => info!(
            kind,
            model = %completion.model,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            elapsed_ms = elapsed.as_millis() as u64,
            "Completion succeeded"
        ),
        Err(e) => warn!(kind, model = %client.model(), error = %e, "Completion failed"),
    }

    result
}

fn render_stored_result(state: &AppState, session: &Session) -> Result<Response> {
    let page = ResultPage::from_session(&state.config.title, &session.data).ok_or(Error::NoPreviousResult)?;
    let html = state.templates.render(RESULT_PAGE, page)?;
    Ok(with_session_cookie(state, session, Html(html)))
}

fn render_failure(state: &AppState, prefix: &str, error: &CompletionError) -> Result<Response> {
    let message = format!("{prefix}: {error}");
    let html = state.templates.render(RESULT_PAGE, ResultPage::failure(&state.config.title, &message))?;
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Html(html)).into_response())
}

fn with_session_cookie(state: &AppState, session: &Session, response: impl IntoResponse) -> Response {
    ([(header::SET_COOKIE, state.sessions.cookie(&session.id))], response).into_response()
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use tempfile::TempDir;
    use wiremock::MockServer;

    fn case_form() -> MultipartForm {
        MultipartForm::new()
            .add_text("case_no", "9909980123")
            .add_text("branch", "۱۲")
            .add_text("court", "دادگاه عمومی حقوقی تهران")
            .add_text("claimant", "علی رضایی")
            .add_text("defendant", "شرکت نمونه")
            .add_text("lawyer", "")
            .add_text("facts", "قرارداد فروش منعقد شد و خوانده تعهد خود را انجام نداد.")
            .add_text("evidence", "قرارداد")
            .add_text("legal", "ماده ۲۱۹ قانون مدنی")
            .add_text("request_text", "الزام به ایفای تعهد")
    }

    fn files_in(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test_log::test(tokio::test)]
    async fn test_index_renders_form() {
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), "http://127.0.0.1:9")).await;

        let response = server.get("/").await;

        response.assert_status(StatusCode::OK);
        let html = response.text();
        assert!(html.contains("action=\"/generate\""));
        assert!(html.contains("name=\"request_text\""));
        assert!(html.contains("name=\"attachments\""));
        assert!(!html.contains("href=\"/result\""));
    }

    #[test_log::test(tokio::test)]
    async fn test_generate_renders_model_output() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "ریاست محترم دادگاه عمومی حقوقی").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let response = server.post("/generate").multipart(case_form()).await;

        response.assert_status(StatusCode::OK);
        let html = response.text();
        assert!(html.contains("ریاست محترم دادگاه عمومی حقوقی"));
        assert!(html.contains("9909980123"));
        assert!(html.contains("action=\"/revise\""));
        assert!(session_cookie(&response).is_some());

        let prompt = last_prompt(&mock).await;
        assert!(prompt.contains("- شماره پرونده: 9909980123"));
        assert!(prompt.contains("- وکیل: -"));
    }

    #[test_log::test(tokio::test)]
    async fn test_generate_stores_attachments() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "لایحه").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let form = case_form().add_part("attachments", Part::bytes(b"%PDF-1.7".as_slice()).file_name("contract.pdf"));
        let response = server.post("/generate").multipart(form).await;

        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("contract.pdf"));
        assert_eq!(files_in(&uploads), 1);
        assert!(last_prompt(&mock).await.contains("contract.pdf"));
    }

    #[test_log::test(tokio::test)]
    async fn test_generate_skips_empty_file_input() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "لایحه").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let form = case_form().add_part("attachments", Part::bytes(Vec::new()).file_name(""));
        let response = server.post("/generate").multipart(form).await;

        response.assert_status(StatusCode::OK);
        assert_eq!(files_in(&uploads), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_generate_without_api_key_fails() {
        let uploads = TempDir::new().unwrap();
        let mut config = create_test_config(uploads.path(), "http://127.0.0.1:9");
        config.completion.api_key = None;
        let server = create_test_app(config).await;

        let response = server.post("/generate").multipart(case_form()).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("ANTHROPIC_API_KEY"));
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_api_key_is_reported_before_reading_the_body() {
        let uploads = TempDir::new().unwrap();
        let mut config = create_test_config(uploads.path(), "http://127.0.0.1:9");
        config.completion.api_key = None;
        let server = create_test_app(config).await;

        let response = server.post("/generate").form(&serde_json::json!({"case_no": "1"})).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("ANTHROPIC_API_KEY"));
    }

    #[test_log::test(tokio::test)]
    async fn test_generate_requires_multipart_body() {
        let mock = MockServer::start().await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let response = server.post("/generate").form(&serde_json::json!({"case_no": "1"})).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(mock.received_requests().await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_oversized_upload_is_rejected() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "unused").await;
        let uploads = TempDir::new().unwrap();
        let mut config = create_test_config(uploads.path(), &mock.uri());
        config.uploads.max_file_size = 1024;
        let server = create_test_app(config).await;

        let form = case_form().add_part("attachments", Part::bytes(vec![b'x'; 4096]).file_name("big.pdf"));
        let response = server.post("/generate").multipart(form).await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(files_in(&uploads), 0);
        assert!(mock.received_requests().await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_disallowed_extension_is_rejected() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "unused").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let form = case_form()
            .add_part("attachments", Part::bytes(b"ok".as_slice()).file_name("a.pdf"))
            .add_part("attachments", Part::bytes(b"MZ".as_slice()).file_name("run.exe"));
        let response = server.post("/generate").multipart(form).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("not allowed"));
        // The first, valid attachment is removed again
        assert_eq!(files_in(&uploads), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_too_many_attachments_are_rejected() {
        let mock = MockServer::start().await;
        let uploads = TempDir::new().unwrap();
        let mut config = create_test_config(uploads.path(), &mock.uri());
        config.uploads.max_files = 1;
        let server = create_test_app(config).await;

        let form = case_form()
            .add_part("attachments", Part::bytes(b"1".as_slice()).file_name("a.pdf"))
            .add_part("attachments", Part::bytes(b"2".as_slice()).file_name("b.pdf"));
        let response = server.post("/generate").multipart(form).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(files_in(&uploads), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_completion_error_is_rendered() {
        let mock = MockServer::start().await;
        mock_completion_error(&mock, 401, "invalid x-api-key").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let response = server.post("/generate").multipart(case_form()).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let html = response.text();
        assert!(html.contains("❌ خطا در تولید لایحه:"));
        assert!(html.contains("invalid x-api-key"));
        // No case summary and no revise form on failure
        assert!(!html.contains("9909980123"));
        assert!(!html.contains("action=\"/revise\""));
        assert!(session_cookie(&response).is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_generation_removes_its_attachments() {
        let mock = MockServer::start().await;
        mock_completion_error(&mock, 500, "overloaded").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let form = case_form().add_part("attachments", Part::bytes(b"%PDF-1.7".as_slice()).file_name("c.pdf"));
        let response = server.post("/generate").multipart(form).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(files_in(&uploads), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_new_generation_replaces_previous_attachments() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "لایحه").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let first_form = case_form().add_part("attachments", Part::bytes(b"one".as_slice()).file_name("first.pdf"));
        let first = server.post("/generate").multipart(first_form).await;
        first.assert_status(StatusCode::OK);
        let cookie = session_cookie(&first).unwrap();

        let second_form = case_form().add_part("attachments", Part::bytes(b"two".as_slice()).file_name("second.pdf"));
        let second = server
            .post("/generate")
            .add_header("cookie", cookie.as_str())
            .multipart(second_form)
            .await;
        second.assert_status(StatusCode::OK);

        let remaining: Vec<String> = std::fs::read_dir(uploads.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].ends_with("-second.pdf"));

        let result = server.get("/result").add_header("cookie", cookie.as_str()).await;
        let html = result.text();
        assert!(html.contains("second.pdf"));
        assert!(!html.contains("first.pdf"));
    }

    #[test_log::test(tokio::test)]
    async fn test_revision_keeps_attachments() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "لایحه").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let form = case_form().add_part("attachments", Part::bytes(b"%PDF-1.7".as_slice()).file_name("contract.pdf"));
        let generated = server.post("/generate").multipart(form).await;
        let cookie = session_cookie(&generated).unwrap();

        server
            .post("/revise")
            .add_header("cookie", cookie.as_str())
            .form(&serde_json::json!({"feedback": "کوتاه‌تر"}))
            .await
            .assert_status(StatusCode::OK);

        assert_eq!(files_in(&uploads), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_generation_keeps_previous_result() {
        let mock = MockServer::start().await;
        mock_completion_success_once(&mock, "پیش‌نویس نخست").await;
        mock_completion_error(&mock, 500, "overloaded").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let first = server.post("/generate").multipart(case_form()).await;
        first.assert_status(StatusCode::OK);
        let cookie = session_cookie(&first).unwrap();

        let second = server.post("/generate").add_header("cookie", cookie.as_str()).multipart(case_form()).await;
        second.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

        let result = server.get("/result").add_header("cookie", cookie.as_str()).await;
        result.assert_status(StatusCode::OK);
        assert!(result.text().contains("پیش‌نویس نخست"));
    }

    #[test_log::test(tokio::test)]
    async fn test_revise_without_previous_result() {
        let mock = MockServer::start().await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let response = server
            .post("/revise")
            .form(&serde_json::json!({"feedback": "رسمی‌تر بنویس"}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(mock.received_requests().await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_revise_requires_feedback() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "پیش‌نویس").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let generated = server.post("/generate").multipart(case_form()).await;
        let cookie = session_cookie(&generated).unwrap();

        let response = server
            .post("/revise")
            .add_header("cookie", cookie.as_str())
            .form(&serde_json::json!({"feedback": "   "}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_revise_without_api_key_fails() {
        let uploads = TempDir::new().unwrap();
        let mut config = create_test_config(uploads.path(), "http://127.0.0.1:9");
        config.completion.api_key = None;
        let server = create_test_app(config).await;

        let response = server.post("/revise").form(&serde_json::json!({"feedback": "x"})).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test_log::test(tokio::test)]
    async fn test_revise_replaces_last_result() {
        let mock = MockServer::start().await;
        mock_completion_success_once(&mock, "پیش‌نویس نخست").await;
        mock_completion_success(&mock, "پیش‌نویس اصلاح‌شده").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let generated = server.post("/generate").multipart(case_form()).await;
        let cookie = session_cookie(&generated).unwrap();

        let revised = server
            .post("/revise")
            .add_header("cookie", cookie.as_str())
            .form(&serde_json::json!({"feedback": "بند خواسته کوتاه‌تر شود"}))
            .await;

        revised.assert_status(StatusCode::OK);
        assert!(revised.text().contains("پیش‌نویس اصلاح‌شده"));

        let prompt = last_prompt(&mock).await;
        assert!(prompt.contains("پیش‌نویس نخست"));
        assert!(prompt.contains("بند خواسته کوتاه‌تر شود"));

        let result = server.get("/result").add_header("cookie", cookie.as_str()).await;
        let html = result.text();
        assert!(html.contains("پیش‌نویس اصلاح‌شده"));
        assert!(!html.contains("پیش‌نویس نخست"));
        // Case details from the original submission are kept
        assert!(html.contains("9909980123"));
    }

    #[test_log::test(tokio::test)]
    async fn test_revise_failure_is_rendered() {
        let mock = MockServer::start().await;
        mock_completion_success_once(&mock, "پیش‌نویس نخست").await;
        mock_completion_error(&mock, 529, "overloaded").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let generated = server.post("/generate").multipart(case_form()).await;
        let cookie = session_cookie(&generated).unwrap();

        let revised = server
            .post("/revise")
            .add_header("cookie", cookie.as_str())
            .form(&serde_json::json!({"feedback": "کوتاه‌تر"}))
            .await;

        revised.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(revised.text().contains("❌ خطا در اصلاح لایحه:"));

        let result = server.get("/result").add_header("cookie", cookie.as_str()).await;
        assert!(result.text().contains("پیش‌نویس نخست"));
    }

    #[test_log::test(tokio::test)]
    async fn test_result_redirects_without_draft() {
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), "http://127.0.0.1:9")).await;

        let response = server.get("/result").await;

        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/");
    }

    #[test_log::test(tokio::test)]
    async fn test_index_links_previous_result() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "لایحه").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        let generated = server.post("/generate").multipart(case_form()).await;
        let cookie = session_cookie(&generated).unwrap();

        let index = server.get("/").add_header("cookie", cookie.as_str()).await;
        assert!(index.text().contains("href=\"/result\""));
    }

    #[test_log::test(tokio::test)]
    async fn test_sessions_are_isolated() {
        let mock = MockServer::start().await;
        mock_completion_success(&mock, "لایحه محرمانه").await;
        let uploads = TempDir::new().unwrap();
        let server = create_test_app(create_test_config(uploads.path(), &mock.uri())).await;

        server.post("/generate").multipart(case_form()).await.assert_status(StatusCode::OK);

        // A request without the first session's cookie sees nothing
        let response = server.get("/result").await;
        response.assert_status(StatusCode::SEE_OTHER);
    }
}
