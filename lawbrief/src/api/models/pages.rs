//! Template contexts for the HTML pages.

use serde::Serialize;

use crate::prompt::CaseDetails;
use crate::session::SessionData;
use crate::uploads::{StoredUpload, UploadStore};

/// Context for `index.html`.
#[derive(Debug, Serialize)]
pub struct IndexPage<'a> {
    pub title: &'a str,
    pub uploads_enabled: bool,
    pub accept: String,
    pub max_files: usize,
    pub max_file_size_mb: u64,
    pub has_previous: bool,
}

impl<'a> IndexPage<'a> {
    pub fn new(title: &'a str, uploads: &UploadStore, has_previous: bool) -> Self {
        Self {
            title,
            uploads_enabled: uploads.enabled(),
            accept: uploads.accept_attribute(),
            max_files: uploads.max_files(),
            max_file_size_mb: uploads.max_file_size().div_ceil(1024 * 1024),
            has_previous,
        }
    }
}

/// Context for `result.html`.
#[derive(Debug, Serialize)]
pub struct ResultPage<'a> {
    pub title: &'a str,
    pub generated: &'a str,
    pub is_error: bool,
    pub case: Option<&'a CaseDetails>,
    pub uploads: &'a [StoredUpload],
    pub can_revise: bool,
    pub model: Option<&'a str>,
    pub generated_at: Option<String>,
}

impl<'a> ResultPage<'a> {
    /// The stored draft of a session. Returns `None` when nothing has been generated yet.
    pub fn from_session(title: &'a str, data: &'a SessionData) -> Option<Self> {
        let generated = data.last_result.as_deref()?;
        Some(Self {
            title,
            generated,
            is_error: false,
            case: data.case.as_ref(),
            uploads: &data.uploads,
            can_revise: true,
            model: data.model.as_deref(),
            generated_at: data.updated_at.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string()),
        })
    }

    /// A failed generation: only the error text, no case data and no revise form.
    pub fn failure(title: &'a str, message: &'a str) -> Self {
        Self {
            title,
            generated: message,
            is_error: true,
            case: None,
            uploads: &[],
            can_revise: false,
            model: None,
            generated_at: None,
        }
    }
}
