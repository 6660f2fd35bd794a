use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid form data or a missing prerequisite in the session
    #[error("{message}")]
    BadRequest { message: String },

    /// Attachment or request body over the configured limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// No API key is configured for the completion provider
    #[error("Completion API key is not configured")]
    MissingApiKey,

    /// Revision requested but the session holds no earlier draft
    #[error("No previous draft in this session")]
    NoPreviousResult,

    /// Page or prompt template failed to render
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Filesystem error while storing attachments
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } | Error::NoPreviousResult => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::MissingApiKey | Error::Template(_) | Error::Io(_) | Error::Internal { .. } | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::MissingApiKey => "The completion API key (ANTHROPIC_API_KEY) is not configured".to_string(),
            Error::NoPreviousResult => "There is no previous draft to revise. Generate a brief first.".to_string(),
            Error::Template(_) | Error::Io(_) | Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Template(_) | Error::Io(_) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::MissingApiKey => {
                tracing::error!("Generation requested without a configured API key");
            }
            Error::BadRequest { .. } | Error::PayloadTooLarge { .. } | Error::NoPreviousResult => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

impl From<MultipartError> for Error {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge { message: e.body_text() }
        } else {
            Error::BadRequest {
                message: format!("Failed to parse multipart data: {}", e.body_text()),
            }
        }
    }
}

impl From<MultipartRejection> for Error {
    fn from(rejection: MultipartRejection) -> Self {
        Error::BadRequest {
            message: format!("Expected a multipart form: {}", rejection.body_text()),
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
