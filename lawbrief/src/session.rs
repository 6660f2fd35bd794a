//! Per-browser session state.
//!
//! A session is an opaque UUID carried in a cookie that keys an in-memory entry holding the
//! last generated draft. Entries expire after `session.timeout` of inactivity and are lost on
//! restart. Nothing else about the user is kept.
//!
//! A session owns the attachments of its last generation: they are deleted when a newer
//! generation replaces them and when the session is evicted. Eviction happens during the cache's
//! housekeeping, which runs as part of later session reads and writes.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::AppState;
use crate::config::SessionConfig;
use crate::prompt::CaseDetails;
use crate::uploads::{StoredUpload, UploadStore};

/// What a session remembers between requests.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    /// The most recent successfully generated (or revised) draft
    pub last_result: Option<String>,
    /// Case fields the last draft was generated from
    pub case: Option<CaseDetails>,
    /// Attachments submitted with the last generation
    pub uploads: Vec<StoredUpload>,
    /// Model that produced the last draft
    pub model: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionData {
    /// Replace the stored draft. Case details and attachments are only replaced when given.
    ///
    /// Returns the attachments that are no longer referenced by the session.
    #[must_use = "replaced attachments must be discarded"]
    pub fn record_result(
        &mut self,
        text: String,
        model: String,
        case: Option<CaseDetails>,
        uploads: Option<Vec<StoredUpload>>,
    ) -> Vec<StoredUpload> {
        self.last_result = Some(text);
        self.model = Some(model);
        if let Some(case) = case {
            self.case = Some(case);
        }
        self.updated_at = Some(Utc::now());
        match uploads {
            Some(uploads) => std::mem::replace(&mut self.uploads, uploads),
            None => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<Uuid, SessionData>,
    cookie_name: String,
    cookie_secure: bool,
    max_age: Duration,
}

impl SessionStore {
    /// Create the store. Attachments of evicted sessions are removed from `uploads`.
    pub fn new(config: &SessionConfig, uploads: UploadStore) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_sessions)
            .time_to_idle(config.timeout)
            .async_eviction_listener(move |id: Arc<Uuid>, data: SessionData, cause: RemovalCause| {
                let uploads = uploads.clone();
                async move {
                    // Replaced entries hand their attachments to the new value or to the caller
                    if !cause.was_evicted() {
                        return;
                    }
                    debug!(session_id = %id, ?cause, attachments = data.uploads.len(), "Session evicted");
                    uploads.discard(&data.uploads).await;
                }
                .boxed()
            })
            .build();

        Self {
            cache,
            cookie_name: config.cookie_name.clone(),
            cookie_secure: config.cookie_secure,
            max_age: config.timeout,
        }
    }

    pub async fn load(&self, id: &Uuid) -> Option<SessionData> {
        self.cache.get(id).await
    }

    pub async fn save(&self, id: Uuid, data: SessionData) {
        trace!(session_id = %id, "Saving session");
        self.cache.insert(id, data).await;
    }

    /// `Set-Cookie` value that hands `id` to the browser.
    pub fn cookie(&self, id: &Uuid) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            id,
            self.max_age.as_secs()
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Session id from the request's `Cookie` headers. Malformed values are ignored.
    pub fn session_id(&self, headers: &HeaderMap) -> Option<Uuid> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|cookie| cookie.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
    }
}

/// The caller's session. A fresh, empty session is created when the request carries no cookie
/// or names an entry that has expired.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub data: SessionData,
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(id) = state.sessions.session_id(&parts.headers)
            && let Some(data) = state.sessions.load(&id).await
        {
            return Ok(Session { id, data });
        }

        let id = Uuid::new_v4();
        debug!(session_id = %id, "Starting new session");
        Ok(Session {
            id,
            data: SessionData::default(),
        })
    }
}
