//! HTTP layer: the form pages and their supporting endpoints.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Form payloads and the contexts the page templates are rendered with
//!
//! # Routes
//!
//! - `GET /`: case form
//! - `POST /generate`: multipart form submission, renders the generated brief
//! - `POST /revise`: feedback on the last brief, renders the revised brief
//! - `GET /result`: the last brief of this session
//! - `GET /healthz`: liveness
//! - `GET /static/{*path}`: stylesheet and icons

pub mod handlers;
pub mod models;
