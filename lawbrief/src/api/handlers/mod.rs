//! Axum route handlers.
//!
//! - [`brief`]: the case form, generation, revision and the stored result
//! - [`health`]: liveness probe
//! - [`static_assets`]: embedded stylesheet and icons
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Result`]; errors become plain-text responses with a status
//! code from [`crate::errors::Error::status_code`]. Completion failures are the exception: they
//! are rendered into the result page.

pub mod brief;
pub mod health;
pub mod static_assets;
