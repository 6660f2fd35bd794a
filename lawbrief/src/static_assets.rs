//! Embedded static assets (stylesheet and icons) served under `/static/`.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;
