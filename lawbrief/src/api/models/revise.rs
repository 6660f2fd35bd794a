use serde::Deserialize;

/// Body of `POST /revise`. A missing field deserializes as empty and is rejected by the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviseForm {
    #[serde(default)]
    pub feedback: String,
}
