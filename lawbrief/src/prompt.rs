//! Case details and the prompts built from them.

use minijinja::context;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::templates::{BRIEF_PROMPT, REVISION_PROMPT, Templates};
use crate::uploads::StoredUpload;

/// The case fields collected by the form. Values are stored trimmed; empty values render as `-`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDetails {
    pub case_no: String,
    pub branch: String,
    pub court: String,
    pub claimant: String,
    pub defendant: String,
    pub lawyer: String,
    pub facts: String,
    pub evidence: String,
    pub legal: String,
    pub request_text: String,
}

impl CaseDetails {
    /// Store a form field by name. Returns `false` for names that are not case fields.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let slot = match name {
            "case_no" => &mut self.case_no,
            "branch" => &mut self.branch,
            "court" => &mut self.court,
            "claimant" => &mut self.claimant,
            "defendant" => &mut self.defendant,
            "lawyer" => &mut self.lawyer,
            "facts" => &mut self.facts,
            "evidence" => &mut self.evidence,
            "legal" => &mut self.legal,
            "request_text" => &mut self.request_text,
            _ => return false,
        };
        *slot = value.trim().to_string();
        true
    }
}

/// Prompt asking for a new brief from the case details.
pub fn brief_prompt(templates: &Templates, case: &CaseDetails, uploads: &[StoredUpload]) -> Result<String> {
    let prompt = templates.render(BRIEF_PROMPT, context! { case, attachments => uploads })?;
    Ok(prompt.trim().to_string())
}

/// Prompt asking for a full rewrite of `previous` that applies `feedback`.
pub fn revision_prompt(templates: &Templates, previous: &str, feedback: &str, case: Option<&CaseDetails>) -> Result<String> {
    let prompt = templates.render(
        REVISION_PROMPT,
        context! { previous => previous.trim(), feedback => feedback.trim(), case },
    )?;
    Ok(prompt.trim().to_string())
}
