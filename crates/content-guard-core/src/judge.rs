//! External judge contract.
//!
//! A judge is a language-model-backed service asked for a second opinion on
//! a borderline pair: owner text vs candidate text. This module owns
//! everything about the exchange except transport:
//!
//! - the system prompt, user prompt template and schema hint
//! - the [`Judge`] trait implemented by HTTP clients and test fakes
//! - tolerant parsing: the first balanced `{...}` span of the reply is
//!   extracted before deserialising, so prose around the JSON is ignored
//!
//! Any failure here is a recoverable [`DetectionError::ExternalService`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

pub const MATCH_DECISION_SYSTEM: &str = "You are a senior IP protection analyst.
Decide if CANDIDATE content infringes OWNER content.
Consider exact copies, paraphrases, excerpts, and partial matches.
Be conservative on confidence unless evidence is clear.
If insufficient info, say so.
Output MUST be compact JSON only, no extra text.";

pub const MATCH_DECISION_SCHEMA: &str = r#"{
  "decision": "no | maybe | yes",
  "similarity_score": 0.0,
  "rationale": "string",
  "overlap_phrases": ["string", "string"]
}"#;

/// Inputs for one judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub owner: String,
    pub candidate: String,
    pub platform: String,
    pub url: String,
}

impl JudgeRequest {
    /// Task prompt followed by the JSON-only instruction and schema hint.
    pub fn user_prompt(&self) -> String {
        format!(
            "OWNER_CONTENT:\n{owner}\n\n\
             CANDIDATE_CONTENT (platform: {platform}, url: {url}):\n{candidate}\n\n\
             Task:\n\
             1) Decide if this is likely infringement.\n\
             2) Explain short rationale.\n\
             3) Provide a 0-1 similarity_score (float).\n\
             4) Provide decision: \"no\", \"maybe\", or \"yes\".\n\
             5) Extract up to 8 key phrases from candidate that overlap with owner.\n\n\
             Important: prefer meaning over exact wording; partial matches count.\n\n\
             Return JSON ONLY.\n\n\
             Return ONLY valid JSON matching this schema:\n{schema}",
            owner = self.owner,
            platform = self.platform,
            url = self.url,
            candidate = self.candidate,
            schema = MATCH_DECISION_SCHEMA,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    No,
    Maybe,
    Yes,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::No => "no",
            Decision::Maybe => "maybe",
            Decision::Yes => "yes",
        }
    }
}

/// Structured opinion returned by the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub decision: Decision,
    pub similarity_score: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub overlap_phrases: Vec<String>,
}

/// Transport for judge calls. Returns the assistant's raw text.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Identifier recorded in logs, e.g. the model name.
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, DetectionError>;
}

/// Ask `judge` about `request` once and parse the reply.
pub async fn ask(judge: &dyn Judge, request: &JudgeRequest) -> Result<JudgeVerdict, DetectionError> {
    let raw = judge
        .complete(MATCH_DECISION_SYSTEM, &request.user_prompt())
        .await?;
    parse_verdict(&raw)
}

/// Parse a judge reply, tolerating prose around the JSON object.
pub fn parse_verdict(raw: &str) -> Result<JudgeVerdict, DetectionError> {
    let span = extract_json_object(raw)
        .ok_or_else(|| DetectionError::external("judge reply contains no JSON object", false))?;
    let verdict: JudgeVerdict = serde_json::from_str(span).map_err(|e| {
        DetectionError::external(format!("judge reply is not a valid verdict: {}", e), false)
    })?;
    if !(0.0..=1.0).contains(&verdict.similarity_score) {
        return Err(DetectionError::external(
            format!(
                "judge similarity_score {} outside [0, 1]",
                verdict.similarity_score
            ),
            false,
        ));
    }
    Ok(verdict)
}

/// The first balanced `{...}` span in `raw`.
///
/// Braces inside JSON string literals (including escaped quotes) do not
/// count towards the balance. Returns `None` if no object closes.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
