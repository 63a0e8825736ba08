//! Structured summaries of legal documents.
//!
//! The model is asked for a single JSON object matching [`LegalDocSummary`].
//! Summaries never fail for model reasons: a provider error or an unparsable
//! reply is logged and turned into [`LegalDocSummary::fallback`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::LanguageModel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalDocSummary {
    /// Document type, e.g. summons, contract, agreement, notice.
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub important_timeline: Vec<String>,
    #[serde(default)]
    pub main_takeaway: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// 0..=100.
    pub urgency_percentage: u8,
    /// High, Medium or Low.
    pub urgency_level: String,
}

impl LegalDocSummary {
    /// Summary returned when the model could not produce one.
    pub fn fallback(error: impl std::fmt::Display) -> Self {
        Self {
            category: "Error".to_string(),
            description: "Could not generate a summary due to an error.".to_string(),
            important_timeline: Vec::new(),
            main_takeaway: vec![format!("An error occurred: {}", error)],
            risk_factors: Vec::new(),
            next_steps: Vec::new(),
            urgency_percentage: 0,
            urgency_level: "Low".to_string(),
        }
    }
}

const SUMMARY_SCHEMA: &str = r#"{
  "category": "string: category/type of the legal document (e.g. summons, contract, agreement, notice)",
  "description": "string: 2-line description/overview of the document",
  "important_timeline": ["string: key dates, deadlines or timeline events mentioned in the document"],
  "main_takeaway": ["string: primary conclusions or essence of the document"],
  "risk_factors": ["string: possible risks, consequences or liabilities arising from the document"],
  "next_steps": ["string: recommended actions to mitigate the risks or comply with the document"],
  "urgency_percentage": "integer between 0 and 100",
  "urgency_level": "string: High, Medium or Low"
}"#;

pub fn summary_prompt(document: &str, language: &str) -> String {
    format!(
        "You are an expert legal assistant. Summarize the following legal document in a structured format.\n\n\
         Summarize the following document in {language}. The document content is: \n\n{document}\n\n\
         Respond with a single JSON object and nothing else, following this schema:\n{SUMMARY_SCHEMA}"
    )
}

pub fn last_date_prompt(document: &str) -> String {
    format!(
        "You are an expert legal assistant. Extract the final deadline or last date for action \
         mentioned in the document. The date should be in YYYY-MM-DD format.\n\n\
         Document content: \n\n{document}\n\n\
         Respond with a single JSON object and nothing else: \
         {{\"last_date\": \"YYYY-MM-DD\"}}, or {{\"last_date\": null}} if no such date is present."
    )
}

/// Summarize `document` in `language`.
pub async fn summarize_document(
    llm: &dyn LanguageModel,
    document: &str,
    language: &str,
) -> LegalDocSummary {
    let reply = match llm.complete(&summary_prompt(document, language)).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "summary generation failed");
            return LegalDocSummary::fallback(e);
        }
    };

    match parse_summary(&reply) {
        Ok(summary) => {
            debug!(category = %summary.category, urgency = summary.urgency_percentage, "parsed summary");
            summary
        }
        Err(e) => {
            warn!(error = %e, "summary reply was not valid JSON");
            LegalDocSummary::fallback(e)
        }
    }
}

/// Parse a model reply into a summary, accepting fenced JSON.
pub fn parse_summary(reply: &str) -> Result<LegalDocSummary, String> {
    let summary: LegalDocSummary =
        serde_json::from_str(strip_code_fence(reply)).map_err(|e| e.to_string())?;
    if summary.urgency_percentage > 100 {
        return Err(format!(
            "urgency_percentage {} out of range 0..=100",
            summary.urgency_percentage
        ));
    }
    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct LastDateReply {
    last_date: Option<String>,
}

/// Ask the model for the document's final action date.
///
/// Returns `None` when there is no such date or anything goes wrong.
pub async fn extract_last_date(llm: &dyn LanguageModel, document: &str) -> Option<NaiveDate> {
    let reply = match llm.complete(&last_date_prompt(document)).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "last date extraction failed");
            return None;
        }
    };
    parse_last_date(&reply)
}

fn parse_last_date(reply: &str) -> Option<NaiveDate> {
    let parsed: LastDateReply = match serde_json::from_str(strip_code_fence(reply)) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "last date reply was not valid JSON");
            return None;
        }
    };
    let raw = parsed.last_date?;
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(value = %raw, error = %e, "last date is not YYYY-MM-DD");
            None
        }
    }
}

/// Strip a surrounding Markdown code fence (```json ... ```), if any.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
