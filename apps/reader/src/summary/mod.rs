//! Structured paper summaries.
//!
//! The LLM is asked for a JSON object; the reply is deserialized into a
//! permissive `RawSummary` and then validated into a `PaperSummary`. A reply
//! that is not JSON, or that lacks a required field, is a `SummaryError` and
//! sends the paper down the `failed` path.

pub mod prompts;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::artifact::{pdf, ArtifactError};
use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_INSTRUCTION};
use crate::llm_client::{truncate_chars, Budget, LlmClient, LlmError};
use crate::summary::prompts::{SUMMARY_PROMPT, SUMMARY_SYSTEM};

pub const SHORT_TITLE_MAX_CHARS: usize = 40;
/// Zulip rejects topics longer than this.
pub const CHAT_TOPIC_MAX_CHARS: usize = 60;
/// Paper text beyond this is dropped before prompting.
const MAX_PAPER_CHARS: usize = 150_000;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("Could not read paper: {0}")]
    Unreadable(#[from] ArtifactError),

    #[error("Paper has no extractable text")]
    EmptyText,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Summary is missing required field '{0}'")]
    MissingField(&'static str),
}

/// A validated summary. Serialized as JSON into the paper's `summary` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub title: String,
    pub short_title: String,
    pub topic: String,
    pub key_points: Vec<String>,
    pub analysis: String,
    pub conclusion: String,
}

/// The LLM reply as received; every field may be missing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSummary {
    pub title: Option<String>,
    pub short_title: Option<String>,
    pub topic: Option<String>,
    pub key_points: Option<Vec<String>>,
    pub analysis: Option<String>,
    pub conclusion: Option<String>,
}

impl PaperSummary {
    /// Validates a raw reply. `fallback_title` is used when the model omits the title.
    pub fn from_raw(raw: RawSummary, fallback_title: &str) -> Result<Self, SummaryError> {
        let short_title = required(raw.short_title, "short_title")?;
        let key_points: Vec<String> = raw
            .key_points
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if key_points.is_empty() {
            return Err(SummaryError::MissingField("key_points"));
        }

        Ok(Self {
            title: non_empty(raw.title).unwrap_or_else(|| fallback_title.trim().to_string()),
            short_title: truncate_chars(&short_title, SHORT_TITLE_MAX_CHARS)
                .trim_end()
                .to_string(),
            topic: required(raw.topic, "topic")?,
            key_points,
            analysis: required(raw.analysis, "analysis")?,
            conclusion: required(raw.conclusion, "conclusion")?,
        })
    }

    /// Renders the summary as the chat message body.
    pub fn to_markdown(&self, link: &str, pdf_link: &str) -> String {
        let mut md = format!("> ### {}\n", self.title);
        if link.is_empty() {
            md.push_str(&format!("> [pdf]({pdf_link})\n\n"));
        } else {
            md.push_str(&format!("> [huggingface]({link}), [pdf]({pdf_link})\n\n"));
        }
        md.push_str(&format!(">#### Topic: {}\n\n", self.topic));
        md.push_str(">#### Key points:\n");
        for point in &self.key_points {
            md.push_str(&format!("> - {point}\n"));
        }
        md.push('\n');
        md.push_str(&quote(&self.analysis));
        md.push_str(&quote(&self.conclusion));
        md
    }
}

/// Chat topic for a paper: batch date plus short title, within Zulip's limit.
pub fn chat_topic(date: &str, short_title: &str) -> String {
    let topic = format!("{} {}", date.trim(), short_title.trim());
    truncate_chars(topic.trim(), CHAT_TOPIC_MAX_CHARS)
        .trim_end()
        .to_string()
}

fn quote(paragraph: &str) -> String {
    let mut out = String::new();
    for line in paragraph.trim().lines() {
        out.push_str("> ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, SummaryError> {
    non_empty(value).ok_or(SummaryError::MissingField(field))
}

/// Turns a downloaded paper into a structured summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, pdf_path: &Path, title: &str) -> Result<PaperSummary, SummaryError>;
}

/// Summarizer backed by the Claude API.
pub struct LlmSummarizer {
    llm: LlmClient,
}

impl LlmSummarizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, pdf_path: &Path, title: &str) -> Result<PaperSummary, SummaryError> {
        let text = pdf::extract_text(pdf_path).await?;
        if text.trim().is_empty() {
            return Err(SummaryError::EmptyText);
        }
        debug!("Extracted {} chars from {}", text.len(), pdf_path.display());

        let system = format!(
            "{} {} {}",
            SUMMARY_SYSTEM.replace("{title}", title),
            GROUNDING_INSTRUCTION,
            JSON_ONLY_INSTRUCTION
        );
        let prompt = SUMMARY_PROMPT.replace("{text}", truncate_chars(&text, MAX_PAPER_CHARS));

        let raw: RawSummary = self.llm.call_json(&prompt, &system, Budget::Summary).await?;
        PaperSummary::from_raw(raw, title)
    }
}
