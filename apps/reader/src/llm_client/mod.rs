//! Anthropic Messages API client shared by the summarizer and the question
//! responder. Nothing else in the reader talks to the API directly.
//!
//! Model: claude-sonnet-4-5 at temperature 0, so summaries of the same paper
//! stay comparable between runs.
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-5";
const ATTEMPTS: u32 = 3;
const FIRST_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// Output allowance for one call.
///
/// A summary is a JSON document with several long fields, so it gets the
/// larger allowance; chat answers are kept short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Summary,
    Answer,
}

impl Budget {
    pub fn max_tokens(self) -> u32 {
        match self {
            Budget::Summary => 8192,
            Budget::Answer => 1024,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReply {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Text of a reply with every text block joined in order.
/// `None` when there is no non-blank text.
fn reply_text(reply: &MessagesReply) -> Option<String> {
    let text: String = reply
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

/// Rate limits, overload (529) and other server errors are worth another try.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Pause before retry number `retry` (1-based): doubles from `first`.
fn retry_delay(first: Duration, retry: u32) -> Duration {
    first * 2u32.pow(retry.saturating_sub(1))
}

enum Attempt {
    Text(String),
    Transient(LlmError),
    Fatal(LlmError),
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    endpoint: String,
    first_retry_delay: Duration,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, ANTHROPIC_API_URL, FIRST_RETRY_DELAY)
    }

    pub fn with_endpoint(
        api_key: String,
        endpoint: impl Into<String>,
        first_retry_delay: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            endpoint: endpoint.into(),
            first_retry_delay,
        }
    }

    /// Sends one prompt and returns the joined text of the reply.
    ///
    /// Transport failures and transient statuses are retried up to
    /// three attempts in total; any other error status fails at once with
    /// the API's own message when it sent one.
    pub async fn call_text(
        &self,
        prompt: &str,
        system: &str,
        budget: Budget,
    ) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: MODEL,
            max_tokens: budget.max_tokens(),
            temperature: 0.0,
            system,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut retry = 0;
        loop {
            let error = match self.send_once(&request).await {
                Attempt::Text(text) => return Ok(text),
                Attempt::Fatal(error) => return Err(error),
                Attempt::Transient(error) => error,
            };

            retry += 1;
            if retry >= ATTEMPTS {
                warn!("Giving up on {budget:?} call after {ATTEMPTS} attempts: {error}");
                return Err(error);
            }
            let pause = retry_delay(self.first_retry_delay, retry);
            warn!("{budget:?} call failed ({error}), attempt {} in {pause:?}", retry + 1);
            tokio::time::sleep(pause).await;
        }
    }

    /// Like [`call_text`](Self::call_text), then parses the text as JSON.
    /// The prompt must ask for a JSON-only reply.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
        budget: Budget,
    ) -> Result<T, LlmError> {
        let text = self.call_text(prompt, system, budget).await?;
        parse_json_reply(&text)
    }

    async fn send_once(&self, request: &MessagesRequest<'_>) -> Attempt {
        let response = match self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Transient(LlmError::Http(e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorReply>(&body)
                .map(|reply| reply.error.message)
                .unwrap_or(body);
            let error = LlmError::Api {
                status: status.as_u16(),
                message,
            };
            return if is_transient(status) {
                Attempt::Transient(error)
            } else {
                Attempt::Fatal(error)
            };
        }

        let reply: MessagesReply = match response.json().await {
            Ok(reply) => reply,
            Err(e) => return Attempt::Fatal(LlmError::Http(e)),
        };
        debug!(
            "LLM tokens in={} out={}",
            reply.usage.input_tokens, reply.usage.output_tokens
        );
        if reply.stop_reason.as_deref() == Some("max_tokens") {
            warn!(
                "LLM reply hit the {} token limit and may be cut short",
                request.max_tokens
            );
        }

        match reply_text(&reply) {
            Some(text) => Attempt::Text(text),
            None => Attempt::Fatal(LlmError::EmptyContent),
        }
    }
}

/// Parses a JSON reply, tolerating markdown code fences around it.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    serde_json::from_str(strip_json_fences(text)).map_err(LlmError::Parse)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(stripped) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
    else {
        return text;
    };
    let stripped = stripped.trim_start();
    stripped
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(stripped)
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
