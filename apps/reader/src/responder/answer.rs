use async_trait::async_trait;

use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::{Budget, LlmClient, LlmError};
use crate::summary::prompts::{ANSWER_PROMPT, ANSWER_SYSTEM};

/// Answers a question about a paper from retrieved context.
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn answer(&self, context: &str, question: &str, title: &str) -> Result<String, LlmError>;
}

pub struct LlmAnswerer {
    llm: LlmClient,
}

impl LlmAnswerer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QuestionAnswerer for LlmAnswerer {
    async fn answer(&self, context: &str, question: &str, title: &str) -> Result<String, LlmError> {
        let system = format!("{} {}", ANSWER_SYSTEM.replace("{title}", title), GROUNDING_INSTRUCTION);
        let prompt = build_prompt(context, question);
        let answer = self.llm.call_text(&prompt, &system, Budget::Answer).await?;
        Ok(answer.trim().to_string())
    }
}

fn build_prompt(context: &str, question: &str) -> String {
    ANSWER_PROMPT
        .replace("{context}", context)
        .replace("{question}", question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_fills_placeholders() {
        let prompt = build_prompt("chunk one\n\nchunk two", "Which dataset?");
        assert_eq!(prompt, "Context:\nchunk one\n\nchunk two\n\nQuestion: Which dataset?");
    }
}
