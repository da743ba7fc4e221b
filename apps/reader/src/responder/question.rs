//! Recognising questions addressed to the bot and pulling out the question text.

use once_cell::sync::Lazy;
use regex::Regex;

/// A quote block followed by the new text.
static QUOTE_THEN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```quote\n(.*?)\n```\n(.*)").expect("valid quote regex"));

/// True when the message quotes the bot (`@_**Bot|123** said:`) or mentions it (`@**Bot**`).
pub fn mentions_bot(content: &str, bot_name: &str) -> bool {
    content.contains(&format!("@_**{bot_name}")) || content.contains(&format!("@**{bot_name}**"))
}

/// The question asked in `content`.
///
/// A quoted block followed by text yields that text. Otherwise everything
/// after the last code fence delimiter, which for a plain mention is the
/// whole message.
pub fn extract_question(content: &str) -> String {
    if let Some(caps) = QUOTE_THEN_TEXT.captures(content) {
        return caps[2].trim().to_string();
    }
    content
        .rsplit("```")
        .next()
        .unwrap_or(content)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "PaperReaderBot";

    #[test]
    fn test_mentions_bot() {
        assert!(mentions_bot("@**PaperReaderBot** what is MoE?", BOT));
        assert!(mentions_bot("@_**PaperReaderBot|17** [said](#narrow):\n```quote\nhi\n```", BOT));
        assert!(!mentions_bot("@**Ada** what is MoE?", BOT));
        assert!(!mentions_bot("PaperReaderBot is great", BOT));
    }

    #[test]
    fn test_quote_followed_by_text() {
        let content = "@_**PaperReaderBot|17** [said](#narrow):\n```quote\n> ### Sparse MoE\nKey points...\n```\nWhat dataset did they use?\n";
        assert_eq!(extract_question(content), "What dataset did they use?");
    }

    #[test]
    fn test_falls_back_to_text_after_last_fence() {
        let content = "```quote\nsummary``` and how big is the model?";
        assert_eq!(extract_question(content), "and how big is the model?");
    }

    #[test]
    fn test_plain_mention_is_whole_message() {
        let content = "@**PaperReaderBot** how does routing work?";
        assert_eq!(extract_question(content), content);
    }
}
