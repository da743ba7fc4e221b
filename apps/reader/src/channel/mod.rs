// Notification channel: posting summaries and replies to a chat stream, and
// the inbound message shape the responder consumes.

pub mod zulip;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub use zulip::ZulipClient;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Event queue expired")]
    QueueExpired,

    #[error("Malformed chat API response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A stream message delivered to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: u64,
    /// Unix seconds.
    pub timestamp: i64,
    pub sender_email: String,
    pub sender_full_name: String,
    pub stream: String,
    pub topic: String,
    pub content: String,
    /// Sent by the bot's own account.
    pub is_self: bool,
}

/// Outbound side of the chat channel.
///
/// `post` never fails loudly: delivery problems are logged and reported
/// as `None`.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `false` when no channel is configured and posts are dropped.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Posts `content` under `topic`, returning the message id on delivery.
    async fn post(&self, topic: &str, content: &str) -> Option<u64>;
}

/// Stand-in used with `--no-zulip` or when credentials are missing.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn post(&self, topic: &str, _content: &str) -> Option<u64> {
        warn!("Chat channel disabled, not posting to '{topic}'");
        None
    }
}
