// Question-answering responder: reacts to stream messages addressed to the
// bot, resolves the paper from the message topic, and replies in that topic.

pub mod answer;
pub mod context;
pub mod embeddings;
pub mod question;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channel::{InboundMessage, Notifier};
use crate::responder::answer::QuestionAnswerer;
use crate::responder::context::ContextProvider;
use crate::responder::question::{extract_question, mentions_bot};
use crate::store::PaperStore;

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// At or before the watermark.
    Stale,
    OwnMessage,
    OtherStream,
    NotAddressed,
    UnknownTopic,
    LookupFailed,
    NoContext,
    AnswerFailed,
    ReplyFailed,
    Answered,
}

pub struct Responder {
    store: PaperStore,
    contexts: Arc<dyn ContextProvider>,
    answerer: Arc<dyn QuestionAnswerer>,
    notifier: Arc<dyn Notifier>,
    stream: String,
    bot_name: String,
    /// Timestamp (unix seconds) of the newest message seen so far.
    watermark: AtomicI64,
}

impl Responder {
    /// `started_at` seeds the watermark so history replayed on connect is ignored.
    pub fn new(
        store: PaperStore,
        contexts: Arc<dyn ContextProvider>,
        answerer: Arc<dyn QuestionAnswerer>,
        notifier: Arc<dyn Notifier>,
        stream: impl Into<String>,
        bot_name: impl Into<String>,
        started_at: i64,
    ) -> Self {
        Self {
            store,
            contexts,
            answerer,
            notifier,
            stream: stream.into(),
            bot_name: bot_name.into(),
            watermark: AtomicI64::new(started_at),
        }
    }

    pub fn watermark(&self) -> i64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Handles one message. Never fails: every problem is logged and
    /// reported through the returned `Disposition`.
    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        let previous = self.watermark.fetch_max(message.timestamp, Ordering::SeqCst);
        if message.timestamp <= previous {
            return Disposition::Stale;
        }
        if message.is_self {
            return Disposition::OwnMessage;
        }
        if message.stream != self.stream {
            return Disposition::OtherStream;
        }
        if !mentions_bot(&message.content, &self.bot_name) {
            info!("Message {} in '{}' is not for the bot", message.id, message.topic);
            return Disposition::NotAddressed;
        }

        let question = extract_question(&message.content);
        debug!("Question in '{}': {question}", message.topic);

        let paper = match self.store.get_by_topic(&message.topic).await {
            Ok(Some(paper)) => paper,
            Ok(None) => {
                warn!("No paper found for topic '{}'", message.topic);
                return Disposition::UnknownTopic;
            }
            Err(e) => {
                error!("Paper lookup for topic '{}' failed: {e}", message.topic);
                return Disposition::LookupFailed;
            }
        };

        let context = match self.contexts.context_for(&paper, &question).await {
            Ok(context) => context,
            Err(e) => {
                warn!("No retrieval context for paper {} ('{}'): {e}", paper.id, paper.title);
                return Disposition::NoContext;
            }
        };

        let answer = match self.answerer.answer(&context, &question, &paper.title).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Answering question on paper {} failed: {e}", paper.id);
                return Disposition::AnswerFailed;
            }
        };

        let reply = format_reply(&message.sender_full_name, &question, &answer);
        match self.notifier.post(&message.topic, &reply).await {
            Some(_) => {
                info!("Replied to {} in '{}'", message.sender_full_name, message.topic);
                Disposition::Answered
            }
            None => {
                error!("Reply in '{}' was not delivered", message.topic);
                Disposition::ReplyFailed
            }
        }
    }
}

/// Tags the asker, quotes the question, then the answer.
pub fn format_reply(sender: &str, question: &str, answer: &str) -> String {
    format!("@_**{sender}** asked:\n```quote\n{question}\n```\n\n{answer}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm_client::LlmError;
    use crate::models::paper::{NewPaper, PaperRow, PaperStatus};
    use crate::responder::context::ContextError;

    const STREAM: &str = "Paper_Reader";
    const BOT: &str = "PaperReaderBot";
    const TOPIC: &str = "2024-07-30 Sparse MoE";

    struct FixedContext(Option<&'static str>);

    #[async_trait]
    impl ContextProvider for FixedContext {
        async fn context_for(&self, paper: &PaperRow, _question: &str) -> Result<String, ContextError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ContextError::MissingArtifact(paper.id.clone()))
        }
    }

    #[derive(Default)]
    struct EchoAnswerer {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl QuestionAnswerer for EchoAnswerer {
        async fn answer(&self, context: &str, question: &str, title: &str) -> Result<String, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((context.to_string(), question.to_string(), title.to_string()));
            Ok(format!("Answer about {title}"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        posts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn post(&self, topic: &str, content: &str) -> Option<u64> {
            let mut posts = self.posts.lock().unwrap();
            posts.push((topic.to_string(), content.to_string()));
            Some(posts.len() as u64)
        }
    }

    struct Harness {
        responder: Responder,
        answerer: Arc<EchoAnswerer>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness(context: Option<&'static str>) -> Harness {
        let pool = crate::db::create_pool("sqlite::memory:").await.unwrap();
        let store = PaperStore::new(pool);
        store
            .upsert(&NewPaper {
                title: "Sparse Mixture of Experts".to_string(),
                chat_topic: TOPIC.to_string(),
                status: PaperStatus::Completed,
                ..NewPaper::new("2401.00001")
            })
            .await
            .unwrap();

        let answerer = Arc::new(EchoAnswerer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let responder = Responder::new(
            store,
            Arc::new(FixedContext(context)),
            answerer.clone(),
            notifier.clone(),
            STREAM,
            BOT,
            100,
        );
        Harness {
            responder,
            answerer,
            notifier,
        }
    }

    fn message(timestamp: i64, content: &str) -> InboundMessage {
        InboundMessage {
            id: timestamp as u64,
            timestamp,
            sender_email: "ada@example.com".to_string(),
            sender_full_name: "Ada Lovelace".to_string(),
            stream: STREAM.to_string(),
            topic: TOPIC.to_string(),
            content: content.to_string(),
            is_self: false,
        }
    }

    #[tokio::test]
    async fn test_answers_quoted_question_in_topic() {
        let h = harness(Some("routing details")).await;
        let content = "@_**PaperReaderBot|5** [said](#narrow):\n```quote\n> ### Sparse MoE\n```\nHow does routing work?";

        assert_eq!(h.responder.handle(&message(101, content)).await, Disposition::Answered);

        let calls = h.answerer.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "routing details".to_string(),
                "How does routing work?".to_string(),
                "Sparse Mixture of Experts".to_string()
            )
        );
        let posts = h.notifier.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, TOPIC);
        assert_eq!(
            posts[0].1,
            "@_**Ada Lovelace** asked:\n```quote\nHow does routing work?\n```\n\nAnswer about Sparse Mixture of Experts"
        );
    }

    #[tokio::test]
    async fn test_watermark_drops_old_and_replayed_messages() {
        let h = harness(Some("ctx")).await;
        let ask = "@**PaperReaderBot** why?";

        assert_eq!(h.responder.handle(&message(100, ask)).await, Disposition::Stale);
        assert_eq!(h.responder.handle(&message(105, "chatter")).await, Disposition::NotAddressed);
        assert_eq!(h.responder.watermark(), 105);
        // Ignored messages still advance the watermark.
        assert_eq!(h.responder.handle(&message(104, ask)).await, Disposition::Stale);
        assert_eq!(h.responder.handle(&message(105, ask)).await, Disposition::Stale);
        assert_eq!(h.responder.handle(&message(106, ask)).await, Disposition::Answered);
        assert_eq!(h.responder.watermark(), 106);
        assert_eq!(h.notifier.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_filters_own_and_foreign_stream_messages() {
        let h = harness(Some("ctx")).await;
        let ask = "@**PaperReaderBot** why?";

        let own = InboundMessage {
            is_self: true,
            ..message(101, ask)
        };
        assert_eq!(h.responder.handle(&own).await, Disposition::OwnMessage);

        let elsewhere = InboundMessage {
            stream: "general".to_string(),
            ..message(102, ask)
        };
        assert_eq!(h.responder.handle(&elsewhere).await, Disposition::OtherStream);
        assert!(h.notifier.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_topic_and_missing_context_do_not_reply() {
        let h = harness(None).await;
        let ask = "@**PaperReaderBot** why?";

        let unknown = InboundMessage {
            topic: "2024-07-30 Something else".to_string(),
            ..message(101, ask)
        };
        assert_eq!(h.responder.handle(&unknown).await, Disposition::UnknownTopic);
        assert_eq!(h.responder.handle(&message(102, ask)).await, Disposition::NoContext);

        assert!(h.answerer.calls.lock().unwrap().is_empty());
        assert!(h.notifier.posts.lock().unwrap().is_empty());
    }
}
