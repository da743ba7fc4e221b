//! Zulip REST client: stream messages out, event-queue long polling in.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelError, InboundMessage, Notifier};
use crate::config::ZulipCredentials;

/// Zulip holds a poll open for up to ~90s before sending a heartbeat.
const POLL_TIMEOUT: Duration = Duration::from_secs(120);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Envelope {
    result: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct EventQueue {
    queue_id: String,
    last_event_id: i64,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<ZulipMessage>,
}

#[derive(Debug, Deserialize)]
struct ZulipMessage {
    id: u64,
    timestamp: i64,
    sender_email: String,
    #[serde(default)]
    sender_full_name: String,
    #[serde(rename = "type")]
    kind: String,
    /// Stream name for stream messages, a recipient list for private ones.
    display_recipient: Value,
    #[serde(default)]
    subject: String,
    content: String,
}

impl ZulipMessage {
    fn into_inbound(self, bot_email: &str) -> Option<InboundMessage> {
        if self.kind != "stream" {
            return None;
        }
        let stream = self.display_recipient.as_str()?.to_string();
        Some(InboundMessage {
            id: self.id,
            timestamp: self.timestamp,
            is_self: self.sender_email.eq_ignore_ascii_case(bot_email),
            sender_email: self.sender_email,
            sender_full_name: self.sender_full_name,
            stream,
            topic: self.subject,
            content: self.content,
        })
    }
}

pub struct ZulipClient {
    client: Client,
    poll_client: Client,
    credentials: ZulipCredentials,
    stream: String,
}

impl ZulipClient {
    pub fn new(credentials: ZulipCredentials, stream: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            poll_client: Client::builder()
                .timeout(POLL_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            credentials,
            stream: stream.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.credentials.email
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.credentials.site.trim_end_matches('/'))
    }

    /// Sends a stream message and returns its id.
    pub async fn send(&self, topic: &str, content: &str) -> Result<u64, ChannelError> {
        let response = self
            .client
            .post(self.url("messages"))
            .basic_auth(&self.credentials.email, Some(&self.credentials.api_key))
            .form(&[
                ("type", "stream"),
                ("to", self.stream.as_str()),
                ("topic", topic),
                ("content", content),
            ])
            .send()
            .await?;
        let sent: SendResponse = read_response(response).await?;
        Ok(sent.id)
    }

    async fn register(&self) -> Result<EventQueue, ChannelError> {
        let response = self
            .client
            .post(self.url("register"))
            .basic_auth(&self.credentials.email, Some(&self.credentials.api_key))
            .form(&[("event_types", r#"["message"]"#), ("apply_markdown", "false")])
            .send()
            .await?;
        read_response(response).await
    }

    async fn get_events(&self, queue: &EventQueue) -> Result<Vec<Event>, ChannelError> {
        let last_event_id = queue.last_event_id.to_string();
        let response = self
            .poll_client
            .get(self.url("events"))
            .basic_auth(&self.credentials.email, Some(&self.credentials.api_key))
            .query(&[
                ("queue_id", queue.queue_id.as_str()),
                ("last_event_id", last_event_id.as_str()),
            ])
            .send()
            .await?;
        let events: EventsResponse = read_response(response).await?;
        Ok(events.events)
    }

    /// Long-polls the event queue forever, handing every stream message to
    /// `handler` in order. Private messages are dropped. Transport errors are
    /// logged and retried; an expired queue is re-registered.
    pub async fn call_on_each_message<F, Fut>(&self, mut handler: F)
    where
        F: FnMut(InboundMessage) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut queue: Option<EventQueue> = None;
        loop {
            let current = match queue.take() {
                Some(q) => q,
                None => match self.register().await {
                    Ok(q) => {
                        info!("Registered Zulip event queue {}", q.queue_id);
                        q
                    }
                    Err(e) => {
                        error!("Zulip register failed: {e}");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                },
            };

            match self.get_events(&current).await {
                Ok(events) => {
                    let mut last_event_id = current.last_event_id;
                    for event in events {
                        last_event_id = last_event_id.max(event.id);
                        if event.kind != "message" {
                            continue;
                        }
                        match event.message.and_then(|m| m.into_inbound(self.email())) {
                            Some(message) => handler(message).await,
                            None => debug!("Ignoring non-stream message event {}", event.id),
                        }
                    }
                    queue = Some(EventQueue {
                        last_event_id,
                        ..current
                    });
                }
                Err(ChannelError::QueueExpired) => {
                    warn!("Zulip event queue {} expired, re-registering", current.queue_id);
                }
                Err(e) => {
                    warn!("Zulip event poll failed: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    queue = Some(current);
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for ZulipClient {
    async fn post(&self, topic: &str, content: &str) -> Option<u64> {
        match self.send(topic, content).await {
            Ok(id) => {
                info!("Posted message {id} to {}/{topic}", self.stream);
                Some(id)
            }
            Err(e) => {
                error!("Failed to post to {}/{topic}: {e}", self.stream);
                None
            }
        }
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, ChannelError> {
    let status = response.status();
    let body = response.text().await?;

    let envelope: Envelope = match serde_json::from_str(&body) {
        Ok(e) => e,
        Err(_) if !status.is_success() => {
            return Err(ChannelError::Api {
                status: status.as_u16(),
                message: body,
            })
        }
        Err(e) => return Err(ChannelError::Parse(e)),
    };

    if envelope.result != "success" {
        if envelope.code.as_deref() == Some("BAD_EVENT_QUEUE_ID") {
            return Err(ChannelError::QueueExpired);
        }
        return Err(ChannelError::Api {
            status: status.as_u16(),
            message: envelope.msg,
        });
    }

    Ok(serde_json::from_str(&body)?)
}
