//! Contract with the chat platform plus two small adapters: one that only
//! logs outbound traffic and one that keeps it in memory.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// Chat identity as handed over by the transport. Sessions keep a copy of
/// it, never a handle into the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: ChatId,
    pub kind: ChatKind,
    /// Public handle, present for public groups only.
    #[serde(default)]
    pub username: Option<String>,
}

impl ChatRef {
    pub fn is_supergroup(&self) -> bool {
        self.kind == ChatKind::Supergroup
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl UserRef {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }

    /// Markdown mention that links to the user.
    pub fn mention(&self) -> String {
        let name = self.full_name().replace(['[', ']'], "");
        format!("[{}](tg://user?id={})", name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("rate limited by the chat platform (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("request to the chat platform timed out")]
    TimedOut,
    #[error("delivery failed: {0}")]
    Other(String),
}

impl DeliveryError {
    /// Rate-limit and timeout failures are expected under load and only
    /// counted; anything else is worth a loud log line.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::RateLimited { .. } | DeliveryError::TimedOut
        )
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            DeliveryError::RateLimited { .. } => "rate_limited",
            DeliveryError::TimedOut => "timed_out",
            DeliveryError::Other(_) => "other",
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends a markdown message, optionally with an inline keyboard and as a
    /// reply to another message.
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, DeliveryError>;

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError>;

    /// Acknowledges a button tap, optionally with an alert shown to the tapper.
    async fn answer_tap(&self, tap_id: &str, alert: Option<&str>) -> Result<(), DeliveryError>;
}

/// Transport used when no webhook is configured: every outbound call is
/// logged and succeeds.
#[derive(Debug, Default)]
pub struct LogTransport {
    next_id: AtomicI64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatTransport for LogTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, DeliveryError> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            chat_id = chat,
            message_id,
            reply_to = ?reply_to,
            keyboard_rows = keyboard.map(|k| k.len()).unwrap_or(0),
            text,
            "send message"
        );
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError> {
        info!(
            chat_id = chat,
            message_id = message,
            keyboard_rows = keyboard.len(),
            text,
            "edit message"
        );
        Ok(())
    }

    async fn answer_tap(&self, tap_id: &str, alert: Option<&str>) -> Result<(), DeliveryError> {
        info!(tap_id, alert = ?alert, "answer tap");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedMessage {
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub keyboard: Keyboard,
}

#[derive(Default)]
struct MemoryLog {
    sent: Vec<SentMessage>,
    edits: Vec<EditedMessage>,
    answers: Vec<(String, Option<String>)>,
    send_failures: VecDeque<DeliveryError>,
    edit_failures: VecDeque<DeliveryError>,
}

/// In-memory transport for wiring and tests. Records every outbound call and
/// can be primed to fail the next sends or edits.
#[derive(Default)]
pub struct MemoryTransport {
    next_id: AtomicI64,
    log: Mutex<MemoryLog>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_send(&self, err: DeliveryError) {
        self.log.lock().send_failures.push_back(err);
    }

    pub fn fail_next_edit(&self, err: DeliveryError) {
        self.log.lock().edit_failures.push_back(err);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.log.lock().sent.clone()
    }

    pub fn edits(&self) -> Vec<EditedMessage> {
        self.log.lock().edits.clone()
    }

    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.log.lock().answers.clone()
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, DeliveryError> {
        let mut log = self.log.lock();
        if let Some(err) = log.send_failures.pop_front() {
            return Err(err);
        }
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        log.sent.push(SentMessage {
            chat,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
            reply_to,
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError> {
        let mut log = self.log.lock();
        if let Some(err) = log.edit_failures.pop_front() {
            return Err(err);
        }
        log.edits.push(EditedMessage {
            chat,
            message_id: message,
            text: text.to_string(),
            keyboard: keyboard.clone(),
        });
        Ok(())
    }

    async fn answer_tap(&self, tap_id: &str, alert: Option<&str>) -> Result<(), DeliveryError> {
        self.log
            .lock()
            .answers
            .push((tap_id.to_string(), alert.map(str::to_string)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn transient_classification() {
        assert!(DeliveryError::TimedOut.is_transient());
        assert!(DeliveryError::RateLimited { retry_after: None }.is_transient());
        assert!(!DeliveryError::Other("chat not found".into()).is_transient());
    }

    #[test_timeout::timeout]
    fn mention_strips_link_brackets() {
        let user = UserRef {
            id: 7,
            first_name: "[Ada]".into(),
            last_name: Some("Lovelace".into()),
            username: None,
        };
        assert_eq!(user.mention(), "[Ada Lovelace](tg://user?id=7)");
    }

    #[test_timeout::tokio_timeout_test]
    async fn memory_transport_replays_injected_failures_once() {
        let transport = MemoryTransport::new();
        transport.fail_next_edit(DeliveryError::TimedOut);
        let keyboard = Keyboard::new();
        assert_eq!(
            transport.edit_message(1, 1, "x", &keyboard).await,
            Err(DeliveryError::TimedOut)
        );
        assert!(transport.edit_message(1, 1, "y", &keyboard).await.is_ok());
        assert_eq!(transport.edits().len(), 1);
    }
}
