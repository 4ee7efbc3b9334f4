use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::transport::{ChatId, ChatTransport, DeliveryError, Keyboard, MessageId};

/// Bot-API style HTTP adapter. Every call is a JSON `POST {base}/{method}`
/// answered with `{"ok": bool, "result": .., "parameters": {"retry_after": n}}`.
#[derive(Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Serialize)]
struct InlineMarkup<'a> {
    inline_keyboard: &'a Keyboard,
}

impl WebhookTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>, DeliveryError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .json::<ApiResponse<serde_json::Value>>()
                .await
                .ok()
                .and_then(|parsed| parsed.parameters)
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs);
            return Err(DeliveryError::RateLimited { retry_after });
        }
        let parsed: ApiResponse<T> = response.json().await.map_err(classify)?;
        if !status.is_success() || !parsed.ok {
            return Err(DeliveryError::Other(format!(
                "{} returned {}: {}",
                method,
                status,
                parsed.description.unwrap_or_default()
            )));
        }
        Ok(parsed.result)
    }
}

fn markup(keyboard: &Keyboard) -> Result<serde_json::Value, DeliveryError> {
    serde_json::to_value(InlineMarkup {
        inline_keyboard: keyboard,
    })
    .map_err(|err| DeliveryError::Other(format!("unencodable keyboard: {err}")))
}

fn classify(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::TimedOut
    } else if err.status() == Some(StatusCode::TOO_MANY_REQUESTS) {
        DeliveryError::RateLimited { retry_after: None }
    } else {
        DeliveryError::Other(err.to_string())
    }
}

#[async_trait]
impl ChatTransport for WebhookTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, DeliveryError> {
        let mut body = json!({
            "chat_id": chat,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = markup(keyboard)?;
        }
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = json!(reply_to);
        }
        let sent: Option<SentMessage> = self.call("sendMessage", body).await?;
        sent.map(|m| m.message_id)
            .ok_or_else(|| DeliveryError::Other("sendMessage returned no message".into()))
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), DeliveryError> {
        let body = json!({
            "chat_id": chat,
            "message_id": message,
            "text": text,
            "reply_markup": markup(keyboard)?,
        });
        self.call::<serde_json::Value>("editMessageText", body)
            .await
            .map(|_| ())
    }

    async fn answer_tap(&self, tap_id: &str, alert: Option<&str>) -> Result<(), DeliveryError> {
        let mut body = json!({ "callback_query_id": tap_id });
        if let Some(text) = alert {
            body["text"] = json!(text);
            body["show_alert"] = json!(true);
        }
        self.call::<serde_json::Value>("answerCallbackQuery", body)
            .await
            .map(|_| ())
    }
}
