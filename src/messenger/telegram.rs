//! Telegram Bot API delivery.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::entity::Notification;
use crate::messenger::DeliveryError;
use crate::messenger::Messenger;

/// Telegram refuses photo captions longer than this.
const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Deserialize, Debug)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramMessenger {
    client: Client,
    api_url: String,
    token: String,
}

impl TelegramMessenger {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }

    fn reply_markup(notification: &Notification) -> Option<Value> {
        notification.link_url.as_ref().map(|url| {
            json!({
                "inline_keyboard": [[{ "text": "Open", "url": url }]]
            })
        })
    }

    async fn call(&self, method: &str, recipient: i64, body: Value) -> Result<(), DeliveryError> {
        debug!("Calling Telegram {method} for chat {recipient}");
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        match response.json::<ApiResponse>().await {
            Ok(ApiResponse { ok: true, .. }) => Ok(()),
            Ok(ApiResponse { description, .. }) => Err(DeliveryError::Rejected {
                recipient,
                description: description.unwrap_or_else(|| format!("HTTP {status}")),
            }),
            Err(_) => Err(DeliveryError::HttpStatus {
                status: status.as_u16(),
                recipient,
            }),
        }
    }

    async fn send_message(
        &self,
        recipient: i64,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let mut body = json!({
            "chat_id": recipient,
            "text": notification.text,
            "parse_mode": "HTML",
            "link_preview_options": { "is_disabled": true },
        });
        if let Some(markup) = Self::reply_markup(notification) {
            body["reply_markup"] = markup;
        }
        self.call("sendMessage", recipient, body).await
    }

    async fn send_photo(
        &self,
        recipient: i64,
        photo_url: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let mut body = json!({
            "chat_id": recipient,
            "photo": photo_url,
            "caption": notification.text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = Self::reply_markup(notification) {
            body["reply_markup"] = markup;
        }
        self.call("sendPhoto", recipient, body).await
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn deliver(
        &self,
        recipient: i64,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        match &notification.photo_url {
            Some(photo) if notification.text.chars().count() <= MAX_CAPTION_CHARS => {
                match self.send_photo(recipient, photo, notification).await {
                    Err(DeliveryError::Rejected { description, .. }) => {
                        // Usually an image Telegram cannot fetch; the text alone still goes out
                        warn!("Photo for chat {recipient} rejected ({description}), sending text only");
                        self.send_message(recipient, notification).await
                    }
                    other => other,
                }
            }
            _ => self.send_message(recipient, notification).await,
        }
    }
}
