//! Delivery of rendered notifications to recipients.

pub mod telegram;

use async_trait::async_trait;

use crate::entity::Notification;

pub use telegram::TelegramMessenger;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("Request to messaging API failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Messaging API returned HTTP {status} for recipient {recipient}")]
    HttpStatus { status: u16, recipient: i64 },

    #[error("Message to {recipient} was rejected: {description}")]
    Rejected { recipient: i64, description: String },
}

/// Sends one notification to one recipient.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, recipient: i64, notification: &Notification)
    -> Result<(), DeliveryError>;
}
