//! Core data types shared by sources, the repository and the dispatcher.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use derive_builder::Builder;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// The kind of external source a connector polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    LiveRoom,
    VideoFeed,
    MicroPost,
    GenericFeed,
    ReleaseFeed,
    Balance,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 6] = [
        ConnectorKind::LiveRoom,
        ConnectorKind::VideoFeed,
        ConnectorKind::MicroPost,
        ConnectorKind::GenericFeed,
        ConnectorKind::ReleaseFeed,
        ConnectorKind::Balance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::LiveRoom => "live_room",
            ConnectorKind::VideoFeed => "video_feed",
            ConnectorKind::MicroPost => "micro_post",
            ConnectorKind::GenericFeed => "generic_feed",
            ConnectorKind::ReleaseFeed => "release_feed",
            ConnectorKind::Balance => "balance",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown connector kind `{0}`")]
pub struct UnknownConnectorKind(pub String);

impl FromStr for ConnectorKind {
    type Err = UnknownConnectorKind;

    /// Accepts the canonical name as well as the upstream service name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live_room" | "bilibili" | "live" => Ok(ConnectorKind::LiveRoom),
            "video_feed" | "youtube" => Ok(ConnectorKind::VideoFeed),
            "micro_post" | "twitter" | "x" => Ok(ConnectorKind::MicroPost),
            "generic_feed" | "rss" => Ok(ConnectorKind::GenericFeed),
            "release_feed" | "github" => Ok(ConnectorKind::ReleaseFeed),
            "balance" | "wallet" => Ok(ConnectorKind::Balance),
            other => Err(UnknownConnectorKind(other.to_string())),
        }
    }
}

/// Marker for the last state a subscriber was notified about.
///
/// Only the owning connector interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's subscription to one target of one connector kind.
///
/// `(user_id, kind, target_id)` is unique across the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub kind: ConnectorKind,
    /// Normalized target identity, e.g. a room id, `@handle` or `owner/repo`.
    pub target_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// `None` until the first poll after subscribing.
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Name shown to the user: the display name if set, the target otherwise.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.target_id)
    }
}

/// Result of one fetch for one target.
#[derive(Builder, Serialize, Clone, Debug, Default, PartialEq)]
#[builder(setter(into))]
pub struct ObservedState {
    pub target_id: String,
    /// Identity of the newest item or the current status code.
    pub item_id: String,
    pub title: String,
    /// Public link for the item, room or wallet.
    pub url: String,
    #[builder(default)]
    pub published: Option<DateTime<Utc>>,
    #[builder(default)]
    pub author: Option<String>,
    #[builder(default)]
    pub summary: Option<String>,
    #[builder(default)]
    pub image_url: Option<String>,
    /// Source specific values exposed to the message template.
    #[builder(default)]
    pub extra: Map<String, Value>,
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    /// HTML formatted body.
    pub text: String,
    pub photo_url: Option<String>,
    pub link_url: Option<String>,
}
