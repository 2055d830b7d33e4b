//! Upstream sources and the [`SourceConnector`] contract they implement.

pub mod balance;
pub mod error;
pub mod generic_feed;
pub mod live_room;
pub mod micro_post;
pub mod release_feed;
pub mod sources;
pub mod video_feed;

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use log::debug;
use log::info;
use reqwest::Client;
use reqwest::Proxy;
use reqwest::RequestBuilder;
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::entity::ConnectorKind;
use crate::entity::Fingerprint;
use crate::entity::ObservedState;
use crate::source::error::SourceError;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Static description of a source kind.
#[derive(Clone, Debug)]
pub struct ConnectorInfo {
    pub kind: ConnectorKind,
    /// Human readable name, e.g. "Bilibili Live".
    pub name: String,
    /// Base URL of the upstream API, e.g. `https://www.youtube.com`.
    pub api_url: String,
    /// Time between two poll cycles.
    pub interval: Duration,
    /// Pause between two targets within one cycle.
    pub target_delay: Duration,
    /// Minijinja template for notifications. Receives `name`, `target` and `state`.
    pub template: &'static str,
}

/// HTTP plumbing shared by every source.
pub struct BaseConnector {
    pub info: ConnectorInfo,
    pub client: Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl BaseConnector {
    pub fn new(info: ConnectorInfo, per_minute: u32) -> Self {
        let client = Self::build_client(None).unwrap_or_else(|_| Client::new());

        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));

        Self {
            info,
            client,
            limiter: RateLimiter::direct(quota),
        }
    }

    fn build_client(proxy_url: Option<&str>) -> Result<Client, SourceError> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(url) = proxy_url {
            builder = builder.proxy(Proxy::all(url)?);
        }
        Ok(builder.build()?)
    }

    /// Routes every request of this source through `proxy_url`.
    pub fn use_proxy(&mut self, proxy_url: &str) -> Result<(), SourceError> {
        self.client = Self::build_client(Some(proxy_url))?;
        debug!("Source {} now uses a proxy", self.info.name);
        Ok(())
    }

    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SourceError> {
        // A successful check already takes the cell
        if self.limiter.check().is_err() {
            info!("Source {} is ratelimited. Waiting...", self.info.name);
            self.limiter.until_ready().await;
        }

        let req = request.build()?;
        let url = req.url().to_string();
        debug!("Making request to: {url}");

        let response = self.client.execute(req).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response)
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = self.send(request).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetches and parses an RSS or Atom document.
    pub async fn get_feed(&self, url: &str) -> Result<feed_rs::model::Feed, SourceError> {
        let response = self.send(self.client.get(url)).await?;
        let body = response.bytes().await?;
        Ok(feed_rs::parser::parse(&body[..])?)
    }
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn info(&self) -> &ConnectorInfo;

    fn kind(&self) -> ConnectorKind {
        self.info().kind
    }

    /// Prepares the source. Must be safe to call more than once.
    async fn init(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Validates user input and returns the canonical target id.
    fn normalize_target(&self, raw: &str) -> Result<String, SourceError>;

    /// Checks that the target exists upstream, optionally suggesting a display name.
    async fn verify_target(&self, _target: &str) -> Result<Option<String>, SourceError> {
        Ok(None)
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError>;

    fn compute_fingerprint(&self, state: &ObservedState) -> Fingerprint {
        Fingerprint::new(state.item_id.clone())
    }

    /// Whether moving from `old` to `new` is worth a notification.
    fn has_changed(&self, old: &Fingerprint, new: &Fingerprint) -> bool {
        old != new
    }
}

/// Returns the path segments following `domain` in `url`, or `None` when the
/// URL does not point at `domain`.
pub fn path_segments<'a>(url: &'a str, domain: &str) -> Option<Vec<&'a str>> {
    let after_protocol = url.find("://").map_or(url, |i| &url[i + 3..]);
    let (host, path) = after_protocol
        .split_once('/')
        .unwrap_or((after_protocol, ""));
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host != domain {
        return None;
    }
    let path = path.split(['?', '#']).next().unwrap_or_default();
    Some(path.split('/').filter(|s| !s.is_empty()).collect())
}

/// Converts an HTML fragment to plain text capped at `max_chars` characters.
pub fn plain_text(html: &str, max_chars: usize) -> String {
    let text = html2md::parse_html(html);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max_chars {
        text
    } else {
        // Char based to avoid splitting a multi-byte character
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

/// Newest entry of a feed, by publish time when available, else document order.
pub fn latest_entry(feed: &feed_rs::model::Feed) -> Option<&feed_rs::model::Entry> {
    if feed.entries.iter().all(|e| e.published.or(e.updated).is_some()) {
        feed.entries.iter().max_by_key(|e| e.published.or(e.updated))
    } else {
        feed.entries.first()
    }
}
