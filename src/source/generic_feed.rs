//! Any RSS or Atom feed reachable over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::entity::ConnectorKind;
use crate::entity::ObservedState;
use crate::entity::ObservedStateBuilder;
use crate::source::BaseConnector;
use crate::source::ConnectorInfo;
use crate::source::SourceConnector;
use crate::source::error::SourceError;
use crate::source::latest_entry;
use crate::source::plain_text;

const TEMPLATE: &str = r#"📰 <b>{{ name | html }}</b>

<b>{{ state.title | html }}</b>
{% if state.summary %}
{{ state.summary | html }}
{% endif %}
🔗 <a href="{{ state.url | html }}">Read more</a>"#;

pub struct GenericFeedSource {
    pub base: BaseConnector,
}

impl GenericFeedSource {
    pub fn new() -> Self {
        let info = ConnectorInfo {
            kind: ConnectorKind::GenericFeed,
            name: "RSS".to_string(),
            api_url: String::new(),
            interval: Duration::from_secs(10 * 60),
            target_delay: Duration::from_secs(1),
            template: TEMPLATE,
        };
        Self {
            base: BaseConnector::new(info, 60),
        }
    }

    /// Stable identity of an entry: hash of the guid, else the link, else the title.
    pub fn entry_hash(id: &str, link: Option<&str>, title: Option<&str>) -> String {
        let key = [Some(id), link, title]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or_default();
        format!("{:x}", md5::compute(key.as_bytes()))
    }
}

#[async_trait]
impl SourceConnector for GenericFeedSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let raw = raw.trim();
        let has_host = ["http://", "https://"]
            .iter()
            .find_map(|scheme| raw.strip_prefix(scheme))
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'));
        if !has_host || raw.contains(char::is_whitespace) {
            return Err(SourceError::invalid_target(
                raw,
                "expected an http:// or https:// feed URL",
            ));
        }
        Ok(raw.to_string())
    }

    async fn verify_target(&self, target: &str) -> Result<Option<String>, SourceError> {
        let feed = self.base.get_feed(target).await?;
        Ok(feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        debug!("Fetching feed {target}");
        let feed = self.base.get_feed(target).await?;
        let entry = latest_entry(&feed).ok_or_else(|| SourceError::EmptySource {
            target: target.to_string(),
        })?;

        let link = entry.links.first().map(|l| l.href.clone());
        let title = entry.title.as_ref().map(|t| t.content.clone());
        let summary = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .map(|html| plain_text(&html, 300))
            .filter(|s| !s.is_empty());

        Ok(ObservedStateBuilder::default()
            .target_id(target)
            .item_id(Self::entry_hash(
                &entry.id,
                link.as_deref(),
                title.as_deref(),
            ))
            .title(title.unwrap_or_else(|| "(untitled)".to_string()))
            .url(link.unwrap_or_else(|| target.to_string()))
            .published(entry.published.or(entry.updated))
            .author(entry.authors.first().map(|a| a.name.clone()))
            .summary(summary)
            .build()?)
    }
}

impl Default for GenericFeedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        let source = GenericFeedSource::new();
        assert_eq!(
            source
                .normalize_target(" https://blog.rust-lang.org/feed.xml ")
                .unwrap(),
            "https://blog.rust-lang.org/feed.xml"
        );
        assert!(source.normalize_target("ftp://example.com/feed").is_err());
        assert!(source.normalize_target("https://").is_err());
        assert!(source.normalize_target("example.com/feed").is_err());
    }

    #[test]
    fn test_entry_hash_prefers_id_then_link_then_title() {
        let by_id = GenericFeedSource::entry_hash("guid-1", Some("https://a"), Some("T"));
        assert_eq!(by_id, format!("{:x}", md5::compute(b"guid-1")));

        let by_link = GenericFeedSource::entry_hash("", Some("https://a"), Some("T"));
        assert_eq!(by_link, format!("{:x}", md5::compute(b"https://a")));

        let by_title = GenericFeedSource::entry_hash("", None, Some("T"));
        assert_eq!(by_title, format!("{:x}", md5::compute(b"T")));
        assert_eq!(by_title.len(), 32);
    }
}
