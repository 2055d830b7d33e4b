//! YouTube channel uploads, read from the public Atom feed.

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
use crate::source::path_segments;

const TEMPLATE: &str = r#"📺 <b>{{ name | html }} uploaded a new video!</b>

<b>{{ state.title | html }}</b>

⏰ {{ state.published | datetime }}
🔗 <a href="{{ state.url | html }}">Watch now</a>"#;

const CHANNEL_ID_LEN: usize = 24;

pub struct VideoFeedSource {
    pub base: BaseConnector,
}

impl VideoFeedSource {
    pub fn new() -> Self {
        let info = ConnectorInfo {
            kind: ConnectorKind::VideoFeed,
            name: "YouTube".to_string(),
            api_url: "https://www.youtube.com".to_string(),
            interval: Duration::from_secs(5 * 60),
            target_delay: Duration::from_secs(2),
            template: TEMPLATE,
        };
        Self {
            base: BaseConnector::new(info, 60),
        }
    }

    fn feed_url(&self, channel_id: &str) -> String {
        format!(
            "{}/feeds/videos.xml?channel_id={channel_id}",
            self.base.info.api_url
        )
    }

    fn is_channel_id(id: &str) -> bool {
        id.len() == CHANNEL_ID_LEN
            && id.starts_with("UC")
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn thumbnail_url(video_id: &str) -> String {
        format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
    }
}

#[async_trait]
impl SourceConnector for VideoFeedSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    /// Accepts a bare channel id or a `youtube.com/channel/<id>` URL.
    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let raw = raw.trim();
        let candidate = match path_segments(raw, "youtube.com") {
            Some(segments) => match segments.as_slice() {
                ["channel", id, ..] => *id,
                _ => {
                    return Err(SourceError::invalid_target(
                        raw,
                        "expected a youtube.com/channel/<id> URL",
                    ));
                }
            },
            None => raw,
        };

        if !Self::is_channel_id(candidate) {
            return Err(SourceError::invalid_target(
                raw,
                "channel ids start with `UC` and are 24 characters long",
            ));
        }
        Ok(candidate.to_string())
    }

    async fn verify_target(&self, target: &str) -> Result<Option<String>, SourceError> {
        let feed = self.base.get_feed(&self.feed_url(target)).await?;
        Ok(feed.title.map(|t| t.content))
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        debug!("Fetching uploads of channel {target}");
        let feed = self.base.get_feed(&self.feed_url(target)).await?;
        let entry = latest_entry(&feed).ok_or_else(|| SourceError::EmptySource {
            target: target.to_string(),
        })?;

        let video_id = entry
            .id
            .strip_prefix("yt:video:")
            .unwrap_or(&entry.id)
            .to_string();
        let url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}"));
        let author = entry
            .authors
            .first()
            .map(|a| a.name.clone())
            .or_else(|| feed.title.as_ref().map(|t| t.content.clone()));

        Ok(ObservedStateBuilder::default()
            .target_id(target)
            .title(
                entry
                    .title
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_default(),
            )
            .url(url)
            .published(entry.published.or(entry.updated))
            .author(author)
            .image_url(Self::thumbnail_url(&video_id))
            .item_id(video_id)
            .build()?)
    }
}

impl Default for VideoFeedSource {
    fn default() -> Self {
        Self::new()
    }
}
