//! GitHub repository releases.

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
use crate::source::plain_text;

const SUMMARY_CHARS: usize = 200;

const TEMPLATE: &str = r#"🚀 <b>New release of {{ name | html }}</b>

<b>{{ state.title | html }}</b>
{% if state.summary %}
{{ state.summary | html }}
{% endif %}
⏰ {{ state.published | datetime }}
🔗 <a href="{{ state.url | html }}">Release notes</a>"#;

pub struct ReleaseFeedSource {
    pub base: BaseConnector,
}

impl ReleaseFeedSource {
    pub fn new() -> Self {
        let info = ConnectorInfo {
            kind: ConnectorKind::ReleaseFeed,
            name: "GitHub".to_string(),
            api_url: "https://github.com".to_string(),
            interval: Duration::from_secs(30 * 60),
            target_delay: Duration::from_secs(2),
            template: TEMPLATE,
        };
        Self {
            base: BaseConnector::new(info, 60),
        }
    }

    fn feed_url(&self, repo: &str) -> String {
        format!("{}/{repo}/releases.atom", self.base.info.api_url)
    }

    fn is_slug_part(part: &str) -> bool {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

#[async_trait]
impl SourceConnector for ReleaseFeedSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    /// Accepts `owner/repo` or any `github.com/owner/repo/...` URL.
    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let raw = raw.trim();
        let segments = path_segments(raw, "github.com")
            .unwrap_or_else(|| raw.split('/').filter(|s| !s.is_empty()).collect());

        let (owner, repo) = match segments.as_slice() {
            [owner, repo, ..] if raw.contains("github.com") || segments.len() == 2 => {
                (*owner, repo.trim_end_matches(".git"))
            }
            _ => {
                return Err(SourceError::invalid_target(
                    raw,
                    "expected `owner/repo` or a github.com repository URL",
                ));
            }
        };

        if !Self::is_slug_part(owner) || !Self::is_slug_part(repo) {
            return Err(SourceError::invalid_target(
                raw,
                "owner and repository may only contain letters, digits, `-`, `_` and `.`",
            ));
        }
        Ok(format!("{owner}/{repo}"))
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        debug!("Fetching releases of {target}");
        let feed = self.base.get_feed(&self.feed_url(target)).await?;
        let entry = latest_entry(&feed).ok_or_else(|| SourceError::EmptySource {
            target: target.to_string(),
        })?;

        let url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| format!("https://github.com/{target}/releases"));
        let summary = entry
            .content
            .as_ref()
            .and_then(|c| c.body.as_deref())
            .map(|html| plain_text(html, SUMMARY_CHARS))
            .filter(|s| !s.is_empty());

        Ok(ObservedStateBuilder::default()
            .target_id(target)
            .item_id(entry.id.clone())
            .title(
                entry
                    .title
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_default(),
            )
            .url(url)
            .published(entry.updated.or(entry.published))
            .author(entry.authors.first().map(|a| a.name.clone()))
            .summary(summary)
            .build()?)
    }
}

impl Default for ReleaseFeedSource {
    fn default() -> Self {
        Self::new()
    }
}
