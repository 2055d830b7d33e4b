//! X/Twitter posts, mirrored through Nitter RSS instances.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use log::warn;

use crate::entity::ConnectorKind;
use crate::entity::ObservedState;
use crate::entity::ObservedStateBuilder;
use crate::source::BaseConnector;
use crate::source::ConnectorInfo;
use crate::source::SourceConnector;
use crate::source::error::SourceError;
use crate::source::latest_entry;
use crate::source::plain_text;

pub const DEFAULT_INSTANCES: [&str; 3] = [
    "https://nitter.net",
    "https://nitter.privacydev.net",
    "https://nitter.cz",
];

const MAX_HANDLE_LEN: usize = 15;

const TEMPLATE: &str = r#"🐦 <b>{{ name | html }} posted</b>

{{ state.summary | html }}

⏰ {{ state.published | datetime }}
🔗 <a href="{{ state.url | html }}">View post</a>"#;

pub struct MicroPostSource {
    pub base: BaseConnector,
    /// Nitter instances, tried in order until one answers.
    pub instances: Vec<String>,
}

impl MicroPostSource {
    pub fn new(instances: Vec<String>) -> Self {
        let instances = if instances.is_empty() {
            DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect()
        } else {
            instances
        };
        let info = ConnectorInfo {
            kind: ConnectorKind::MicroPost,
            name: "X".to_string(),
            api_url: "https://x.com".to_string(),
            interval: Duration::from_secs(10 * 60),
            target_delay: Duration::from_secs(3),
            template: TEMPLATE,
        };
        Self {
            base: BaseConnector::new(info, 30),
            instances,
        }
    }

    /// Extracts the numeric post id from a Nitter guid or link.
    pub fn post_id(guid: &str) -> String {
        guid.split_once("/status/")
            .map(|(_, rest)| {
                rest.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
            })
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| guid.to_string())
    }

    /// Points a Nitter link back at x.com, without the `#m` fragment.
    fn canonical_link(&self, link: &str, instance: &str) -> String {
        let link = link.split('#').next().unwrap_or(link);
        let instance = instance.trim_end_matches('/');
        match link.strip_prefix(instance) {
            Some(path) => format!("{}{path}", self.base.info.api_url),
            None => link.to_string(),
        }
    }

    async fn fetch_from(
        &self,
        instance: &str,
        handle: &str,
    ) -> Result<ObservedState, SourceError> {
        let url = format!(
            "{}/{}/rss",
            instance.trim_end_matches('/'),
            handle.trim_start_matches('@')
        );
        let feed = self.base.get_feed(&url).await?;
        let entry = latest_entry(&feed).ok_or_else(|| SourceError::EmptySource {
            target: handle.to_string(),
        })?;

        let link = entry
            .links
            .first()
            .map(|l| l.href.as_str())
            .unwrap_or_default();
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let summary = entry
            .summary
            .as_ref()
            .map(|s| plain_text(&s.content, 280))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| title.clone());

        Ok(ObservedStateBuilder::default()
            .target_id(handle)
            .item_id(Self::post_id(&entry.id))
            .title(title)
            .url(self.canonical_link(link, instance))
            .published(entry.published.or(entry.updated))
            .author(handle.to_string())
            .summary(summary)
            .build()?)
    }
}

#[async_trait]
impl SourceConnector for MicroPostSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let raw = raw.trim();
        let handle = raw.strip_prefix('@').unwrap_or(raw);
        if handle.is_empty()
            || handle.len() > MAX_HANDLE_LEN
            || !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SourceError::invalid_target(
                raw,
                "handles are 1-15 letters, digits or underscores",
            ));
        }
        Ok(format!("@{handle}"))
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        let mut last_error = None;
        for instance in &self.instances {
            debug!("Fetching {target} from Nitter instance {instance}");
            match self.fetch_from(instance, target).await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    warn!("Nitter instance {instance} failed for {target}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::UnexpectedResult {
            message: "no Nitter instances configured".to_string(),
        }))
    }
}

impl Default for MicroPostSource {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
