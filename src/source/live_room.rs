//! Bilibili live room status.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use log::info;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;

use crate::entity::ConnectorKind;
use crate::entity::Fingerprint;
use crate::entity::ObservedState;
use crate::entity::ObservedStateBuilder;
use crate::source::BaseConnector;
use crate::source::ConnectorInfo;
use crate::source::SourceConnector;
use crate::source::error::SourceError;

const LIVE: &str = "1";

const TEMPLATE: &str = r#"📺 <b>{{ name | html }} is live!</b>

📝 <b>Title</b>: {{ state.title | html }}
👀 <b>Online</b>: {{ state.extra.online }}
🏷 <b>Area</b>: {{ state.extra.parent_area_name | html }} - {{ state.extra.area_name | html }}
⏰ <b>Since</b>: {{ state.extra.live_time | html }}

<a href="{{ state.url | html }}">👉 Enter the live room</a>"#;

#[derive(Deserialize, Debug, Default)]
struct LiveRoomInfo {
    #[serde(default)]
    room_id: Option<u64>,
    #[serde(default)]
    title: String,
    /// 0 offline, 1 live, 2 replaying recordings
    #[serde(default)]
    live_status: i64,
    #[serde(default)]
    user_cover: Option<String>,
    #[serde(default)]
    online: u64,
    #[serde(default)]
    live_time: Option<String>,
    #[serde(default)]
    parent_area_name: String,
    #[serde(default)]
    area_name: String,
}

pub struct LiveRoomSource {
    pub base: BaseConnector,
}

impl LiveRoomSource {
    pub fn new() -> Self {
        let info = ConnectorInfo {
            kind: ConnectorKind::LiveRoom,
            name: "Bilibili Live".to_string(),
            api_url: "https://uapis.cn".to_string(),
            interval: Duration::from_secs(60),
            target_delay: Duration::from_secs(1),
            template: TEMPLATE,
        };
        Self {
            base: BaseConnector::new(info, 60),
        }
    }

    pub fn room_url(room_id: &str) -> String {
        format!("https://live.bilibili.com/{room_id}")
    }

    async fn get_room_info(&self, room_id: &str) -> Result<LiveRoomInfo, SourceError> {
        debug!("Fetching room info from {} for room {room_id}", self.base.info.name);
        let request = self
            .base
            .client
            .get(format!(
                "{}/api/v1/social/bilibili/liveroom",
                self.base.info.api_url
            ))
            .query(&[("room_id", room_id)]);

        let info: LiveRoomInfo = self.base.send_json(request).await?;
        if info.room_id.is_none() {
            return Err(SourceError::TargetNotFound {
                target: room_id.to_string(),
            });
        }
        Ok(info)
    }
}

#[async_trait]
impl SourceConnector for LiveRoomSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(SourceError::invalid_target(raw, "room id must be numeric"));
        }
        Ok(raw.to_string())
    }

    async fn verify_target(&self, target: &str) -> Result<Option<String>, SourceError> {
        self.get_room_info(target).await?;
        Ok(None)
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        let room = self.get_room_info(target).await?;

        let mut extra = Map::new();
        extra.insert("online".to_string(), Value::from(room.online));
        extra.insert(
            "parent_area_name".to_string(),
            Value::from(room.parent_area_name),
        );
        extra.insert("area_name".to_string(), Value::from(room.area_name));
        extra.insert(
            "live_time".to_string(),
            Value::from(room.live_time.unwrap_or_default()),
        );

        info!(
            "Fetched room {target} from {}: live_status={}",
            self.base.info.name, room.live_status
        );

        Ok(ObservedStateBuilder::default()
            .target_id(target)
            .item_id(room.live_status.to_string())
            .title(room.title)
            .url(Self::room_url(target))
            .image_url(room.user_cover.filter(|c| !c.is_empty()))
            .extra(extra)
            .build()?)
    }

    /// Only the edge into "live" counts; going offline or into replay is silent.
    fn has_changed(&self, old: &Fingerprint, new: &Fingerprint) -> bool {
        old.as_str() != LIVE && new.as_str() == LIVE
    }
}

impl Default for LiveRoomSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_only_fires_when_going_live() {
        let source = LiveRoomSource::new();
        let offline = Fingerprint::new("0");
        let live = Fingerprint::new("1");
        let replay = Fingerprint::new("2");

        assert!(source.has_changed(&offline, &live));
        assert!(source.has_changed(&replay, &live));
        assert!(!source.has_changed(&live, &offline));
        assert!(!source.has_changed(&live, &live));
        assert!(!source.has_changed(&offline, &replay));
    }

    #[test]
    fn test_normalize_target() {
        let source = LiveRoomSource::new();
        assert_eq!(source.normalize_target(" 21452505 ").unwrap(), "21452505");
        assert!(matches!(
            source.normalize_target("abc"),
            Err(SourceError::InvalidTarget { .. })
        ));
        assert!(source.normalize_target("").is_err());
    }
}
