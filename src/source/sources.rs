use std::sync::Arc;

use log::info;

use crate::config::Config;
use crate::entity::ConnectorKind;
use crate::source::SourceConnector;
use crate::source::balance::BalanceSource;
use crate::source::error::SourceError;
use crate::source::generic_feed::GenericFeedSource;
use crate::source::live_room::LiveRoomSource;
use crate::source::micro_post::MicroPostSource;
use crate::source::release_feed::ReleaseFeedSource;
use crate::source::video_feed::VideoFeedSource;

/// Every built-in source, keyed by kind.
pub struct Sources {
    sources: Vec<Arc<dyn SourceConnector>>,
}

impl Sources {
    /// Builds every source with the settings in `config`.
    ///
    /// Fails if `PROXY_URL` is set but not a usable proxy address.
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let mut live_room = LiveRoomSource::new();
        let mut video_feed = VideoFeedSource::new();
        let mut micro_post = MicroPostSource::new(config.nitter_instances.clone());
        let mut generic_feed = GenericFeedSource::new();
        let mut release_feed = ReleaseFeedSource::new();
        let mut balance = BalanceSource::new(&config.rpc_urls);

        if let Some(proxy_url) = &config.proxy_url {
            info!("Routing source requests through the configured proxy");
            for base in [
                &mut live_room.base,
                &mut video_feed.base,
                &mut micro_post.base,
                &mut generic_feed.base,
                &mut release_feed.base,
                &mut balance.base,
            ] {
                base.use_proxy(proxy_url)?;
            }
        }

        let mut _self = Self {
            sources: Vec::new(),
        };
        _self.add_source(Arc::new(live_room));
        _self.add_source(Arc::new(video_feed));
        _self.add_source(Arc::new(micro_post));
        _self.add_source(Arc::new(generic_feed));
        _self.add_source(Arc::new(release_feed));
        _self.add_source(Arc::new(balance));
        Ok(_self)
    }

    pub fn add_source(&mut self, source: Arc<dyn SourceConnector>) {
        self.sources.retain(|s| s.kind() != source.kind());
        self.sources.push(source);
    }

    pub fn get(&self, kind: ConnectorKind) -> Option<&Arc<dyn SourceConnector>> {
        self.sources.iter().find(|s| s.kind() == kind)
    }

    /// Sources enabled in `config`, in the configured order.
    pub fn enabled(&self, config: &Config) -> Vec<Arc<dyn SourceConnector>> {
        config
            .enabled_connectors
            .iter()
            .filter_map(|kind| self.get(*kind).cloned())
            .collect()
    }
}
