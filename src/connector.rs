//! A source bound to the subscription store, its dispatcher and its scheduler.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_builder::Builder;
use log::debug;
use log::info;
use log::warn;

use crate::dispatcher::Dispatcher;
use crate::entity::ConnectorKind;
use crate::entity::Subscription;
use crate::messenger::Messenger;
use crate::repository::SubscriptionRepository;
use crate::repository::error::RepositoryError;
use crate::source::ConnectorInfo;
use crate::source::SourceConnector;
use crate::source::error::SourceError;
use crate::task::Scheduler;
use crate::task::Task;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectorError {
    /// Malformed target. Shown to the user, never retried.
    #[error("{0}")]
    Validation(#[source] SourceError),

    #[error("Could not verify target upstream: {0}")]
    UpstreamUnavailable(#[source] SourceError),

    #[error("Failed to fetch `{target}`: {source}")]
    Fetch {
        target: String,
        #[source]
        source: SourceError,
    },

    #[error("Subscription store failed: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("Invalid notification template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Overrides for a source's built-in timing.
#[derive(Builder, Clone, Debug, Default)]
#[builder(pattern = "immutable", default)]
pub struct ConnectorSettings {
    #[builder(setter(strip_option))]
    pub interval: Option<Duration>,
    #[builder(setter(strip_option))]
    pub target_delay: Option<Duration>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct targets visited.
    pub targets: usize,
    /// Targets whose check failed.
    pub failed: usize,
    /// Notifications delivered.
    pub notified: usize,
}

pub struct Connector {
    source: Arc<dyn SourceConnector>,
    repository: Arc<dyn SubscriptionRepository>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    target_delay: Duration,
}

impl Connector {
    pub fn new(
        source: Arc<dyn SourceConnector>,
        repository: Arc<dyn SubscriptionRepository>,
        messenger: Arc<dyn Messenger>,
        settings: ConnectorSettings,
    ) -> Result<Arc<Self>, ConnectorError> {
        let info = source.info();
        let interval = settings.interval.unwrap_or(info.interval);
        let target_delay = settings.target_delay.unwrap_or(info.target_delay);
        debug!(
            "Initializing {} connector (interval {interval:?}, target delay {target_delay:?})",
            info.kind
        );

        let dispatcher = Dispatcher::new(info.kind, info.template, repository.clone(), messenger)?;
        let scheduler = Scheduler::new(info.name.clone(), interval);

        Ok(Arc::new(Self {
            source,
            repository,
            dispatcher,
            scheduler,
            target_delay,
        }))
    }

    pub fn kind(&self) -> ConnectorKind {
        self.source.kind()
    }

    pub fn info(&self) -> &ConnectorInfo {
        self.source.info()
    }

    pub fn source(&self) -> &Arc<dyn SourceConnector> {
        &self.source
    }

    pub async fn init(&self) -> Result<(), ConnectorError> {
        self.source
            .init()
            .await
            .map_err(ConnectorError::UpstreamUnavailable)
    }

    pub async fn start(self: &Arc<Self>) -> bool {
        self.scheduler.start(self.clone()).await
    }

    pub async fn stop(&self) -> bool {
        self.scheduler.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// Validates and verifies `raw_target`, then stores the subscription with an
    /// unset fingerprint.
    ///
    /// Without an explicit `name` the source's suggestion is used, if any.
    pub async fn add_subscription(
        &self,
        user_id: i64,
        raw_target: &str,
        name: Option<&str>,
    ) -> Result<Subscription, ConnectorError> {
        let target = self
            .source
            .normalize_target(raw_target)
            .map_err(ConnectorError::Validation)?;

        let suggested = self
            .source
            .verify_target(&target)
            .await
            .map_err(|e| match e {
                SourceError::InvalidTarget { .. } => ConnectorError::Validation(e),
                e => ConnectorError::UpstreamUnavailable(e),
            })?;

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or(suggested);

        let subscription = self
            .repository
            .upsert_subscription(user_id, self.kind(), &target, name.as_deref())
            .await?;
        info!(
            "User {user_id} subscribed to {} target {target}",
            self.kind()
        );
        Ok(subscription)
    }

    /// Returns `false` if the user had no such subscription.
    pub async fn remove_subscription(
        &self,
        user_id: i64,
        raw_target: &str,
    ) -> Result<bool, ConnectorError> {
        // Stored targets are normalized, so unparsable input can only match verbatim
        let target = self
            .source
            .normalize_target(raw_target)
            .unwrap_or_else(|_| raw_target.trim().to_string());
        let removed = self
            .repository
            .delete_subscription(user_id, self.kind(), &target)
            .await?;
        if removed {
            info!(
                "User {user_id} unsubscribed from {} target {target}",
                self.kind()
            );
        }
        Ok(removed)
    }

    pub async fn list_subscriptions(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, ConnectorError> {
        Ok(self
            .repository
            .list_subscriptions_for_user(user_id, self.kind())
            .await?)
    }

    /// Fetches one target and notifies every subscriber for whom the observed
    /// state is a change. Returns the number of notifications delivered.
    ///
    /// A subscription with no fingerprint yet only records the observation.
    pub async fn check_target(&self, target: &str) -> Result<usize, ConnectorError> {
        let state = self
            .source
            .fetch_current_state(target)
            .await
            .map_err(|source| ConnectorError::Fetch {
                target: target.to_string(),
                source,
            })?;
        let fingerprint = self.source.compute_fingerprint(&state);

        let subscriptions = self
            .repository
            .list_subscriptions_for_target(self.kind(), target)
            .await?;

        let mut stale = Vec::new();
        let mut eligible = BTreeSet::new();
        for subscription in &subscriptions {
            match &subscription.fingerprint {
                None => {
                    debug!(
                        "First observation of {target} for subscription {}: {fingerprint}",
                        subscription.id
                    );
                }
                Some(old) if *old == fingerprint => continue,
                Some(old) => {
                    if self.source.has_changed(old, &fingerprint) {
                        eligible.insert(subscription.id);
                    } else {
                        debug!("{target} moved from {old} to {fingerprint} without notification");
                    }
                }
            }
            stale.push(subscription.id);
        }

        let mut notified = 0;
        if !eligible.is_empty() {
            info!(
                "{} target {target} changed to {fingerprint}, notifying {} subscribers",
                self.kind(),
                eligible.len()
            );
            notified = self
                .dispatcher
                .fan_out(target, &state, &eligible)
                .await?
                .delivered;
        }

        // Written after delivery so a crash in between re-notifies instead of dropping
        for id in stale {
            match self.repository.update_fingerprint(id, &fingerprint).await {
                Ok(()) => {}
                Err(RepositoryError::SubscriptionNotFound { .. }) => {
                    debug!("Subscription {id} was removed during the check of {target}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(notified)
    }

    /// Visits every distinct subscribed target once, sequentially.
    pub async fn run_cycle(&self) -> Result<CycleReport, ConnectorError> {
        let targets = self.repository.list_all_targets(self.kind()).await?;
        let mut report = CycleReport {
            targets: targets.len(),
            ..Default::default()
        };
        debug!("Checking {} {} targets", targets.len(), self.kind());

        for (i, target) in targets.iter().enumerate() {
            if i > 0 && !self.target_delay.is_zero() {
                tokio::time::sleep(self.target_delay).await;
            }
            match self.check_target(target).await {
                Ok(notified) => report.notified += notified,
                Err(e) => {
                    warn!("Check of {} target {target} failed: {e}", self.kind());
                    report.failed += 1;
                }
            }
        }

        info!(
            "{} cycle done: {} targets, {} failed, {} notified",
            self.kind(),
            report.targets,
            report.failed,
            report.notified
        );
        Ok(report)
    }
}

#[async_trait]
impl Task for Connector {
    fn name(&self) -> &str {
        &self.source.info().name
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.run_cycle().await?;
        Ok(())
    }
}
