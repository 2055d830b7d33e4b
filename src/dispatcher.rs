//! Turns one observed change into one message per subscriber.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::DateTime;
use futures::future::join_all;
use log::debug;
use log::error;
use log::info;
use minijinja::Environment;
use minijinja::Value;
use minijinja::context;

use crate::entity::ConnectorKind;
use crate::entity::Notification;
use crate::entity::ObservedState;
use crate::entity::Subscription;
use crate::messenger::Messenger;
use crate::repository::SubscriptionRepository;
use crate::repository::error::RepositoryError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Escapes text for Telegram's HTML parse mode. Missing values render empty.
fn html(value: Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    let text = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    html_escape::encode_double_quoted_attribute(&text).into_owned()
}

/// Formats an RFC 3339 timestamp as `YYYY-MM-DD HH:MM UTC`.
fn datetime(value: Value) -> String {
    let Some(raw) = value.as_str() else {
        return "unknown".to_string();
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.to_utc().format("%Y-%m-%d %H:%M UTC").to_string(),
        Err(_) => html_escape::encode_text(raw).into_owned(),
    }
}

pub struct Dispatcher {
    kind: ConnectorKind,
    env: Environment<'static>,
    repository: Arc<dyn SubscriptionRepository>,
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(
        kind: ConnectorKind,
        template: &'static str,
        repository: Arc<dyn SubscriptionRepository>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_filter("html", html);
        env.add_filter("datetime", datetime);
        env.add_template(kind.as_str(), template)?;

        Ok(Self {
            kind,
            env,
            repository,
            messenger,
        })
    }

    pub fn render(
        &self,
        subscription: &Subscription,
        state: &ObservedState,
    ) -> Result<Notification, minijinja::Error> {
        let template = self.env.get_template(self.kind.as_str())?;
        let text = template.render(context! {
            name => subscription.label(),
            target => &subscription.target_id,
            state => state,
        })?;

        Ok(Notification {
            text: text.trim().to_string(),
            photo_url: state.image_url.clone().filter(|url| !url.is_empty()),
            link_url: Some(state.url.clone()).filter(|url| !url.is_empty()),
        })
    }

    /// Delivers `state` to the current subscribers of `target_id` whose id is in
    /// `eligible`.
    ///
    /// Subscribers are looked up again here, so anyone who unsubscribed since
    /// the change was detected is skipped. A failed delivery is logged and
    /// does not affect the others.
    pub async fn fan_out(
        &self,
        target_id: &str,
        state: &ObservedState,
        eligible: &BTreeSet<i64>,
    ) -> Result<FanOutReport, RepositoryError> {
        let subscribers = self
            .repository
            .list_subscriptions_for_target(self.kind, target_id)
            .await?;

        let deliveries = subscribers
            .iter()
            .filter(|sub| eligible.contains(&sub.id))
            .map(|sub| self.deliver_one(sub, state));
        let results = join_all(deliveries).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = FanOutReport {
            delivered,
            failed: results.len() - delivered,
        };
        info!(
            "Fanned out {} update for {target_id}: {} delivered, {} failed",
            self.kind, report.delivered, report.failed
        );
        Ok(report)
    }

    async fn deliver_one(&self, subscription: &Subscription, state: &ObservedState) -> bool {
        let notification = match self.render(subscription, state) {
            Ok(n) => n,
            Err(e) => {
                error!(
                    "Failed to render {} notification for subscription {}: {e}",
                    self.kind, subscription.id
                );
                return false;
            }
        };

        debug!(
            "Sending {} notification to user {} for {}",
            self.kind, subscription.user_id, subscription.target_id
        );
        match self
            .messenger
            .deliver(subscription.user_id, &notification)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to deliver to user {} for {}: {e}",
                    subscription.user_id, subscription.target_id
                );
                false
            }
        }
    }
}
