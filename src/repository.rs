//! Subscription storage.
//!
//! Connectors only talk to storage through [`SubscriptionRepository`], so the
//! backing store can be swapped without touching polling or dispatch.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::entity::ConnectorKind;
use crate::entity::Fingerprint;
use crate::entity::Subscription;
use crate::repository::error::RepositoryError;

pub mod error;
pub mod memory;

pub use memory::MemoryRepository;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Creates the `(user, kind, target)` subscription, or replaces the
    /// display name of an existing one. Either way the fingerprint ends up
    /// unset.
    async fn upsert_subscription(
        &self,
        user_id: i64,
        kind: ConnectorKind,
        target_id: &str,
        display_name: Option<&str>,
    ) -> Result<Subscription, RepositoryError>;

    /// Returns `false` if no matching subscription existed.
    async fn delete_subscription(
        &self,
        user_id: i64,
        kind: ConnectorKind,
        target_id: &str,
    ) -> Result<bool, RepositoryError>;

    async fn list_subscriptions_for_target(
        &self,
        kind: ConnectorKind,
        target_id: &str,
    ) -> Result<Vec<Subscription>, RepositoryError>;

    async fn list_subscriptions_for_user(
        &self,
        user_id: i64,
        kind: ConnectorKind,
    ) -> Result<Vec<Subscription>, RepositoryError>;

    /// Distinct targets with at least one subscription of `kind`.
    async fn list_all_targets(&self, kind: ConnectorKind)
    -> Result<BTreeSet<String>, RepositoryError>;

    async fn update_fingerprint(
        &self,
        subscription_id: i64,
        fingerprint: &Fingerprint,
    ) -> Result<(), RepositoryError>;

    /// Removes every subscription owned by `user_id`, returning how many were removed.
    async fn delete_user(&self, user_id: i64) -> Result<usize, RepositoryError>;
}
