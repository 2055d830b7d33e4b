//! In-memory subscription store with an optional JSON snapshot file.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use log::info;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::entity::ConnectorKind;
use crate::entity::Fingerprint;
use crate::entity::Subscription;
use crate::repository::SubscriptionRepository;
use crate::repository::error::RepositoryError;

#[derive(Clone, Default, Serialize, Deserialize)]
struct State {
    next_id: i64,
    subscriptions: BTreeMap<i64, Subscription>,
}

impl State {
    fn find(&self, user_id: i64, kind: ConnectorKind, target_id: &str) -> Option<i64> {
        self.subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.kind == kind && s.target_id == target_id)
            .map(|s| s.id)
    }
}

pub struct MemoryRepository {
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryRepository {
    /// Creates an empty store that lives only as long as the process.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next_id: 1,
                subscriptions: BTreeMap::new(),
            }),
            snapshot_path: None,
        }
    }

    /// Opens a store backed by a snapshot file, loading it if it exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();

        let state = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read(&path).await?;
            let mut state: State = serde_json::from_slice(&raw)?;
            let max_id = state.subscriptions.keys().max().copied().unwrap_or(0);
            state.next_id = state.next_id.max(max_id + 1);
            info!(
                "Loaded {} subscriptions from {}",
                state.subscriptions.len(),
                path.display()
            );
            state
        } else {
            debug!("Snapshot {} does not exist. Starting empty.", path.display());
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            State {
                next_id: 1,
                subscriptions: BTreeMap::new(),
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    async fn persist(&self, state: &State) -> Result<(), RepositoryError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let raw = serde_json::to_vec(state)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Writes `next` to the snapshot and only then makes it the live state.
    ///
    /// On error `current` is left untouched.
    async fn commit(&self, current: &mut State, next: State) -> Result<(), RepositoryError> {
        self.persist(&next).await?;
        *current = next;
        Ok(())
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryRepository {
    async fn upsert_subscription(
        &self,
        user_id: i64,
        kind: ConnectorKind,
        target_id: &str,
        display_name: Option<&str>,
    ) -> Result<Subscription, RepositoryError> {
        let mut state = self.state.write().await;
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let mut next = state.clone();
        let subscription = match next.find(user_id, kind, target_id) {
            Some(id) => {
                let existing = next
                    .subscriptions
                    .get_mut(&id)
                    .ok_or(RepositoryError::SubscriptionNotFound { id })?;
                existing.display_name = display_name;
                existing.fingerprint = None;
                existing.clone()
            }
            None => {
                let id = next.next_id;
                next.next_id += 1;
                let subscription = Subscription {
                    id,
                    user_id,
                    kind,
                    target_id: target_id.to_string(),
                    display_name,
                    fingerprint: None,
                    created_at: Utc::now(),
                };
                next.subscriptions.insert(id, subscription.clone());
                subscription
            }
        };

        self.commit(&mut state, next).await?;
        Ok(subscription)
    }

    async fn delete_subscription(
        &self,
        user_id: i64,
        kind: ConnectorKind,
        target_id: &str,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(id) = state.find(user_id, kind, target_id) else {
            return Ok(false);
        };
        let mut next = state.clone();
        next.subscriptions.remove(&id);
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    async fn list_subscriptions_for_target(
        &self,
        kind: ConnectorKind,
        target_id: &str,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.kind == kind && s.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: i64,
        kind: ConnectorKind,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.kind == kind)
            .cloned()
            .collect())
    }

    async fn list_all_targets(
        &self,
        kind: ConnectorKind,
    ) -> Result<BTreeSet<String>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.kind == kind)
            .map(|s| s.target_id.clone())
            .collect())
    }

    async fn update_fingerprint(
        &self,
        subscription_id: i64,
        fingerprint: &Fingerprint,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or(RepositoryError::SubscriptionNotFound {
                id: subscription_id,
            })?;
        let previous = subscription.fingerprint.replace(fingerprint.clone());

        if let Err(e) = self.persist(&state).await {
            if let Some(subscription) = state.subscriptions.get_mut(&subscription_id) {
                subscription.fingerprint = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> Result<usize, RepositoryError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.subscriptions.retain(|_, s| s.user_id != user_id);
        let removed = state.subscriptions.len() - next.subscriptions.len();
        if removed > 0 {
            self.commit(&mut state, next).await?;
        }
        Ok(removed)
    }
}
