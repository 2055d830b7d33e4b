use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use intel_hub::connector::Connector;
use intel_hub::connector::ConnectorSettings;
use intel_hub::connector::ConnectorSettingsBuilder;
use intel_hub::entity::ConnectorKind;
use intel_hub::entity::Fingerprint;
use intel_hub::entity::Notification;
use intel_hub::entity::ObservedState;
use intel_hub::entity::ObservedStateBuilder;
use intel_hub::entity::Subscription;
use intel_hub::messenger::DeliveryError;
use intel_hub::messenger::Messenger;
use intel_hub::repository::MemoryRepository;
use intel_hub::repository::SubscriptionRepository;
use intel_hub::repository::error::RepositoryError;
use intel_hub::source::BaseConnector;
use intel_hub::source::ConnectorInfo;
use intel_hub::source::SourceConnector;
use intel_hub::source::error::SourceError;
use uuid::Uuid;

/// Loads a test response file from the responses directory.
#[allow(dead_code)]
pub fn get_response(filename: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/responses");
    path.push(filename);
    std::fs::read_to_string(path).expect("Failed to read response file")
}

#[allow(dead_code)]
pub fn temp_snapshot_path() -> PathBuf {
    std::env::temp_dir().join(format!("intel-hub-test-{}.json", Uuid::new_v4()))
}

/// A fresh directory path under the system temp dir. Not created.
#[allow(dead_code)]
pub fn temp_snapshot_dir() -> PathBuf {
    std::env::temp_dir().join(format!("intel-hub-test-{}", Uuid::new_v4()))
}

#[allow(dead_code)]
pub fn teardown_snapshot(path: PathBuf) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

// MOCK SOURCE

#[derive(Default)]
#[allow(dead_code)]
pub struct MockSourceState {
    /// Current item id per target.
    pub items: HashMap<String, String>,
    pub fetches: HashMap<String, usize>,
    /// Every fetch in order, with the time it started.
    pub fetch_log: Vec<(String, tokio::time::Instant)>,
    /// Targets whose fetch fails.
    pub failing: HashSet<String>,
    /// Targets that fail verification on subscribe.
    pub unreachable: HashSet<String>,
    pub init_fails: bool,
    pub inits: usize,
}

/// In-memory source. Targets are any non-blank string without whitespace.
#[allow(dead_code)]
pub struct MockSource {
    pub base: BaseConnector,
    pub state: Arc<RwLock<MockSourceState>>,
    /// When set, only moving into this item id counts as a change.
    pub edge_into: Option<String>,
}

#[allow(dead_code)]
impl MockSource {
    pub fn new(kind: ConnectorKind) -> Self {
        let info = ConnectorInfo {
            kind,
            name: format!("Mock {kind}"),
            api_url: "http://localhost".to_string(),
            interval: Duration::from_secs(60),
            target_delay: Duration::ZERO,
            template: "{{ name | html }}: {{ state.item_id }} {{ state.title | html }}",
        };
        Self {
            base: BaseConnector::new(info, 10_000),
            state: Arc::new(RwLock::new(MockSourceState::default())),
            edge_into: None,
        }
    }

    pub fn with_edge_into(mut self, item_id: &str) -> Self {
        self.edge_into = Some(item_id.to_string());
        self
    }

    pub fn set_item(&self, target: &str, item_id: &str) {
        self.state
            .write()
            .unwrap()
            .items
            .insert(target.to_string(), item_id.to_string());
    }

    pub fn set_failing(&self, target: &str, failing: bool) {
        let mut state = self.state.write().unwrap();
        if failing {
            state.failing.insert(target.to_string());
        } else {
            state.failing.remove(target);
        }
    }

    pub fn set_unreachable(&self, target: &str) {
        self.state
            .write()
            .unwrap()
            .unreachable
            .insert(target.to_string());
    }

    pub fn fetches(&self, target: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .fetches
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.state.read().unwrap().fetches.values().sum()
    }

    pub fn fetch_log(&self) -> Vec<(String, tokio::time::Instant)> {
        self.state.read().unwrap().fetch_log.clone()
    }
}

#[async_trait]
impl SourceConnector for MockSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    async fn init(&self) -> Result<(), SourceError> {
        let mut state = self.state.write().unwrap();
        state.inits += 1;
        if state.init_fails {
            return Err(SourceError::ApiError {
                message: "init failed".to_string(),
            });
        }
        Ok(())
    }

    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains(char::is_whitespace) {
            return Err(SourceError::invalid_target(raw, "must not contain spaces"));
        }
        Ok(raw.to_string())
    }

    async fn verify_target(&self, target: &str) -> Result<Option<String>, SourceError> {
        if self.state.read().unwrap().unreachable.contains(target) {
            return Err(SourceError::TargetNotFound {
                target: target.to_string(),
            });
        }
        Ok(Some(format!("Mock {target}")))
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        let item = {
            let mut state = self.state.write().unwrap();
            *state.fetches.entry(target.to_string()).or_default() += 1;
            state
                .fetch_log
                .push((target.to_string(), tokio::time::Instant::now()));
            if state.failing.contains(target) {
                return Err(SourceError::HttpStatus {
                    status: 503,
                    url: format!("http://localhost/{target}"),
                });
            }
            state.items.get(target).cloned()
        };
        let item = item.ok_or_else(|| SourceError::EmptySource {
            target: target.to_string(),
        })?;

        Ok(ObservedStateBuilder::default()
            .target_id(target)
            .title(format!("Item {item}"))
            .url(format!("http://localhost/{target}/{item}"))
            .item_id(item)
            .build()?)
    }

    fn has_changed(&self, old: &Fingerprint, new: &Fingerprint) -> bool {
        match &self.edge_into {
            Some(edge) => old.as_str() != edge && new.as_str() == edge,
            None => old != new,
        }
    }
}

// RECORDING MESSENGER

#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(i64, Notification)>>,
    pub failing: Mutex<HashSet<i64>>,
}

#[allow(dead_code)]
impl RecordingMessenger {
    pub fn fail_for(&self, recipient: i64) {
        self.failing.lock().unwrap().insert(recipient);
    }

    pub fn sent(&self) -> Vec<(i64, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: i64) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, n)| n)
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn deliver(
        &self,
        recipient: i64,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&recipient) {
            return Err(DeliveryError::Rejected {
                recipient,
                description: "Forbidden: bot was blocked by the user".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient, notification.clone()));
        Ok(())
    }
}

// COUNTING REPOSITORY

/// [`MemoryRepository`] that counts fingerprint writes.
#[derive(Default)]
#[allow(dead_code)]
pub struct CountingRepository {
    pub inner: MemoryRepository,
    pub fingerprint_writes: AtomicUsize,
}

#[allow(dead_code)]
impl CountingRepository {
    pub fn writes(&self) -> usize {
        self.fingerprint_writes.load(Ordering::SeqCst)
    }

    pub async fn fingerprint_of(&self, user_id: i64, kind: ConnectorKind) -> Option<String> {
        self.inner
            .list_subscriptions_for_user(user_id, kind)
            .await
            .unwrap()
            .first()
            .and_then(|s| s.fingerprint.as_ref())
            .map(|f| f.as_str().to_string())
    }
}

#[async_trait]
impl SubscriptionRepository for CountingRepository {
    async fn upsert_subscription(
        &self,
        user_id: i64,
        kind: ConnectorKind,
        target_id: &str,
        display_name: Option<&str>,
    ) -> Result<Subscription, RepositoryError> {
        self.inner
            .upsert_subscription(user_id, kind, target_id, display_name)
            .await
    }

    async fn delete_subscription(
        &self,
        user_id: i64,
        kind: ConnectorKind,
        target_id: &str,
    ) -> Result<bool, RepositoryError> {
        self.inner.delete_subscription(user_id, kind, target_id).await
    }

    async fn list_subscriptions_for_target(
        &self,
        kind: ConnectorKind,
        target_id: &str,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        self.inner.list_subscriptions_for_target(kind, target_id).await
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: i64,
        kind: ConnectorKind,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        self.inner.list_subscriptions_for_user(user_id, kind).await
    }

    async fn list_all_targets(
        &self,
        kind: ConnectorKind,
    ) -> Result<BTreeSet<String>, RepositoryError> {
        self.inner.list_all_targets(kind).await
    }

    async fn update_fingerprint(
        &self,
        subscription_id: i64,
        fingerprint: &Fingerprint,
    ) -> Result<(), RepositoryError> {
        self.fingerprint_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_fingerprint(subscription_id, fingerprint).await
    }

    async fn delete_user(&self, user_id: i64) -> Result<usize, RepositoryError> {
        self.inner.delete_user(user_id).await
    }
}

/// Everything a poll-cycle test needs, wired with no delay between targets.
#[allow(dead_code)]
pub struct Harness<S> {
    pub source: Arc<S>,
    pub repository: Arc<CountingRepository>,
    pub messenger: Arc<RecordingMessenger>,
    pub connector: Arc<Connector>,
}

#[allow(dead_code)]
pub fn harness<S: SourceConnector + 'static>(source: S) -> Harness<S> {
    let settings = ConnectorSettingsBuilder::default()
        .target_delay(Duration::ZERO)
        .build()
        .unwrap();
    harness_with(source, settings)
}

#[allow(dead_code)]
pub fn harness_with<S: SourceConnector + 'static>(
    source: S,
    settings: ConnectorSettings,
) -> Harness<S> {
    let source = Arc::new(source);
    let repository = Arc::new(CountingRepository::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let connector = Connector::new(
        source.clone(),
        repository.clone(),
        messenger.clone(),
        settings,
    )
    .expect("Failed to build connector");

    Harness {
        source,
        repository,
        messenger,
        connector,
    }
}
