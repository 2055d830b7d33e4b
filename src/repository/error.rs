#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("Failed to access snapshot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Subscription not found (ID: {id}).")]
    SubscriptionNotFound { id: i64 },
}
