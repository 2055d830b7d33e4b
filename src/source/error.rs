use crate::entity::ObservedStateBuilderError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SourceError {
    #[error("`{target}` is not a valid target: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Target `{target}` was not found upstream.")]
    TargetNotFound { target: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Upstream returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to parse API response: {0}")]
    JsonParseFailed(#[from] serde_json::Error),

    #[error("Failed to parse feed: {0}")]
    FeedParseFailed(#[from] feed_rs::parser::ParseFeedError),

    #[error("Source contains no items (target: {target}).")]
    EmptySource { target: String },

    #[error("Invalid data from API: missing field `{field}`.")]
    MissingField { field: String },

    #[error("Upstream API error: {message}")]
    ApiError { message: String },

    #[error("Incomplete observed state: {0}")]
    StateIncomplete(#[from] ObservedStateBuilderError),

    #[error("Unexpected error: {message}")]
    UnexpectedResult { message: String },
}

impl SourceError {
    pub fn invalid_target(target: &str, reason: impl Into<String>) -> Self {
        SourceError::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::RequestFailed(Box::new(e))
    }
}
