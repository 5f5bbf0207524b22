/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached. Callers decide whether to retry.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Repost chain rejected at {id}: {reason}")]
    RepostChain { id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] feedbase_common::CommonError),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            StoreError::Unavailable(err.to_string())
        } else if let Some(status) = err.status() {
            StoreError::Backend {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            StoreError::InvalidDocument(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
