use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Stream stalled after {0} seconds without data")]
    Stalled(u64),
}

impl FeedError {
    /// Whether reconnecting may succeed. Server-side failures and lost
    /// connections are retryable; client-side rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Network(_) | FeedError::Stalled(_) => true,
            FeedError::Api { status, .. } => *status >= 500,
            FeedError::Parse(_) | FeedError::Credentials(_) => false,
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            FeedError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return FeedError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) => FeedError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => FeedError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split_at_500() {
        let server = FeedError::Api {
            status: 503,
            message: String::new(),
        };
        let client = FeedError::Api {
            status: 420,
            message: String::new(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(FeedError::Network("reset".into()).is_retryable());
        assert!(FeedError::Stalled(90).is_retryable());
        assert!(!FeedError::Credentials("missing".into()).is_retryable());
        assert_eq!(client.status(), Some(420));
    }
}
