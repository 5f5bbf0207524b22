use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeocodeError>;

#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The daily request allowance is spent.
    #[error("Geocoder quota exceeded after {requests} requests")]
    QuotaExceeded { requests: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing API key: {0}")]
    MissingKey(String),
}

impl GeocodeError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, GeocodeError::QuotaExceeded { .. })
    }
}

impl From<reqwest::Error> for GeocodeError {
    fn from(err: reqwest::Error) -> Self {
        GeocodeError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for GeocodeError {
    fn from(err: serde_json::Error) -> Self {
        GeocodeError::Parse(err.to_string())
    }
}
