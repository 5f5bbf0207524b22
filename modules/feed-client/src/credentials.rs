//! Credentials file.
//!
//! Plain `name=value` lines; blank lines and `#` comments are ignored:
//!
//! ```text
//! consumer_key=...
//! consumer_secret=...
//! bearer_token=...
//! ```

use std::path::Path;

use crate::error::{FeedError, Result};

/// How requests are authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthVersion {
    /// User context: the file's bearer token is sent as-is.
    #[default]
    User,
    /// Application only: the consumer key and secret are exchanged for an
    /// app token unless a bearer token is given.
    App,
}

impl AuthVersion {
    /// Version number as accepted on the command line (1 or 2).
    pub fn from_number(version: u8) -> Result<Self> {
        match version {
            1 => Ok(AuthVersion::User),
            2 => Ok(AuthVersion::App),
            other => Err(FeedError::Credentials(format!(
                "unsupported auth version {other} (expected 1 or 2)"
            ))),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub access_token_key: Option<String>,
    pub access_token_secret: Option<String>,
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &self.consumer_secret.as_ref().map(|_| "***"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FeedError::Credentials(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut creds = Self::default();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| {
                FeedError::Credentials(format!("line {}: expected name=value", number + 1))
            })?;
            let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            match name.trim() {
                "consumer_key" => creds.consumer_key = value,
                "consumer_secret" => creds.consumer_secret = value,
                "access_token_key" => creds.access_token_key = value,
                "access_token_secret" => creds.access_token_secret = value,
                "bearer_token" => creds.bearer_token = value,
                other => {
                    tracing::warn!(name = other, "Ignoring unknown credential");
                }
            }
        }
        Ok(creds)
    }

    /// Check that the fields `version` needs are present.
    pub fn validate(&self, version: AuthVersion) -> Result<()> {
        if self.bearer_token.is_some() {
            return Ok(());
        }
        match version {
            AuthVersion::User => Err(FeedError::Credentials(
                "user-context auth needs bearer_token".to_string(),
            )),
            AuthVersion::App if self.consumer_key.is_some() && self.consumer_secret.is_some() => {
                Ok(())
            }
            AuthVersion::App => Err(FeedError::Credentials(
                "app auth needs bearer_token or consumer_key and consumer_secret".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_name_value_lines() {
        let creds = Credentials::parse(
            "# keys\nconsumer_key=abc\n\nconsumer_secret = def \naccess_token_key=\n",
        )
        .unwrap();
        assert_eq!(creds.consumer_key.as_deref(), Some("abc"));
        assert_eq!(creds.consumer_secret.as_deref(), Some("def"));
        assert!(creds.access_token_key.is_none());
        assert!(creds.validate(AuthVersion::App).is_ok());
        assert!(creds.validate(AuthVersion::User).is_err());
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(Credentials::parse("consumer_key abc").is_err());
    }

    #[test]
    fn bearer_token_satisfies_both_versions() {
        let creds = Credentials::bearer("t");
        assert!(creds.validate(AuthVersion::User).is_ok());
        assert!(creds.validate(AuthVersion::App).is_ok());
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bearer_token=xyz").unwrap();
        let creds = Credentials::read_file(file.path()).unwrap();
        assert_eq!(creds.bearer_token.as_deref(), Some("xyz"));
        assert!(!format!("{creds:?}").contains("xyz"));
    }

    #[test]
    fn auth_version_numbers() {
        assert_eq!(AuthVersion::from_number(1).unwrap(), AuthVersion::User);
        assert_eq!(AuthVersion::from_number(2).unwrap(), AuthVersion::App);
        assert!(AuthVersion::from_number(3).is_err());
    }
}
