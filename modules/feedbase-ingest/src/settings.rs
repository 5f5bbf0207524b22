use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use feed_client::{is_streaming_endpoint, AuthVersion};

use crate::collector::FeedMode;
use crate::pipeline::PipelineOptions;

pub const DEFAULT_STORE_URL: &str = "http://127.0.0.1:5984";
pub const DEFAULT_LOG_FILE: &str = "Collector.log";

/// Command line of the `feedbase` collector. Every option except
/// `--settings` may also come from the settings file; values given here win.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "feedbase", about = "Collect a social feed into a document store")]
pub struct Cli {
    /// TOML file with any of the options below
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Document store URL, or `memory:` for an in-process store
    #[arg(long)]
    pub store_url: Option<String>,

    /// Database name
    #[arg(long)]
    pub db_name: Option<String>,

    /// File with name=value credential lines
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Auth scheme: 1 (user token) or 2 (application token)
    #[arg(long)]
    pub auth_version: Option<u8>,

    /// Feed endpoint, e.g. statuses/filter
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Endpoint parameters as NAME=VALUE
    #[arg(long, num_args = 1..)]
    pub parameters: Vec<String>,

    /// Page through a REST endpoint until it runs dry
    #[arg(long)]
    pub pager: bool,

    /// Keep at most this many content documents
    #[arg(long)]
    pub prune: Option<u64>,

    /// Also save reposted originals
    #[arg(long)]
    pub retweets: bool,

    /// Save feed items as received
    #[arg(long)]
    pub save_raw: bool,

    /// Infer locations for content without coordinates
    #[arg(long)]
    pub geocode: bool,

    /// Drop content without coordinates
    #[arg(long)]
    pub only_coords: bool,

    /// Also log to a file
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_LOG_FILE)]
    pub log_file: Option<PathBuf>,
}

/// Settings file contents. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store_url: Option<String>,
    pub db_name: Option<String>,
    pub credentials: Option<PathBuf>,
    pub auth_version: Option<u8>,
    pub endpoint: Option<String>,
    pub parameters: Vec<String>,
    pub pager: bool,
    pub prune: Option<u64>,
    pub retweets: bool,
    pub save_raw: bool,
    pub geocode: bool,
    pub only_coords: bool,
    pub log_file: Option<PathBuf>,
}

/// Load and parse a settings file.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
    Ok(settings)
}

/// Fully resolved collector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub store_url: String,
    pub db_name: String,
    pub credentials: PathBuf,
    pub auth_version: AuthVersion,
    pub endpoint: String,
    pub parameters: Vec<(String, String)>,
    pub mode: FeedMode,
    pub pipeline: PipelineOptions,
    pub geocode: bool,
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Merge with the settings file named by `--settings`, if any.
    pub fn resolve(self) -> Result<RunConfig> {
        let file = match &self.settings {
            Some(path) => load_settings(path)?,
            None => Settings::default(),
        };
        self.merge(file)
    }

    /// Merge with already loaded settings. Command line values win.
    pub fn merge(self, file: Settings) -> Result<RunConfig> {
        let Some(db_name) = self.db_name.or(file.db_name) else {
            bail!("a database name is required (--db-name)");
        };
        let Some(endpoint) = self.endpoint.or(file.endpoint) else {
            bail!("an endpoint is required (--endpoint)");
        };
        let Some(credentials) = self.credentials.or(file.credentials) else {
            bail!("a credentials file is required (--credentials)");
        };

        let version = self.auth_version.or(file.auth_version).unwrap_or(1);
        let auth_version = AuthVersion::from_number(version)
            .with_context(|| format!("unsupported auth version {version}"))?;

        let raw_params = if self.parameters.is_empty() {
            file.parameters
        } else {
            self.parameters
        };
        let parameters = raw_params
            .iter()
            .map(|p| parse_parameter(p))
            .collect::<Result<Vec<_>>>()?;

        let pager = self.pager || file.pager;
        let mode = if pager || !is_streaming_endpoint(&endpoint) {
            FeedMode::Pager
        } else {
            FeedMode::Stream
        };

        Ok(RunConfig {
            store_url: self
                .store_url
                .or(file.store_url)
                .unwrap_or_else(|| DEFAULT_STORE_URL.to_string()),
            db_name,
            credentials,
            auth_version,
            endpoint,
            parameters,
            mode,
            pipeline: PipelineOptions {
                follow_reposts: self.retweets || file.retweets,
                save_raw: self.save_raw || file.save_raw,
                only_coords: self.only_coords || file.only_coords,
                prune_limit: self.prune.or(file.prune),
            },
            geocode: self.geocode || file.geocode,
            log_file: self.log_file.or(file.log_file),
        })
    }
}

/// Split `name=value`. The value may itself contain `=`.
pub fn parse_parameter(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("invalid parameter {raw:?}, expected NAME=VALUE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["feedbase"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn parses_parameters() {
        assert_eq!(
            parse_parameter("track=pizza,beer").unwrap(),
            ("track".to_string(), "pizza,beer".to_string())
        );
        assert_eq!(
            parse_parameter("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_parameter("track").is_err());
        assert!(parse_parameter("=x").is_err());
    }

    #[test]
    fn command_line_only() {
        let config = cli(&[
            "--db-name", "tweets",
            "--credentials", "creds.txt",
            "--endpoint", "statuses/filter",
            "--parameters", "track=pizza", "language=en",
            "--retweets",
            "--prune", "1000",
        ])
        .merge(Settings::default())
        .unwrap();

        assert_eq!(config.store_url, DEFAULT_STORE_URL);
        assert_eq!(config.auth_version, AuthVersion::User);
        assert_eq!(config.mode, FeedMode::Stream);
        assert_eq!(config.parameters.len(), 2);
        assert!(config.pipeline.follow_reposts);
        assert!(!config.pipeline.save_raw);
        assert_eq!(config.pipeline.prune_limit, Some(1000));
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn command_line_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
store_url = "http://couch:5984"
db_name = "from_file"
credentials = "file-creds.txt"
endpoint = "search/tweets"
parameters = ["q=pizza"]
auth_version = 2
geocode = true
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = cli(&["--settings", &path, "--db-name", "from_cli"])
            .resolve()
            .unwrap();

        assert_eq!(config.db_name, "from_cli");
        assert_eq!(config.store_url, "http://couch:5984");
        assert_eq!(config.auth_version, AuthVersion::App);
        assert_eq!(config.parameters, vec![("q".to_string(), "pizza".to_string())]);
        assert_eq!(config.mode, FeedMode::Pager);
        assert!(config.geocode);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<Settings>("db_nmae = \"x\"").unwrap_err();
        assert!(err.to_string().contains("db_nmae"));
    }

    #[test]
    fn missing_required_values() {
        let err = cli(&["--endpoint", "statuses/sample", "--credentials", "c"])
            .merge(Settings::default())
            .unwrap_err();
        assert!(err.to_string().contains("database name"));

        let err = cli(&["--db-name", "d", "--endpoint", "statuses/sample", "--credentials", "c", "--auth-version", "3"])
            .merge(Settings::default())
            .unwrap_err();
        assert!(err.to_string().contains("auth version"));
    }

    #[test]
    fn log_file_flag_without_value_uses_default() {
        let config = cli(&[
            "--db-name", "d",
            "--endpoint", "statuses/sample",
            "--credentials", "c",
            "--log-file",
        ])
        .merge(Settings::default())
        .unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from(DEFAULT_LOG_FILE)));
    }
}
