use crate::errors::{ImportError, ImportResult};
use clap::{ArgAction, Parser};
use serde::Deserialize;
use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

/// Environment fallback for the connection string.
pub const DATABASE_URL_ENV: &str = "BUCKET_FILTER_DATABASE_URL";

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Register a bucket filter and backfill unclassified events"
)]
pub struct Args {
    /// JSON config file holding `DBConn`
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Database URL (overrides BUCKET_FILTER_DATABASE_URL and the config file)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Which bucket this match will go to
    #[arg(long)]
    pub bucket_name: Option<String>,

    /// Which regex will match this bucket (prompted for when absent)
    #[arg(long)]
    pub bucket_filter: Option<String>,

    /// Comma-separated list of hosts to restrict this filter to matching on
    #[arg(long, value_delimiter = ',')]
    pub only_on: Vec<String>,

    /// Wait for test data on stdin and check the regex against it
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub test_data: bool,

    /// On a match, don't pass the event on to other buckets
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub eat_it: bool,

    /// Record matches
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub report_it: bool,

    /// Update filter usage count on matches
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub update_counts: bool,

    /// Apply the bucket to unclassified events
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub apply: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Parse a full argv. A bare invocation (program name only) yields `None` so
/// the caller can print usage and exit successfully.
pub fn parse_args_from<I, T>(argv: I) -> Result<Option<Args>, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
    if argv.len() <= 1 {
        return Ok(None);
    }
    Args::try_parse_from(argv).map(Some)
}

/// On-disk config file layout.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "DBConn")]
    pub db_conn: Vec<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> ImportResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| ImportError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: format!("opening config file: {}", err),
        })?;
        serde_json::from_str(&raw).map_err(|err| ImportError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// The first configured connection string.
    pub fn primary_url(&self, path: &Path) -> ImportResult<String> {
        self.db_conn
            .first()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ImportError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: "`DBConn` holds no connection string".into(),
            })
    }
}

/// Everything the filter import needs to know, with each toggle defaulting
/// to `true` and no host restrictions.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub bucket_name: String,
    pub filter_pattern: String,
    pub only_on: Vec<String>,
    pub eat_it: bool,
    pub report_it: bool,
    pub update_counts: bool,
    pub apply: bool,
    pub self_test: bool,
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            filter_pattern: String::new(),
            only_on: Vec::new(),
            eat_it: true,
            report_it: true,
            update_counts: true,
            apply: true,
            self_test: true,
        }
    }
}

impl Registration {
    /// Build from parsed args. The filter pattern is left as given (possibly
    /// empty); prompting for it is the caller's job.
    pub fn from_args(args: &Args) -> ImportResult<Self> {
        let bucket_name = args
            .bucket_name
            .clone()
            .ok_or(ImportError::InputMissing("bucket name"))?;
        ensure_bucket_name_valid(&bucket_name)?;

        Ok(Self {
            bucket_name,
            filter_pattern: args.bucket_filter.clone().unwrap_or_default(),
            only_on: normalize_hosts(&args.only_on),
            eat_it: args.eat_it,
            report_it: args.report_it,
            update_counts: args.update_counts,
            apply: args.apply,
            self_test: args.test_data,
        })
    }
}

const BUCKET_NAME_MAX_LEN: usize = 255;

/// Validate a bucket name before it reaches the store.
///
/// Names must be non-empty, free of surrounding whitespace and control
/// characters, and at most 255 bytes.
pub fn ensure_bucket_name_valid(name: &str) -> ImportResult<()> {
    let invalid = |reason: &str| ImportError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.into(),
    };

    if name.is_empty() {
        return Err(ImportError::InputMissing("bucket name"));
    }
    if name.trim() != name {
        return Err(invalid("cannot begin or end with whitespace"));
    }
    if name.len() > BUCKET_NAME_MAX_LEN {
        return Err(invalid("must be at most 255 bytes"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("cannot contain control characters"));
    }
    Ok(())
}

/// Trim host entries, drop blanks and repeated hosts, keep first-seen order.
pub fn normalize_hosts(raw: &[String]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for host in raw.iter().map(|h| h.trim()).filter(|h| !h.is_empty()) {
        if !hosts.iter().any(|seen| seen == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

/// Pick the connection string: `--database-url`, then the environment, then
/// the config file.
pub fn resolve_database_url(args: &Args, env_url: Option<String>) -> ImportResult<String> {
    if let Some(url) = args.database_url.as_ref().filter(|u| !u.trim().is_empty()) {
        return Ok(url.trim().to_string());
    }
    if let Some(url) = env_url.filter(|u| !u.trim().is_empty()) {
        return Ok(url.trim().to_string());
    }
    match &args.config {
        Some(path) => ConfigFile::load(path)?.primary_url(path),
        None => Err(ImportError::ConfigMissing),
    }
}

/// Read the environment fallback for the connection string.
pub fn database_url_from_env() -> Option<String> {
    env::var(DATABASE_URL_ENV).ok()
}
