//! The migration job, read from a TOML file.
//!
//! ```toml
//! repo = "owner/name"
//! users = "johndoe: jdoe78, *: *"
//! labels = "type=defect: bug, resolution=wontfix: wontfix"
//! tickets = "tickets.csv"
//! comments = "comments.csv"
//!
//! [pacing]
//! per_minute = 36
//! ```
//!
//! Relative paths are taken from the directory holding the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use encoding_rs::Encoding;
use serde::Deserialize;
use thiserror::Error;

use crate::pacing::{PacingLimits, WindowLimit};
use crate::repo_name::{self, RepoName};

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Repo(#[from] repo_name::ParseError),
    #[error("unsupported encoding {0:?}")]
    Encoding(String),
    #[error("option \"{option}\" {reason}")]
    Invalid { option: &'static str, reason: String },
    #[error("no GitHub token: set \"token\" in the config, pass --token or set GITHUB_TOKEN")]
    MissingToken,
}

fn default_users() -> String {
    "*: *".to_string()
}

fn default_tickets() -> PathBuf {
    PathBuf::from("tickets.csv")
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    repo: String,
    token: Option<String>,
    #[serde(default = "default_users")]
    users: String,
    labels: Option<String>,
    keywords: Option<String>,
    #[serde(default = "default_tickets")]
    tickets: PathBuf,
    comments: Option<PathBuf>,
    attachments: Option<PathBuf>,
    attachments_prefix: Option<String>,
    external_ref_url: Option<String>,
    #[serde(default = "default_encoding")]
    encoding: String,
    #[serde(default)]
    pacing: PacingSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PacingSection {
    per_minute: usize,
    minute_window_secs: u64,
    per_hour: usize,
    hour_window_secs: u64,
    min_wait_secs: u64,
    budget_buffer: u64,
    budget_min_wait_secs: u64,
    report_threshold_secs: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        PacingSection {
            per_minute: 36,
            minute_window_secs: 62,
            per_hour: 300,
            hour_window_secs: 3660,
            min_wait_secs: 3,
            budget_buffer: 10,
            budget_min_wait_secs: 15,
            report_threshold_secs: 65,
        }
    }
}

impl PacingSection {
    fn limits(&self) -> Result<PacingLimits, ConfigError> {
        let window = |option: &'static str, calls: usize, secs: u64, name: &str| {
            if calls == 0 || secs == 0 {
                return Err(ConfigError::Invalid {
                    option,
                    reason: "must allow at least one call in a non-empty window".to_string(),
                });
            }
            Ok(WindowLimit {
                calls,
                period: Duration::from_secs(secs),
                name: name.to_string(),
            })
        };
        Ok(PacingLimits {
            windows: vec![
                window("pacing.per_minute", self.per_minute, self.minute_window_secs, "minute")?,
                window("pacing.per_hour", self.per_hour, self.hour_window_secs, "hour")?,
            ],
            min_wait: Duration::from_secs(self.min_wait_secs),
            budget_buffer: self.budget_buffer,
            budget_min_wait: Duration::from_secs(self.budget_min_wait_secs),
            report_threshold: Duration::from_secs(self.report_threshold_secs),
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MigrationConfig {
    pub repo: RepoName,
    pub token: String,
    pub users: String,
    pub labels: Option<String>,
    pub keywords: Option<String>,
    pub tickets: PathBuf,
    pub comments: Option<PathBuf>,
    pub attachments: Option<PathBuf>,
    pub attachments_prefix: Option<String>,
    pub external_ref_url: Option<String>,
    pub encoding: &'static Encoding,
    pub pacing: PacingLimits,
    /// Without it nothing is changed on the remote.
    pub commit: bool,
}

impl MigrationConfig {
    /// `token` overrides the one in the file.
    pub(crate) fn load(path: &Path, token: Option<String>, commit: bool) -> Result<MigrationConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        MigrationConfig::from_file(file, base, token, commit)
    }

    fn from_file(
        file: ConfigFile,
        base: &Path,
        token: Option<String>,
        commit: bool,
    ) -> Result<MigrationConfig, ConfigError> {
        let encoding = Encoding::for_label(file.encoding.trim().as_bytes())
            .filter(|e| e.is_ascii_compatible())
            .ok_or_else(|| ConfigError::Encoding(file.encoding.clone()))?;
        let token = token
            .or(file.token)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        Ok(MigrationConfig {
            repo: RepoName::from_str(&file.repo)?,
            token,
            users: file.users,
            labels: file.labels,
            keywords: file.keywords,
            tickets: resolve(file.tickets),
            comments: file.comments.map(resolve),
            attachments: file.attachments.map(resolve),
            attachments_prefix: file.attachments_prefix,
            external_ref_url: file.external_ref_url,
            encoding,
            pacing: file.pacing.limits()?,
            commit,
        })
    }
}
