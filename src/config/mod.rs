//! Typed configuration loaded from a TOML file with environment overrides.
//!
//! Loads once at startup. The NATS URL may embed credentials, so it is
//! wrapped in [`SecretString`] to keep it out of logs.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Locations searched, in order, when no config file is given.
pub const SEARCH_PATHS: &[&str] = &["/local/config.toml", "config.toml"];

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    pub nats: NatsConfig,
    pub job: JobConfig,
}

#[derive(Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "empty_secret")]
    pub url: SecretString,
    #[serde(default)]
    pub subject: String,
    /// Empty means the producer falls back to its built-in group name.
    #[serde(default)]
    pub queue_group: String,
}

/// The parameterized job this supervisor runs.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub s3_bucket: String,
    #[serde(default = "default_ext")]
    pub ext: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub meta_required: Vec<String>,
    #[serde(default)]
    pub meta_optional: Vec<String>,
    /// Prefix of the environment variables carrying meta values.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

impl JobConfig {
    /// File extension of the output object, without leading dots.
    pub fn extension(&self) -> &str {
        self.ext.trim_start_matches('.')
    }

    /// Required keys followed by optional keys.
    pub fn whitelist(&self) -> impl Iterator<Item = &str> {
        self.meta_required
            .iter()
            .chain(self.meta_optional.iter())
            .map(String::as_str)
    }
}

impl Config {
    /// Load configuration from `path`, or from the first file found in
    /// [`SEARCH_PATHS`], then apply environment overrides.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => SEARCH_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "no config file found in {}",
                        SEARCH_PATHS.join(", ")
                    ))
                })?,
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))?;
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from TOML text. No environment overrides.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Some(level) = env_var("PARAMJOB_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = env_var("PARAMJOB_NATS_URL") {
            self.nats.url = SecretString::from(url);
        }
        if let Some(subject) = env_var("PARAMJOB_NATS_SUBJECT") {
            self.nats.subject = subject;
        }
        if let Some(group) = env_var("PARAMJOB_NATS_QUEUE_GROUP") {
            self.nats.queue_group = group;
        }
        if let Some(endpoint) = env_var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
    }

    /// Check that every required setting is present, reporting all of the
    /// missing ones at once.
    ///
    /// The NATS subject is checked by the producer when it starts.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("job.cmd", self.job.cmd.as_str()),
            ("job.s3_bucket", self.job.s3_bucket.as_str()),
            ("job.name", self.job.name.as_str()),
            ("job.version", self.job.version.as_str()),
            ("nats.url", self.nats.url.expose_secret()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| *key)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "required settings are not set: {}",
                missing.join(", ")
            )))
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ext() -> String {
    "json".to_string()
}

fn default_env_prefix() -> String {
    "NOMAD_META".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}
