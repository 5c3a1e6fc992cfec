//! Startup configuration. Parsed once, immutable afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub reverse_exporters: Vec<EndpointConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub htpasswd_file: Option<PathBuf>,
    /// Per-request scrape deadline in seconds.
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout: f64,
    #[serde(default)]
    pub exporters: Vec<ExporterConfig>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Basic,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExporterConfig {
    Http(HttpExporterConfig),
    File(FileExporterConfig),
    Exec(ExecExporterConfig),
    ExecCached(ExecCachedExporterConfig),
}

impl ExporterConfig {
    pub fn base(&self) -> &BaseExporterConfig {
        match self {
            ExporterConfig::Http(config) => &config.base,
            ExporterConfig::File(config) => &config.base,
            ExporterConfig::Exec(config) => &config.base,
            ExporterConfig::ExecCached(config) => &config.base,
        }
    }
}

/// Fields shared by every exporter variant.
#[derive(Clone, Debug, Deserialize)]
pub struct BaseExporterConfig {
    pub name: String,
    /// Suppresses injection of the backend-identity label.
    #[serde(default)]
    pub no_rewrite: bool,
    /// Additional fixed labels. Defaults only: a label the backend already
    /// reports is kept.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpExporterConfig {
    #[serde(flatten)]
    pub base: BaseExporterConfig,
    pub address: String,
    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub forward_url_params: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileExporterConfig {
    #[serde(flatten)]
    pub base: BaseExporterConfig,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecExporterConfig {
    #[serde(flatten)]
    pub base: BaseExporterConfig,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecCachedExporterConfig {
    #[serde(flatten)]
    pub base: BaseExporterConfig,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Execution interval in seconds.
    pub exec_interval: f64,
}

fn default_scrape_timeout() -> f64 {
    30.0
}

fn default_http_timeout() -> f64 {
    10.0
}

/// Convert a seconds field into a duration; `None` for values that make no
/// sense as a timeout or interval.
pub(crate) fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value > 0.0).then(|| Duration::from_secs_f64(value))
}

pub fn load(path: &Path) -> Result<RelayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    serde_yaml::from_str(&raw).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}
