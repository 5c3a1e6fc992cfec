use thiserror::Error;

use crate::exposition::MetricKind;

/// Fatal misconfiguration detected at startup. Nothing is served when any of
/// these occur.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("endpoint paths must not be empty")]
    EmptyEndpointPath,
    #[error("endpoint path used twice: {path}")]
    DuplicateEndpointPath { path: String },
    #[error("exporter name used twice for one endpoint: {name}")]
    DuplicateExporterName { name: String },
    #[error("exporter {name}: cannot override the {label} label with additional labels")]
    ReservedLabel { name: String, label: &'static str },
    #[error("exporter {name}: invalid label name {label:?}")]
    InvalidLabelName { name: String, label: String },
    #[error("exporter {name}: command must not be empty")]
    EmptyCommand { name: String },
    #[error("exporter {name}: {field} must be a positive number of seconds")]
    InvalidDuration { name: String, field: &'static str },
    #[error("exporter {name}: {message}")]
    Exporter { name: String, message: String },
    #[error("endpoint {path}: scrape_timeout must be a positive number of seconds")]
    InvalidScrapeTimeout { path: String },
    #[error("endpoint {path}: auth_type basic requires htpasswd_file")]
    MissingHtpasswdFile { path: String },
    #[error("htpasswd file {path}: {message}")]
    Htpasswd { path: String, message: String },
    #[error("invalid listen url {url}: {message}")]
    InvalidListenUrl { url: String, message: String },
}

/// Why a single backend produced no metrics for one scrape. These never fail
/// the endpoint; the affected backend just contributes nothing. Cloneable so
/// one exec outcome can be broadcast to every coalesced waiter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("backend error: {message}")]
    Backend { message: String },
    #[error("decode error: {message}")]
    Decode { message: String },
    #[error("scrape timed out before the backend produced a result")]
    Timeout,
}

/// Two backends produced the same family name with incompatible types. The
/// merged response would be malformed, so the scrape fails as a whole.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("metric family {family} aggregated with conflicting types {left} and {right}")]
pub struct MergeConflict {
    pub family: String,
    pub left: MetricKind,
    pub right: MetricKind,
}
