use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use super::{MetricProxy, ScrapeParams};
use crate::config::{self, HttpExporterConfig};
use crate::error::{ConfigError, ScrapeError};
use crate::exposition::{self, MetricFamily};

/// Scrapes a remote HTTP exporter. The configured timeout bounds the whole
/// transaction; the caller's deadline applies on top of it.
pub struct HttpProxy {
    address: Url,
    client: reqwest::Client,
    forward_url_params: bool,
}

impl HttpProxy {
    pub fn new(exporter: &HttpExporterConfig) -> Result<Self, ConfigError> {
        let address = Url::parse(&exporter.address).map_err(|err| ConfigError::Exporter {
            name: exporter.base.name.clone(),
            message: format!("invalid address {}: {err}", exporter.address),
        })?;
        let timeout = config::seconds(exporter.timeout).ok_or_else(|| {
            ConfigError::InvalidDuration {
                name: exporter.base.name.clone(),
                field: "timeout",
            }
        })?;
        let client = Self::build_client(timeout).map_err(|err| ConfigError::Exporter {
            name: exporter.base.name.clone(),
            message: format!("failed to build http client: {err}"),
        })?;
        Ok(Self {
            address,
            client,
            forward_url_params: exporter.forward_url_params,
        })
    }

    fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder().timeout(timeout).build()
    }
}

#[async_trait]
impl MetricProxy for HttpProxy {
    async fn scrape(&self, params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError> {
        let mut request = self.client.get(self.address.clone());
        if self.forward_url_params && !params.query.is_empty() {
            request = request.query(&params.query);
        }

        let response = request.send().await.map_err(|err| ScrapeError::Backend {
            message: format!("request to {} failed: {err}", self.address),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Backend {
                message: format!("{} returned status {status}", self.address),
            });
        }

        let body = response.bytes().await.map_err(|err| ScrapeError::Backend {
            message: format!("failed to read response from {}: {err}", self.address),
        })?;
        exposition::decode(&body)
    }
}
