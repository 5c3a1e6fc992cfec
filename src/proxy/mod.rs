//! Backend proxies and their composition into one endpoint's backend list.

mod exec;
mod exec_cached;
mod file;
mod http;
mod rewrite;

pub use exec::ExecProxy;
pub use exec_cached::ExecCachedProxy;
pub use file::FileProxy;
pub use http::HttpProxy;
pub use rewrite::RewriteProxy;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{self, EndpointConfig, ExporterConfig};
use crate::error::{ConfigError, ScrapeError};
use crate::exposition::{self, MetricFamily, EXPORTED_INSTANCE_LABEL};

/// Request-scoped scrape inputs.
#[derive(Clone, Debug, Default)]
pub struct ScrapeParams {
    /// Query pairs from the incoming scrape request, forwarded to HTTP
    /// backends that opt in.
    pub query: Vec<(String, String)>,
}

/// The one capability every backend kind shares. Cancellation is caller
/// driven: dropping the returned future aborts the scrape.
#[async_trait]
pub trait MetricProxy: Send + Sync {
    async fn scrape(&self, params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError>;
}

/// One shimmed backend of an endpoint, with its configured name kept for
/// logging.
pub struct EndpointBackend {
    pub name: String,
    pub proxy: Arc<dyn MetricProxy>,
}

/// Build the shimmed backend list for one endpoint. Fails on any
/// misconfiguration; on success every exporter is wrapped in a
/// [`RewriteProxy`] carrying its identity label and additional labels.
pub fn build_backends(endpoint: &EndpointConfig) -> Result<Vec<EndpointBackend>, ConfigError> {
    let mut used_names = BTreeSet::new();
    let mut backends = Vec::with_capacity(endpoint.exporters.len());

    for exporter in &endpoint.exporters {
        let base = exporter.base();
        if !used_names.insert(base.name.clone()) {
            return Err(ConfigError::DuplicateExporterName {
                name: base.name.clone(),
            });
        }
        for label in base.labels.keys() {
            if label == EXPORTED_INSTANCE_LABEL {
                return Err(ConfigError::ReservedLabel {
                    name: base.name.clone(),
                    label: EXPORTED_INSTANCE_LABEL,
                });
            }
            if !exposition::is_valid_label_name(label) {
                return Err(ConfigError::InvalidLabelName {
                    name: base.name.clone(),
                    label: label.clone(),
                });
            }
        }

        let inner: Arc<dyn MetricProxy> = match exporter {
            ExporterConfig::Http(http) => {
                debug!(name = %base.name, address = %http.address, "adding http exporter");
                Arc::new(HttpProxy::new(http)?)
            }
            ExporterConfig::File(file) => {
                debug!(name = %base.name, path = %file.path.display(), "adding file exporter");
                Arc::new(FileProxy::new(&file.path))
            }
            ExporterConfig::Exec(exec) => {
                if exec.command.is_empty() {
                    return Err(ConfigError::EmptyCommand {
                        name: base.name.clone(),
                    });
                }
                debug!(name = %base.name, command = %exec.command, "adding exec exporter");
                Arc::new(ExecProxy::new(&exec.command, exec.args.clone()))
            }
            ExporterConfig::ExecCached(exec) => {
                if exec.command.is_empty() {
                    return Err(ConfigError::EmptyCommand {
                        name: base.name.clone(),
                    });
                }
                let interval = config::seconds(exec.exec_interval).ok_or_else(|| {
                    ConfigError::InvalidDuration {
                        name: base.name.clone(),
                        field: "exec_interval",
                    }
                })?;
                debug!(name = %base.name, command = %exec.command, "adding cached exec exporter");
                Arc::new(ExecCachedProxy::new(&exec.command, exec.args.clone(), interval))
            }
        };

        let identity = (!base.no_rewrite).then(|| base.name.clone());
        backends.push(EndpointBackend {
            name: base.name.clone(),
            proxy: Arc::new(RewriteProxy::new(inner, identity, base.labels.clone())),
        });
    }

    Ok(backends)
}
