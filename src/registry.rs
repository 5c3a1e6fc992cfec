//! Startup-time binding of configured paths to aggregating endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::config::RelayConfig;
use crate::endpoint::{serve_scrape, AggregatingEndpoint};
use crate::error::ConfigError;

/// All configured endpoints. Construction is total: either every endpoint
/// builds and registers, or the whole registry fails and nothing serves.
pub struct EndpointRegistry {
    endpoints: Vec<Arc<AggregatingEndpoint>>,
}

impl EndpointRegistry {
    pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        let endpoints = config
            .reverse_exporters
            .iter()
            .map(AggregatingEndpoint::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_endpoints(endpoints)
    }

    pub fn from_endpoints(endpoints: Vec<AggregatingEndpoint>) -> Result<Self, ConfigError> {
        let mut seen_paths = BTreeSet::new();
        let mut registered = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            if endpoint.path().trim_matches('/').is_empty() {
                return Err(ConfigError::EmptyEndpointPath);
            }
            if !seen_paths.insert(endpoint.path().to_string()) {
                return Err(ConfigError::DuplicateEndpointPath {
                    path: endpoint.path().to_string(),
                });
            }
            info!(path = %endpoint.path(), "registered scrape endpoint");
            registered.push(Arc::new(endpoint));
        }

        Ok(Self {
            endpoints: registered,
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new();
        for endpoint in &self.endpoints {
            router = router.route(
                endpoint.path(),
                get(serve_scrape).with_state(Arc::clone(endpoint)),
            );
        }
        router
    }

    /// Router mounted under an external context path prefix.
    pub fn router_with_prefix(&self, context_path: &str) -> Router {
        let context_path = context_path.trim_matches('/');
        if context_path.is_empty() {
            return self.router();
        }
        Router::new().nest(&format!("/{context_path}"), self.router())
    }
}
