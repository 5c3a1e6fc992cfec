//! One externally reachable scrape endpoint over a set of shimmed backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::join_all;
use tracing::{debug, error};

use crate::auth::{self, BasicAuth};
use crate::config::{self, AuthType, EndpointConfig};
use crate::error::{ConfigError, MergeConflict, ScrapeError};
use crate::exposition::{self, MetricFamily, MetricKind, TEXT_CONTENT_TYPE};
use crate::proxy::{self, EndpointBackend, ScrapeParams};

pub struct AggregatingEndpoint {
    path: String,
    backends: Vec<EndpointBackend>,
    scrape_timeout: Duration,
    auth: Option<BasicAuth>,
}

impl AggregatingEndpoint {
    pub fn from_config(endpoint: &EndpointConfig) -> Result<Self, ConfigError> {
        if endpoint.path.trim_matches('/').is_empty() {
            return Err(ConfigError::EmptyEndpointPath);
        }
        let path = if endpoint.path.starts_with('/') {
            endpoint.path.clone()
        } else {
            format!("/{}", endpoint.path)
        };

        let scrape_timeout = config::seconds(endpoint.scrape_timeout)
            .ok_or_else(|| ConfigError::InvalidScrapeTimeout { path: path.clone() })?;

        let auth = match endpoint.auth_type {
            AuthType::None => None,
            AuthType::Basic => {
                let htpasswd = endpoint.htpasswd_file.as_ref().ok_or_else(|| {
                    ConfigError::MissingHtpasswdFile { path: path.clone() }
                })?;
                Some(BasicAuth::from_file(htpasswd)?)
            }
        };

        let backends = proxy::build_backends(endpoint)?;
        Ok(Self::new(path, backends, scrape_timeout, auth))
    }

    pub fn new(
        path: String,
        backends: Vec<EndpointBackend>,
        scrape_timeout: Duration,
        auth: Option<BasicAuth>,
    ) -> Self {
        Self {
            path,
            backends,
            scrape_timeout,
            auth,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fan out to every backend, then merge in declaration order. A failing
    /// backend is logged and contributes nothing; only a merge conflict
    /// fails the scrape.
    pub async fn scrape(&self, params: &ScrapeParams) -> Result<Vec<MetricFamily>, MergeConflict> {
        let scrapes = self.backends.iter().map(|backend| async move {
            match tokio::time::timeout(self.scrape_timeout, backend.proxy.scrape(params)).await {
                Ok(result) => result,
                Err(_) => Err(ScrapeError::Timeout),
            }
        });
        let results = join_all(scrapes).await;

        let mut merger = FamilyMerger::default();
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(families) => {
                    debug!(
                        path = %self.path,
                        backend = %backend.name,
                        families = families.len(),
                        "backend scrape succeeded"
                    );
                    merger.fold(families)?;
                }
                Err(err) => {
                    error!(
                        path = %self.path,
                        backend = %backend.name,
                        error = %err,
                        "backend scrape failed"
                    );
                }
            }
        }
        Ok(merger.into_families())
    }
}

/// Declaration-order family merge. Same-name families from different
/// backends are additive; a sample with an identical name and label set
/// replaces its predecessor (last writer wins).
#[derive(Default)]
struct FamilyMerger {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
}

impl FamilyMerger {
    fn fold(&mut self, incoming: Vec<MetricFamily>) -> Result<(), MergeConflict> {
        for family in incoming {
            let Some(&at) = self.index.get(&family.name) else {
                self.index.insert(family.name.clone(), self.families.len());
                self.families.push(family);
                continue;
            };

            let existing = &mut self.families[at];
            existing.kind = reconcile_kinds(&family.name, existing.kind, family.kind)?;
            if existing.help.is_none() {
                existing.help = family.help;
            }
            for sample in family.samples {
                match existing
                    .samples
                    .iter_mut()
                    .find(|s| s.name == sample.name && s.labels == sample.labels)
                {
                    Some(slot) => *slot = sample,
                    None => existing.samples.push(sample),
                }
            }
        }
        Ok(())
    }

    fn into_families(self) -> Vec<MetricFamily> {
        self.families
    }
}

/// An untyped family yields to a typed peer; two distinct concrete types
/// cannot be emitted under one name.
fn reconcile_kinds(
    family: &str,
    left: MetricKind,
    right: MetricKind,
) -> Result<MetricKind, MergeConflict> {
    match (left, right) {
        (left, right) if left == right => Ok(left),
        (MetricKind::Untyped, right) => Ok(right),
        (left, MetricKind::Untyped) => Ok(left),
        (left, right) => Err(MergeConflict {
            family: family.to_string(),
            left,
            right,
        }),
    }
}

/// GET handler for one endpoint.
pub(crate) async fn serve_scrape(
    State(endpoint): State<Arc<AggregatingEndpoint>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    if let Some(auth) = &endpoint.auth {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if !auth.verify(authorization) {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, auth::CHALLENGE)],
                "unauthorized\n",
            )
                .into_response();
        }
    }

    let params = ScrapeParams { query };
    match endpoint.scrape(&params).await {
        Ok(families) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
            exposition::encode(&families),
        )
            .into_response(),
        Err(err) => {
            error!(path = %endpoint.path, error = %err, "scrape merge failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")).into_response()
        }
    }
}
