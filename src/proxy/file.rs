use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{MetricProxy, ScrapeParams};
use crate::error::ScrapeError;
use crate::exposition::{self, MetricFamily};

/// Serves a file's contents as exposition text, for node-exporter style
/// textfile drop-ins.
pub struct FileProxy {
    path: PathBuf,
}

impl FileProxy {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MetricProxy for FileProxy {
    async fn scrape(&self, _params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|err| ScrapeError::Backend {
                message: format!("failed to read {}: {err}", self.path.display()),
            })?;
        exposition::decode(&bytes)
    }
}
