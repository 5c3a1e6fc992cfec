use std::sync::Arc;

use async_trait::async_trait;

use super::{MetricProxy, ScrapeParams};
use crate::error::ScrapeError;
use crate::exposition::{LabelSet, MetricFamily, EXPORTED_INSTANCE_LABEL};

/// Wraps any backend and stamps its samples. The identity label always wins
/// over whatever the backend reported; additional labels are defaults and a
/// backend that reports more specific context keeps it.
pub struct RewriteProxy {
    inner: Arc<dyn MetricProxy>,
    /// `None` when rewriting is disabled for this backend.
    identity: Option<String>,
    defaults: LabelSet,
}

impl RewriteProxy {
    pub fn new(inner: Arc<dyn MetricProxy>, identity: Option<String>, defaults: LabelSet) -> Self {
        Self {
            inner,
            identity,
            defaults,
        }
    }
}

#[async_trait]
impl MetricProxy for RewriteProxy {
    async fn scrape(&self, params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError> {
        let mut families = self.inner.scrape(params).await?;
        for family in &mut families {
            for sample in &mut family.samples {
                if let Some(identity) = &self.identity {
                    sample
                        .labels
                        .insert(EXPORTED_INSTANCE_LABEL.to_string(), identity.clone());
                }
                for (name, value) in &self.defaults {
                    sample
                        .labels
                        .entry(name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        Ok(families)
    }
}
