pub mod auth;
pub mod config;
pub mod endpoint;
mod error;
pub mod exposition;
pub mod proxy;
pub mod registry;
pub mod server;

pub use config::{
    AuthType, BaseExporterConfig, EndpointConfig, ExecCachedExporterConfig, ExecExporterConfig,
    ExporterConfig, FileExporterConfig, HttpExporterConfig, RelayConfig,
};
pub use endpoint::AggregatingEndpoint;
pub use error::{ConfigError, MergeConflict, ScrapeError};
pub use exposition::{
    LabelSet, MetricFamily, MetricKind, Sample, EXPORTED_INSTANCE_LABEL, TEXT_CONTENT_TYPE,
};
pub use proxy::{
    EndpointBackend, ExecCachedProxy, ExecProxy, FileProxy, HttpProxy, MetricProxy, RewriteProxy,
    ScrapeParams,
};
pub use registry::EndpointRegistry;
pub use server::{parse_listen_url, ListenAddr};
