//! Listener bootstrap: `tcp://` and `unix://` listen URLs, graceful shutdown.

use std::path::PathBuf;

use axum::Router;
use tokio::net::{TcpListener, UnixListener};
use tracing::info;

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

pub fn parse_listen_url(url: &str) -> Result<ListenAddr, ConfigError> {
    if let Some(addr) = url.strip_prefix("tcp://") {
        if addr.is_empty() {
            return Err(ConfigError::InvalidListenUrl {
                url: url.to_string(),
                message: "missing host:port".to_string(),
            });
        }
        return Ok(ListenAddr::Tcp(addr.to_string()));
    }
    if let Some(path) = url.strip_prefix("unix://") {
        if path.is_empty() {
            return Err(ConfigError::InvalidListenUrl {
                url: url.to_string(),
                message: "missing socket path".to_string(),
            });
        }
        return Ok(ListenAddr::Unix(PathBuf::from(path)));
    }
    Err(ConfigError::InvalidListenUrl {
        url: url.to_string(),
        message: "expected a tcp:// or unix:// scheme".to_string(),
    })
}

/// Serve until SIGINT or SIGTERM.
pub async fn serve(router: Router, listen: ListenAddr) -> std::io::Result<()> {
    match listen {
        ListenAddr::Tcp(addr) => {
            let listener = TcpListener::bind(&addr).await?;
            info!(addr = %addr, "listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
        ListenAddr::Unix(path) => {
            // A socket file left over from a previous run blocks the bind.
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            info!(path = %path.display(), "listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
    }
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
