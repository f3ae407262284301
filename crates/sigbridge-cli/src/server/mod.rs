//! HTTP sign service.
//!
//! Routes:
//! - `POST /sign` signs `{cmd, src, seq}` (payload as hex)
//! - `GET /sign/appinfo` returns the app info file as JSON
//! - `GET /sign/status` reports whether the sign module is loaded

mod error;
mod handlers;
mod model;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use sigbridge::{ModuleProvider, Signer, SystemModules};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use error::ApiError;

pub struct AppState<P: ModuleProvider = SystemModules> {
    pub signer: Arc<Signer<P>>,
    pub appinfo: Arc<PathBuf>,
}

impl<P: ModuleProvider> AppState<P> {
    pub fn new(signer: Arc<Signer<P>>, appinfo: PathBuf) -> Self {
        Self {
            signer,
            appinfo: Arc::new(appinfo),
        }
    }
}

impl<P: ModuleProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            signer: Arc::clone(&self.signer),
            appinfo: Arc::clone(&self.appinfo),
        }
    }
}

pub fn router<P>(state: AppState<P>) -> Router
where
    P: ModuleProvider + Send + Sync + 'static,
{
    Router::new()
        .route("/sign", post(handlers::sign::<P>))
        .route("/sign/appinfo", get(handlers::appinfo::<P>))
        .route("/sign/status", get(handlers::status::<P>))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Sign service listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
