//! `api` crate: HTTP front door over the scheduling services.
//!
//! All routes are namespaced under `/v1/namespaces/:ns`. Definitions are
//! validated before anything is stored; a rejected definition answers 400
//! with a `{ "code", "message" }` body.

pub mod error;
pub mod handlers;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use engine::Services;
use tokio::sync::watch;
use tracing::info;

pub use error::ApiError;
pub use router::create_router;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

/// Serve the API on `addr` until `shutdown` flips to `true`.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http api listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
}
