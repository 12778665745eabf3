//! Liveness endpoint polled by the hosting platform.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;

pub const HEALTH_BODY: &str = "OK";

pub fn router() -> Router {
    Router::new().route("/", get(|| async { HEALTH_BODY }))
}

/// Bind `0.0.0.0:port` and serve the health route on its own task.
///
/// The task holds no pipeline state, so it keeps answering while fetches
/// run. Returns the bound address (useful with port 0).
pub async fn spawn(port: u16) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "health endpoint listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            error!(error = %e, "health server stopped");
        }
    });
    Ok((addr, handle))
}
