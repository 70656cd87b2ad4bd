//! HTTP server lifecycle.

use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Server startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address did not parse.
    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    /// Binding or serving failed.
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind and serve until the shutdown receiver observes `true`.
///
/// # Errors
/// Returns an error if the address is invalid or the listener fails.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| ServerError::InvalidAddress(format!("{host}:{port}")))?;

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metering gateway listening");

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Wait for the coordinator; in-flight requests drain before
            // the server returns.
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
