//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::ratelimit::RateLimiter;

/// HTTP server exposing the rate limited routes.
#[derive(Debug)]
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    limiter: Arc<dyn RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server around the given rate limiter.
    pub fn new(addr: SocketAddr, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { addr, limiter }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %listener.local_addr()?,
            algorithm = %self.limiter.algorithm(),
            capacity = self.limiter.capacity(),
            "Starting HTTP server with graceful shutdown"
        );

        let app = router(self.limiter);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e
        })
    }
}
