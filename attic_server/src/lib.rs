//! HTTP blob server.
//!
//! Exposes the blob-server wire protocol over a plain TCP listener:
//! upload, fetch (with ranges and share-link traversal), enumerate,
//! preupload and remove. TLS termination is left to a fronting proxy.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod premux;
pub mod server;
pub mod share;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use attic_core::Storage;

use crate::auth::Auth;
use crate::config::ServerConfig;
use crate::premux::PreMuxChain;

/// Startup-configured state shared by every handler. Treated as immutable
/// once the server starts.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub auth: Arc<Auth>,
    pub config: Arc<ServerConfig>,
    pub premux: Arc<PreMuxChain>,
    /// Cancelling this token drains in-flight work and stops the listener.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, auth: Auth, config: ServerConfig) -> Self {
        Self {
            storage,
            auth: Arc::new(auth),
            config: Arc::new(config),
            premux: Arc::new(PreMuxChain::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Installs a pre-mux probe chain. Probes run in registration order
    /// before the route table on every request.
    pub fn with_premux(mut self, premux: PreMuxChain) -> Self {
        self.premux = Arc::new(premux);
        self
    }
}
