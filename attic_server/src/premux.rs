//! Pre-mux handler chain.
//!
//! Probes registered here see every request before the route table, in
//! registration order. A probe either produces a response (tenant routing,
//! share-link shortcuts, metrics hooks) or hands the request back for the
//! next probe, and ultimately the router, to handle.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;

#[async_trait]
pub trait PreMuxProbe: Send + Sync {
    /// Either handle the request or give it back untouched.
    async fn probe(&self, req: Request) -> Result<Response, Request>;
}

#[derive(Default, Clone)]
pub struct PreMuxChain {
    probes: Vec<Arc<dyn PreMuxProbe>>,
}

impl PreMuxChain {
    pub fn register(&mut self, probe: Arc<dyn PreMuxProbe>) {
        self.probes.push(probe);
    }

    pub async fn run(&self, mut req: Request) -> Result<Response, Request> {
        for probe in &self.probes {
            match probe.probe(req).await {
                Ok(resp) => return Ok(resp),
                Err(back) => req = back,
            }
        }
        Err(req)
    }
}

pub async fn premux_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    match state.premux.run(req).await {
        Ok(resp) => resp,
        Err(req) => next.run(req).await,
    }
}
