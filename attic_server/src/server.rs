//! Router assembly, listener loop and the test-harness contract.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;

use attic_core::{Storage, StoreError, StoreResult};

use crate::AppState;
use crate::handlers::{enumerate, fetch, preupload, remove, root, upload};
use crate::{auth, premux};

/// Refuses storage handles that lack a capability the route table needs.
pub fn check_capabilities(storage: &dyn Storage) -> StoreResult<()> {
    let caps = storage.capabilities();
    let required = [
        (caps.fetch, "fetcher"),
        (caps.receive, "receiver"),
        (caps.enumerate, "enumerator"),
        (caps.remove, "remover"),
        (caps.stat, "stat"),
    ];
    for (present, name) in required {
        if !present {
            return Err(StoreError::bad_request(format!(
                "storage lacks required capability: {name}"
            )));
        }
    }
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let owner_only = Router::new()
        .route("/camli/enumerate-blobs", get(enumerate::handle))
        .route("/camli/preupload", post(preupload::handle))
        .route(
            "/camli/upload",
            post(upload::handle).layer(DefaultBodyLimit::max(
                usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX),
            )),
        )
        .route("/camli/remove", post(remove::handle))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_owner,
        ));

    Router::new()
        .route("/", get(root::handle))
        .route("/camli/{blobref}", get(fetch::handle))
        .merge(owner_only)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            premux::premux_middleware,
        ))
        .with_state(state)
}

/// Serves until the shutdown token fires. Announces the bound address and
/// honours the control channel when the test harness asks for them.
pub async fn serve(state: AppState, listener: TcpListener) -> anyhow::Result<()> {
    check_capabilities(state.storage.as_ref())?;

    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");
    harness::announce_port(addr)?;
    harness::spawn_control_reader(state.shutdown.clone());

    let app = router(state.clone());
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Test-harness integration over inherited file descriptors.
///
/// `TESTING_PORT_WRITE_FD` receives `<listener-address>\n` once the
/// listener is bound; `TESTING_CONTROL_READ_FD` is read line-wise and an
/// `EXIT` line triggers a clean shutdown.
#[cfg(unix)]
mod harness {
    use std::io::{BufRead, BufReader, Write};
    use std::net::SocketAddr;
    use std::os::fd::FromRawFd;

    use tokio_util::sync::CancellationToken;

    pub const PORT_WRITE_FD_ENV: &str = "TESTING_PORT_WRITE_FD";
    pub const CONTROL_READ_FD_ENV: &str = "TESTING_CONTROL_READ_FD";

    fn fd_from_env(var: &str) -> Option<i32> {
        std::env::var(var).ok()?.parse().ok()
    }

    pub fn announce_port(addr: SocketAddr) -> std::io::Result<()> {
        if let Some(fd) = fd_from_env(PORT_WRITE_FD_ENV) {
            // Safety: the harness handed us this descriptor for exactly
            // this write; dropping the File closes it, signalling EOF.
            let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
            writeln!(file, "{addr}")?;
        }
        Ok(())
    }

    pub fn spawn_control_reader(shutdown: CancellationToken) {
        let Some(fd) = fd_from_env(CONTROL_READ_FD_ENV) else {
            return;
        };
        std::thread::spawn(move || {
            // Safety: harness-owned descriptor, read on this thread only.
            let file = unsafe { std::fs::File::from_raw_fd(fd) };
            for line in BufReader::new(file).lines() {
                match line {
                    Ok(line) if line.trim() == "EXIT" => {
                        shutdown.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    }
}

#[cfg(not(unix))]
mod harness {
    use std::net::SocketAddr;

    use tokio_util::sync::CancellationToken;

    pub fn announce_port(_addr: SocketAddr) -> std::io::Result<()> {
        Ok(())
    }

    pub fn spawn_control_reader(_shutdown: CancellationToken) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use attic_core::Capabilities;

    #[derive(Debug)]
    struct NoRemove;

    #[async_trait::async_trait]
    impl Storage for NoRemove {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                remove: false,
                ..Capabilities::full()
            }
        }

        async fn receive(
            &self,
            _: &attic_core::BlobRef,
            _: attic_core::ByteStream,
        ) -> StoreResult<attic_core::SizedBlobRef> {
            unreachable!()
        }

        async fn open_read(
            &self,
            _: &attic_core::BlobRef,
            _: u64,
            _: Option<u64>,
        ) -> StoreResult<attic_core::ByteStream> {
            unreachable!()
        }

        async fn stat(&self, _: &attic_core::BlobRef) -> StoreResult<u64> {
            unreachable!()
        }

        async fn enumerate(
            &self,
            _: &attic_core::Partition,
            _: Option<attic_core::BlobRef>,
            _: u64,
            _: tokio_util::sync::CancellationToken,
        ) -> StoreResult<attic_core::RefStream> {
            unreachable!()
        }

        async fn remove(
            &self,
            _: &attic_core::Partition,
            _: &[attic_core::BlobRef],
        ) -> StoreResult<()> {
            unreachable!()
        }
    }

    #[test]
    fn missing_capability_refused_at_wiring() {
        let err = check_capabilities(&NoRemove).unwrap_err();
        assert!(err.to_string().contains("remover"));
    }
}
