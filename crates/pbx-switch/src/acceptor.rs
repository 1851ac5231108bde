use std::fmt;
use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pbx_config::ServerConfig;

use crate::registry::Pbx;
use crate::worker::client_session;

/// How often the accept loop re-checks the shutdown flag while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum ServeError {
    Bind { addr: String, source: io::Error },
    Listener(io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            ServeError::Listener(e) => write!(f, "Listener setup failed: {}", e),
        }
    }
}

impl std::error::Error for ServeError {}

/// Bind the configured address and serve until `shutting_down` is set.
pub fn serve(config: &ServerConfig, pbx: Arc<Pbx>, shutting_down: Arc<AtomicBool>) -> Result<(), ServeError> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).map_err(|source| ServeError::Bind {
        addr: addr.clone(),
        source,
    })?;
    serve_on(listener, pbx, shutting_down).map_err(ServeError::Listener)
}

/// Accept connections on an already-bound listener until `shutting_down` is
/// set, then drain the registry.
///
/// Each accepted connection gets its own named worker thread. Returns after
/// quiescence: every worker has unregistered and released its unit.
pub fn serve_on(listener: TcpListener, pbx: Arc<Pbx>, shutting_down: Arc<AtomicBool>) -> io::Result<()> {
    // Non-blocking so the loop can observe the shutdown flag between accepts
    listener.set_nonblocking(true)?;
    tracing::info!("exchange listening on {}", listener.local_addr()?);

    let mut session_seq: u64 = 0;
    while !shutting_down.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                // The accepted socket must block; only the listener polls
                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::warn!("dropping connection from {}: {}", peer, e);
                    continue;
                }
                tracing::info!("new client connection from {}", peer);
                session_seq += 1;
                let pbx = Arc::clone(&pbx);
                let spawned = thread::Builder::new()
                    .name(format!("pbx-client-{}", session_seq))
                    .spawn(move || client_session(pbx, stream));
                if let Err(e) = spawned {
                    // Dropping the stream here closes the connection
                    tracing::error!("failed to spawn client thread: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
            }
        }
    }

    tracing::info!("shutdown requested, draining workers");
    pbx.shutdown();
    Ok(())
}
