//! C9: the tracker session engine. The accept loop and per-session tasks
//! follow the same `tokio::select!`-driven server shape as
//! `rumblefrog-lrthrome`'s `Lrthrome::up` — the teacher crate itself has
//! no server-side tracker code, so this module is grounded in that
//! example instead, generalized from one central event loop owning all
//! peer state to one `tokio::spawn`ed session task per accepted
//! connection (spec §4.4), each locking the shared index only across its
//! own mutate-then-broadcast critical section.

pub mod session;
pub mod sweeper;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::config::TrackerConfig;
use crate::index::FileIndex;
use crate::peer_table::PeerTable;
use crate::protocol::ProtocolError;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// `FileIndex` and `PeerTable` behind a single exclusive lock, matching
/// spec §3's "the tracker owns the FileIndex and PeerTable ... guarded by
/// a single exclusive lock held only across read-modify-write-broadcast
/// critical sections."
#[derive(Default)]
pub struct TrackerState {
    pub index: FileIndex,
    pub peers: PeerTable,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Runs the tracker until SIGINT. Binds the handshake port, starts the
/// sweeper, and accepts connections, spawning one session task per peer.
pub async fn run(config: TrackerConfig) -> Result<(), TrackerError> {
    let listener = TcpListener::bind(("0.0.0.0", config.handshake_port)).await?;
    tracing::info!(port = config.handshake_port, "tracker listening");

    let state = Arc::new(Mutex::new(TrackerState::new()));
    let sweeper = sweeper::spawn(state.clone(), config.interval, crate::config::SWEEP_GRACE);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("tracker received interrupt, shutting down");
                sweeper.abort();
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        let state = state.clone();
                        let config = config.clone();
                        let (handle_tx, handle_rx) = tokio::sync::oneshot::channel();
                        let task = tokio::spawn(async move {
                            if let Err(e) = session::handle_session(socket, addr, state, config, handle_rx).await {
                                tracing::warn!(%addr, error = %e, "session ended with an error");
                            }
                        });
                        let _ = handle_tx.send(task);
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    Ok(())
}
