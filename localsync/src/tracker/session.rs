//! Per-connection session task (spec §4.4). One spawned per accepted
//! socket; owns that socket and talks to the shared `TrackerState` only
//! across short lock-broadcast-unlock critical sections, generalizing the
//! per-connection task `rumblefrog-lrthrome::lrthrome::process_peer`
//! spawns for each accepted peer.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::TrackerConfig;
use crate::fileinfo::PeerEndpoint;
use crate::peer_table::PeerSession;
use crate::protocol::{Message, MessageCodec, ProtocolError};

use super::{TrackerError, TrackerState};

/// Drives one peer's session to completion: registration, keep-alives,
/// file updates, until the socket closes or errors. Always cleans the
/// peer out of the shared state on the way out.
///
/// `session_task` resolves to this very task's own `JoinHandle`, handed
/// back by the caller immediately after `tokio::spawn`ing it (see
/// `tracker::run`). Awaiting it here and storing it in the `PeerSession`
/// is what lets the sweeper forcibly close a stale peer's socket: the
/// `Framed` stream below is split into a read half (kept in this task,
/// driving `session_loop`) and a write half (moved into `writer_task`),
/// and the two halves share the underlying socket by reference count, so
/// the socket only actually closes once *both* tasks are gone (see the
/// `peer_table` module doc comment).
pub async fn handle_session(
    socket: TcpStream,
    addr: SocketAddr,
    state: Arc<Mutex<TrackerState>>,
    config: TrackerConfig,
    session_task: oneshot::Receiver<JoinHandle<()>>,
) -> Result<(), TrackerError> {
    let peer_ip = socket.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();
    let framed = Framed::new(socket, MessageCodec);
    let (mut sink, mut stream) = framed.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let session_task = session_task
        .await
        .expect("tracker::run sends the spawned JoinHandle right after spawning it");

    {
        let mut state = state.lock().await;
        let placeholder = PeerEndpoint::new(&peer_ip, 0);
        state
            .peers
            .insert(addr, PeerSession::new(placeholder, outbox_tx, writer_task, session_task));
    }

    let result = session_loop(&mut stream, addr, &peer_ip, &state, &config).await;

    {
        let mut state = state.lock().await;
        if let Some(session) = state.peers.remove(&addr) {
            state.index.remove_peer_everywhere(session.endpoint);
        }
    }

    result
}

async fn session_loop<S>(
    stream: &mut S,
    addr: SocketAddr,
    peer_ip: &str,
    state: &Arc<Mutex<TrackerState>>,
    config: &TrackerConfig,
) -> Result<(), TrackerError>
where
    S: futures::Stream<Item = Result<Message, ProtocolError>> + Unpin,
{
    loop {
        let message = match stream.next().await {
            Some(Ok(m)) => m,
            Some(Err(ProtocolError::UnknownTag(tag))) => {
                tracing::warn!(%addr, tag, "ignoring unknown message type");
                continue;
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        };

        match message {
            Message::Register { listen_port, files } => {
                let mut state = state.lock().await;
                let endpoint = PeerEndpoint::new(peer_ip, listen_port);
                if let Some(session) = state.peers.get_mut(&addr) {
                    session.endpoint = endpoint;
                    session.touch_heartbeat();
                    session.send(Message::RegisterAck {
                        interval_secs: config.interval.as_secs() as u32,
                        piece_len: config.piece_len,
                    });
                }
                state.index.merge(&files, endpoint);
                let update = Message::table_update_from_index(&state.index);
                state.peers.broadcast_all(&update);
            }
            Message::KeepAlive => {
                let mut state = state.lock().await;
                if let Some(session) = state.peers.get_mut(&addr) {
                    session.touch_heartbeat();
                }
            }
            Message::FileUpdate { events } => {
                let mut state = state.lock().await;
                if let Some(session) = state.peers.get_mut(&addr) {
                    session.touch_heartbeat();
                    let reporter = session.endpoint;
                    for event in &events {
                        if let Err(e) = state.index.apply_event(event, reporter) {
                            tracing::debug!(%addr, error = %e, "ignoring file-update for unknown entry");
                        }
                    }
                    let update = Message::table_update_from_index(&state.index);
                    state.peers.broadcast_except(&update, Some(&addr));
                }
            }
            Message::RegisterAck { .. } | Message::TableUpdate { .. } => {
                // Tracker-to-peer-only messages; a peer should never send
                // these. Treat as a protocol violation the same way the
                // dispatch table handles any other unexpected shape: log
                // and ignore (spec §7 "protocol error").
                tracing::warn!(%addr, "peer sent a tracker-originated message type");
            }
        }
    }
}
