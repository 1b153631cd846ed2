//! C10: the peer control loop. Generalizes `bittorrent::torrent::Torrent`'s
//! `tokio::select!` loop over an accept future and a command channel into a
//! loop over a shutdown signal and the tracker's broadcast stream, with a
//! heartbeat task and a monitor-drain task feeding the tracker's outbox
//! alongside it (spec §4.5).

pub mod scan;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::config::{PeerConfig, HANDSHAKE_PORT, LISTEN_PORT_RANGE, STREAMS_WARN_PAUSE, STREAMS_WARN_THRESHOLD};
use crate::download;
use crate::event::FileEvent;
use crate::fileinfo::{is_hidden_path, FileInfo, PeerEndpoint};
use crate::index::IndexEntry;
use crate::monitor::{IgnoreSet, Monitor, MonitorError};
use crate::protocol::{Message, MessageCodec, ProtocolError};
use crate::queue::EventQueue;
use crate::upload;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("tracker handshake failed: {0}")]
    Handshake(String),
}

/// Runs one peer to completion: registration, the heartbeat/monitor-drain
/// tasks, and the main TABLE_UPDATE receive loop, until `ctrl_c` or the
/// tracker connection closes.
pub async fn run(config: PeerConfig) -> Result<(), PeerError> {
    tokio::fs::create_dir_all(&config.watch_dir).await?;

    if config.streams > STREAMS_WARN_THRESHOLD {
        tracing::warn!(
            streams = config.streams,
            "stream count above the recommended threshold; pausing before continuing"
        );
        tokio::time::sleep(STREAMS_WARN_PAUSE).await;
    }

    let monitor = Monitor::start(&config.watch_dir)?;

    let tracker_socket = TcpStream::connect((config.tracker_host.as_str(), HANDSHAKE_PORT)).await?;
    let self_ip = tracker_socket.local_addr()?.ip().to_string();
    let (mut tracker_sink, mut tracker_stream) = Framed::new(tracker_socket, MessageCodec).split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if tracker_sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let (listener, listen_port) = bind_upload_listener().await?;
    let self_endpoint = PeerEndpoint::new(&self_ip, listen_port);

    let initial_files = scan::scan_directory(&config.watch_dir);
    outbox_tx
        .send(Message::Register { listen_port, files: initial_files })
        .map_err(|_| PeerError::Handshake("tracker connection closed before REGISTER was sent".into()))?;

    let (interval_secs, piece_len) = await_register_ack(&mut tracker_stream).await?;
    let interval = Duration::from_secs(interval_secs as u64);

    tokio::spawn(upload::run(listener, config.watch_dir.clone()));
    tokio::spawn(heartbeat_task(outbox_tx.clone(), interval));
    tokio::spawn(monitor_drain_task(monitor.queue().clone(), outbox_tx.clone()));

    let (completion_tx, completion_rx) = mpsc::unbounded_channel::<FileInfo>();
    tokio::spawn(completion_task(outbox_tx.clone(), monitor.ignore_modify().clone(), completion_rx));

    let watch_dir = config.watch_dir.clone();
    let streams = config.streams;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested, stopping peer");
                break;
            }
            message = tracker_stream.next() => {
                match message {
                    Some(Ok(Message::TableUpdate { entries })) => {
                        let local = scan::scan_directory(&watch_dir);
                        let plan = reconcile(&local, &entries, self_endpoint);
                        for filepath in plan.deletes {
                            local_delete(&watch_dir, &monitor, filepath).await;
                        }
                        for (file, peers) in plan.downloads {
                            local_download_prepare(
                                watch_dir.clone(),
                                &monitor,
                                file,
                                peers,
                                piece_len,
                                streams,
                                completion_tx.clone(),
                            )
                            .await;
                        }
                    }
                    Some(Ok(_other)) => {
                        // REGISTER/REGISTER_ACK are tracker-only and
                        // KEEP_ALIVE/FILE_UPDATE are peer-originated; none of
                        // these should arrive here. Log and ignore (spec §7).
                        tracing::warn!("unexpected message type on the tracker stream");
                    }
                    Some(Err(ProtocolError::UnknownTag(tag))) => {
                        tracing::warn!(tag, "ignoring unknown message type from tracker");
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::warn!("tracker connection closed");
                        break;
                    }
                }
            }
        }
    }

    writer_handle.abort();
    monitor.stop();
    Ok(())
}

/// Binds the upload listener on a random port drawn from the configured
/// ephemeral range (spec §6), retrying on the rare occasion a drawn port is
/// already in use.
async fn bind_upload_listener() -> Result<(TcpListener, u16), PeerError> {
    const ATTEMPTS: u32 = 32;
    for _ in 0..ATTEMPTS {
        let port = rand::thread_rng().gen_range(LISTEN_PORT_RANGE);
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
            return Ok((listener, port));
        }
    }
    Err(PeerError::Handshake(format!(
        "failed to bind an upload listen port after {ATTEMPTS} attempts"
    )))
}

async fn await_register_ack<S>(stream: &mut S) -> Result<(u32, u32), PeerError>
where
    S: futures::Stream<Item = Result<Message, ProtocolError>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::RegisterAck { interval_secs, piece_len })) => return Ok((interval_secs, piece_len)),
            Some(Ok(_other)) => continue,
            Some(Err(ProtocolError::UnknownTag(_))) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(PeerError::Handshake("connection closed before REGISTER_ACK".into())),
        }
    }
}

async fn heartbeat_task(outbox: mpsc::UnboundedSender<Message>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if outbox.send(Message::KeepAlive).is_err() {
            return;
        }
    }
}

async fn monitor_drain_task(queue: Arc<EventQueue>, outbox: mpsc::UnboundedSender<Message>) {
    loop {
        let events = queue.drain_blocking().await;
        if outbox.send(Message::FileUpdate { events }).is_err() {
            return;
        }
    }
}

async fn completion_task(
    outbox: mpsc::UnboundedSender<Message>,
    ignore_modify: IgnoreSet,
    mut completion_rx: mpsc::UnboundedReceiver<FileInfo>,
) {
    while let Some(file) = completion_rx.recv().await {
        let filepath = file.filepath().to_string();
        let _ = outbox.send(Message::FileUpdate { events: vec![FileEvent::download_complete(file)] });
        ignore_modify.clone().clear_after_settle(filepath);
    }
}

/// The result of reconciling a local directory scan against a broadcast
/// index (spec §4.5 steps 1-3): what to delete locally, and what to
/// download, each download carrying the peer set to fetch it from.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub deletes: Vec<String>,
    pub downloads: Vec<(FileInfo, Vec<PeerEndpoint>)>,
}

/// Pure reconciliation function: no networking, no filesystem access, so
/// it's directly unit-testable against fixed `local`/`entries` snapshots.
pub fn reconcile(
    local: &[FileInfo],
    entries: &[(FileInfo, Vec<PeerEndpoint>)],
    self_endpoint: PeerEndpoint,
) -> ReconcilePlan {
    let by_path: HashMap<&str, &(FileInfo, Vec<PeerEndpoint>)> =
        entries.iter().map(|entry| (entry.0.filepath(), entry)).collect();
    let local_paths: HashSet<&str> = local.iter().map(|f| f.filepath()).collect();

    let mut plan = ReconcilePlan::default();

    for l in local {
        match by_path.get(l.filepath()) {
            None => {
                if !is_hidden_path(l.filepath()) {
                    plan.deletes.push(l.filepath().to_string());
                }
            }
            Some((entry_file, peers)) => {
                let holds_current = peers.contains(&self_endpoint);
                let stale = l.last_modified() < entry_file.last_modified() || l.size() != entry_file.size();
                if !holds_current && stale {
                    plan.downloads.push((entry_file.clone(), peers.clone()));
                }
            }
        }
    }

    for (file, peers) in entries {
        if !local_paths.contains(file.filepath()) {
            plan.downloads.push((file.clone(), peers.clone()));
        }
    }

    plan
}

/// Local delete (spec §4.5): mark ignore_delete, remove the path, then
/// settle-clear the ignore entry.
async fn local_delete(watch_dir: &Path, monitor: &Monitor, filepath: String) {
    monitor.ignore_delete().mark(&filepath).await;

    let path = watch_dir.join(&filepath);
    let result = if path.is_dir() {
        tokio::fs::remove_dir_all(&path).await
    } else {
        tokio::fs::remove_file(&path).await
    };
    if let Err(e) = result {
        tracing::debug!(%filepath, error = %e, "local delete failed");
    }

    monitor.ignore_delete().clone().clear_after_settle(filepath);
}

/// Local download preparation (spec §4.5). Directories complete
/// immediately via the same completion channel the segmented download path
/// uses; `download::spawn` already short-circuits size-0/directory entries,
/// so both cases funnel through one call here.
async fn local_download_prepare(
    watch_dir: PathBuf,
    monitor: &Monitor,
    file: FileInfo,
    peers: Vec<PeerEndpoint>,
    piece_len: u32,
    streams: u8,
    completion_tx: mpsc::UnboundedSender<FileInfo>,
) {
    let filepath = file.filepath().to_string();
    if monitor.ignore_modify().contains(&filepath).await {
        return;
    }
    monitor.ignore_modify().mark(&filepath).await;

    let entry = IndexEntry { file, peers: peers.into_iter().collect() };
    download::spawn(watch_dir, entry, piece_len, streams, completion_tx);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64, mtime: i64) -> FileInfo {
        FileInfo::new(path, size, mtime, false)
    }

    fn peer(port: u16) -> PeerEndpoint {
        PeerEndpoint::new("10.0.0.1", port)
    }

    #[test]
    fn missing_local_entry_is_marked_for_download() {
        let local = vec![];
        let entries = vec![(file("a.txt", 10, 100), vec![peer(1)])];
        let plan = reconcile(&local, &entries, peer(99));
        assert_eq!(plan.downloads.len(), 1);
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn local_entry_absent_from_index_is_deleted() {
        let local = vec![file("a.txt", 10, 100)];
        let entries = vec![];
        let plan = reconcile(&local, &entries, peer(99));
        assert_eq!(plan.deletes, vec!["a.txt".to_string()]);
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn stale_local_copy_not_in_self_peer_set_is_downloaded() {
        let local = vec![file("a.txt", 10, 50)];
        let entries = vec![(file("a.txt", 20, 200), vec![peer(1)])];
        let plan = reconcile(&local, &entries, peer(99));
        assert_eq!(plan.downloads.len(), 1);
    }

    #[test]
    fn entry_already_held_by_self_is_not_downloaded() {
        let self_ep = peer(99);
        let local = vec![file("a.txt", 10, 50)];
        let entries = vec![(file("a.txt", 20, 200), vec![self_ep])];
        let plan = reconcile(&local, &entries, self_ep);
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn up_to_date_local_copy_is_left_alone() {
        let local = vec![file("a.txt", 10, 100)];
        let entries = vec![(file("a.txt", 10, 100), vec![peer(1)])];
        let plan = reconcile(&local, &entries, peer(99));
        assert!(plan.downloads.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[tokio::test]
    async fn local_download_prepare_skips_a_path_already_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::start(dir.path()).unwrap();
        monitor.ignore_modify().mark("a.txt").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        local_download_prepare(
            dir.path().to_path_buf(),
            &monitor,
            file("a.txt", 10, 100),
            vec![],
            2048,
            2,
            tx,
        )
        .await;

        // No download was spawned, so nothing arrives on the completion
        // channel; drop the sender side check by ensuring recv times out.
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn local_download_prepare_marks_ignore_modify_for_a_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::start(dir.path()).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        local_download_prepare(dir.path().to_path_buf(), &monitor, file("b.txt", 0, 100), vec![], 2048, 2, tx).await;

        assert!(monitor.ignore_modify().contains("b.txt").await);
    }
}
