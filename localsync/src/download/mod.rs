//! C12: the download coordinator. Grounded directly in the teacher's
//! `fs/disk.rs` / `disk/disk.rs` writer path — a dedicated task that owns
//! the destination file handle and applies writes sequenced off a
//! channel — generalized from "reassemble one piece from blocks,
//! hash-verify, write" to "reassemble one file from segments, set mtime,
//! write", since LocalSync has no hash verification (explicit non-goal).

pub mod segment;

use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::fileinfo::{FileInfo, PeerEndpoint};
use crate::index::IndexEntry;
use crate::protocol::{ProtocolError, SegmentCodec, SegmentRequest};

use segment::{FileSequence, SegmentTable};

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("writer task panicked: {0}")]
    WriterTaskJoin(#[from] tokio::task::JoinError),
}

const WORKER_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Starts a download of `entry` into `watch_dir`, spawning `|peers| *
/// streams` worker tasks plus one writer task. `completion_tx` receives
/// the entry's `FileInfo` once the whole file (or directory marker) is in
/// place — the peer control loop uses that to send DOWNLOAD_COMPLETE and
/// clear the ignore-set entry (spec §4.5/§4.7).
pub fn spawn(
    watch_dir: PathBuf,
    entry: IndexEntry,
    piece_len: u32,
    streams: u8,
    completion_tx: mpsc::UnboundedSender<FileInfo>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run(watch_dir, entry, piece_len, streams, completion_tx).await {
            tracing::warn!(error = %e, "download failed");
        }
    })
}

async fn run(
    watch_dir: PathBuf,
    entry: IndexEntry,
    piece_len: u32,
    streams: u8,
    completion_tx: mpsc::UnboundedSender<FileInfo>,
) -> Result<(), DownloadError> {
    let target = watch_dir.join(entry.file.filepath());

    // Edge case: a size-0 file (including a directory marker)
    // short-circuits before any network work (spec §4.7).
    if entry.file.is_dir() || entry.file.size() == 0 {
        if entry.file.is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::File::create(&target).await?;
        }
        let _ = completion_tx.send(entry.file.clone());
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let table = std::sync::Arc::new(SegmentTable::new(entry.file.size(), piece_len));
    let (writer_tx, writer_rx) = mpsc::unbounded_channel::<FileSequence>();

    let filepath = entry.file.filepath().to_string();
    let mut worker_handles = Vec::new();
    for peer in entry.peers.iter().copied() {
        for _ in 0..streams {
            let table = table.clone();
            let writer_tx = writer_tx.clone();
            let filepath = filepath.clone();
            worker_handles.push(tokio::spawn(async move {
                if let Err(e) = worker_loop(peer, filepath, table, writer_tx).await {
                    tracing::debug!(%peer, error = %e, "download worker ended");
                }
            }));
        }
    }
    drop(writer_tx);

    let writer_handle = tokio::spawn(writer_task(
        target,
        entry.file.clone(),
        table.total(),
        writer_rx,
        completion_tx,
    ));

    for handle in worker_handles {
        let _ = handle.await;
    }
    writer_handle.await??;

    Ok(())
}

/// One worker's claim-request-read loop against a single source peer.
/// Scans the segment array for the leftmost unclaimed segment, requests
/// it, and reverts its claim on any transport failure so another worker
/// (or this one, on a future pass) can retry it (spec §4.7 coordination
/// invariants).
async fn worker_loop(
    peer: PeerEndpoint,
    filepath: String,
    table: std::sync::Arc<SegmentTable>,
    writer_tx: mpsc::UnboundedSender<FileSequence>,
) -> Result<(), DownloadError> {
    let socket = TcpStream::connect((peer.ip(), peer.port())).await?;
    let mut framed = Framed::new(socket, SegmentCodec);

    loop {
        if table.is_complete().await {
            let _ = framed.send(SegmentRequest::terminate(filepath.clone())).await;
            return Ok(());
        }

        let Some((idx, offset, length)) = table.claim_next().await else {
            tokio::time::sleep(WORKER_RETRY_DELAY).await;
            continue;
        };

        let request = SegmentRequest::new(offset as i64, length, filepath.clone());
        if let Err(e) = framed.send(request).await {
            table.revert(idx).await;
            return Err(e.into());
        }

        let mut buf = vec![0u8; length as usize];
        if let Err(e) = framed.get_mut().read_exact(&mut buf).await {
            table.revert(idx).await;
            return Err(e.into());
        }

        let done = table.mark_downloaded(idx).await;
        let _ = writer_tx.send(FileSequence { init_offset: offset, length, buf });

        if done {
            let _ = framed.send(SegmentRequest::terminate(filepath.clone())).await;
            return Ok(());
        }
    }
}

/// Owns the destination file handle; the only task that ever writes to
/// it. Writes each `init_offset` exactly once (spec §4.7 invariant),
/// fsyncs, sets mtime to the source's `last_modified`, and signals
/// completion.
async fn writer_task(
    target: PathBuf,
    file_info: FileInfo,
    total: usize,
    mut writer_rx: mpsc::UnboundedReceiver<FileSequence>,
    completion_tx: mpsc::UnboundedSender<FileInfo>,
) -> Result<(), DownloadError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&target)
        .await?;

    let mut written = 0usize;
    while let Some(seq) = writer_rx.recv().await {
        file.seek(SeekFrom::Start(seq.init_offset)).await?;
        file.write_all(&seq.buf).await?;
        written += 1;
        if written == total {
            break;
        }
    }

    file.sync_all().await?;
    let std_file = file.into_std().await;
    let mtime = UNIX_EPOCH + Duration::from_secs(file_info.last_modified().max(0) as u64);
    std_file.set_modified(mtime)?;

    let _ = completion_tx.send(file_info);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileinfo::FileInfo;
    use std::collections::HashSet;

    #[tokio::test]
    async fn zero_size_file_short_circuits_and_signals_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let entry = IndexEntry {
            file: FileInfo::new("empty.txt", 0, 100, false),
            peers: HashSet::new(),
        };

        run(dir.path().to_path_buf(), entry, 2048, 2, tx).await.unwrap();

        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.filepath(), "empty.txt");
        assert!(dir.path().join("empty.txt").exists());
    }

    #[tokio::test]
    async fn directory_marker_creates_the_directory_and_signals_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let entry = IndexEntry {
            file: FileInfo::new("sub", 0, 100, true),
            peers: HashSet::new(),
        };

        run(dir.path().to_path_buf(), entry, 2048, 2, tx).await.unwrap();

        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.filepath(), "sub");
        assert!(dir.path().join("sub").is_dir());
    }

    #[tokio::test]
    async fn full_download_from_a_single_source_peer_writes_the_whole_file() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; 10 * 1024];
        tokio::fs::write(src_dir.path().join("big.bin"), &content).await.unwrap();

        let listener = bind_test_listener().await;
        let addr = listener.local_addr().unwrap();
        let root = src_dir.path().to_path_buf();
        let upload_task = tokio::spawn(crate::upload::run(listener, root));

        let mut peers = HashSet::new();
        peers.insert(PeerEndpoint::new("127.0.0.1", addr.port()));
        let entry = IndexEntry {
            file: FileInfo::new("big.bin", content.len() as u64, 12345, false),
            peers,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        run(dst_dir.path().to_path_buf(), entry, 2048, 2, tx).await.unwrap();
        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.filepath(), "big.bin");

        let written = tokio::fs::read(dst_dir.path().join("big.bin")).await.unwrap();
        assert_eq!(written, content);

        upload_task.abort();
    }

    async fn bind_test_listener() -> tokio::net::TcpListener {
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap()
    }
}
