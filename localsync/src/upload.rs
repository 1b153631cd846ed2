//! C11: the upload server. One `TcpListener`, one `tokio::spawn`ed serving
//! task per accepted connection, looping on segment requests exactly as
//! spec §4.6 describes. The "per process file lock" is a single
//! `tokio::sync::Mutex<()>` shared by every serving task, guarding the
//! open-seek-read-close unit as one atomic operation — crude but
//! correct, matching spec §4.6's own characterization; per-request file
//! handles are the documented cleaner alternative, not implemented here
//! since the spec prescribes the simpler lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::protocol::{ProtocolError, SegmentCodec};

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Accepts connections on `listener` forever, serving segment reads from
/// files under `root`. Returns only on a listener-level error.
pub async fn run(listener: TcpListener, root: PathBuf) -> Result<(), UploadError> {
    let root = Arc::new(root);
    let file_lock = Arc::new(Mutex::new(()));

    loop {
        let (socket, addr) = listener.accept().await?;
        let root = root.clone();
        let file_lock = file_lock.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(socket, root, file_lock).await {
                tracing::debug!(%addr, error = %e, "upload connection ended");
            }
        });
    }
}

async fn serve_connection(
    socket: TcpStream,
    root: Arc<PathBuf>,
    file_lock: Arc<Mutex<()>>,
) -> Result<(), UploadError> {
    let mut framed = Framed::new(socket, SegmentCodec);

    loop {
        let request = match framed.next().await {
            Some(Ok(r)) => r,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        };

        if request.is_terminate() {
            return Ok(());
        }

        let path = root.join(&request.filepath);
        let buf = {
            let _guard = file_lock.lock().await;
            read_segment(&path, request.init_offset as u64, request.length as usize).await?
        };

        framed.get_mut().write_all(&buf).await?;
    }
}

/// Opens `path`, seeks to `offset`, reads exactly `length` bytes, closes.
/// One atomic unit under the caller's file lock (spec §4.6 point 3).
async fn read_segment(path: &Path, offset: u64, length: usize) -> Result<Vec<u8>, UploadError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; length];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SegmentRequest;
    use futures::SinkExt;

    #[tokio::test]
    async fn read_segment_returns_the_requested_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let buf = read_segment(&path, 3, 4).await.unwrap();
        assert_eq!(buf, b"3456");
    }

    #[tokio::test]
    async fn serving_one_request_then_a_terminate_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let root = dir.path().to_path_buf();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            serve_connection(socket, Arc::new(root), Arc::new(Mutex::new(()))).await
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(client, SegmentCodec);
        framed.send(SegmentRequest::new(0, 5, "a.txt")).await.unwrap();

        let mut buf = [0u8; 5];
        framed.get_mut().read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        framed.send(SegmentRequest::terminate("a.txt")).await.unwrap();
        server.await.unwrap().unwrap();
    }
}
