//! C7: the tracker's peer table. `HashMap<SocketAddr, PeerSession>`,
//! matching the shape of `bittorrent::torrent::Torrent`'s
//! `HashMap<ID, PeerHandle>` and, closer in spirit since this is a server
//! rather than a peer-side client, `rumblefrog-lrthrome`'s
//! `HashMap<SocketAddr, PeerRegistry>` in its connection-accepting loop.
//!
//! A session task owns its socket directly; the table holds only a
//! non-owning `mpsc` sender used to push outbound messages (broadcasts)
//! onto that socket, plus enough bookkeeping for the sweeper (spec §4.4,
//! §3's "PeerTable holds a non-owning reference used only for broadcast
//! and teardown").
//!
//! The session's `Framed` stream is split into a read half and a write
//! half (`tokio_util::codec::Framed::split`), which share the underlying
//! socket through a reference count rather than each owning it outright:
//! the socket stays open until *both* halves are dropped. The write half
//! lives in the per-session writer task; the read half lives in the
//! outer per-connection task that runs `session_loop`. So reaping a
//! session on the sweeper's say-so (rather than on the socket's own
//! EOF/error) has to drop both halves to actually close the socket and
//! unblock a peer that stopped heartbeating without disconnecting —
//! aborting only the writer task leaves the read half's reference alive
//! and the outer task blocked forever on `stream.next()`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::fileinfo::PeerEndpoint;
use crate::protocol::Message;

pub type BroadcastTx = mpsc::UnboundedSender<Message>;

/// One registered peer, as seen by the tracker.
///
/// Holds the `JoinHandle`s of *both* tasks that keep a reference to the
/// split socket alive: the writer task (the sink/write half) and the
/// outer per-connection task that runs `session_loop` (the stream/read
/// half). Reaping a session has to abort both to actually close the
/// socket; see the module doc comment.
pub struct PeerSession {
    pub endpoint: PeerEndpoint,
    pub last_heartbeat: i64,
    outbox: BroadcastTx,
    writer_task: JoinHandle<()>,
    session_task: JoinHandle<()>,
}

impl PeerSession {
    pub fn new(
        endpoint: PeerEndpoint,
        outbox: BroadcastTx,
        writer_task: JoinHandle<()>,
        session_task: JoinHandle<()>,
    ) -> Self {
        Self {
            endpoint,
            last_heartbeat: now_secs(),
            outbox,
            writer_task,
            session_task,
        }
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = now_secs();
    }

    fn is_expired(&self, interval_secs: i64, grace_secs: i64) -> bool {
        now_secs() - self.last_heartbeat > interval_secs + grace_secs
    }

    /// Sends `message` to this peer's session task for writing to its
    /// socket. A failed send means the session has already torn down; the
    /// sweeper or the session's own EOF handling will reap the entry, so
    /// the error is silently tolerated here (spec §4.4 broadcast policy).
    pub(crate) fn send(&self, message: Message) {
        let _ = self.outbox.send(message);
    }
}

#[derive(Debug, Default)]
pub struct PeerTable {
    sessions: HashMap<SocketAddr, PeerSession>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, addr: SocketAddr, session: PeerSession) {
        self.sessions.insert(addr, session);
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PeerSession> {
        self.sessions.remove(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerSession> {
        self.sessions.get_mut(addr)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sends `message` on every session's outbox except `exclude`, if set.
    /// Broadcasting to an already-closed session is tolerated (spec §4.4);
    /// the write failure surfaces only as a dropped `mpsc` send.
    pub fn broadcast_except(&self, message: &Message, exclude: Option<&SocketAddr>) {
        for (addr, session) in &self.sessions {
            if Some(addr) == exclude {
                continue;
            }
            session.send(message.clone());
        }
    }

    pub fn broadcast_all(&self, message: &Message) {
        self.broadcast_except(message, None);
    }

    /// Removes every session whose heartbeat has gone stale, returning
    /// their endpoints so the caller can strip them from the index under
    /// the same lock (spec §4.4's sweeper). Aborts both the writer task
    /// and the outer session task so the split socket's read and write
    /// halves both drop and the socket actually closes, rather than
    /// leaving the session task's `stream.next().await` blocked forever.
    pub fn sweep_expired(&mut self, interval_secs: i64, grace_secs: i64) -> Vec<(SocketAddr, PeerEndpoint)> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(interval_secs, grace_secs))
            .map(|(addr, _)| *addr)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for addr in expired {
            if let Some(session) = self.sessions.remove(&addr) {
                session.writer_task.abort();
                session.session_task.abort();
                removed.push((addr, session.endpoint));
            }
        }
        removed
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_session(endpoint: PeerEndpoint) -> (PeerSession, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(async {});
        let session_task = tokio::spawn(async {});
        (PeerSession::new(endpoint, tx, writer_task, session_task), rx)
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_excluded_address() {
        let mut table = PeerTable::new();
        let a1: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let a2: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let (s1, mut r1) = dummy_session(PeerEndpoint::new("127.0.0.1", 1));
        let (s2, mut r2) = dummy_session(PeerEndpoint::new("127.0.0.1", 2));
        table.insert(a1, s1);
        table.insert(a2, s2);

        table.broadcast_except(&Message::KeepAlive, Some(&a1));

        assert!(r1.try_recv().is_err());
        assert!(matches!(r2.try_recv(), Ok(Message::KeepAlive)));
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_sessions_only() {
        let mut table = PeerTable::new();
        let fresh_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let stale_addr: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let (fresh, _r1) = dummy_session(PeerEndpoint::new("127.0.0.1", 1));
        let (mut stale, _r2) = dummy_session(PeerEndpoint::new("127.0.0.1", 2));
        stale.last_heartbeat = now_secs() - 1000;

        table.insert(fresh_addr, fresh);
        table.insert(stale_addr, stale);

        let removed = table.sweep_expired(5, 5);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, stale_addr);
        assert_eq!(table.len(), 1);
    }
}
