//! The tracker's sweeper task: wakes every `interval + grace` seconds and
//! reaps any peer whose heartbeat has gone stale, exactly as if that
//! peer's session had exited on its own (spec §4.4). A second long-running
//! task started once at tracker startup, the same "spawn a task, hold the
//! `JoinHandle`" pattern the teacher uses for its disk task and
//! tracker-client tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::TrackerState;

pub fn spawn(state: Arc<Mutex<TrackerState>>, interval: Duration, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval + grace);
        // The first tick fires immediately; skip it so we don't sweep
        // before any peer has had a chance to register.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let mut state = state.lock().await;

            let removed = state
                .peers
                .sweep_expired(interval.as_secs() as i64, grace.as_secs() as i64);

            if removed.is_empty() {
                continue;
            }

            for (addr, endpoint) in &removed {
                tracing::info!(%addr, %endpoint, "sweeper reaped stale peer");
                state.index.remove_peer_everywhere(*endpoint);
            }

            if state.peers.is_empty() {
                tracing::info!("peer table empty after sweep, resetting index");
                state.index.clear();
            }
        }
    })
}
