//! Configuration surface. No file-based configuration (spec §6's
//! "persisted state: none" extends to config files too) — each binary's
//! settings are a small struct populated from CLI flags plus a few fixed
//! constants, the same shape `bittorrent::config::{TorrentConfig,
//! ClientConfig}` takes.

use std::path::PathBuf;
use std::time::Duration;

/// The tracker's fixed handshake port (spec §6).
pub const HANDSHAKE_PORT: u16 = 9571;

/// Matches the original's `PIECE_LENGTH` constant
/// (`original_source/tracker/tracker.h`).
pub const DEFAULT_PIECE_LEN: u32 = 2048;

/// Heartbeat/broadcast cadence (spec §4.4/§4.5's "every interval seconds").
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// The sweeper wakes `interval + SWEEP_GRACE` seconds apart and reaps any
/// peer whose heartbeat is older than `interval` (spec §4.4).
pub const SWEEP_GRACE: Duration = Duration::from_secs(5);

/// Range a peer's upload listen port is drawn from at random (spec §6).
pub const LISTEN_PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65335;

/// `streams` values above this trigger a warning and a startup pause
/// (spec §6).
pub const STREAMS_WARN_THRESHOLD: u8 = 2;

pub const STREAMS_WARN_PAUSE: Duration = Duration::from_secs(5);

pub const MIN_STREAMS: u8 = 1;
pub const MAX_STREAMS: u8 = 50;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub interval: Duration,
    pub handshake_port: u16,
    pub piece_len: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            handshake_port: HANDSHAKE_PORT,
            piece_len: DEFAULT_PIECE_LEN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub tracker_host: String,
    pub watch_dir: PathBuf,
    pub streams: u8,
}

impl PeerConfig {
    pub fn new(tracker_host: impl Into<String>, watch_dir: impl Into<PathBuf>, streams: u8) -> Self {
        Self {
            tracker_host: tracker_host.into(),
            watch_dir: watch_dir.into(),
            streams: streams.clamp(MIN_STREAMS, MAX_STREAMS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_config_defaults_match_the_spec_constants() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.handshake_port, 9571);
        assert_eq!(cfg.piece_len, 2048);
        assert_eq!(cfg.interval, Duration::from_secs(5));
    }

    #[test]
    fn peer_config_clamps_streams_to_the_valid_range() {
        assert_eq!(PeerConfig::new("h", "d", 0).streams, MIN_STREAMS);
        assert_eq!(PeerConfig::new("h", "d", 200).streams, MAX_STREAMS);
        assert_eq!(PeerConfig::new("h", "d", 4).streams, 4);
    }
}
