use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum length, in bytes, of a relative filepath as carried on the wire.
/// Matches the `filepath[1275 bytes, NUL-terminated]` record in the wire
/// protocol (see `protocol::message`).
pub const MAX_FILEPATH_LEN: usize = 1275;

/// Maximum length, in bytes, of a textual peer IP address as carried on the
/// wire (`ip[40 bytes, NUL-terminated]`).
pub const MAX_IP_LEN: usize = 40;

/// Immutable description of one path: relative filepath, byte size,
/// last-modified timestamp, directory flag.
///
/// Directories always report size 0; filepaths never begin with `.` in any
/// externally visible context (both invariants are enforced in `new`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    filepath: String,
    size: u64,
    last_modified: i64,
    is_dir: bool,
}

impl FileInfo {
    pub fn new(filepath: impl Into<String>, size: u64, last_modified: i64, is_dir: bool) -> Self {
        let filepath = filepath.into();
        debug_assert!(
            filepath.len() <= MAX_FILEPATH_LEN,
            "filepath exceeds wire limit: {}",
            filepath
        );
        Self {
            filepath,
            // Directories always report size 0, regardless of what the caller passed.
            size: if is_dir { 0 } else { size },
            last_modified,
            is_dir,
        }
    }

    pub fn now_deleted(filepath: impl Into<String>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::new(filepath, 0, now, false)
    }

    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Is this path hidden in the sense LocalSync cares about: the filepath
    /// itself, or any path component, begins with `.`.
    pub fn is_hidden(&self) -> bool {
        is_hidden_path(&self.filepath)
    }

    /// True if `self` is a strict path-prefix ancestor of `other`, i.e.
    /// `other` lives inside the directory `self` names. Used by the index's
    /// recursive directory delete (spec §4.3).
    pub fn is_strict_prefix_of(&self, other_path: &str) -> bool {
        is_strict_path_prefix(&self.filepath, other_path)
    }
}

/// True if `path`, or any component of it, begins with `.`.
pub fn is_hidden_path(path: &str) -> bool {
    path.split('/').any(|c| c.starts_with('.'))
}

/// True if `prefix` is a strict string-prefix of `path` on a path-component
/// boundary (`"d"` is a prefix of `"d/x"` but not of `"dx"`).
pub fn is_strict_path_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'/'
}

/// An `(ip, port)` pair identifying a peer's upload server. Identity for
/// equality is the full pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    ip: [u8; MAX_IP_LEN],
    ip_len: u8,
    port: u16,
}

impl PeerEndpoint {
    pub fn new(ip: &str, port: u16) -> Self {
        debug_assert!(ip.len() < MAX_IP_LEN, "ip exceeds wire limit: {}", ip);
        let mut buf = [0u8; MAX_IP_LEN];
        let bytes = ip.as_bytes();
        let len = bytes.len().min(MAX_IP_LEN - 1);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            ip: buf,
            ip_len: len as u8,
            port,
        }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(&addr.ip().to_string(), addr.port())
    }

    pub fn ip(&self) -> &str {
        std::str::from_utf8(&self.ip[..self.ip_len as usize]).unwrap_or("")
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_forces_zero_size() {
        let f = FileInfo::new("d", 4096, 100, true);
        assert_eq!(f.size(), 0);
    }

    #[test]
    fn hidden_path_detection() {
        assert!(is_hidden_path(".git"));
        assert!(is_hidden_path("a/.git"));
        assert!(!is_hidden_path("a/b"));
    }

    #[test]
    fn strict_prefix_is_component_aligned() {
        assert!(is_strict_path_prefix("d", "d/x"));
        assert!(!is_strict_path_prefix("d", "dx"));
        assert!(!is_strict_path_prefix("d/x", "d/x"));
    }

    #[test]
    fn peer_endpoint_roundtrip() {
        let ep = PeerEndpoint::new("192.168.1.5", 6881);
        assert_eq!(ep.ip(), "192.168.1.5");
        assert_eq!(ep.port(), 6881);
        assert_eq!(ep.to_string(), "192.168.1.5:6881");
    }

    #[test]
    fn peer_endpoint_equality_is_full_pair() {
        let a = PeerEndpoint::new("10.0.0.1", 1000);
        let b = PeerEndpoint::new("10.0.0.1", 1001);
        assert_ne!(a, b);
    }
}
