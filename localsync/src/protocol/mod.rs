//! C8: wire protocol. Two codecs share this module: `message` frames the
//! peer↔tracker session protocol (REGISTER/REGISTER_ACK/KEEP_ALIVE/
//! TABLE_UPDATE/FILE_UPDATE); `segment` frames the per-download-worker
//! segment request/response protocol used against a peer's upload server.
//!
//! All integers on the wire are host-native (spec §6) — a deliberate,
//! explicitly accepted non-portability wart, not an oversight.

pub mod message;
pub mod segment;

pub use message::{Message, MessageCodec, ProtocolError};
pub use segment::{SegmentCodec, SegmentRequest};
