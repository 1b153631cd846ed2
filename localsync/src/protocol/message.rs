//! C8: the peer↔tracker session wire protocol, framed with
//! `tokio_util::codec::{Encoder, Decoder}` exactly as
//! `bittorrent::p2p::message::MessageCodec` frames BitTorrent's peer wire
//! messages: `decode` returns `Ok(None)` on a short buffer rather than
//! erroring, and only advances the input once a complete frame is
//! confirmed present.
//!
//! Every frame opens with a fixed header carrying a message-type tag and
//! an opaque pointer field left over from the original's in-memory
//! `Message { type, body }` struct (spec §6/§9). That field is read and
//! discarded here, never interpreted — changing the header shape would
//! break wire compatibility and is explicitly left as an open question.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::event::{FileAction, FileEvent};
use crate::fileinfo::{FileInfo, PeerEndpoint, MAX_FILEPATH_LEN, MAX_IP_LEN};
use crate::index::FileIndex;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filepath is not valid UTF-8")]
    InvalidFilepath,

    #[error("ip is not valid UTF-8")]
    InvalidIp,

    #[error("unknown message type tag {0}")]
    UnknownTag(u32),
}

const TAG_REGISTER: u32 = 1;
const TAG_REGISTER_ACK: u32 = 2;
const TAG_KEEP_ALIVE: u32 = 3;
const TAG_TABLE_UPDATE: u32 = 4;
const TAG_FILE_UPDATE: u32 = 5;

/// 4-byte tag, 4 bytes of struct alignment padding, 8-byte body pointer.
const HEADER_LEN: usize = 16;

/// `filepath[1275], size:u64, last_modified:i64, is_dir:u32, pointer-padding:u64`.
pub const FILE_INFO_WIRE_LEN: usize = MAX_FILEPATH_LEN + 8 + 8 + 4 + 8;

/// `ip[40], port:u32, pointer-padding:u64`.
pub const PEER_ENDPOINT_WIRE_LEN: usize = MAX_IP_LEN + 4 + 8;

/// One decoded session message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Register {
        listen_port: u16,
        files: Vec<FileInfo>,
    },
    RegisterAck {
        interval_secs: u32,
        piece_len: u32,
    },
    KeepAlive,
    TableUpdate {
        entries: Vec<(FileInfo, Vec<PeerEndpoint>)>,
    },
    FileUpdate {
        events: Vec<FileEvent>,
    },
}

impl Message {
    /// Builds a TABLE_UPDATE message from the tracker's current index.
    pub fn table_update_from_index(index: &FileIndex) -> Self {
        let entries = index
            .iter()
            .map(|(_, entry)| (entry.file.clone(), entry.peers.iter().copied().collect()))
            .collect();
        Message::TableUpdate { entries }
    }
}

#[derive(Debug, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Register { listen_port, files } => {
                put_header(dst, TAG_REGISTER);
                dst.put_u32_ne(listen_port as u32);
                dst.put_u32_ne(files.len() as u32);
                dst.put_u64_ne(0);
                for file in &files {
                    put_file_info(dst, file);
                }
            }
            Message::RegisterAck { interval_secs, piece_len } => {
                put_header(dst, TAG_REGISTER_ACK);
                dst.put_u32_ne(interval_secs);
                dst.put_u32_ne(piece_len);
            }
            Message::KeepAlive => {
                put_header(dst, TAG_KEEP_ALIVE);
            }
            Message::TableUpdate { entries } => {
                put_header(dst, TAG_TABLE_UPDATE);
                dst.put_u64_ne(0);
                dst.put_u32_ne(entries.len() as u32);
                dst.put_u32_ne(0);
                for (file, peers) in &entries {
                    dst.put_u32_ne(peers.len() as u32);
                    dst.put_u32_ne(0);
                    put_file_info(dst, file);
                    for peer in peers {
                        put_peer_endpoint(dst, peer);
                    }
                }
            }
            Message::FileUpdate { events } => {
                put_header(dst, TAG_FILE_UPDATE);
                dst.put_u32_ne(events.len() as u32);
                dst.put_u32_ne(0);
                for event in &events {
                    put_file_info(dst, &event.file);
                    dst.put_u32_ne(event.action.as_tag());
                    dst.put_u32_ne(0);
                }
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        let buf = &src[..];
        let mut r = Reader::new(buf);

        let tag = match r.u32() {
            Some(v) => v,
            None => return Ok(None),
        };
        if r.skip(4).is_none() {
            return Ok(None);
        }
        if r.u64().is_none() {
            return Ok(None);
        }

        let message = match tag {
            TAG_REGISTER => {
                let listen_port = match r.u32() {
                    Some(v) => v as u16,
                    None => return Ok(None),
                };
                let n_files = match r.u32() {
                    Some(v) => v as usize,
                    None => return Ok(None),
                };
                if r.u64().is_none() {
                    return Ok(None);
                }
                let mut files = Vec::with_capacity(n_files);
                for _ in 0..n_files {
                    match read_file_info(&mut r)? {
                        Some(f) => files.push(f),
                        None => return Ok(None),
                    }
                }
                Message::Register { listen_port, files }
            }
            TAG_REGISTER_ACK => {
                let interval_secs = match r.u32() {
                    Some(v) => v,
                    None => return Ok(None),
                };
                let piece_len = match r.u32() {
                    Some(v) => v,
                    None => return Ok(None),
                };
                Message::RegisterAck { interval_secs, piece_len }
            }
            TAG_KEEP_ALIVE => Message::KeepAlive,
            TAG_TABLE_UPDATE => {
                if r.u64().is_none() {
                    return Ok(None);
                }
                let n_entries = match r.u32() {
                    Some(v) => v as usize,
                    None => return Ok(None),
                };
                if r.u32().is_none() {
                    return Ok(None);
                }
                let mut entries = Vec::with_capacity(n_entries);
                for _ in 0..n_entries {
                    let n_peers = match r.u32() {
                        Some(v) => v as usize,
                        None => return Ok(None),
                    };
                    if r.u32().is_none() {
                        return Ok(None);
                    }
                    let file = match read_file_info(&mut r)? {
                        Some(f) => f,
                        None => return Ok(None),
                    };
                    let mut peers = Vec::with_capacity(n_peers);
                    for _ in 0..n_peers {
                        match read_peer_endpoint(&mut r)? {
                            Some(p) => peers.push(p),
                            None => return Ok(None),
                        }
                    }
                    entries.push((file, peers));
                }
                Message::TableUpdate { entries }
            }
            TAG_FILE_UPDATE => {
                let n_events = match r.u32() {
                    Some(v) => v as usize,
                    None => return Ok(None),
                };
                if r.u32().is_none() {
                    return Ok(None);
                }
                let mut events = Vec::with_capacity(n_events);
                for _ in 0..n_events {
                    let file = match read_file_info(&mut r)? {
                        Some(f) => f,
                        None => return Ok(None),
                    };
                    let action_tag = match r.u32() {
                        Some(v) => v,
                        None => return Ok(None),
                    };
                    if r.u32().is_none() {
                        return Ok(None);
                    }
                    let action = FileAction::from_tag(action_tag).unwrap_or(FileAction::Modified);
                    events.push(FileEvent::new(action, file));
                }
                Message::FileUpdate { events }
            }
            other => return Err(ProtocolError::UnknownTag(other)),
        };

        let consumed = r.position();
        src.advance(consumed);
        Ok(Some(message))
    }
}

fn put_header(dst: &mut BytesMut, tag: u32) {
    let start = dst.len();
    dst.put_u32_ne(tag);
    dst.put_u32_ne(0);
    dst.put_u64_ne(0);
    debug_assert_eq!(dst.len() - start, HEADER_LEN);
}

pub(crate) fn put_file_info(dst: &mut BytesMut, file: &FileInfo) {
    let mut name_buf = [0u8; MAX_FILEPATH_LEN];
    let bytes = file.filepath().as_bytes();
    let len = bytes.len().min(MAX_FILEPATH_LEN - 1);
    name_buf[..len].copy_from_slice(&bytes[..len]);
    dst.put_slice(&name_buf);
    dst.put_u64_ne(file.size());
    dst.put_i64_ne(file.last_modified());
    dst.put_u32_ne(file.is_dir() as u32);
    dst.put_u64_ne(0);
}

fn put_peer_endpoint(dst: &mut BytesMut, peer: &PeerEndpoint) {
    let mut ip_buf = [0u8; MAX_IP_LEN];
    let bytes = peer.ip().as_bytes();
    let len = bytes.len().min(MAX_IP_LEN - 1);
    ip_buf[..len].copy_from_slice(&bytes[..len]);
    dst.put_slice(&ip_buf);
    dst.put_u32_ne(peer.port() as u32);
    dst.put_u64_ne(0);
}

pub(crate) fn read_file_info(r: &mut Reader<'_>) -> Result<Option<FileInfo>, ProtocolError> {
    let name_bytes = match r.bytes(MAX_FILEPATH_LEN) {
        Some(b) => b,
        None => return Ok(None),
    };
    let size = match r.u64() {
        Some(v) => v,
        None => return Ok(None),
    };
    let last_modified = match r.i64() {
        Some(v) => v,
        None => return Ok(None),
    };
    let is_dir = match r.u32() {
        Some(v) => v != 0,
        None => return Ok(None),
    };
    if r.u64().is_none() {
        return Ok(None);
    }

    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
    let filepath = std::str::from_utf8(&name_bytes[..end])
        .map_err(|_| ProtocolError::InvalidFilepath)?
        .to_string();

    Ok(Some(FileInfo::new(filepath, size, last_modified, is_dir)))
}

fn read_peer_endpoint(r: &mut Reader<'_>) -> Result<Option<PeerEndpoint>, ProtocolError> {
    let ip_bytes = match r.bytes(MAX_IP_LEN) {
        Some(b) => b,
        None => return Ok(None),
    };
    let port = match r.u32() {
        Some(v) => v,
        None => return Ok(None),
    };
    if r.u64().is_none() {
        return Ok(None);
    }

    let end = ip_bytes.iter().position(|&b| b == 0).unwrap_or(ip_bytes.len());
    let ip = std::str::from_utf8(&ip_bytes[..end]).map_err(|_| ProtocolError::InvalidIp)?;

    Ok(Some(PeerEndpoint::new(ip, port as u16)))
}

/// Non-consuming forward-only reader over a borrowed byte slice. Every
/// accessor returns `None` (without advancing) if the slice doesn't yet
/// hold enough bytes, which is what lets `decode` bail out with
/// `Ok(None)` and retry once more bytes arrive, instead of erroring on a
/// merely-incomplete frame.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < self.pos + n {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Option<()> {
        self.bytes(n).map(|_| ())
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| {
            let mut cursor = std::io::Cursor::new(b);
            cursor.get_u32_ne()
        })
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        self.bytes(8).map(|b| {
            let mut cursor = std::io::Cursor::new(b);
            cursor.get_u64_ne()
        })
    }

    pub(crate) fn i64(&mut self) -> Option<i64> {
        self.bytes(8).map(|b| {
            let mut cursor = std::io::Cursor::new(b);
            cursor.get_i64_ne()
        })
    }
}
