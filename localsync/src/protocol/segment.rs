//! Segment request/response framing used between a download worker (C12)
//! and a peer's upload server (C11), generalizing the same
//! `tokio_util::codec` Encoder/Decoder shape `message.rs` uses for the
//! tracker session protocol. Only the request is a framed message; the
//! response is the raw segment body, read with a plain byte count the
//! caller already knows from the request it sent.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::fileinfo::FileInfo;
use crate::protocol::message::{put_file_info, read_file_info, ProtocolError, Reader};

/// `(init_offset, length, tableEntry_hint, status)` followed by a FileInfo
/// frame whose filepath names the file (spec §4.6/§6).
///
/// `init_offset == -1` is the client-initiated termination signal; the
/// server closes the connection on receipt rather than serving a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRequest {
    pub init_offset: i64,
    pub length: u32,
    pub table_entry_hint: u32,
    pub status: u32,
    pub filepath: String,
}

impl SegmentRequest {
    pub fn new(init_offset: i64, length: u32, filepath: impl Into<String>) -> Self {
        Self {
            init_offset,
            length,
            table_entry_hint: 0,
            status: 0,
            filepath: filepath.into(),
        }
    }

    pub fn terminate(filepath: impl Into<String>) -> Self {
        Self::new(-1, 0, filepath)
    }

    pub fn is_terminate(&self) -> bool {
        self.init_offset == -1
    }
}

#[derive(Debug, Default)]
pub struct SegmentCodec;

impl Encoder<SegmentRequest> for SegmentCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: SegmentRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_i64_ne(item.init_offset);
        dst.put_u32_ne(item.length);
        dst.put_u32_ne(item.table_entry_hint);
        dst.put_u32_ne(item.status);
        dst.put_u32_ne(0);
        put_file_info(dst, &FileInfo::new(item.filepath, 0, 0, false));
        Ok(())
    }
}

impl Decoder for SegmentCodec {
    type Item = SegmentRequest;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SegmentRequest>, Self::Error> {
        let buf = &src[..];
        let mut r = Reader::new(buf);

        let init_offset = match r.i64() {
            Some(v) => v,
            None => return Ok(None),
        };
        let length = match r.u32() {
            Some(v) => v,
            None => return Ok(None),
        };
        let table_entry_hint = match r.u32() {
            Some(v) => v,
            None => return Ok(None),
        };
        let status = match r.u32() {
            Some(v) => v,
            None => return Ok(None),
        };
        if r.u32().is_none() {
            return Ok(None);
        }
        let file = match read_file_info(&mut r)? {
            Some(f) => f,
            None => return Ok(None),
        };

        let consumed = r.position();
        src.advance(consumed);
        Ok(Some(SegmentRequest {
            init_offset,
            length,
            table_entry_hint,
            status,
            filepath: file.filepath().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips() {
        let mut codec = SegmentCodec;
        let mut buf = BytesMut::new();
        let req = SegmentRequest::new(2048, 2048, "a.txt");
        codec.encode(req.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("full frame");
        assert_eq!(decoded, req);
    }

    #[test]
    fn terminate_request_has_offset_negative_one() {
        let req = SegmentRequest::terminate("a.txt");
        assert!(req.is_terminate());
        let mut codec = SegmentCodec;
        let mut buf = BytesMut::new();
        codec.encode(req, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("full frame");
        assert!(decoded.is_terminate());
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = SegmentCodec;
        let mut buf = BytesMut::new();
        codec.encode(SegmentRequest::new(0, 10, "a.txt"), &mut buf).unwrap();
        let mut truncated = BytesMut::from(&buf[..buf.len() - 1]);
        assert!(codec.decode(&mut truncated).unwrap().is_none());
    }
}
