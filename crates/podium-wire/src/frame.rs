//! Multipart frames and their stream codec.
//!
//! Every message on every channel is a sequence of typed fields, each field
//! carried in its own length-prefixed part. The first field is always a
//! signed varint message/command type code; counts use unsigned varints and
//! strings are raw byte blobs.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::varint;

/// Upper bounds enforced while decoding; a peer exceeding them is broken or
/// hostile and the connection is dropped.
const MAX_PARTS: u64 = 4096;
const MAX_PART_LEN: u64 = 64 * 1024 * 1024;

/// An ordered sequence of byte-blob parts, consumed front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    parts: VecDeque<Bytes>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    pub fn push_blob(&mut self, blob: Bytes) {
        self.parts.push_back(blob);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.parts.push_back(Bytes::copy_from_slice(bytes));
    }

    pub fn push_str(&mut self, s: &str) {
        self.parts.push_back(Bytes::copy_from_slice(s.as_bytes()));
    }

    /// Appends a message/command type code as a signed varint part.
    pub fn push_type(&mut self, code: i64) {
        let mut buf = BytesMut::with_capacity(10);
        varint::put_svarint(&mut buf, code);
        self.parts.push_back(buf.freeze());
    }

    /// Prepends a type code, turning an already-built payload into a typed
    /// message.
    pub fn push_front_type(&mut self, code: i64) {
        let mut buf = BytesMut::with_capacity(10);
        varint::put_svarint(&mut buf, code);
        self.parts.push_front(buf.freeze());
    }

    pub fn push_front_blob(&mut self, blob: Bytes) {
        self.parts.push_front(blob);
    }

    /// Appends a count/size field as an unsigned varint part.
    pub fn push_size(&mut self, n: usize) {
        self.push_u64(n as u64);
    }

    pub fn push_u64(&mut self, v: u64) {
        let mut buf = BytesMut::with_capacity(10);
        varint::put_uvarint(&mut buf, v);
        self.parts.push_back(buf.freeze());
    }

    pub fn push_f64(&mut self, v: f64) {
        let mut buf = BytesMut::with_capacity(10);
        varint::put_f64(&mut buf, v);
        self.parts.push_back(buf.freeze());
    }

    pub fn pop(&mut self) -> Result<Bytes, WireError> {
        self.parts.pop_front().ok_or(WireError::Exhausted)
    }

    pub fn pop_str(&mut self) -> Result<String, WireError> {
        let blob = self.pop()?;
        String::from_utf8(blob.to_vec())
            .map_err(|_| WireError::Malformed("string part is not valid utf-8".into()))
    }

    pub fn pop_type(&mut self) -> Result<i64, WireError> {
        let mut blob = self.pop()?;
        varint::get_svarint(&mut blob)
    }

    pub fn pop_size(&mut self) -> Result<usize, WireError> {
        Ok(self.pop_u64()? as usize)
    }

    pub fn pop_u64(&mut self) -> Result<u64, WireError> {
        let mut blob = self.pop()?;
        varint::get_uvarint(&mut blob)
    }

    pub fn pop_f64(&mut self) -> Result<f64, WireError> {
        let mut blob = self.pop()?;
        varint::get_f64(&mut blob)
    }

    /// Moves all remaining parts of `other` onto the back of this frame.
    pub fn extend(&mut self, mut other: Frame) {
        self.parts.append(&mut other.parts);
    }
}

impl FromIterator<Bytes> for Frame {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

/// Stream framing: unsigned-varint part count, then each part as an
/// unsigned-varint length followed by that many bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

fn peek_uvarint(src: &[u8], offset: &mut usize) -> Result<Option<u64>, WireError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for i in 0..10 {
        let Some(&byte) = src.get(*offset + i) else {
            return Ok(None);
        };
        if shift == 63 && byte > 1 {
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            *offset += i + 1;
            return Ok(Some(value));
        }
        shift += 7;
    }
    Err(WireError::VarintOverflow)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        let mut offset = 0usize;
        let Some(count) = peek_uvarint(src, &mut offset)? else {
            return Ok(None);
        };
        if count > MAX_PARTS {
            return Err(WireError::Malformed(format!("{count} parts in one frame")));
        }

        let mut lens = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Some(len) = peek_uvarint(src, &mut offset)? else {
                return Ok(None);
            };
            if len > MAX_PART_LEN {
                return Err(WireError::Malformed(format!("part of {len} bytes")));
            }
            if src.len() < offset + len as usize {
                return Ok(None);
            }
            lens.push((offset, len as usize));
            offset += len as usize;
        }

        let mut frame = Frame::new();
        for (start, len) in lens {
            frame.push_blob(Bytes::copy_from_slice(&src[start..start + len]));
        }
        src.advance(offset);
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        varint::put_uvarint(dst, frame.parts.len() as u64);
        for part in &frame.parts {
            varint::put_uvarint(dst, part.len() as u64);
            dst.put_slice(part);
        }
        Ok(())
    }
}
