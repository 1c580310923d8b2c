//! POD codec: the self-describing tag-length-value record format used for
//! every message payload.
//!
//! Each record on the wire is `u32 size, u32 tag` (both little-endian)
//! followed by `size` payload bytes and padding up to a 4-byte boundary.
//! `size` does not include the 8-byte header. A `Struct` record's payload is
//! the concatenation of its child records; an `Object` record's payload is a
//! `u32` type id followed by child records that this layer treats as opaque
//! except for type-id remapping.

#![deny(missing_docs)]

use byteorder::{ByteOrder, LE};

use crate::error::{ProtocolError, Result};
use crate::types::TypeMap;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Record tags. Values are wire-stable.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    /// Signed 32-bit integer, payload size 4.
    Int32 = 1,
    /// Signed 64-bit integer, payload size 8.
    Int64 = 2,
    /// NUL-terminated UTF-8; the size counts the terminator.
    String = 3,
    /// Type id plus an opaque nested pod.
    Object = 4,
    /// Ordered container of records.
    Struct = 5,
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// A borrowed `Object` record: the embedded type id and the raw body records.
///
/// The type id is in the id space of whichever side the payload currently
/// belongs to; see [`remap_embedded_ids`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PodObject<'a> {
    /// Embedded type id (local after remapping, wire before).
    pub type_id: u32,
    /// Raw body bytes following the type id.
    pub body: &'a [u8],
}

impl PodObject<'_> {
    /// Copy this object out of the payload buffer it borrows from.
    pub fn to_owned(&self) -> ObjectBuf {
        ObjectBuf {
            type_id: self.type_id,
            body: self.body.to_vec(),
        }
    }
}

/// An owned `Object` record, for callers that retain a pod past the dispatch
/// that decoded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBuf {
    /// Embedded type id.
    pub type_id: u32,
    /// Body bytes following the type id.
    pub body: Vec<u8>,
}

impl ObjectBuf {
    /// Borrow as a [`PodObject`] for re-marshaling.
    pub fn as_pod(&self) -> PodObject<'_> {
        PodObject {
            type_id: self.type_id,
            body: &self.body,
        }
    }
}

/// Handle to an open struct record; consumed by [`Builder::close_struct`].
#[derive(Debug)]
#[must_use]
pub struct StructFrame(usize);

/// Append-only record encoder over a byte buffer.
///
/// Encoding cannot fail; the buffer grows as needed and [`Builder::offset`]
/// reports the payload length for the frame header.
#[derive(Debug, Default)]
pub struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    /// New builder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// New builder reusing `buf` as scratch space (cleared first).
    pub fn from_vec(mut buf: Vec<u8>) -> Self {
        buf.clear();
        Builder { buf }
    }

    /// Current write position, i.e. the payload length so far.
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    /// The encoded bytes so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the builder and return the encoded bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn push_u32(&mut self, v: u32) {
        let mut w = [0u8; 4];
        LE::write_u32(&mut w, v);
        self.buf.extend_from_slice(&w);
    }

    fn header(&mut self, size: u32, tag: Tag) {
        self.push_u32(size);
        self.push_u32(tag.into());
    }

    fn pad(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    /// Begin a nested struct. The size field is back-patched on close.
    pub fn open_struct(&mut self) -> StructFrame {
        let frame = StructFrame(self.buf.len());
        self.header(0, Tag::Struct);
        frame
    }

    /// Close a struct opened with [`Builder::open_struct`].
    pub fn close_struct(&mut self, frame: StructFrame) {
        let size = (self.buf.len() - frame.0 - 8) as u32;
        LE::write_u32(&mut self.buf[frame.0..frame.0 + 4], size);
    }

    /// Append an `Int32` record.
    pub fn int32(&mut self, v: i32) {
        self.header(4, Tag::Int32);
        self.push_u32(v as u32);
    }

    /// Append an `Int64` record.
    pub fn int64(&mut self, v: i64) {
        self.header(8, Tag::Int64);
        let mut w = [0u8; 8];
        LE::write_i64(&mut w, v);
        self.buf.extend_from_slice(&w);
    }

    /// Append a `String` record. The size counts the NUL terminator.
    pub fn string(&mut self, s: &str) {
        self.header(s.len() as u32 + 1, Tag::String);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.pad();
    }

    /// Append an `Object` record: the type id followed by the body bytes.
    pub fn object(&mut self, obj: PodObject<'_>) {
        self.header(4 + obj.body.len() as u32, Tag::Object);
        self.push_u32(obj.type_id);
        self.buf.extend_from_slice(obj.body);
        self.pad();
    }
}

/// Iterator over the child records of a `Struct` payload, borrowed from the
/// frame buffer. Decoded strings and objects borrow from the same buffer.
#[derive(Debug)]
pub struct PodIter<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Position the iterator at the first child of the top-level struct record
/// in `data`. Fails if the top-level record is not a well-formed `Struct`.
pub fn struct_iter(data: &[u8]) -> Result<PodIter<'_>> {
    if data.len() < 8 {
        return Err(ProtocolError::PodDecode("truncated struct header"));
    }
    let size = LE::read_u32(&data[0..4]) as usize;
    let tag = LE::read_u32(&data[4..8]);
    if tag != u32::from(Tag::Struct) {
        return Err(ProtocolError::PodDecode("top-level record is not a struct"));
    }
    if size > data.len() - 8 {
        return Err(ProtocolError::PodDecode("struct size exceeds buffer"));
    }
    Ok(PodIter {
        data: &data[8..8 + size],
        pos: 0,
    })
}

impl<'a> PodIter<'a> {
    /// Whether another record follows.
    pub fn has_next(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Raw tag and payload of the next record, without consuming it.
    fn peek(&self) -> Result<(u32, &'a [u8])> {
        if self.pos >= self.data.len() {
            return Err(ProtocolError::PodDecode("missing field"));
        }
        if self.data.len() - self.pos < 8 {
            return Err(ProtocolError::PodDecode("truncated record header"));
        }
        let size = LE::read_u32(&self.data[self.pos..self.pos + 4]) as usize;
        let tag = LE::read_u32(&self.data[self.pos + 4..self.pos + 8]);
        let start = self.pos + 8;
        if size > self.data.len() - start {
            return Err(ProtocolError::PodDecode("record size exceeds buffer"));
        }
        Ok((tag, &self.data[start..start + size]))
    }

    /// Step past the current record, enforcing 4-byte padding.
    fn advance(&mut self) -> Result<()> {
        let size = LE::read_u32(&self.data[self.pos..self.pos + 4]) as usize;
        let next = self.pos + 8 + align4(size);
        if next > self.data.len() {
            return Err(ProtocolError::PodDecode("record not padded to 4 bytes"));
        }
        self.pos = next;
        Ok(())
    }

    fn expect(&mut self, tag: Tag) -> Result<&'a [u8]> {
        let (raw, payload) = self.peek()?;
        if raw != u32::from(tag) {
            return Err(ProtocolError::PodDecode("record tag mismatch"));
        }
        self.advance()?;
        Ok(payload)
    }

    /// Consume the next record, which must be an `Int32`.
    pub fn int32(&mut self) -> Result<i32> {
        let payload = self.expect(Tag::Int32)?;
        if payload.len() != 4 {
            return Err(ProtocolError::PodDecode("bad int32 size"));
        }
        Ok(LE::read_i32(payload))
    }

    /// Consume the next record, which must be an `Int64`.
    pub fn int64(&mut self) -> Result<i64> {
        let payload = self.expect(Tag::Int64)?;
        if payload.len() != 8 {
            return Err(ProtocolError::PodDecode("bad int64 size"));
        }
        Ok(LE::read_i64(payload))
    }

    /// Consume the next record, which must be a `String`. The returned slice
    /// excludes the NUL terminator and borrows from the payload buffer.
    pub fn string(&mut self) -> Result<&'a str> {
        let payload = self.expect(Tag::String)?;
        let Some((&0, content)) = payload.split_last() else {
            return Err(ProtocolError::PodDecode("unterminated string"));
        };
        std::str::from_utf8(content).map_err(|_| ProtocolError::PodDecode("string is not utf-8"))
    }

    /// Consume the next record, which must be an `Object`.
    pub fn object(&mut self) -> Result<PodObject<'a>> {
        let payload = self.expect(Tag::Object)?;
        if payload.len() < 4 {
            return Err(ProtocolError::PodDecode("object too short for type id"));
        }
        Ok(PodObject {
            type_id: LE::read_u32(&payload[0..4]),
            body: &payload[4..],
        })
    }

    /// Optional-object read: if the next record is an `Object`, consume and
    /// return it; any other record (or the end of the struct) means the
    /// object was omitted and nothing is consumed.
    pub fn opt_object(&mut self) -> Result<Option<PodObject<'a>>> {
        if !self.has_next() {
            return Ok(None);
        }
        let (raw, _) = self.peek()?;
        if raw != u32::from(Tag::Object) {
            return Ok(None);
        }
        self.object().map(Some)
    }

    /// Skip one record of any tag, known or not.
    pub fn skip(&mut self) -> Result<()> {
        self.peek()?;
        self.advance()
    }
}

/// Rewrite every embedded type id in the pod tree from wire ids to local ids.
///
/// `data` must hold a single top-level `Struct` record. The walk recurses
/// through structs and object bodies; every `Object` record's leading type id
/// is translated through `types`. Must run before a handler reads any
/// object-bearing payload.
pub fn remap_embedded_ids(data: &mut [u8], types: &TypeMap) -> Result<()> {
    if data.len() < 8 {
        return Err(ProtocolError::PodDecode("truncated struct header"));
    }
    let size = LE::read_u32(&data[0..4]) as usize;
    let tag = LE::read_u32(&data[4..8]);
    if tag != u32::from(Tag::Struct) {
        return Err(ProtocolError::PodDecode("top-level record is not a struct"));
    }
    if size > data.len() - 8 {
        return Err(ProtocolError::PodDecode("struct size exceeds buffer"));
    }
    remap_range(&mut data[8..8 + size], types)
}

fn remap_range(data: &mut [u8], types: &TypeMap) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 8 {
            return Err(ProtocolError::PodDecode("truncated record header"));
        }
        let size = LE::read_u32(&data[pos..pos + 4]) as usize;
        let tag = LE::read_u32(&data[pos + 4..pos + 8]);
        let start = pos + 8;
        if size > data.len() - start {
            return Err(ProtocolError::PodDecode("record size exceeds buffer"));
        }
        if tag == u32::from(Tag::Struct) {
            remap_range(&mut data[start..start + size], types)?;
        } else if tag == u32::from(Tag::Object) {
            if size < 4 {
                return Err(ProtocolError::PodDecode("object too short for type id"));
            }
            let wire = LE::read_u32(&data[start..start + 4]);
            let local = types.local_of(wire)?;
            LE::write_u32(&mut data[start..start + 4], local);
            remap_range(&mut data[start + 4..start + size], types)?;
        }
        pos = start + align4(size);
        if pos > data.len() {
            return Err(ProtocolError::PodDecode("record not padded to 4 bytes"));
        }
    }
    Ok(())
}
