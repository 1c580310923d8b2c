//! Message framer: length-delimited messages over a bidirectional stream.
//!
//! Each frame is `u32 target_id`, then `u32 (opcode << 24) | len`, then `len`
//! payload bytes, all little-endian. The payload of every message is one
//! top-level pod struct. The connection also owns the per-connection type-id
//! map and takes care of announcing newly interned types to the peer before
//! any message that may reference them.

use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::sync::Arc;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use log::debug;

use crate::error::{ProtocolError, Result};
use crate::pod::Builder;
use crate::proto::{CORE_ID, UPDATE_TYPES};
use crate::types::{TypeMap, TypeRegistry};

/// Largest payload the packed frame header can describe.
pub const MAX_PAYLOAD: usize = 0x00ff_ffff;

/// A protocol connection: the stream, the outbound scratch buffer and the
/// type-id map agreed with the peer.
///
/// All marshaling and demarshaling for one connection runs on one thread of
/// execution; two connections share nothing but the process type registry.
#[derive(Debug)]
pub struct Connection<IO> {
    io: Option<IO>,
    registry: Arc<TypeRegistry>,
    types: TypeMap,
    out: Vec<u8>,
}

impl<IO: Read + Write> Connection<IO> {
    /// Wrap an accepted or connected stream.
    pub fn new(io: IO, registry: Arc<TypeRegistry>) -> Self {
        Connection {
            io: Some(io),
            registry,
            types: TypeMap::new(),
            out: Vec::new(),
        }
    }

    /// The process type registry this connection interns into.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The connection's type-id map, for demarshal-time remapping.
    pub fn types(&self) -> &TypeMap {
        &self.types
    }

    /// Whether the transport is still attached.
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Detach the transport. Subsequent sends become silent no-ops and
    /// `recv` reports end of stream.
    pub fn close(&mut self) {
        self.io = None;
    }

    /// Install a peer `update_types` announcement into the wire->local map.
    pub fn apply_type_update(&mut self, first_id: u32, uris: &[&str]) -> Result<()> {
        self.types.apply_update(first_id, uris, &self.registry)
    }

    /// Announce any locally interned types the peer has not seen yet.
    ///
    /// Every marshaler except `update_types` itself calls this first, so the
    /// update always precedes the message that needs it, FIFO on the same
    /// stream.
    pub fn sync_types(&mut self) -> Result<()> {
        let Some(update) = self.types.pending_update(&self.registry) else {
            return Ok(());
        };
        debug!(
            target: "graphwire",
            "announcing {} type(s) from id {}",
            update.uris.len(),
            update.first_id
        );
        let mut b = Builder::from_vec(mem::take(&mut self.out));
        let f = b.open_struct();
        b.int32(update.first_id as i32);
        b.int32(update.uris.len() as i32);
        for uri in &update.uris {
            b.string(uri);
        }
        b.close_struct(f);
        let payload = b.into_inner();
        let res = self.write_frame(CORE_ID, UPDATE_TYPES, &payload);
        self.out = payload;
        res
    }

    /// Build one message payload and send it framed. The closure must write
    /// exactly one top-level struct. On a closed connection the message is
    /// silently dropped.
    pub fn send_with(&mut self, id: u32, opcode: u16, build: impl FnOnce(&mut Builder)) -> Result<()> {
        if self.io.is_none() {
            return Ok(());
        }
        let mut b = Builder::from_vec(mem::take(&mut self.out));
        build(&mut b);
        let payload = b.into_inner();
        let res = self.write_frame(id, opcode, &payload);
        self.out = payload;
        res
    }

    fn write_frame(&mut self, id: u32, opcode: u16, payload: &[u8]) -> Result<()> {
        let Some(io) = self.io.as_mut() else {
            return Ok(());
        };
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::Oversize(payload.len()));
        }
        debug!(target: "graphwire", "send id {id} opcode {opcode} len {}", payload.len());
        io.write_u32::<LE>(id)?;
        io.write_u32::<LE>(u32::from(opcode) << 24 | payload.len() as u32)?;
        io.write_all(payload)?;
        io.flush()?;
        Ok(())
    }

    /// Read one frame into `buf` and return its `(target_id, opcode)`.
    /// Returns `Ok(None)` on a clean end of stream (or a closed connection).
    pub fn recv(&mut self, buf: &mut Vec<u8>) -> Result<Option<(u32, u16)>> {
        let Some(io) = self.io.as_mut() else {
            return Ok(None);
        };
        let id = match io.read_u32::<LE>() {
            Ok(id) => id,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.close();
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let word = io.read_u32::<LE>()?;
        let opcode = (word >> 24) as u16;
        let len = (word & MAX_PAYLOAD as u32) as usize;
        buf.resize(len, 0);
        io.read_exact(buf)?;
        debug!(target: "graphwire", "recv id {id} opcode {opcode} len {len}");
        Ok(Some((id, opcode)))
    }
}
