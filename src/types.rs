//! Process-wide type registry and the per-connection type-id map.
//!
//! Type URIs are interned process-wide into dense numeric ids. Each
//! connection announces its registry to the peer incrementally with
//! `update_types` batches; the peer interns the URIs into its own registry
//! and keeps the wire->local translation here.

#![deny(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ProtocolError, Result};

/// Append-only interning table mapping type URIs to dense local ids.
///
/// Shared process-wide (via `Arc`) between every connection of one endpoint.
/// Ids are never reused and entries are never removed.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    uris: Vec<Arc<str>>,
    index: HashMap<Arc<str>, u32>,
}

impl TypeRegistry {
    /// New, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `uri`, interning it if not yet known.
    pub fn intern(&self, uri: &str) -> u32 {
        if let Some(&id) = self.inner.read().index.get(uri) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.index.get(uri) {
            return id;
        }
        let id = inner.uris.len() as u32;
        let uri: Arc<str> = Arc::from(uri);
        inner.uris.push(uri.clone());
        inner.index.insert(uri, id);
        id
    }

    /// Look up the URI backing a local id.
    pub fn uri_of(&self, id: u32) -> Option<Arc<str>> {
        self.inner.read().uris.get(id as usize).cloned()
    }

    /// Look up the local id of an already-interned URI.
    pub fn id_of(&self, uri: &str) -> Option<u32> {
        self.inner.read().index.get(uri).copied()
    }

    /// Number of interned types.
    pub fn len(&self) -> u32 {
        self.inner.read().uris.len() as u32
    }

    /// Whether no types have been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One pending `update_types` announcement: the id range `[first_id,
/// first_id + uris.len())` of newly interned local types.
#[derive(Debug)]
pub struct TypeUpdate {
    /// First local id covered by this batch.
    pub first_id: u32,
    /// URIs backing the new ids, in id order.
    pub uris: Vec<Arc<str>>,
}

/// Per-connection bidirectional type-id translation state.
///
/// `sent` is the high-water mark of local ids already announced to the peer;
/// `wire_to_local` translates the peer's announced ids on receipt. Both grow
/// monotonically and ids are never reused.
#[derive(Debug, Default)]
pub struct TypeMap {
    sent: u32,
    wire_to_local: Vec<u32>,
}

impl TypeMap {
    /// Fresh map for a new connection; nothing announced in either direction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the registry against the announced high-water mark. If the
    /// registry grew, return the covering announcement and advance the mark;
    /// the caller must then send it before any message referencing the ids.
    pub fn pending_update(&mut self, registry: &TypeRegistry) -> Option<TypeUpdate> {
        let len = registry.len();
        if len == self.sent {
            return None;
        }
        let first_id = self.sent;
        let uris = (first_id..len)
            .filter_map(|id| registry.uri_of(id))
            .collect();
        self.sent = len;
        Some(TypeUpdate { first_id, uris })
    }

    /// Install a peer announcement. `first_id` must be exactly the current
    /// wire high-water mark; gaps and overlaps are fatal.
    pub fn apply_update(
        &mut self,
        first_id: u32,
        uris: &[&str],
        registry: &TypeRegistry,
    ) -> Result<()> {
        let expected = self.wire_to_local.len() as u32;
        if first_id != expected {
            return Err(ProtocolError::TypeMapGap {
                expected,
                got: first_id,
            });
        }
        for uri in uris {
            self.wire_to_local.push(registry.intern(uri));
        }
        Ok(())
    }

    /// Translate a peer (wire) id into a local id.
    pub fn local_of(&self, wire_id: u32) -> Result<u32> {
        self.wire_to_local
            .get(wire_id as usize)
            .copied()
            .ok_or(ProtocolError::PodDecode("unannounced embedded type id"))
    }

    /// Translate a local id into the id the peer knows it by. Locally
    /// announced ids go out verbatim, so this is an identity check against
    /// the announced range.
    pub fn wire_of(&self, local_id: u32) -> Option<u32> {
        (local_id < self.sent).then_some(local_id)
    }

    /// High-water mark of local ids announced to the peer.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Number of peer ids installed from announcements.
    pub fn installed(&self) -> u32 {
        self.wire_to_local.len() as u32
    }
}
