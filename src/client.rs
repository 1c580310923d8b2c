//! Client endpoint: typed proxies for outgoing methods and dispatch of
//! incoming events to an installed handler.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use log::warn;

use crate::connection::Connection;
use crate::error::{ProtocolError, Result};
use crate::pod::PodObject;
use crate::proto::{
    self, ClientEvent, ClientInfo, ClientNotify, CoreEvent, CoreInfo, CoreNotify, CoreRequest,
    InterfaceKind, LinkEvent, LinkInfo, LinkNotify, ModuleEvent, ModuleInfo, ModuleNotify,
    NodeEvent, NodeInfo, NodeNotify, RegistryEvent, RegistryNotify, RegistryRequest, CORE_ID,
    TYPE_CLIENT, TYPE_CORE, TYPE_LINK, TYPE_MODULE, TYPE_NODE, TYPE_REGISTRY,
};
use crate::types::TypeRegistry;

/// Handler for events arriving on a client connection.
///
/// All borrowed arguments point into the connection's frame buffer and are
/// only valid for the duration of the call; implementations that retain them
/// must copy. Every method has a no-op default so handlers implement only
/// what they care about.
pub trait ClientEvents {
    /// Core `info` event.
    fn core_info(&mut self, info: &CoreInfo<'_>) {
        let _ = info;
    }
    /// Core `done` event, completing the `sync` with the same seq.
    fn done(&mut self, seq: u32) {
        let _ = seq;
    }
    /// Core `error` event (application-level, not connection-fatal).
    fn error(&mut self, id: u32, res: i32, message: &str) {
        let _ = (id, res, message);
    }
    /// Core `remove_id` event; the proxy is already gone when this fires.
    fn remove_id(&mut self, id: u32) {
        let _ = id;
    }
    /// Registry `global` event.
    fn global(&mut self, id: u32, type_uri: &str, version: u32) {
        let _ = (id, type_uri, version);
    }
    /// Registry `global_remove` event.
    fn global_remove(&mut self, id: u32) {
        let _ = id;
    }
    /// Module `info` event.
    fn module_info(&mut self, info: &ModuleInfo<'_>) {
        let _ = info;
    }
    /// Node `info` event.
    fn node_info(&mut self, info: &NodeInfo<'_>) {
        let _ = info;
    }
    /// Client `info` event.
    fn client_info(&mut self, info: &ClientInfo<'_>) {
        let _ = info;
    }
    /// Link `info` event.
    fn link_info(&mut self, info: &LinkInfo<'_>) {
        let _ = info;
    }
}

fn opcode<T>(interface: &'static str, raw: u16) -> Result<T>
where
    T: TryFrom<u16>,
{
    T::try_from(raw).map_err(|_| ProtocolError::UnknownOpcode {
        interface,
        opcode: raw,
    })
}

/// A client connection to the core: proxy id allocation, method marshaling
/// and the inbound event loop.
#[derive(Debug)]
pub struct Client<IO> {
    conn: Connection<IO>,
    buf: Vec<u8>,
    proxies: HashMap<u32, InterfaceKind>,
    next_id: u32,
    last_done: Option<u32>,
}

impl<IO: Read + Write> Client<IO> {
    /// Wrap a connected stream. The core proxy is preinstalled at id 0.
    pub fn new(io: IO, registry: Arc<TypeRegistry>) -> Self {
        proto::register_protocol();
        let mut proxies = HashMap::new();
        proxies.insert(CORE_ID, InterfaceKind::Core);
        Client {
            conn: Connection::new(io, registry),
            buf: Vec::new(),
            proxies,
            next_id: CORE_ID + 1,
            last_done: None,
        }
    }

    /// The process type registry this client interns into.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.conn.registry()
    }

    /// The interface a proxy id is bound to, if it is still live.
    pub fn proxy_kind(&self, id: u32) -> Option<InterfaceKind> {
        self.proxies.get(&id).copied()
    }

    /// Detach the transport; all further method calls become silent no-ops.
    pub fn close(&mut self) {
        self.conn.close();
    }

    fn alloc_proxy(&mut self, kind: InterfaceKind) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.proxies.insert(id, kind);
        id
    }

    fn call_core(&mut self, msg: &CoreRequest<'_>) -> Result<()> {
        self.conn.sync_types()?;
        self.conn
            .send_with(CORE_ID, msg.opcode().into(), |b| msg.marshal(b))
    }

    /// Send `core.sync`; the core answers with `done` carrying the same seq.
    pub fn sync(&mut self, seq: u32) -> Result<()> {
        self.call_core(&CoreRequest::Sync { seq })
    }

    /// Ask the core for the registry. Returns the new registry proxy id.
    pub fn get_registry(&mut self) -> Result<u32> {
        let new_id = self.alloc_proxy(InterfaceKind::Registry);
        self.call_core(&CoreRequest::GetRegistry { new_id })?;
        Ok(new_id)
    }

    /// Update this client's properties on the core.
    pub fn client_update(&mut self, props: &[(&str, &str)]) -> Result<()> {
        self.call_core(&CoreRequest::ClientUpdate {
            props: props.to_vec(),
        })
    }

    /// Ask the core to create a node from `factory_name`. Returns the new
    /// node proxy id.
    pub fn create_node(
        &mut self,
        factory_name: &str,
        name: &str,
        props: &[(&str, &str)],
    ) -> Result<u32> {
        let new_id = self.alloc_proxy(InterfaceKind::Node);
        self.call_core(&CoreRequest::CreateNode {
            factory_name,
            name,
            props: props.to_vec(),
            new_id,
        })?;
        Ok(new_id)
    }

    /// Ask the core to link two ports, optionally constrained by a format
    /// filter pod. Returns the new link proxy id.
    pub fn create_link(
        &mut self,
        output_node_id: u32,
        output_port_id: u32,
        input_node_id: u32,
        input_port_id: u32,
        filter: Option<PodObject<'_>>,
        props: &[(&str, &str)],
    ) -> Result<u32> {
        let new_id = self.alloc_proxy(InterfaceKind::Link);
        self.call_core(&CoreRequest::CreateLink {
            output_node_id,
            output_port_id,
            input_node_id,
            input_port_id,
            filter,
            props: props.to_vec(),
            new_id,
        })?;
        Ok(new_id)
    }

    /// Bind a registry global to a new proxy of its interface. Returns the
    /// new proxy id.
    pub fn bind(
        &mut self,
        registry_id: u32,
        global_id: u32,
        kind: InterfaceKind,
        version: u32,
    ) -> Result<u32> {
        let new_id = self.alloc_proxy(kind);
        let msg = RegistryRequest::Bind {
            id: global_id,
            version,
            new_id,
        };
        self.conn.sync_types()?;
        self.conn
            .send_with(registry_id, msg.opcode().into(), |b| msg.marshal(b))?;
        Ok(new_id)
    }

    /// Read and dispatch one inbound event. Returns `false` on end of
    /// stream. Events for unknown proxies (the peer may have raced a
    /// `remove_id`) and unknown opcodes are logged and dropped; decode
    /// failures are fatal for the connection.
    pub fn dispatch_one(&mut self, handler: &mut impl ClientEvents) -> Result<bool> {
        let Some((id, op)) = self.conn.recv(&mut self.buf)? else {
            return Ok(false);
        };
        match self.dispatch(id, op, handler) {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(
                    err,
                    ProtocolError::UnknownObject(_) | ProtocolError::UnknownOpcode { .. }
                ) =>
            {
                warn!(target: "graphwire", "dropping event: {err}");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    fn dispatch(&mut self, id: u32, op: u16, handler: &mut impl ClientEvents) -> Result<()> {
        let kind = self
            .proxies
            .get(&id)
            .copied()
            .ok_or(ProtocolError::UnknownObject(id))?;
        match kind {
            InterfaceKind::Core => {
                let op: CoreEvent = opcode(TYPE_CORE, op)?;
                match CoreNotify::demarshal(op, &mut self.buf, self.conn.types())? {
                    CoreNotify::UpdateTypes { first_id, types } => {
                        self.conn.apply_type_update(first_id, &types)?;
                    }
                    CoreNotify::Done { seq } => {
                        self.last_done = Some(seq);
                        handler.done(seq);
                    }
                    CoreNotify::Error { id, res, message } => handler.error(id, res, message),
                    CoreNotify::RemoveId { id } => {
                        self.proxies.remove(&id);
                        handler.remove_id(id);
                    }
                    CoreNotify::Info(info) => handler.core_info(&info),
                }
            }
            InterfaceKind::Registry => {
                let op: RegistryEvent = opcode(TYPE_REGISTRY, op)?;
                match RegistryNotify::demarshal(op, &mut self.buf, self.conn.types())? {
                    RegistryNotify::Global {
                        id,
                        type_uri,
                        version,
                    } => handler.global(id, type_uri, version),
                    RegistryNotify::GlobalRemove { id } => handler.global_remove(id),
                }
            }
            InterfaceKind::Module => {
                let op: ModuleEvent = opcode(TYPE_MODULE, op)?;
                match ModuleNotify::demarshal(op, &mut self.buf, self.conn.types())? {
                    ModuleNotify::Info(info) => handler.module_info(&info),
                }
            }
            InterfaceKind::Node => {
                let op: NodeEvent = opcode(TYPE_NODE, op)?;
                match NodeNotify::demarshal(op, &mut self.buf, self.conn.types())? {
                    NodeNotify::Info(info) => handler.node_info(&info),
                }
            }
            InterfaceKind::Client => {
                let op: ClientEvent = opcode(TYPE_CLIENT, op)?;
                match ClientNotify::demarshal(op, &mut self.buf, self.conn.types())? {
                    ClientNotify::Info(info) => handler.client_info(&info),
                }
            }
            InterfaceKind::Link => {
                let op: LinkEvent = opcode(TYPE_LINK, op)?;
                match LinkNotify::demarshal(op, &mut self.buf, self.conn.types())? {
                    LinkNotify::Info(info) => handler.link_info(&info),
                }
            }
        }
        Ok(())
    }

    /// Send `sync(seq)` and dispatch events until the matching `done`
    /// arrives. Fails if the stream ends first.
    pub fn roundtrip(&mut self, seq: u32, handler: &mut impl ClientEvents) -> Result<()> {
        self.sync(seq)?;
        while self.last_done != Some(seq) {
            if !self.dispatch_one(handler)? {
                return Err(ProtocolError::Io(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed during roundtrip",
                )));
            }
        }
        Ok(())
    }
}
