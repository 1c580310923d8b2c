//! Media graph daemon endpoint.
//!
//! Serves the native protocol over a local stream socket: per-connection
//! object tables, method dispatch into the graph, and the event traffic back
//! to clients. The graph itself is a small in-memory model (modules, nodes,
//! links and the connected clients) seeded with a demo module and source
//! node.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::sync::Arc;

use color_eyre::Result;
use log::{info, warn};

use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::pod::{Builder, ObjectBuf};
use crate::proto::{
    self, ClientInfo, ClientNotify, CoreInfo, CoreMethod, CoreNotify, CoreRequest, InterfaceKind,
    LinkInfo, LinkNotify, ModuleInfo, ModuleNotify, NodeInfo, NodeNotify, RegistryMethod,
    RegistryNotify, RegistryRequest, CORE_ID, INTERFACE_VERSION, RES_ENOENT, TYPE_CORE,
    TYPE_REGISTRY,
};
use crate::types::TypeRegistry;

/// Type URI of the demo audio format pod.
pub const FORMAT_AUDIO: &str = "GraphWire:Format:Audio";

/// Node factories the demo graph accepts in `create_node`.
pub const FACTORIES: &[&str] = &["tone-source", "null-sink"];

// First info event for an object reports every field as changed.
const CHANGE_ALL: u64 = u64::MAX;

#[derive(Debug)]
struct Module {
    name: String,
    filename: String,
    args: String,
    props: Vec<(String, String)>,
}

#[derive(Debug)]
struct Node {
    name: String,
    max_input_ports: u32,
    max_output_ports: u32,
    input_formats: Vec<ObjectBuf>,
    output_formats: Vec<ObjectBuf>,
    state: i32,
    props: Vec<(String, String)>,
}

#[derive(Debug)]
struct Link {
    output_node_id: u32,
    output_port_id: u32,
    input_node_id: u32,
    input_port_id: u32,
    format: Option<ObjectBuf>,
}

#[derive(Debug, Default)]
struct ClientState {
    props: Vec<(String, String)>,
}

#[derive(Debug)]
enum Global {
    Module(Module),
    Node(Node),
    Client(ClientState),
    Link(Link),
}

impl Global {
    fn kind(&self) -> InterfaceKind {
        match self {
            Global::Module(_) => InterfaceKind::Module,
            Global::Node(_) => InterfaceKind::Node,
            Global::Client(_) => InterfaceKind::Client,
            Global::Link(_) => InterfaceKind::Link,
        }
    }
}

// What a connection-local object id is bound to: the core itself, the
// registry, or a graph global bound through `registry.bind` / `create_*`.
#[derive(Debug, Copy, Clone)]
enum Bound {
    Core,
    Registry,
    Global(u32),
}

// Per-connection dispatch state. Object ids live from the message that
// carried their new_id until remove_id or disconnect.
#[derive(Debug)]
struct Session {
    objects: HashMap<u32, Bound>,
    registry_binding: Option<u32>,
    client_global: u32,
    owned: Vec<u32>,
}

fn borrow_props(props: &[(String, String)]) -> Vec<(&str, &str)> {
    props.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

fn own_props(props: &[(&str, &str)]) -> Vec<(String, String)> {
    props
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn opcode<T>(interface: &'static str, raw: u16) -> crate::Result<T>
where
    T: TryFrom<u16>,
{
    T::try_from(raw).map_err(|_| ProtocolError::UnknownOpcode {
        interface,
        opcode: raw,
    })
}

// Announce pending type updates, then the message itself, FIFO.
fn emit<IO: Read + Write>(
    conn: &mut Connection<IO>,
    id: u32,
    opcode: u16,
    marshal: impl FnOnce(&mut Builder),
) -> crate::Result<()> {
    conn.sync_types()?;
    conn.send_with(id, opcode, marshal)
}

fn emit_error<IO: Read + Write>(
    conn: &mut Connection<IO>,
    id: u32,
    res: i32,
    message: &str,
) -> crate::Result<()> {
    let msg = CoreNotify::Error { id, res, message };
    emit(conn, CORE_ID, msg.opcode().into(), |b| msg.marshal(b))
}

fn emit_remove_id<IO: Read + Write>(conn: &mut Connection<IO>, id: u32) -> crate::Result<()> {
    let msg = CoreNotify::RemoveId { id };
    emit(conn, CORE_ID, msg.opcode().into(), |b| msg.marshal(b))
}

/// The daemon: the in-memory graph and the protocol service for it.
///
/// Connections are handled one at a time; each gets its own object table and
/// type-id map while the graph and the type registry are shared.
#[derive(Debug)]
pub struct Server {
    registry: Arc<TypeRegistry>,
    globals: BTreeMap<u32, Global>,
    next_global: u32,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// New daemon with the demo graph: one module and one source node with
    /// an audio output format.
    pub fn new() -> Self {
        let mut server = Server {
            registry: Arc::new(TypeRegistry::new()),
            globals: BTreeMap::new(),
            next_global: 1,
        };
        let gid = server.alloc_global_id();
        server.globals.insert(
            gid,
            Global::Module(Module {
                name: "module-demo-graph".to_string(),
                filename: "libgraphwire-module-demo-graph.so".to_string(),
                args: String::new(),
                props: vec![],
            }),
        );
        let format = server.audio_format();
        let gid = server.alloc_global_id();
        server.globals.insert(
            gid,
            Global::Node(Node {
                name: "tone0".to_string(),
                max_input_ports: 0,
                max_output_ports: 1,
                input_formats: vec![],
                output_formats: vec![format],
                state: 0,
                props: vec![("media.class".to_string(), "Audio/Source".to_string())],
            }),
        );
        server
    }

    /// The process type registry backing this daemon's pod type ids.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    // Demo audio format pod: rate and channel count records.
    fn audio_format(&self) -> ObjectBuf {
        let type_id = self.registry.intern(FORMAT_AUDIO);
        let mut b = Builder::new();
        b.int32(44100);
        b.int32(2);
        ObjectBuf {
            type_id,
            body: b.into_inner(),
        }
    }

    fn alloc_global_id(&mut self) -> u32 {
        let id = self.next_global;
        self.next_global += 1;
        id
    }

    /// Serve one connected client until it disconnects or fails. The
    /// client's globals are removed from the graph on the way out.
    pub fn handle_client<IO: Read + Write>(&mut self, io: IO) -> Result<()> {
        proto::register_protocol();
        let mut conn = Connection::new(io, self.registry.clone());
        let client_global = self.alloc_global_id();
        self.globals
            .insert(client_global, Global::Client(ClientState::default()));
        let mut session = Session {
            objects: HashMap::from([(CORE_ID, Bound::Core)]),
            registry_binding: None,
            client_global,
            owned: vec![client_global],
        };
        let mut buf = Vec::new();
        let result = match self.greet(&mut conn) {
            Ok(()) => self.serve(&mut conn, &mut session, &mut buf),
            Err(err) => Err(err),
        };
        for id in session.owned {
            self.globals.remove(&id);
        }
        Ok(result?)
    }

    // First event on every connection: who the core is.
    fn greet<IO: Read + Write>(&self, conn: &mut Connection<IO>) -> crate::Result<()> {
        let msg = CoreNotify::Info(CoreInfo {
            id: CORE_ID,
            change_mask: CHANGE_ALL,
            user_name: "graphwire",
            host_name: "localhost",
            version: env!("CARGO_PKG_VERSION"),
            name: "graphwire-0",
            cookie: std::process::id(),
            props: vec![],
        });
        emit(conn, CORE_ID, msg.opcode().into(), |b| msg.marshal(b))
    }

    fn serve<IO: Read + Write>(
        &mut self,
        conn: &mut Connection<IO>,
        session: &mut Session,
        buf: &mut Vec<u8>,
    ) -> crate::Result<()> {
        while let Some((id, op)) = conn.recv(buf)? {
            match self.handle_message(conn, session, id, op, buf) {
                Ok(()) => {}
                // the client may have raced a remove_id; drop the message
                Err(err @ ProtocolError::UnknownObject(_)) => {
                    warn!(target: "graphwire", "dropping message: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn handle_message<IO: Read + Write>(
        &mut self,
        conn: &mut Connection<IO>,
        session: &mut Session,
        id: u32,
        op: u16,
        buf: &mut Vec<u8>,
    ) -> crate::Result<()> {
        let bound = session
            .objects
            .get(&id)
            .copied()
            .ok_or(ProtocolError::UnknownObject(id))?;
        match bound {
            Bound::Core => {
                let op: CoreMethod = opcode(TYPE_CORE, op)?;
                match CoreRequest::demarshal(op, buf, conn.types())? {
                    CoreRequest::UpdateTypes { first_id, types } => {
                        conn.apply_type_update(first_id, &types)?;
                    }
                    CoreRequest::Sync { seq } => {
                        let msg = CoreNotify::Done { seq };
                        emit(conn, CORE_ID, msg.opcode().into(), |b| msg.marshal(b))?;
                    }
                    CoreRequest::GetRegistry { new_id } => {
                        session.objects.insert(new_id, Bound::Registry);
                        session.registry_binding = Some(new_id);
                        for (&gid, global) in &self.globals {
                            let msg = RegistryNotify::Global {
                                id: gid,
                                type_uri: global.kind().type_uri(),
                                version: INTERFACE_VERSION,
                            };
                            emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
                        }
                    }
                    CoreRequest::ClientUpdate { props } => {
                        let props = own_props(&props);
                        if let Some(Global::Client(client)) =
                            self.globals.get_mut(&session.client_global)
                        {
                            client.props = props;
                        }
                    }
                    CoreRequest::CreateNode {
                        factory_name,
                        name,
                        props,
                        new_id,
                    } => self.create_node(conn, session, factory_name, name, &props, new_id)?,
                    CoreRequest::CreateLink {
                        output_node_id,
                        output_port_id,
                        input_node_id,
                        input_port_id,
                        filter,
                        props: _,
                        new_id,
                    } => {
                        let format = filter.map(|f| f.to_owned());
                        self.create_link(
                            conn,
                            session,
                            [output_node_id, output_port_id, input_node_id, input_port_id],
                            format,
                            new_id,
                        )?;
                    }
                }
            }
            Bound::Registry => {
                let op: RegistryMethod = opcode(TYPE_REGISTRY, op)?;
                match RegistryRequest::demarshal(op, buf, conn.types())? {
                    RegistryRequest::Bind {
                        id,
                        version: _,
                        new_id,
                    } => self.bind_global(conn, session, id, new_id)?,
                }
            }
            Bound::Global(gid) => {
                // none of the bindable interfaces has inbound methods
                let interface = self
                    .globals
                    .get(&gid)
                    .map(|g| g.kind().type_uri())
                    .unwrap_or(TYPE_CORE);
                return Err(ProtocolError::UnknownOpcode {
                    interface,
                    opcode: op,
                });
            }
        }
        Ok(())
    }

    fn announce_global<IO: Read + Write>(
        &self,
        conn: &mut Connection<IO>,
        session: &Session,
        gid: u32,
        kind: InterfaceKind,
    ) -> crate::Result<()> {
        let Some(registry_id) = session.registry_binding else {
            return Ok(());
        };
        let msg = RegistryNotify::Global {
            id: gid,
            type_uri: kind.type_uri(),
            version: INTERFACE_VERSION,
        };
        emit(conn, registry_id, msg.opcode().into(), |b| msg.marshal(b))
    }

    fn create_node<IO: Read + Write>(
        &mut self,
        conn: &mut Connection<IO>,
        session: &mut Session,
        factory_name: &str,
        name: &str,
        props: &[(&str, &str)],
        new_id: u32,
    ) -> crate::Result<()> {
        if !FACTORIES.contains(&factory_name) {
            emit_error(
                conn,
                new_id,
                RES_ENOENT,
                &format!("unknown factory {factory_name}"),
            )?;
            return emit_remove_id(conn, new_id);
        }
        let format = self.audio_format();
        let node = if factory_name == "tone-source" {
            Node {
                name: name.to_string(),
                max_input_ports: 0,
                max_output_ports: 1,
                input_formats: vec![],
                output_formats: vec![format],
                state: 0,
                props: own_props(props),
            }
        } else {
            Node {
                name: name.to_string(),
                max_input_ports: 1,
                max_output_ports: 0,
                input_formats: vec![format],
                output_formats: vec![],
                state: 0,
                props: own_props(props),
            }
        };
        let gid = self.alloc_global_id();
        let msg = NodeNotify::Info(NodeInfo {
            id: gid,
            change_mask: CHANGE_ALL,
            name: &node.name,
            max_input_ports: node.max_input_ports,
            n_input_ports: 0,
            input_formats: node.input_formats.iter().map(|f| f.as_pod()).collect(),
            max_output_ports: node.max_output_ports,
            n_output_ports: 0,
            output_formats: node.output_formats.iter().map(|f| f.as_pod()).collect(),
            state: node.state,
            error: "",
            props: borrow_props(&node.props),
        });
        emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
        self.globals.insert(gid, Global::Node(node));
        session.objects.insert(new_id, Bound::Global(gid));
        session.owned.push(gid);
        self.announce_global(conn, session, gid, InterfaceKind::Node)
    }

    fn create_link<IO: Read + Write>(
        &mut self,
        conn: &mut Connection<IO>,
        session: &mut Session,
        ports: [u32; 4],
        format: Option<ObjectBuf>,
        new_id: u32,
    ) -> crate::Result<()> {
        let [output_node_id, output_port_id, input_node_id, input_port_id] = ports;
        for node_id in [output_node_id, input_node_id] {
            match self.globals.get(&node_id) {
                Some(Global::Node(_)) => {}
                _ => {
                    emit_error(conn, new_id, RES_ENOENT, &format!("unknown node {node_id}"))?;
                    return emit_remove_id(conn, new_id);
                }
            }
        }
        let link = Link {
            output_node_id,
            output_port_id,
            input_node_id,
            input_port_id,
            format,
        };
        let gid = self.alloc_global_id();
        let msg = LinkNotify::Info(LinkInfo {
            id: gid,
            change_mask: CHANGE_ALL,
            output_node_id: link.output_node_id,
            output_port_id: link.output_port_id,
            input_node_id: link.input_node_id,
            input_port_id: link.input_port_id,
            format: link.format.as_ref().map(|f| f.as_pod()),
        });
        emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
        self.globals.insert(gid, Global::Link(link));
        session.objects.insert(new_id, Bound::Global(gid));
        session.owned.push(gid);
        self.announce_global(conn, session, gid, InterfaceKind::Link)
    }

    fn bind_global<IO: Read + Write>(
        &mut self,
        conn: &mut Connection<IO>,
        session: &mut Session,
        global_id: u32,
        new_id: u32,
    ) -> crate::Result<()> {
        let Some(global) = self.globals.get(&global_id) else {
            emit_error(
                conn,
                new_id,
                RES_ENOENT,
                &format!("unknown global {global_id}"),
            )?;
            return emit_remove_id(conn, new_id);
        };
        match global {
            Global::Module(module) => {
                let msg = ModuleNotify::Info(ModuleInfo {
                    id: global_id,
                    change_mask: CHANGE_ALL,
                    name: &module.name,
                    filename: &module.filename,
                    args: &module.args,
                    props: borrow_props(&module.props),
                });
                emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
            }
            Global::Node(node) => {
                let msg = NodeNotify::Info(NodeInfo {
                    id: global_id,
                    change_mask: CHANGE_ALL,
                    name: &node.name,
                    max_input_ports: node.max_input_ports,
                    n_input_ports: 0,
                    input_formats: node.input_formats.iter().map(|f| f.as_pod()).collect(),
                    max_output_ports: node.max_output_ports,
                    n_output_ports: 0,
                    output_formats: node.output_formats.iter().map(|f| f.as_pod()).collect(),
                    state: node.state,
                    error: "",
                    props: borrow_props(&node.props),
                });
                emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
            }
            Global::Client(client) => {
                let msg = ClientNotify::Info(ClientInfo {
                    id: global_id,
                    change_mask: CHANGE_ALL,
                    props: borrow_props(&client.props),
                });
                emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
            }
            Global::Link(link) => {
                let msg = LinkNotify::Info(LinkInfo {
                    id: global_id,
                    change_mask: CHANGE_ALL,
                    output_node_id: link.output_node_id,
                    output_port_id: link.output_port_id,
                    input_node_id: link.input_node_id,
                    input_port_id: link.input_port_id,
                    format: link.format.as_ref().map(|f| f.as_pod()),
                });
                emit(conn, new_id, msg.opcode().into(), |b| msg.marshal(b))?;
            }
        }
        session.objects.insert(new_id, Bound::Global(global_id));
        Ok(())
    }

    /// Accept and serve connections, one client at a time.
    pub fn start(mut self, listener: UnixListener) -> Result<()> {
        for stream in listener.incoming() {
            let mut stream = stream?;
            info!(target: "graphwire", "client connected");
            match self.handle_client(&mut stream) {
                Ok(()) => info!(target: "graphwire", "client disconnected"),
                Err(err) => eprintln!("error handling client:\n{err:?}"),
            }
        }
        Ok(())
    }
}
