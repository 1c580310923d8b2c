//! Interface catalog: type URIs, opcode tables and the marshalers and
//! demarshalers for every (interface, direction, opcode).
//!
//! Methods travel client->core, events core->client. Every payload is one
//! top-level pod struct with the arguments in the order given by the opcode
//! tables below; `new_id` arguments sit last in their struct. Decoded
//! strings and object pods borrow from the frame buffer a message arrived
//! in, so handlers that retain them must copy.

use std::sync::OnceLock;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{ProtocolError, Result};
use crate::pod::{self, Builder, PodIter, PodObject};
use crate::types::TypeMap;

/// The core object's well-known id on every connection.
pub const CORE_ID: u32 = 0;

/// `update_types` sits at opcode 0 of both the Core method table and the
/// Core event table, so the framer can emit announcements without caring
/// which side it is on.
pub const UPDATE_TYPES: u16 = 0;

/// Core interface type URI.
pub const TYPE_CORE: &str = "GraphWire:Interface:Core";
/// Registry interface type URI.
pub const TYPE_REGISTRY: &str = "GraphWire:Interface:Registry";
/// Module interface type URI.
pub const TYPE_MODULE: &str = "GraphWire:Interface:Module";
/// Node interface type URI.
pub const TYPE_NODE: &str = "GraphWire:Interface:Node";
/// Client interface type URI.
pub const TYPE_CLIENT: &str = "GraphWire:Interface:Client";
/// Link interface type URI.
pub const TYPE_LINK: &str = "GraphWire:Interface:Link";

/// Version carried by every interface registration in this protocol core.
pub const INTERFACE_VERSION: u32 = 0;

/// Result code for invalid arguments, as carried by the Core `error` event.
pub const RES_EINVAL: i32 = -22;
/// Result code for a reference to a nonexistent entity.
pub const RES_ENOENT: i32 = -2;

// The error event's message is pre-formatted by the caller and truncated to
// this many bytes including the NUL terminator.
const ERROR_MESSAGE_MAX: usize = 128;

fn clip_error(message: &str) -> &str {
    if message.len() < ERROR_MESSAGE_MAX {
        return message;
    }
    let mut end = ERROR_MESSAGE_MAX - 1;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

fn put_dict(b: &mut Builder, props: &[(&str, &str)]) {
    b.int32(props.len() as i32);
    for (key, value) in props {
        b.string(key);
        b.string(value);
    }
}

fn get_dict<'a>(it: &mut PodIter<'a>) -> Result<Vec<(&'a str, &'a str)>> {
    let n = it.int32()?;
    if n < 0 {
        return Err(ProtocolError::PodDecode("negative dictionary count"));
    }
    let mut props = Vec::new();
    for _ in 0..n {
        props.push((it.string()?, it.string()?));
    }
    Ok(props)
}

fn get_count(it: &mut PodIter<'_>) -> Result<u32> {
    let n = it.int32()?;
    if n < 0 {
        return Err(ProtocolError::PodDecode("negative count"));
    }
    Ok(n as u32)
}

fn get_type_list<'a>(it: &mut PodIter<'a>) -> Result<(u32, Vec<&'a str>)> {
    let first_id = get_count(it)?;
    let n = get_count(it)?;
    let mut types = Vec::new();
    for _ in 0..n {
        types.push(it.string()?);
    }
    Ok((first_id, types))
}

/// Core method opcodes (client -> core).
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum CoreMethod {
    UpdateTypes = 0,
    Sync = 1,
    GetRegistry = 2,
    ClientUpdate = 3,
    CreateNode = 4,
    CreateLink = 5,
}

/// Core event opcodes (core -> client).
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum CoreEvent {
    UpdateTypes = 0,
    Done = 1,
    Error = 2,
    RemoveId = 3,
    Info = 4,
}

/// Registry method opcodes.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum RegistryMethod {
    Bind = 0,
}

/// Registry event opcodes.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum RegistryEvent {
    Global = 0,
    GlobalRemove = 1,
}

/// Module event opcodes.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum ModuleEvent {
    Info = 0,
}

/// Node event opcodes.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeEvent {
    Info = 0,
}

/// Client event opcodes.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum ClientEvent {
    Info = 0,
}

/// Link event opcodes.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum LinkEvent {
    Info = 0,
}

/// Payload of the Core `info` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreInfo<'a> {
    pub id: u32,
    pub change_mask: u64,
    pub user_name: &'a str,
    pub host_name: &'a str,
    pub version: &'a str,
    pub name: &'a str,
    pub cookie: u32,
    pub props: Vec<(&'a str, &'a str)>,
}

/// Payload of the Module `info` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo<'a> {
    pub id: u32,
    pub change_mask: u64,
    pub name: &'a str,
    pub filename: &'a str,
    pub args: &'a str,
    pub props: Vec<(&'a str, &'a str)>,
}

/// Payload of the Node `info` event. The format arrays carry schema-opaque
/// object pods whose embedded type ids are remapped before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo<'a> {
    pub id: u32,
    pub change_mask: u64,
    pub name: &'a str,
    pub max_input_ports: u32,
    pub n_input_ports: u32,
    pub input_formats: Vec<PodObject<'a>>,
    pub max_output_ports: u32,
    pub n_output_ports: u32,
    pub output_formats: Vec<PodObject<'a>>,
    pub state: i32,
    pub error: &'a str,
    pub props: Vec<(&'a str, &'a str)>,
}

/// Payload of the Client `info` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo<'a> {
    pub id: u32,
    pub change_mask: u64,
    pub props: Vec<(&'a str, &'a str)>,
}

/// Payload of the Link `info` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo<'a> {
    pub id: u32,
    pub change_mask: u64,
    pub output_node_id: u32,
    pub output_port_id: u32,
    pub input_node_id: u32,
    pub input_port_id: u32,
    pub format: Option<PodObject<'a>>,
}

/// A Core method with its arguments, client->core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreRequest<'a> {
    UpdateTypes {
        first_id: u32,
        types: Vec<&'a str>,
    },
    Sync {
        seq: u32,
    },
    GetRegistry {
        new_id: u32,
    },
    ClientUpdate {
        props: Vec<(&'a str, &'a str)>,
    },
    CreateNode {
        factory_name: &'a str,
        name: &'a str,
        props: Vec<(&'a str, &'a str)>,
        new_id: u32,
    },
    CreateLink {
        output_node_id: u32,
        output_port_id: u32,
        input_node_id: u32,
        input_port_id: u32,
        filter: Option<PodObject<'a>>,
        props: Vec<(&'a str, &'a str)>,
        new_id: u32,
    },
}

impl<'a> CoreRequest<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> CoreMethod {
        match self {
            CoreRequest::UpdateTypes { .. } => CoreMethod::UpdateTypes,
            CoreRequest::Sync { .. } => CoreMethod::Sync,
            CoreRequest::GetRegistry { .. } => CoreMethod::GetRegistry,
            CoreRequest::ClientUpdate { .. } => CoreMethod::ClientUpdate,
            CoreRequest::CreateNode { .. } => CoreMethod::CreateNode,
            CoreRequest::CreateLink { .. } => CoreMethod::CreateLink,
        }
    }

    /// Serialize the arguments as the message's top-level struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            CoreRequest::UpdateTypes { first_id, types } => {
                b.int32(*first_id as i32);
                b.int32(types.len() as i32);
                for uri in types {
                    b.string(uri);
                }
            }
            CoreRequest::Sync { seq } => b.int32(*seq as i32),
            CoreRequest::GetRegistry { new_id } => b.int32(*new_id as i32),
            CoreRequest::ClientUpdate { props } => put_dict(b, props),
            CoreRequest::CreateNode {
                factory_name,
                name,
                props,
                new_id,
            } => {
                b.string(factory_name);
                b.string(name);
                put_dict(b, props);
                b.int32(*new_id as i32);
            }
            CoreRequest::CreateLink {
                output_node_id,
                output_port_id,
                input_node_id,
                input_port_id,
                filter,
                props,
                new_id,
            } => {
                b.int32(*output_node_id as i32);
                b.int32(*output_port_id as i32);
                b.int32(*input_node_id as i32);
                b.int32(*input_port_id as i32);
                if let Some(filter) = filter {
                    b.object(*filter);
                }
                put_dict(b, props);
                b.int32(*new_id as i32);
            }
        }
        b.close_struct(f);
    }

    /// Parse a method payload. `create_link` payloads have their embedded
    /// type ids remapped in place first.
    pub fn demarshal(opcode: CoreMethod, data: &'a mut [u8], types: &TypeMap) -> Result<Self> {
        if opcode == CoreMethod::CreateLink {
            pod::remap_embedded_ids(data, types)?;
        }
        let mut it = pod::struct_iter(data)?;
        match opcode {
            CoreMethod::UpdateTypes => {
                let (first_id, types) = get_type_list(&mut it)?;
                Ok(CoreRequest::UpdateTypes { first_id, types })
            }
            CoreMethod::Sync => Ok(CoreRequest::Sync {
                seq: it.int32()? as u32,
            }),
            CoreMethod::GetRegistry => Ok(CoreRequest::GetRegistry {
                new_id: it.int32()? as u32,
            }),
            CoreMethod::ClientUpdate => Ok(CoreRequest::ClientUpdate {
                props: get_dict(&mut it)?,
            }),
            CoreMethod::CreateNode => {
                let factory_name = it.string()?;
                let name = it.string()?;
                let props = get_dict(&mut it)?;
                let new_id = it.int32()? as u32;
                Ok(CoreRequest::CreateNode {
                    factory_name,
                    name,
                    props,
                    new_id,
                })
            }
            CoreMethod::CreateLink => {
                let output_node_id = it.int32()? as u32;
                let output_port_id = it.int32()? as u32;
                let input_node_id = it.int32()? as u32;
                let input_port_id = it.int32()? as u32;
                let filter = it.opt_object()?;
                let props = get_dict(&mut it)?;
                let new_id = it.int32()? as u32;
                Ok(CoreRequest::CreateLink {
                    output_node_id,
                    output_port_id,
                    input_node_id,
                    input_port_id,
                    filter,
                    props,
                    new_id,
                })
            }
        }
    }
}

/// A Core event with its arguments, core->client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreNotify<'a> {
    UpdateTypes { first_id: u32, types: Vec<&'a str> },
    Done { seq: u32 },
    Error { id: u32, res: i32, message: &'a str },
    RemoveId { id: u32 },
    Info(CoreInfo<'a>),
}

impl<'a> CoreNotify<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> CoreEvent {
        match self {
            CoreNotify::UpdateTypes { .. } => CoreEvent::UpdateTypes,
            CoreNotify::Done { .. } => CoreEvent::Done,
            CoreNotify::Error { .. } => CoreEvent::Error,
            CoreNotify::RemoveId { .. } => CoreEvent::RemoveId,
            CoreNotify::Info(_) => CoreEvent::Info,
        }
    }

    /// Serialize the arguments as the message's top-level struct. Error
    /// messages are clipped to the fixed on-wire maximum.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            CoreNotify::UpdateTypes { first_id, types } => {
                b.int32(*first_id as i32);
                b.int32(types.len() as i32);
                for uri in types {
                    b.string(uri);
                }
            }
            CoreNotify::Done { seq } => b.int32(*seq as i32),
            CoreNotify::Error { id, res, message } => {
                b.int32(*id as i32);
                b.int32(*res);
                b.string(clip_error(message));
            }
            CoreNotify::RemoveId { id } => b.int32(*id as i32),
            CoreNotify::Info(info) => {
                b.int32(info.id as i32);
                b.int64(info.change_mask as i64);
                b.string(info.user_name);
                b.string(info.host_name);
                b.string(info.version);
                b.string(info.name);
                b.int32(info.cookie as i32);
                put_dict(b, &info.props);
            }
        }
        b.close_struct(f);
    }

    /// Parse an event payload.
    pub fn demarshal(opcode: CoreEvent, data: &'a mut [u8], _types: &TypeMap) -> Result<Self> {
        let mut it = pod::struct_iter(data)?;
        match opcode {
            CoreEvent::UpdateTypes => {
                let (first_id, types) = get_type_list(&mut it)?;
                Ok(CoreNotify::UpdateTypes { first_id, types })
            }
            CoreEvent::Done => Ok(CoreNotify::Done {
                seq: it.int32()? as u32,
            }),
            CoreEvent::Error => Ok(CoreNotify::Error {
                id: it.int32()? as u32,
                res: it.int32()?,
                message: it.string()?,
            }),
            CoreEvent::RemoveId => Ok(CoreNotify::RemoveId {
                id: it.int32()? as u32,
            }),
            CoreEvent::Info => {
                let id = it.int32()? as u32;
                let change_mask = it.int64()? as u64;
                let user_name = it.string()?;
                let host_name = it.string()?;
                let version = it.string()?;
                let name = it.string()?;
                let cookie = it.int32()? as u32;
                let props = get_dict(&mut it)?;
                Ok(CoreNotify::Info(CoreInfo {
                    id,
                    change_mask,
                    user_name,
                    host_name,
                    version,
                    name,
                    cookie,
                    props,
                }))
            }
        }
    }
}

/// A Registry method, client->core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryRequest {
    Bind { id: u32, version: u32, new_id: u32 },
}

impl RegistryRequest {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> RegistryMethod {
        match self {
            RegistryRequest::Bind { .. } => RegistryMethod::Bind,
        }
    }

    /// Serialize the arguments as the message's top-level struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            RegistryRequest::Bind {
                id,
                version,
                new_id,
            } => {
                b.int32(*id as i32);
                b.int32(*version as i32);
                b.int32(*new_id as i32);
            }
        }
        b.close_struct(f);
    }

    /// Parse a method payload.
    pub fn demarshal(opcode: RegistryMethod, data: &mut [u8], _types: &TypeMap) -> Result<Self> {
        let mut it = pod::struct_iter(data)?;
        match opcode {
            RegistryMethod::Bind => Ok(RegistryRequest::Bind {
                id: it.int32()? as u32,
                version: it.int32()? as u32,
                new_id: it.int32()? as u32,
            }),
        }
    }
}

/// A Registry event, core->client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryNotify<'a> {
    Global {
        id: u32,
        type_uri: &'a str,
        version: u32,
    },
    GlobalRemove {
        id: u32,
    },
}

impl<'a> RegistryNotify<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> RegistryEvent {
        match self {
            RegistryNotify::Global { .. } => RegistryEvent::Global,
            RegistryNotify::GlobalRemove { .. } => RegistryEvent::GlobalRemove,
        }
    }

    /// Serialize the arguments as the message's top-level struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            RegistryNotify::Global {
                id,
                type_uri,
                version,
            } => {
                b.int32(*id as i32);
                b.string(type_uri);
                b.int32(*version as i32);
            }
            RegistryNotify::GlobalRemove { id } => b.int32(*id as i32),
        }
        b.close_struct(f);
    }

    /// Parse an event payload.
    pub fn demarshal(opcode: RegistryEvent, data: &'a mut [u8], _types: &TypeMap) -> Result<Self> {
        let mut it = pod::struct_iter(data)?;
        match opcode {
            RegistryEvent::Global => Ok(RegistryNotify::Global {
                id: it.int32()? as u32,
                type_uri: it.string()?,
                version: it.int32()? as u32,
            }),
            RegistryEvent::GlobalRemove => Ok(RegistryNotify::GlobalRemove {
                id: it.int32()? as u32,
            }),
        }
    }
}

/// A Module event, core->client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleNotify<'a> {
    Info(ModuleInfo<'a>),
}

impl<'a> ModuleNotify<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> ModuleEvent {
        match self {
            ModuleNotify::Info(_) => ModuleEvent::Info,
        }
    }

    /// Serialize the arguments as the message's top-level struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            ModuleNotify::Info(info) => {
                b.int32(info.id as i32);
                b.int64(info.change_mask as i64);
                b.string(info.name);
                b.string(info.filename);
                b.string(info.args);
                put_dict(b, &info.props);
            }
        }
        b.close_struct(f);
    }

    /// Parse an event payload.
    pub fn demarshal(opcode: ModuleEvent, data: &'a mut [u8], _types: &TypeMap) -> Result<Self> {
        let mut it = pod::struct_iter(data)?;
        match opcode {
            ModuleEvent::Info => {
                let id = it.int32()? as u32;
                let change_mask = it.int64()? as u64;
                let name = it.string()?;
                let filename = it.string()?;
                let args = it.string()?;
                let props = get_dict(&mut it)?;
                Ok(ModuleNotify::Info(ModuleInfo {
                    id,
                    change_mask,
                    name,
                    filename,
                    args,
                    props,
                }))
            }
        }
    }
}

/// A Node event, core->client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeNotify<'a> {
    Info(NodeInfo<'a>),
}

impl<'a> NodeNotify<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> NodeEvent {
        match self {
            NodeNotify::Info(_) => NodeEvent::Info,
        }
    }

    /// Serialize the arguments as the message's top-level struct. The format
    /// counts on the wire are taken from the vectors.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            NodeNotify::Info(info) => {
                b.int32(info.id as i32);
                b.int64(info.change_mask as i64);
                b.string(info.name);
                b.int32(info.max_input_ports as i32);
                b.int32(info.n_input_ports as i32);
                b.int32(info.input_formats.len() as i32);
                for format in &info.input_formats {
                    b.object(*format);
                }
                b.int32(info.max_output_ports as i32);
                b.int32(info.n_output_ports as i32);
                b.int32(info.output_formats.len() as i32);
                for format in &info.output_formats {
                    b.object(*format);
                }
                b.int32(info.state);
                b.string(info.error);
                put_dict(b, &info.props);
            }
        }
        b.close_struct(f);
    }

    /// Parse an event payload after remapping the embedded format type ids.
    pub fn demarshal(opcode: NodeEvent, data: &'a mut [u8], types: &TypeMap) -> Result<Self> {
        pod::remap_embedded_ids(data, types)?;
        let mut it = pod::struct_iter(data)?;
        match opcode {
            NodeEvent::Info => {
                let id = it.int32()? as u32;
                let change_mask = it.int64()? as u64;
                let name = it.string()?;
                let max_input_ports = it.int32()? as u32;
                let n_input_ports = it.int32()? as u32;
                let n_input_formats = get_count(&mut it)?;
                let mut input_formats = Vec::new();
                for _ in 0..n_input_formats {
                    input_formats.push(it.object()?);
                }
                let max_output_ports = it.int32()? as u32;
                let n_output_ports = it.int32()? as u32;
                let n_output_formats = get_count(&mut it)?;
                let mut output_formats = Vec::new();
                for _ in 0..n_output_formats {
                    output_formats.push(it.object()?);
                }
                let state = it.int32()?;
                let error = it.string()?;
                let props = get_dict(&mut it)?;
                Ok(NodeNotify::Info(NodeInfo {
                    id,
                    change_mask,
                    name,
                    max_input_ports,
                    n_input_ports,
                    input_formats,
                    max_output_ports,
                    n_output_ports,
                    output_formats,
                    state,
                    error,
                    props,
                }))
            }
        }
    }
}

/// A Client event, core->client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotify<'a> {
    Info(ClientInfo<'a>),
}

impl<'a> ClientNotify<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> ClientEvent {
        match self {
            ClientNotify::Info(_) => ClientEvent::Info,
        }
    }

    /// Serialize the arguments as the message's top-level struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            ClientNotify::Info(info) => {
                b.int32(info.id as i32);
                b.int64(info.change_mask as i64);
                put_dict(b, &info.props);
            }
        }
        b.close_struct(f);
    }

    /// Parse an event payload.
    pub fn demarshal(opcode: ClientEvent, data: &'a mut [u8], _types: &TypeMap) -> Result<Self> {
        let mut it = pod::struct_iter(data)?;
        match opcode {
            ClientEvent::Info => {
                let id = it.int32()? as u32;
                let change_mask = it.int64()? as u64;
                let props = get_dict(&mut it)?;
                Ok(ClientNotify::Info(ClientInfo {
                    id,
                    change_mask,
                    props,
                }))
            }
        }
    }
}

/// A Link event, core->client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotify<'a> {
    Info(LinkInfo<'a>),
}

impl<'a> LinkNotify<'a> {
    /// Opcode this message travels under.
    pub fn opcode(&self) -> LinkEvent {
        match self {
            LinkNotify::Info(_) => LinkEvent::Info,
        }
    }

    /// Serialize the arguments as the message's top-level struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.open_struct();
        match self {
            LinkNotify::Info(info) => {
                b.int32(info.id as i32);
                b.int64(info.change_mask as i64);
                b.int32(info.output_node_id as i32);
                b.int32(info.output_port_id as i32);
                b.int32(info.input_node_id as i32);
                b.int32(info.input_port_id as i32);
                if let Some(format) = &info.format {
                    b.object(*format);
                }
            }
        }
        b.close_struct(f);
    }

    /// Parse an event payload after remapping the embedded format type id.
    pub fn demarshal(opcode: LinkEvent, data: &'a mut [u8], types: &TypeMap) -> Result<Self> {
        pod::remap_embedded_ids(data, types)?;
        let mut it = pod::struct_iter(data)?;
        match opcode {
            LinkEvent::Info => Ok(LinkNotify::Info(LinkInfo {
                id: it.int32()? as u32,
                change_mask: it.int64()? as u64,
                output_node_id: it.int32()? as u32,
                output_port_id: it.int32()? as u32,
                input_node_id: it.int32()? as u32,
                input_port_id: it.int32()? as u32,
                format: it.opt_object()?,
            })),
        }
    }
}

/// The six interfaces of the protocol core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Core,
    Registry,
    Module,
    Node,
    Client,
    Link,
}

impl InterfaceKind {
    /// The interface's stable type URI.
    pub fn type_uri(self) -> &'static str {
        match self {
            InterfaceKind::Core => TYPE_CORE,
            InterfaceKind::Registry => TYPE_REGISTRY,
            InterfaceKind::Module => TYPE_MODULE,
            InterfaceKind::Node => TYPE_NODE,
            InterfaceKind::Client => TYPE_CLIENT,
            InterfaceKind::Link => TYPE_LINK,
        }
    }
}

/// Which end of a connection an interface descriptor serves. On the client
/// side methods marshal and events demarshal; the server side is the mirror
/// image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Static descriptor for one side of one interface.
#[derive(Debug, Copy, Clone)]
pub struct Interface {
    /// Which of the six interfaces this describes.
    pub kind: InterfaceKind,
    /// Which side of the connection the descriptor serves.
    pub side: Side,
    /// Stable type URI.
    pub type_uri: &'static str,
    /// Interface version carried at registration.
    pub version: u32,
    /// Number of opcodes in the method table.
    pub n_methods: u16,
    /// Number of opcodes in the event table.
    pub n_events: u16,
}

/// The process-wide protocol registry: a client-side and a server-side
/// descriptor for each interface.
#[derive(Debug)]
pub struct Protocol {
    interfaces: Vec<[Interface; 2]>,
}

impl Protocol {
    /// Look up one side's descriptor by type URI.
    pub fn interface(&self, type_uri: &str, side: Side) -> Option<&Interface> {
        self.interfaces
            .iter()
            .flatten()
            .find(|i| i.type_uri == type_uri && i.side == side)
    }

    /// Map a type URI to its interface kind.
    pub fn kind_of(&self, type_uri: &str) -> Option<InterfaceKind> {
        self.interface(type_uri, Side::Client).map(|i| i.kind)
    }

    /// Number of registered interfaces.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    /// Whether no interfaces are registered (never true after init).
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

fn interface_pair(kind: InterfaceKind, n_methods: u16, n_events: u16) -> [Interface; 2] {
    let make = |side| Interface {
        kind,
        side,
        type_uri: kind.type_uri(),
        version: INTERFACE_VERSION,
        n_methods,
        n_events,
    };
    [make(Side::Client), make(Side::Server)]
}

/// Install the client-side and server-side descriptors for all six
/// interfaces into the process-wide table. Idempotent: repeated calls return
/// the same registry.
pub fn register_protocol() -> &'static Protocol {
    static PROTOCOL: OnceLock<Protocol> = OnceLock::new();
    PROTOCOL.get_or_init(|| Protocol {
        interfaces: vec![
            interface_pair(InterfaceKind::Core, 6, 5),
            interface_pair(InterfaceKind::Registry, 1, 2),
            interface_pair(InterfaceKind::Module, 0, 1),
            interface_pair(InterfaceKind::Node, 0, 1),
            interface_pair(InterfaceKind::Client, 0, 1),
            interface_pair(InterfaceKind::Link, 0, 1),
        ],
    })
}
