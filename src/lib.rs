//! Native wire protocol for the graphwire media graph daemon.
//!
//! Clients discover, create and link media-processing nodes on a central
//! core process over a local stream socket; the core pushes back info events
//! and asynchronous errors. Every payload is a self-describing pod struct
//! ([`pod`]), object ids are scoped to a connection, and embedded pod type
//! ids are kept compact by a per-connection string-to-id table ([`types`])
//! announced incrementally with `update_types` messages.
//!
//! [`proto`] holds the interface catalog (Core, Registry, Module, Node,
//! Client, Link) with one marshaler/demarshaler per (interface, direction,
//! opcode); [`connection`] frames messages over the stream; [`client`] and
//! [`server`] are the two endpoints built on top.

pub mod client;
pub mod connection;
pub mod error;
pub mod pod;
pub mod proto;
pub mod server;
pub mod types;

pub use client::Client;
pub use connection::Connection;
pub use error::{ProtocolError, Result};
pub use server::Server;
