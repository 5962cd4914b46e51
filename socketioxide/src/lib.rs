//! Socket.IO core: namespaces, rooms, acks, and the sequential middleware
//! chain that sit on top of the engine transport (`engineioxide`) — the
//! parts spec.md singles out as "the hard part" of the whole system (§1,
//! §2).
//!
//! Mount [`SocketIo`] on a `tower`/`axum` stack via the [`SocketIoLayer`]
//! [`SocketIoBuilder::build`] returns (see
//! [`engineioxide::layer::EngineIoLayer`] for the pattern this mirrors).

pub mod ack;
pub mod adapter;
mod client;
pub mod config;
pub mod errors;
pub mod handshake;
mod io;
mod ns;
pub mod operators;
pub mod packet;
mod socket;

pub use ack::{AckResponse, AckStream};
pub use adapter::{Adapter, LocalAdapter};
pub use config::{SocketIoConfig, SocketIoConfigBuilder};
pub use errors::Error;
pub use handshake::{Handshake, ProtocolVersion};
pub use io::{SocketIo, SocketIoBuilder, SocketIoLayer};
pub use ns::Namespace;
pub use operators::{Operators, Room, RoomParam};
pub use socket::{Ack, DisconnectReason, Socket, SocketId, RESERVED_EVENTS};

pub use engineioxide::Sid;
