//! A minimal Engine.IO transport: the pre-established, byte-oriented,
//! framed, full-duplex channel with ordered delivery and close notification
//! that the socket.io-style core in the `socketioxide` crate is built on
//! top of (spec.md §1, "engine transport").
//!
//! Consumers implement [`handler::EngineIoHandler`] and mount
//! [`layer::EngineIoLayer`] on a `tower`/`axum` stack (or drive
//! [`service::EngineIoService`] directly); every accepted connection shows
//! up as a [`socket::Socket`].

pub mod config;
pub mod errors;
pub mod handler;
pub mod layer;
pub mod service;
pub mod sid;
pub mod socket;

pub use config::EngineIoConfig;
pub use errors::Error;
pub use handler::EngineIoHandler;
pub use service::EngineIoService;
pub use sid::Sid;
pub use socket::{DisconnectReason, ProtocolVersion, Socket};
