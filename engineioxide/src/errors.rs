//! Transport-level error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("the socket is closed")]
    SocketClosed,

    #[error("the outbound frame buffer is full")]
    InternalChannelFull,

    #[error("http error: {0}")]
    Http(#[from] http::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
