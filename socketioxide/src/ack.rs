//! Acknowledgement plumbing: the per-socket pending-ack map lives on
//! [`crate::socket::Socket`] itself (spec.md §3 "ack-id counter"); this
//! module just names the shared response/error types both `Socket` and
//! `Operators` return.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::oneshot;

/// What a single acknowledging client sent back: the deserialized payload
/// plus any binary attachments it carried.
pub type AckResponse<T> = (T, Option<Vec<Vec<u8>>>);

/// One ack response per socket a broadcast-with-ack selected, in arrival
/// order.
pub type AckStream<T> = Pin<Box<dyn Stream<Item = Result<AckResponse<T>, AckError>> + Send>>;

pub(crate) type AckSender = oneshot::Sender<AckResponse<serde_json::Value>>;

/// Failure modes of waiting on an acknowledgement (spec.md §7 item 5).
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    #[error("ack was not received before the timeout elapsed")]
    Timeout,
    #[error("the socket disconnected before the ack arrived")]
    Closed,
    #[error("failed to deserialize the ack payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Send(#[from] crate::errors::Error),
}

impl From<oneshot::error::RecvError> for AckError {
    fn from(_: oneshot::error::RecvError) -> Self {
        AckError::Closed
    }
}

impl From<tokio::time::error::Elapsed> for AckError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AckError::Timeout
    }
}
