//! A small length-prefixed RPC framework.
//!
//! Wire contract: each frame is `[4-byte length, big-endian][payload]`;
//! the payload is a JSON-encoded [`Request`] or [`Response`]. The
//! transport promises ordered, reliable byte-stream delivery per
//! connection; request/response correlation happens here, keyed by the
//! request id.
//!
//! [`RpcClient`] multiplexes concurrent calls over one connection: a
//! reader task routes each response to the rendezvous channel of the
//! pending call with the matching id. [`RpcServer`] dispatches decoded
//! requests to registered method handlers, one task per connection.

mod client;
mod frame;
mod message;
mod server;

pub use client::RpcClient;
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_LEN};
pub use message::{Request, Response};
pub use server::{Handler, RpcServer};

/// Errors surfaced by the RPC layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// The call's deadline elapsed before a response arrived.
    #[error("call timed out")]
    Timeout,
    /// The connection closed with the call still pending.
    #[error("connection closed")]
    ConnectionClosed,
    /// The server reported a failure for this call.
    #[error("remote error: {0}")]
    Remote(String),
}
