//! Frame transports that carry wire messages to and from a provider.
//!
//! A transport only moves text frames. Framing rules (one JSON object per
//! frame) and correlation live in the protocol client.

use async_trait::async_trait;

use crate::error::RelayError;

mod memory;
mod stdio;
mod websocket;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

/// Writing half of an open channel.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame.
    async fn send(&mut self, frame: String) -> Result<(), RelayError>;

    /// Close the channel. Must be idempotent.
    async fn close(&mut self) -> Result<(), RelayError>;
}

/// Reading half of an open channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the peer has closed the channel.
    ///
    /// Must be cancel-safe: dropping the future may not lose a frame.
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>>;
}

/// An open duplex channel split into its two halves.
pub struct TransportChannel {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl TransportChannel {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel").finish_non_exhaustive()
    }
}

/// Opens channels to one provider endpoint.
///
/// Each call to [`ProviderTransport::connect`] opens a fresh channel, so a
/// client can reconnect through the same transport.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Human-readable endpoint, used in logs and errors.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<TransportChannel, RelayError>;
}
