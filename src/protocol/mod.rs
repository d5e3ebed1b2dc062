//! Duplex tool-provider protocol: wire codec, transports, client and registry.

pub mod client;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod wire;

pub use client::{ClientOptions, ConnectionState, ProtocolClient};
#[cfg(feature = "mcp")]
pub use mcp::McpStdioProvider;
pub use registry::{ManagedProvider, ProviderRegistry};
pub use stream::{FnStreamHandler, StreamHandler};
pub use transport::{
    FrameSink, FrameSource, MemoryListener, MemoryPeer, MemoryTransport, ProviderTransport,
    StdioTransport, TransportChannel, WebSocketTransport,
};
