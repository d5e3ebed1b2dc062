use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource, ProviderTransport, TransportChannel};
use crate::error::RelayError;
use crate::protocol::wire::LIST_TOOLS;
use crate::tools::ToolDescriptor;

/// In-process transport.
///
/// Every `connect` creates a fresh channel pair and hands the provider end to
/// the paired [`MemoryListener`] as a [`MemoryPeer`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    label: String,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryListener) {
        Self::labeled("memory")
    }

    pub fn labeled(label: impl Into<String>) -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.into(),
                accept_tx,
            },
            MemoryListener { accept_rx },
        )
    }
}

#[async_trait]
impl ProviderTransport for MemoryTransport {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn connect(&self) -> Result<TransportChannel, RelayError> {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            incoming: to_peer_rx,
            outgoing: to_client_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| RelayError::connection(&self.label, "no listener is accepting"))?;

        Ok(TransportChannel::new(
            MemorySink {
                label: self.label.clone(),
                tx: Some(to_peer_tx),
            },
            MemorySource { rx: to_client_rx },
        ))
    }
}

/// Accepts the provider ends of channels opened through a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Provider end of an in-process channel.
///
/// Dropping the peer closes the channel from the provider side.
#[derive(Debug)]
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Next frame from the client, decoded as JSON. Malformed frames yield `Value::Null`.
    pub async fn recv(&mut self) -> Option<Value> {
        let frame = self.incoming.recv().await?;
        Some(serde_json::from_str(&frame).unwrap_or(Value::Null))
    }

    /// Next non-heartbeat frame from the client.
    pub async fn recv_request(&mut self) -> Option<Value> {
        loop {
            let message = self.recv().await?;
            if message["type"] != "heartbeat" {
                return Some(message);
            }
        }
    }

    /// Next already-queued non-heartbeat frame, without waiting.
    pub fn try_recv_request(&mut self) -> Option<Value> {
        while let Ok(frame) = self.incoming.try_recv() {
            let message: Value = serde_json::from_str(&frame).unwrap_or(Value::Null);
            if message["type"] != "heartbeat" {
                return Some(message);
            }
        }
        None
    }

    /// Send a JSON message to the client.
    pub fn send(&self, message: Value) -> Result<(), RelayError> {
        self.send_raw(message.to_string())
    }

    /// Send a frame verbatim, well-formed or not.
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), RelayError> {
        self.outgoing
            .send(frame.into())
            .map_err(|_| RelayError::Closed("client end dropped".into()))
    }

    /// Reply to the client's catalog request with `tools`.
    pub async fn answer_handshake(&mut self, tools: &[ToolDescriptor]) -> Result<(), RelayError> {
        let request = self
            .recv_request()
            .await
            .ok_or_else(|| RelayError::Closed("client closed before handshake".into()))?;
        if request["tool_name"] != LIST_TOOLS {
            return Err(RelayError::Parse(format!(
                "expected catalog request, got {request}"
            )));
        }
        self.send(json!({
            "type": "tool_response",
            "request_id": request["request_id"],
            "result": {"tools": tools},
        }))
    }

    /// Reply to a `tool_call` with a result.
    pub fn respond(&self, request: &Value, result: Value) -> Result<(), RelayError> {
        self.send(json!({
            "type": "tool_response",
            "request_id": request["request_id"],
            "result": result,
        }))
    }
}

struct MemorySink {
    label: String,
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<(), RelayError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RelayError::Closed(self.label.clone()))?;
        tx.send(frame)
            .map_err(|_| RelayError::connection(&self.label, "peer dropped"))
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        self.rx.recv().await.map(Ok)
    }
}
