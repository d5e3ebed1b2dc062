//! Per-stream callbacks for streamed tool invocations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RelayError;

/// Receives the chunks of one streamed tool invocation.
///
/// A failing `on_chunk` is logged and never stops delivery to other streams.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_chunk(&self, stream_id: &str, data: Value) -> Result<(), RelayError>;

    /// The provider finished the stream.
    async fn on_end(&self, _stream_id: &str) {}

    /// The provider failed the stream, or the connection dropped under it.
    async fn on_error(&self, _stream_id: &str, _error: &RelayError) {}
}

type ChunkFuture = Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send>>;
type ChunkFn = dyn Fn(String, Value) -> ChunkFuture + Send + Sync;

/// [`StreamHandler`] backed by an async closure over each chunk.
#[derive(Clone)]
pub struct FnStreamHandler {
    on_chunk: Arc<ChunkFn>,
}

impl FnStreamHandler {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        Self {
            on_chunk: Arc::new(move |stream_id, data| Box::pin(handler(stream_id, data))),
        }
    }
}

impl std::fmt::Debug for FnStreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStreamHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamHandler for FnStreamHandler {
    async fn on_chunk(&self, stream_id: &str, data: Value) -> Result<(), RelayError> {
        (self.on_chunk)(stream_id.to_string(), data).await
    }
}
