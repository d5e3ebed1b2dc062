//! Protocol client for a single tool provider.
//!
//! One connection runs a reader task that demultiplexes inbound frames and a
//! heartbeat task. Call sites register a oneshot waiter keyed by a fresh
//! request id, send the frame, and wait for the reader to resolve it.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use futures::FutureExt;
use serde_json::{json, Value};
use strum::Display;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::stream::StreamHandler;
use super::transport::{FrameSink, FrameSource, ProviderTransport};
use super::wire::{self, Inbound, Outbound, LIST_TOOLS};
use crate::agent::router::ToolProvider;
use crate::error::RelayError;
use crate::tools::ToolDescriptor;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for connection tasks to stop before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
}

/// Timing options for a [`ProtocolClient`].
#[derive(Debug, Clone, Builder)]
pub struct ClientOptions {
    /// Deadline used by [`ProtocolClient::call_tool_with_default_timeout`].
    #[builder(default = DEFAULT_CALL_TIMEOUT)]
    pub call_timeout: Duration,
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    pub heartbeat_interval: Duration,
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT)]
    pub handshake_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    /// Bumped on every connect so a stale session cannot overwrite a newer one.
    generation: u64,
    /// Set by an explicit close, cleared by the next connect.
    closed: bool,
}

struct PendingCall {
    tool_name: String,
    waiter: oneshot::Sender<Result<Value, RelayError>>,
}

struct ActiveStream {
    tool_name: String,
    handler: Arc<dyn StreamHandler>,
}

/// Unregisters a pending call when the waiting future completes or is dropped.
struct PendingCallGuard<'a> {
    session: &'a Session,
    request_id: &'a str,
}

impl Drop for PendingCallGuard<'_> {
    fn drop(&mut self) {
        self.session.forget_call(self.request_id);
    }
}

/// State owned by one open channel.
struct Session {
    provider: String,
    generation: u64,
    status: Arc<StdMutex<Status>>,
    alive: AtomicBool,
    sink: Mutex<Box<dyn FrameSink>>,
    pending: StdMutex<HashMap<String, PendingCall>>,
    streams: StdMutex<HashMap<String, ActiveStream>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn register_call(
        &self,
        tool_name: &str,
    ) -> (String, oneshot::Receiver<Result<Value, RelayError>>) {
        let (waiter, rx) = oneshot::channel();
        let mut pending = lock(&self.pending);
        let request_id = loop {
            let id = Uuid::new_v4().to_string();
            if !pending.contains_key(&id) {
                break id;
            }
        };
        pending.insert(
            request_id.clone(),
            PendingCall {
                tool_name: tool_name.to_string(),
                waiter,
            },
        );
        (request_id, rx)
    }

    fn forget_call(&self, request_id: &str) {
        lock(&self.pending).remove(request_id);
    }

    fn register_stream(&self, tool_name: &str, handler: Arc<dyn StreamHandler>) -> String {
        let mut streams = lock(&self.streams);
        let stream_id = loop {
            let id = Uuid::new_v4().to_string();
            if !streams.contains_key(&id) {
                break id;
            }
        };
        streams.insert(
            stream_id.clone(),
            ActiveStream {
                tool_name: tool_name.to_string(),
                handler,
            },
        );
        stream_id
    }

    fn take_stream(&self, stream_id: &str) -> Option<ActiveStream> {
        lock(&self.streams).remove(stream_id)
    }

    async fn send(&self, message: &Outbound) -> Result<(), RelayError> {
        if !self.is_alive() {
            return Err(RelayError::Closed(format!(
                "connection to '{}' is closed",
                self.provider
            )));
        }
        let frame = message.to_frame()?;
        let mut sink = self.sink.lock().await;
        sink.send(frame).await
    }

    async fn request(
        &self,
        tool_name: &str,
        parameters: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        let (request_id, rx) = self.register_call(tool_name);
        let _registration = PendingCallGuard {
            session: self,
            request_id: &request_id,
        };
        let message = Outbound::ToolCall {
            request_id: request_id.clone(),
            tool_name: tool_name.to_string(),
            parameters,
        };

        let exchange = async {
            self.send(&message).await?;
            debug!(provider = %self.provider, tool = tool_name, request_id = %request_id, "tool call sent");
            rx.await.map_err(|_| {
                RelayError::Closed(format!("connection to '{}' dropped the call", self.provider))
            })?
        };

        match time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    provider = %self.provider,
                    tool = tool_name,
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "tool call timed out"
                );
                Err(RelayError::ToolTimeout {
                    tool_name: tool_name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Mark the session dead, stop its tasks and fail every pending call.
    ///
    /// Returns the streams that were still open, or `None` if the session had
    /// already been torn down.
    fn teardown(&self, reason: &str) -> Option<Vec<(String, ActiveStream)>> {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return None;
        }
        let _ = self.shutdown_tx.send(true);

        let pending: Vec<PendingCall> = lock(&self.pending).drain().map(|(_, call)| call).collect();
        for call in pending {
            let _ = call.waiter.send(Err(RelayError::Closed(format!(
                "{}: {reason}",
                self.provider
            ))));
        }
        Some(lock(&self.streams).drain().collect())
    }

    /// Handle a broken channel discovered by one of the connection tasks.
    async fn drop_connection(&self, reason: String) {
        let Some(streams) = self.teardown(&reason) else {
            return;
        };
        {
            let mut status = lock(&self.status);
            if status.generation == self.generation && status.state != ConnectionState::Closing {
                status.state = ConnectionState::Disconnected;
            }
        }
        warn!(provider = %self.provider, reason = %reason, "provider connection lost");
        notify_stream_errors(&self.provider, streams, &RelayError::Closed(reason)).await;
    }

    async fn dispatch(&self, frame: &str) {
        let message = match wire::decode(frame) {
            Ok(message) => message,
            Err(error) => {
                warn!(provider = %self.provider, error = %error, "dropping malformed frame");
                return;
            }
        };

        match message {
            Inbound::ToolResponse { request_id, result } => {
                let call = lock(&self.pending).remove(&request_id);
                match call {
                    Some(call) => {
                        let _ = call.waiter.send(Ok(result));
                    }
                    None => {
                        debug!(provider = %self.provider, request_id = %request_id, "response for unknown or expired request dropped");
                    }
                }
            }
            Inbound::StreamData { stream_id, data } => {
                let handler = lock(&self.streams)
                    .get(&stream_id)
                    .map(|stream| stream.handler.clone());
                let Some(handler) = handler else {
                    debug!(provider = %self.provider, stream_id = %stream_id, "chunk for unknown stream dropped");
                    return;
                };
                match contain_panic(&self.provider, &stream_id, handler.on_chunk(&stream_id, data)).await {
                    Some(Ok(())) => {}
                    Some(Err(error)) => {
                        warn!(provider = %self.provider, stream_id = %stream_id, error = %error, "stream handler failed");
                    }
                    None => {
                        self.take_stream(&stream_id);
                    }
                }
            }
            Inbound::StreamEnd { stream_id } => match self.take_stream(&stream_id) {
                Some(stream) => {
                    debug!(provider = %self.provider, stream_id = %stream_id, tool = %stream.tool_name, "stream ended");
                    contain_panic(&self.provider, &stream_id, stream.handler.on_end(&stream_id)).await;
                }
                None => {
                    debug!(provider = %self.provider, stream_id = %stream_id, "end for unknown stream dropped");
                }
            },
            Inbound::Error {
                request_id,
                stream_id,
                error,
            } => {
                let text = wire::error_text(&error);
                if let Some(request_id) = request_id {
                    let call = lock(&self.pending).remove(&request_id);
                    match call {
                        Some(call) => {
                            let failure = RelayError::tool(&call.tool_name, text);
                            let _ = call.waiter.send(Err(failure));
                        }
                        None => {
                            debug!(provider = %self.provider, request_id = %request_id, "error for unknown or expired request dropped");
                        }
                    }
                } else if let Some(stream_id) = stream_id {
                    match self.take_stream(&stream_id) {
                        Some(stream) => {
                            let failure = RelayError::tool(&stream.tool_name, text);
                            contain_panic(
                                &self.provider,
                                &stream_id,
                                stream.handler.on_error(&stream_id, &failure),
                            )
                            .await;
                        }
                        None => {
                            debug!(provider = %self.provider, stream_id = %stream_id, "error for unknown stream dropped");
                        }
                    }
                } else {
                    warn!(provider = %self.provider, error = %text, "provider error without correlation id");
                }
            }
            Inbound::HeartbeatAck => {
                trace!(provider = %self.provider, "heartbeat acknowledged");
            }
            Inbound::Unknown => {
                debug!(provider = %self.provider, "unknown message type dropped");
            }
        }
    }
}

async fn notify_stream_errors(
    provider: &str,
    streams: Vec<(String, ActiveStream)>,
    error: &RelayError,
) {
    for (stream_id, stream) in streams {
        contain_panic(provider, &stream_id, stream.handler.on_error(&stream_id, error)).await;
    }
}

/// Run a stream handler callback, turning a panic into `None` so the reader
/// task survives it.
async fn contain_panic<T>(
    provider: &str,
    stream_id: &str,
    callback: impl Future<Output = T>,
) -> Option<T> {
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(value) => Some(value),
        Err(_) => {
            error!(provider = %provider, stream_id = %stream_id, "stream handler panicked; stream dropped");
            None
        }
    }
}

async fn run_reader(
    session: Arc<Session>,
    mut source: Box<dyn FrameSource>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            frame = source.next_frame() => match frame {
                Some(Ok(frame)) => session.dispatch(&frame).await,
                Some(Err(error)) => {
                    session.drop_connection(format!("receive failed: {error}")).await;
                    return;
                }
                None => {
                    session.drop_connection("provider closed the channel".into()).await;
                    return;
                }
            }
        }
    }
}

async fn run_heartbeat(
    session: Arc<Session>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut heartbeat = time::interval(interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(error) = session.send(&Outbound::Heartbeat).await {
                    session.drop_connection(format!("heartbeat failed: {error}")).await;
                    return;
                }
                trace!(provider = %session.provider, "heartbeat sent");
            }
        }
    }
}

struct Runtime {
    session: Arc<Session>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// Client for one tool provider.
///
/// All operations take `&self`; share the client as `Arc<ProtocolClient>`
/// between the router and whoever owns the connection lifecycle.
pub struct ProtocolClient {
    name: String,
    transport: Box<dyn ProviderTransport>,
    options: ClientOptions,
    status: Arc<StdMutex<Status>>,
    session: RwLock<Option<Arc<Session>>>,
    runtime: Mutex<Option<Runtime>>,
    catalog: RwLock<Vec<ToolDescriptor>>,
}

impl ProtocolClient {
    pub fn new(name: impl Into<String>, transport: impl ProviderTransport + 'static) -> Self {
        Self::with_options(name, transport, ClientOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        transport: impl ProviderTransport + 'static,
        options: ClientOptions,
    ) -> Self {
        Self::from_boxed(name, Box::new(transport), options)
    }

    pub fn from_boxed(
        name: impl Into<String>,
        transport: Box<dyn ProviderTransport>,
        options: ClientOptions,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            options,
            status: Arc::new(StdMutex::new(Status {
                state: ConnectionState::Disconnected,
                generation: 0,
                closed: false,
            })),
            session: RwLock::new(None),
            runtime: Mutex::new(None),
            catalog: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Endpoint description of the underlying transport.
    pub fn endpoint(&self) -> String {
        self.transport.describe()
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.status).state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Catalog cached by the last successful handshake.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|tool| tool.name == tool_name)
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.current()
            .map(|session| lock(&session.pending).len())
            .unwrap_or(0)
    }

    /// Number of open streams.
    pub fn active_streams(&self) -> usize {
        self.current()
            .map(|session| lock(&session.streams).len())
            .unwrap_or(0)
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, session: Option<Arc<Session>>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn ready_session(&self) -> Result<Arc<Session>, RelayError> {
        let status = lock(&self.status);
        if status.state == ConnectionState::Ready {
            if let Some(session) = self.current().filter(|session| session.is_alive()) {
                return Ok(session);
            }
        }
        if status.closed {
            Err(RelayError::Closed(format!("provider '{}' was closed", self.name)))
        } else {
            Err(RelayError::NotConnected(self.name.clone()))
        }
    }

    /// Open the channel and fetch the provider's catalog.
    ///
    /// An existing session is closed first.
    pub async fn connect(&self) -> Result<(), RelayError> {
        if self.options.heartbeat_interval.is_zero() {
            return Err(RelayError::Configuration(format!(
                "provider '{}': heartbeat interval must be non-zero",
                self.name
            )));
        }

        let mut runtime = self.runtime.lock().await;
        if let Some(previous) = runtime.take() {
            debug!(provider = %self.name, "closing previous session before reconnecting");
            self.shutdown(previous, "reconnecting").await;
        }

        let generation = {
            let mut status = lock(&self.status);
            status.generation += 1;
            status.state = ConnectionState::Connecting;
            status.closed = false;
            status.generation
        };
        info!(provider = %self.name, endpoint = %self.transport.describe(), "connecting to provider");

        let channel = match self.transport.connect().await {
            Ok(channel) => channel,
            Err(error) => {
                self.mark_disconnected(generation);
                return Err(RelayError::connection(&self.name, error.to_string()));
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Arc::new(Session {
            provider: self.name.clone(),
            generation,
            status: self.status.clone(),
            alive: AtomicBool::new(true),
            sink: Mutex::new(channel.sink),
            pending: StdMutex::new(HashMap::new()),
            streams: StdMutex::new(HashMap::new()),
            shutdown_tx,
        });
        let started = Runtime {
            session: session.clone(),
            reader: tokio::spawn(run_reader(
                session.clone(),
                channel.source,
                shutdown_rx.clone(),
            )),
            heartbeat: tokio::spawn(run_heartbeat(
                session.clone(),
                self.options.heartbeat_interval,
                shutdown_rx,
            )),
        };
        self.set_current(Some(session.clone()));

        let handshake = session
            .request(LIST_TOOLS, json!({}), self.options.handshake_timeout)
            .await
            .and_then(|result| wire::parse_catalog(&result));
        let catalog = match handshake {
            Ok(catalog) => catalog,
            Err(error) => {
                self.shutdown(started, "handshake failed").await;
                return Err(RelayError::connection(
                    &self.name,
                    format!("handshake failed: {error}"),
                ));
            }
        };

        let lost = {
            let mut status = lock(&self.status);
            if session.is_alive() {
                status.state = ConnectionState::Ready;
                false
            } else {
                true
            }
        };
        if lost {
            self.shutdown(started, "connection lost during handshake").await;
            return Err(RelayError::connection(
                &self.name,
                "connection lost during handshake",
            ));
        }

        let names: Vec<&str> = catalog.iter().map(|tool| tool.name.as_str()).collect();
        info!(provider = %self.name, tools = ?names, "provider ready");
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
        *runtime = Some(started);
        Ok(())
    }

    /// Invoke `tool_name` and wait up to `timeout` for its result.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        let session = self.ready_session()?;
        session.request(tool_name, arguments, timeout).await
    }

    pub async fn call_tool_with_default_timeout(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, RelayError> {
        self.call_tool(tool_name, arguments, self.options.call_timeout)
            .await
    }

    /// Start a streamed invocation. Chunks are delivered to `handler` in
    /// arrival order until the provider ends the stream or it is cancelled.
    ///
    /// Returns the stream id.
    pub async fn stream_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<String, RelayError> {
        let session = self.ready_session()?;
        let stream_id = session.register_stream(tool_name, handler);
        let message = Outbound::StreamToolCall {
            stream_id: stream_id.clone(),
            tool_name: tool_name.to_string(),
            parameters: arguments,
        };
        if let Err(error) = session.send(&message).await {
            session.take_stream(&stream_id);
            return Err(error);
        }
        debug!(provider = %self.name, tool = tool_name, stream_id = %stream_id, "stream opened");
        Ok(stream_id)
    }

    /// Stop delivering chunks for `stream_id` and tell the provider.
    ///
    /// Returns `false` if the stream was not open.
    pub async fn cancel_stream(&self, stream_id: &str) -> bool {
        let Some(session) = self.current() else {
            return false;
        };
        if session.take_stream(stream_id).is_none() {
            return false;
        }
        let message = Outbound::CancelStream {
            stream_id: stream_id.to_string(),
        };
        if let Err(error) = session.send(&message).await {
            debug!(provider = %self.name, stream_id = %stream_id, error = %error, "cancel notification not delivered");
        }
        true
    }

    /// Close the connection. Pending calls fail with [`RelayError::Closed`].
    ///
    /// Idempotent; the client may be connected again afterwards.
    pub async fn close(&self) -> Result<(), RelayError> {
        let mut runtime = self.runtime.lock().await;
        if let Some(active) = runtime.take() {
            info!(provider = %self.name, "closing provider connection");
            self.shutdown(active, "client closed").await;
        }
        lock(&self.status).closed = true;
        Ok(())
    }

    fn mark_disconnected(&self, generation: u64) {
        let mut status = lock(&self.status);
        if status.generation == generation {
            status.state = ConnectionState::Disconnected;
        }
    }

    async fn shutdown(&self, runtime: Runtime, reason: &str) {
        let Runtime {
            session,
            mut reader,
            mut heartbeat,
        } = runtime;

        {
            let mut status = lock(&self.status);
            if status.generation == session.generation {
                status.state = ConnectionState::Closing;
            }
        }

        let streams = session.teardown(reason).unwrap_or_default();
        if time::timeout(SHUTDOWN_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
        if time::timeout(SHUTDOWN_GRACE, &mut heartbeat).await.is_err() {
            heartbeat.abort();
        }
        notify_stream_errors(&self.name, streams, &RelayError::Closed(reason.to_string())).await;

        if let Err(error) = session.sink.lock().await.close().await {
            warn!(provider = %self.name, error = %error, "failed to close transport");
        }

        {
            let mut current = self.session.write().unwrap_or_else(PoisonError::into_inner);
            if current
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, &session))
            {
                *current = None;
            }
        }
        self.mark_disconnected(session.generation);
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("name", &self.name)
            .field("endpoint", &self.transport.describe())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.session.teardown("client dropped");
            runtime.reader.abort();
            runtime.heartbeat.abort();
        }
    }
}

#[async_trait]
impl ToolProvider for ProtocolClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools()
    }

    fn provides(&self, tool_name: &str) -> bool {
        self.has_tool(tool_name)
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        self.call_tool(tool_name, arguments, timeout).await
    }
}
