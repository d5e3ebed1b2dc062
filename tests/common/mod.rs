//! Shared test helpers: a scripted model and in-process tool providers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use toolrelay::error::RelayError;
use toolrelay::protocol::wire::LIST_TOOLS;
use toolrelay::protocol::{ClientOptions, MemoryListener, MemoryPeer, MemoryTransport, ProtocolClient};
use toolrelay::provider::{ModelAdapter, ModelResponse};
use toolrelay::tools::ToolDescriptor;
use toolrelay::types::{Message, ToolCallRequest};

/// A model that replays queued responses and records every history it saw.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, RelayError>>>,
    histories: Mutex<Vec<Vec<Message>>>,
    catalogs: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            histories: Mutex::new(Vec::new()),
            catalogs: Mutex::new(Vec::new()),
        })
    }

    /// Queue a final text answer.
    pub fn queue_text(&self, text: &str) {
        self.queue(Ok(ModelResponse::text(text)));
    }

    /// Queue a response carrying tool calls.
    pub fn queue_tool_calls(&self, calls: Vec<ToolCallRequest>) {
        self.queue(Ok(ModelResponse::with_tool_calls(calls)));
    }

    pub fn queue_error(&self, error: RelayError) {
        self.queue(Err(error));
    }

    fn queue(&self, response: Result<ModelResponse, RelayError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Histories passed to each model call, in call order.
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().unwrap().clone()
    }

    /// Tool names offered on each model call.
    pub fn catalogs(&self) -> Vec<Vec<String>> {
        self.catalogs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelAdapter for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, RelayError> {
        self.histories.lock().unwrap().push(history.to_vec());
        self.catalogs
            .lock()
            .unwrap()
            .push(tools.iter().map(|tool| tool.name.clone()).collect());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RelayError::Model("no scripted response left".into())))
    }
}

/// Client options with a heartbeat slow enough to stay out of the way.
pub fn quiet_options() -> ClientOptions {
    ClientOptions::builder()
        .heartbeat_interval(Duration::from_secs(3600))
        .handshake_timeout(Duration::from_secs(5))
        .build()
}

/// Connect `client` through `listener`, answering the handshake with `tools`.
pub async fn connect_via(
    client: &Arc<ProtocolClient>,
    listener: &mut MemoryListener,
    tools: &[ToolDescriptor],
) -> MemoryPeer {
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut peer = listener.accept().await.expect("client should open a channel");
    peer.answer_handshake(tools)
        .await
        .expect("handshake should be answered");
    connecting
        .await
        .expect("connect task should not panic")
        .expect("connect should succeed");
    peer
}

/// A connected in-process provider advertising `tools` by name.
pub async fn connect_provider(
    name: &str,
    tools: &[&str],
) -> (Arc<ProtocolClient>, MemoryPeer, MemoryListener) {
    let (transport, mut listener) = MemoryTransport::labeled(name);
    let client = Arc::new(ProtocolClient::with_options(name, transport, quiet_options()));
    let descriptors: Vec<ToolDescriptor> = tools.iter().map(|t| ToolDescriptor::named(*t)).collect();
    let peer = connect_via(&client, &mut listener, &descriptors).await;
    (client, peer, listener)
}

/// Serve tool calls on `peer` until the client goes away.
///
/// `Ok` results become `tool_response` frames, `Err` texts become `error` frames.
pub fn serve_tools<F>(mut peer: MemoryPeer, handler: F) -> JoinHandle<Vec<Value>>
where
    F: Fn(&str, &Value) -> Result<Value, String> + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(request) = peer.recv_request().await {
            if request["type"] != "tool_call" || request["tool_name"] == LIST_TOOLS {
                continue;
            }
            let tool = request["tool_name"].as_str().unwrap_or_default().to_string();
            let reply = match handler(&tool, &request["parameters"]) {
                Ok(result) => json!({
                    "type": "tool_response",
                    "request_id": request["request_id"],
                    "result": result,
                }),
                Err(error) => json!({
                    "type": "error",
                    "request_id": request["request_id"],
                    "error": error,
                }),
            };
            seen.push(request);
            if peer.send(reply).is_err() {
                break;
            }
        }
        seen
    })
}
