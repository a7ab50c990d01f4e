//! Tool-calling agent loop and the event stream it produces

pub mod prompt;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{ChatMessage, ChatModel, FunctionCall, LlmError, ToolCall};
use crate::tools::ToolRegistry;

/// Identifies the agent step that produced an event.
pub type NodeId = String;

pub const AGENT_NODE: &str = "agent";
pub const TOOLS_NODE: &str = "tools";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlSignal {
    ToolCall { name: String },
    ToolResult { name: String },
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content {
        text: String,
        node: NodeId,
        is_terminal: bool,
    },
    Control {
        node: NodeId,
        signal: ControlSignal,
    },
}

impl StreamEvent {
    pub fn content(text: impl Into<String>, node: &str) -> Self {
        StreamEvent::Content {
            text: text.into(),
            node: node.to_string(),
            is_terminal: false,
        }
    }

    pub fn terminal(text: impl Into<String>, node: &str) -> Self {
        StreamEvent::Content {
            text: text.into(),
            node: node.to_string(),
            is_terminal: true,
        }
    }

    pub fn control(node: &str, signal: ControlSignal) -> Self {
        StreamEvent::Control {
            node: node.to_string(),
            signal,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model error: {0}")]
    Llm(#[from] LlmError),
    #[error("model stream stalled for {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("agent did not finish within {max_steps} steps")]
    StepLimit { max_steps: usize },
    #[error("agent task failed: {0}")]
    Task(String),
}

/// Pull-based source of agent events. `Ok(None)` means exhausted.
#[async_trait]
pub trait AgentEventSource: Send {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, AgentError>;
}

pub type EventSender = mpsc::Sender<Result<StreamEvent, AgentError>>;

/// Receiving half of a bounded event channel. Dropping it stops the producer.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Result<StreamEvent, AgentError>>,
}

impl ChannelEventSource {
    pub fn new(rx: mpsc::Receiver<Result<StreamEvent, AgentError>>) -> Self {
        Self { rx }
    }
}

pub fn event_channel(capacity: usize) -> (EventSender, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelEventSource::new(rx))
}

#[async_trait]
impl AgentEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, AgentError> {
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// ReAct-style loop: stream a completion, run any requested tools, repeat
/// until the model answers without tools or the step budget runs out.
pub struct ToolAgent {
    chat: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    system_prompt: String,
    max_steps: usize,
    stall_timeout: Duration,
}

impl ToolAgent {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        system_prompt: impl Into<String>,
        max_steps: usize,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            chat,
            tools,
            system_prompt: system_prompt.into(),
            max_steps: max_steps.max(1),
            stall_timeout,
        }
    }

    /// Run the loop in a background task feeding a bounded channel. The task
    /// ends when the loop finishes, the receiver is dropped or `cancel` fires.
    pub fn spawn(
        self,
        query: String,
        capacity: usize,
        cancel: CancellationToken,
    ) -> ChannelEventSource {
        let (tx, source) = event_channel(capacity);
        tokio::spawn(async move {
            let watch = tx.clone();
            tokio::select! {
                _ = cancel.cancelled() => debug!("agent task cancelled"),
                _ = watch.closed() => debug!("event receiver dropped, agent task stopping"),
                res = self.run(&query, &tx) => {
                    if let Err(e) = res {
                        warn!("agent loop failed: {}", e);
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
        });
        source
    }

    pub async fn run(&self, query: &str, tx: &EventSender) -> Result<(), AgentError> {
        let mut messages = vec![
            ChatMessage::System {
                content: self.system_prompt.clone(),
            },
            ChatMessage::User {
                content: query.to_string(),
            },
        ];
        let specs = self.tools.specs();

        for step in 0..self.max_steps {
            debug!(step, "agent step");
            let mut stream = self.chat.stream_chat(&messages, &specs).await?;
            let mut text = String::new();
            let mut calls: BTreeMap<usize, PendingCall> = BTreeMap::new();

            loop {
                let next = tokio::time::timeout(self.stall_timeout, stream.next())
                    .await
                    .map_err(|_| AgentError::Timeout {
                        timeout_ms: self.stall_timeout.as_millis() as u64,
                    })?;
                let Some(delta) = next else { break };
                let delta = delta?;
                if let Some(chunk) = delta.content {
                    text.push_str(&chunk);
                    if tx.send(Ok(StreamEvent::content(chunk, AGENT_NODE))).await.is_err() {
                        return Ok(());
                    }
                }
                for tc in delta.tool_calls {
                    let call = calls.entry(tc.index).or_default();
                    if let Some(id) = tc.id {
                        call.id = id;
                    }
                    if let Some(name) = tc.name {
                        call.name.push_str(&name);
                    }
                    if let Some(args) = tc.arguments {
                        call.arguments.push_str(&args);
                    }
                }
                if delta.finish_reason.is_some() {
                    break;
                }
            }

            if calls.is_empty() {
                info!(step, chars = text.len(), "agent finished");
                let _ = tx
                    .send(Ok(StreamEvent::control(AGENT_NODE, ControlSignal::Finish)))
                    .await;
                return Ok(());
            }

            let tool_calls: Vec<ToolCall> = calls
                .into_values()
                .enumerate()
                .map(|(i, c)| ToolCall {
                    id: if c.id.is_empty() {
                        format!("call_{step}_{i}")
                    } else {
                        c.id
                    },
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: c.name,
                        arguments: c.arguments,
                    },
                })
                .collect();
            messages.push(ChatMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls: tool_calls.clone(),
            });

            for call in tool_calls {
                let name = call.function.name.clone();
                let signal = ControlSignal::ToolCall { name: name.clone() };
                if tx
                    .send(Ok(StreamEvent::control(TOOLS_NODE, signal)))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                let output = self
                    .tools
                    .invoke(&name, &tool_input(&call.function.arguments))
                    .await;
                let signal = ControlSignal::ToolResult { name: name.clone() };
                if tx
                    .send(Ok(StreamEvent::control(TOOLS_NODE, signal)))
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                messages.push(ChatMessage::Tool {
                    tool_call_id: call.id,
                    content: output,
                });
            }
        }

        Err(AgentError::StepLimit {
            max_steps: self.max_steps,
        })
    }
}

/// Tools take `{"input": "..."}`; anything else is passed through verbatim.
fn tool_input(arguments: &str) -> String {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()
        .and_then(|v| v.get("input").and_then(|i| i.as_str()).map(str::to_string))
        .unwrap_or_else(|| arguments.to_string())
}
