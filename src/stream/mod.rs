//! SSE multiplexer: agent events in, spinner/heartbeat/content/terminal frames out

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, AgentEventSource, ControlSignal, NodeId, StreamEvent};

pub const SPINNER: &str = "[spinner]";
pub const HEARTBEAT: &str = "[keepalive]";
pub const DONE: &str = "[DONE]";

/// One SSE record. Sentinels are told apart from content only by their literal
/// payload, so content that equals a sentinel is ambiguous on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Spinner,
    Heartbeat,
    Content(String),
    Error(String),
    Done,
}

impl Frame {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Frame::Error(format!("Error: {message}"))
    }

    pub fn payload(&self) -> &str {
        match self {
            Frame::Spinner => SPINNER,
            Frame::Heartbeat => HEARTBEAT,
            Frame::Content(s) | Frame::Error(s) => s,
            Frame::Done => DONE,
        }
    }

    /// `data: <JSON string>\n\n`
    pub fn encode(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::Value::String(self.payload().to_string())
        )
    }
}

/// What happens to accumulated content when a different node starts talking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationPolicy {
    /// Keep everything; tool nodes before the answer node must not erase it.
    #[default]
    Preserve,
    ResetOnNodeChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerState {
    Init,
    Streaming,
    Heartbeat,
    Draining,
    Done,
    Aborted,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { chars: usize },
    Aborted,
    Errored(String),
}

#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub heartbeat_interval: Duration,
    pub accumulation: AccumulationPolicy,
}

impl MultiplexerConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            accumulation: config.stream.accumulation,
        }
    }
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            accumulation: AccumulationPolicy::Preserve,
        }
    }
}

enum Pulled {
    Event(Result<Option<StreamEvent>, AgentError>),
    Disconnected,
}

/// Send one frame unless the client is gone or the request is cancelled
/// while the channel is full.
async fn emit(cancel: &CancellationToken, sink: &mpsc::Sender<Frame>, frame: Frame) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = sink.send(frame) => res.is_ok(),
    }
}

/// Drives one agent event source to completion for one client.
pub struct StreamMultiplexer<S> {
    source: S,
    query: String,
    config: MultiplexerConfig,
    cancel: CancellationToken,
    state: MultiplexerState,
}

impl<S: AgentEventSource> StreamMultiplexer<S> {
    pub fn new(
        source: S,
        query: impl Into<String>,
        config: MultiplexerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            query: query.into(),
            config,
            cancel,
            state: MultiplexerState::Init,
        }
    }

    pub fn state(&self) -> MultiplexerState {
        self.state
    }

    fn transition(&mut self, next: MultiplexerState) {
        debug!(from = ?self.state, to = ?next, "multiplexer transition");
        self.state = next;
    }

    fn abort(&mut self) -> StreamOutcome {
        self.transition(MultiplexerState::Aborted);
        info!("client disconnected, stream aborted");
        StreamOutcome::Aborted
    }

    fn is_echo(&self, text: &str) -> bool {
        text.trim().eq_ignore_ascii_case(self.query.trim())
    }

    /// Run until done, errored or aborted. The source is dropped on return.
    pub async fn run(mut self, sink: mpsc::Sender<Frame>) -> StreamOutcome {
        if self.cancel.is_cancelled() || !emit(&self.cancel, &sink, Frame::Spinner).await {
            return self.abort();
        }
        self.transition(MultiplexerState::Streaming);

        let heartbeat = self.config.heartbeat_interval;
        let mut accumulated = String::new();
        let mut last_node: Option<NodeId> = None;
        let mut deadline = Instant::now() + heartbeat;

        loop {
            if self.cancel.is_cancelled() || sink.is_closed() {
                return self.abort();
            }

            let pulled = {
                let pull = self.source.next_event();
                tokio::pin!(pull);
                loop {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break Pulled::Disconnected,
                        _ = sink.closed() => break Pulled::Disconnected,
                        res = &mut pull => break Pulled::Event(res),
                        _ = sleep_until(deadline) => {
                            // The in-flight pull stays pending across heartbeats
                            self.state = MultiplexerState::Heartbeat;
                            if !emit(&self.cancel, &sink, Frame::Heartbeat).await {
                                break Pulled::Disconnected;
                            }
                            self.state = MultiplexerState::Streaming;
                            deadline = Instant::now() + heartbeat;
                        }
                    }
                }
            };

            let event = match pulled {
                Pulled::Disconnected => return self.abort(),
                Pulled::Event(Err(e)) => {
                    self.transition(MultiplexerState::Errored);
                    warn!("agent stream failed: {}", e);
                    let message = e.to_string();
                    if emit(&self.cancel, &sink, Frame::error(&message)).await {
                        emit(&self.cancel, &sink, Frame::Done).await;
                    }
                    return StreamOutcome::Errored(message);
                }
                Pulled::Event(Ok(None)) => break,
                Pulled::Event(Ok(Some(event))) => event,
            };
            deadline = Instant::now() + heartbeat;

            match event {
                StreamEvent::Content {
                    text,
                    node,
                    is_terminal,
                } => {
                    if self.is_echo(&text) {
                        debug!(%node, "discarding echoed query");
                    } else {
                        if self.config.accumulation == AccumulationPolicy::ResetOnNodeChange
                            && last_node.as_ref().is_some_and(|prev| *prev != node)
                        {
                            accumulated.clear();
                        }
                        accumulated.push_str(&text);
                        last_node = Some(node);
                    }
                    if is_terminal {
                        break;
                    }
                }
                StreamEvent::Control {
                    signal: ControlSignal::Finish,
                    ..
                } => break,
                StreamEvent::Control { node, signal } => {
                    debug!(%node, ?signal, "control event");
                }
            }
        }

        self.transition(MultiplexerState::Draining);
        let chars = accumulated.chars().count();
        if !emit(&self.cancel, &sink, Frame::Content(accumulated)).await
            || !emit(&self.cancel, &sink, Frame::Done).await
        {
            return self.abort();
        }
        self.transition(MultiplexerState::Done);
        info!(chars, "stream completed");
        StreamOutcome::Completed { chars }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_encode_as_json_strings() {
        assert_eq!(Frame::Spinner.encode(), "data: \"[spinner]\"\n\n");
        assert_eq!(Frame::Done.encode(), "data: \"[DONE]\"\n\n");
        assert_eq!(
            Frame::Content("Line \"one\"\nLine two".into()).encode(),
            "data: \"Line \\\"one\\\"\\nLine two\"\n\n"
        );
        assert_eq!(Frame::error("Empty query").payload(), "Error: Empty query");
    }
}
