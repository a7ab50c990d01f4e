use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::clients::traits::{
    ChatDelta, ChatMessage, ChatModel, ChatStream, LanguageModel, LlmError, ToolCallDelta,
    ToolSpec,
};
use crate::config::Config;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
///
/// Only a connect timeout is set here; callers bound whole calls with their
/// own deadlines so streamed responses are not cut off mid-answer.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::new(
            config.system.llm_base_url.clone(),
            config.runtime.openai_api_key.clone(),
            config.system.llm_model.clone(),
            config.system.llm_temperature,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut req = self.http.post(self.endpoint()).json(body);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

fn tool_payload(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "input": {"type": "string", "description": "Search text for the tool"}
                        },
                        "required": ["input"]
                    }
                }
            })
        })
        .collect()
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!("chat completion (model={}, chars={})", self.model, prompt.len());
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let resp = self.post(&body).await?;
        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::Empty)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatStream, LlmError> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": true,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tool_payload(tools));
        }
        let resp = self.post(&body).await?;
        let bytes: BoxStream<'static, Result<Vec<u8>, LlmError>> = resp
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(LlmError::from))
            .boxed();
        Ok(delta_stream(bytes))
    }
}

struct DeltaState {
    body: BoxStream<'static, Result<Vec<u8>, LlmError>>,
    parser: StreamChunkParser,
    pending: VecDeque<ChatDelta>,
    finished: bool,
}

/// Turn a raw SSE byte stream into chat deltas, ending at `[DONE]` or EOF.
pub fn delta_stream(body: BoxStream<'static, Result<Vec<u8>, LlmError>>) -> ChatStream {
    let state = DeltaState {
        body,
        parser: StreamChunkParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.pending.pop_front() {
                return Some((Ok(delta), st));
            }
            if st.finished || st.parser.is_done() {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => st.pending.extend(st.parser.parse_chunk(&chunk)),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.finished = true;
                    st.pending.extend(st.parser.finish());
                }
            }
        }
    })
    .boxed()
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Incremental parser for `data:` records of a streamed chat completion.
///
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across network chunks survive.
pub struct StreamChunkParser {
    buffer: Vec<u8>,
    done: bool,
}

impl Default for StreamChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamChunkParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn parse_chunk(&mut self, chunk: &[u8]) -> Vec<ChatDelta> {
        self.buffer.extend_from_slice(chunk);
        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = self.parse_line(line.trim()) {
                deltas.push(delta);
            }
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        deltas
    }

    /// Flush a trailing record that arrived without a newline.
    pub fn finish(&mut self) -> Vec<ChatDelta> {
        if self.buffer.is_empty() || self.done {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        self.parse_line(line.trim()).into_iter().collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<ChatDelta> {
        // Blank separators and ":" comment lines carry nothing
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        let payload = line.strip_prefix("data:")?.trim();
        if payload == "[DONE]" {
            self.done = true;
            return None;
        }
        let chunk: WireChunk = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                debug!("Failed to parse stream chunk: {}", e);
                debug!("Problematic line: {}", payload);
                return None;
            }
        };
        let choice = chunk.choices.into_iter().next()?;
        let mut delta = ChatDelta {
            finish_reason: choice.finish_reason,
            ..ChatDelta::default()
        };
        if let Some(d) = choice.delta {
            delta.content = d.content.filter(|c| !c.is_empty());
            delta.tool_calls = d
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = match tc.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    ToolCallDelta {
                        index: tc.index,
                        id: tc.id,
                        name,
                        arguments,
                    }
                })
                .collect();
        }
        if delta == ChatDelta::default() {
            return None;
        }
        Some(delta)
    }
}
