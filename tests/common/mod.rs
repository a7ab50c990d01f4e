//! Scripted stand-ins for the store, the language models and the agent

#![allow(dead_code)]

use async_trait::async_trait;
use chefboost::agent::{AgentError, AgentEventSource, StreamEvent};
use chefboost::clients::{
    ChatDelta, ChatMessage, ChatModel, ChatStream, LanguageModel, LlmError, ToolCallDelta,
    ToolSpec,
};
use chefboost::error::{ChefBoostError, Result};
use chefboost::retrieval::StructuredFilter;
use chefboost::store::{Document, DocumentStore};
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn doc(content: &str, metadata: Value) -> Document {
    Document::new(content, metadata.as_object().cloned().unwrap_or_default())
}

/// Store answering from a fixed query -> documents table.
#[derive(Default)]
pub struct StubStore {
    pub by_query: HashMap<String, Vec<Document>>,
    pub failing: HashSet<String>,
    pub calls: Mutex<Vec<(String, Option<StructuredFilter>)>>,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, docs: Vec<Document>) -> Self {
        self.by_query.insert(query.to_string(), docs);
        self
    }

    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, Option<StructuredFilter>)> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, query: &str, top_k: usize) -> Result<Vec<Document>> {
        if self.failing.contains(query) {
            return Err(ChefBoostError::Database {
                message: format!("index offline for '{query}'"),
            });
        }
        Ok(self
            .by_query
            .get(query)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(top_k)
            .collect())
    }
}

#[async_trait]
impl DocumentStore for StubStore {
    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<Document>> {
        self.calls.lock().unwrap().push((query.to_string(), None));
        self.lookup(query, top_k)
    }

    async fn filtered_search(
        &self,
        query: &str,
        filter: &StructuredFilter,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), Some(filter.clone())));
        if self.failing.contains(query) {
            return self.lookup(query, top_k);
        }
        Ok(self
            .by_query
            .get(query)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| filter.matches(&d.metadata))
            .take(top_k)
            .collect())
    }
}

/// Completion model keyed on prompt shape: translator prompts end with
/// `User query: <q>`, paraphrase prompts with `Original question: <q>`.
#[derive(Default)]
pub struct ScriptedLlm {
    pub translations: HashMap<String, String>,
    pub paraphrases: Option<String>,
    pub qa_answer: Option<String>,
    pub stall: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(mut self, query: &str, raw: &str) -> Self {
        self.translations.insert(query.to_string(), raw.to_string());
        self
    }

    pub fn paraphrases(mut self, raw: &str) -> Self {
        self.paraphrases = Some(raw.to_string());
        self
    }

    pub fn stalling(mut self, d: Duration) -> Self {
        self.stall = Some(d);
        self
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.stall {
            tokio::time::sleep(d).await;
        }
        if prompt.contains("Original question: ") {
            return self.paraphrases.clone().ok_or(LlmError::Empty);
        }
        if let Some((_, q)) = prompt.rsplit_once("User query: ") {
            return Ok(self
                .translations
                .get(q.trim())
                .cloned()
                .unwrap_or_else(|| json!({"query": q.trim(), "filter": "NO_FILTER"}).to_string()));
        }
        self.qa_answer.clone().ok_or(LlmError::Empty)
    }
}

/// Chat model replaying one scripted delta list per call.
#[derive(Default)]
pub struct ScriptedChat {
    pub turns: Mutex<VecDeque<Vec<ChatDelta>>>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    pub repeat_last: bool,
}

impl ScriptedChat {
    pub fn new(turns: Vec<Vec<ChatDelta>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    pub fn looping(turn: Vec<ChatDelta>) -> Self {
        Self {
            turns: Mutex::new(vec![turn].into()),
            repeat_last: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> std::result::Result<ChatStream, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let turn = {
            let mut turns = self.turns.lock().unwrap();
            if self.repeat_last {
                turns.front().cloned()
            } else {
                turns.pop_front()
            }
        };
        let turn = turn.ok_or(LlmError::Empty)?;
        Ok(stream::iter(turn.into_iter().map(Ok)).boxed())
    }
}

pub fn text_delta(text: &str) -> ChatDelta {
    ChatDelta {
        content: Some(text.to_string()),
        ..ChatDelta::default()
    }
}

pub fn stop_delta() -> ChatDelta {
    ChatDelta {
        finish_reason: Some("stop".into()),
        ..ChatDelta::default()
    }
}

pub fn tool_call_delta(id: &str, name: &str, input: &str) -> ChatDelta {
    ChatDelta {
        tool_calls: vec![ToolCallDelta {
            index: 0,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(json!({ "input": input }).to_string()),
        }],
        finish_reason: Some("tool_calls".into()),
        ..ChatDelta::default()
    }
}

pub enum Step {
    Event(StreamEvent),
    Stall(Duration),
    Fail(String),
}

/// Agent event source replaying a script. Stalls happen inside the pull so a
/// cancelled pull would lose them.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    pub pulls: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            pulls: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentEventSource for ScriptedSource {
    async fn next_event(&mut self) -> std::result::Result<Option<StreamEvent>, AgentError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        loop {
            match self.steps.pop_front() {
                None => return Ok(None),
                Some(Step::Stall(d)) => tokio::time::sleep(d).await,
                Some(Step::Event(e)) => return Ok(Some(e)),
                Some(Step::Fail(msg)) => return Err(AgentError::Task(msg)),
            }
        }
    }
}
