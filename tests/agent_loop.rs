//! Tool-calling loop driven by a scripted chat model

mod common;

use async_trait::async_trait;
use chefboost::agent::{AgentError, AgentEventSource, ControlSignal, StreamEvent, ToolAgent};
use chefboost::clients::ChatMessage;
use chefboost::stream::{Frame, MultiplexerConfig, StreamMultiplexer, StreamOutcome};
use chefboost::tools::{Tool, ToolRegistry};
use common::{ScriptedChat, stop_delta, text_delta, tool_call_delta};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingTool {
    inputs: Mutex<Vec<String>>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "recipes_self_query"
    }

    fn description(&self) -> &str {
        "Search recipes with metadata filtering"
    }

    async fn invoke(&self, input: &str) -> String {
        self.inputs.lock().unwrap().push(input.to_string());
        r#"[{"content":"Leek and potato soup"}]"#.to_string()
    }
}

fn registry(tool: Arc<RecordingTool>) -> ToolRegistry {
    let mut r = ToolRegistry::new();
    r.register(tool);
    r
}

fn answering_chat() -> ScriptedChat {
    ScriptedChat::new(vec![
        vec![tool_call_delta("call_1", "recipes_self_query", "leek soup")],
        vec![text_delta("Title: "), text_delta("Leek Soup"), stop_delta()],
    ])
}

async fn collect(
    mut source: impl AgentEventSource,
) -> (Vec<StreamEvent>, Option<AgentError>) {
    let mut events = Vec::new();
    loop {
        match source.next_event().await {
            Ok(Some(e)) => events.push(e),
            Ok(None) => return (events, None),
            Err(e) => return (events, Some(e)),
        }
    }
}

#[tokio::test]
async fn tool_results_feed_the_next_turn() {
    let chat = Arc::new(answering_chat());
    let tool = Arc::new(RecordingTool::default());
    let agent = ToolAgent::new(
        chat.clone(),
        registry(tool.clone()),
        "You are ChefBoost",
        4,
        Duration::from_secs(30),
    );

    let (events, err) =
        collect(agent.spawn("leek soup".into(), 8, CancellationToken::new())).await;
    assert!(err.is_none());
    assert_eq!(
        events,
        vec![
            StreamEvent::control(
                "tools",
                ControlSignal::ToolCall {
                    name: "recipes_self_query".into()
                }
            ),
            StreamEvent::control(
                "tools",
                ControlSignal::ToolResult {
                    name: "recipes_self_query".into()
                }
            ),
            StreamEvent::content("Title: ", "agent"),
            StreamEvent::content("Leek Soup", "agent"),
            StreamEvent::control("agent", ControlSignal::Finish),
        ]
    );
    assert_eq!(*tool.inputs.lock().unwrap(), vec!["leek soup".to_string()]);

    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    assert!(matches!(requests[0][0], ChatMessage::System { .. }));
    match requests[1].last() {
        Some(ChatMessage::Tool {
            tool_call_id,
            content,
        }) => {
            assert_eq!(tool_call_id, "call_1");
            assert!(content.contains("Leek and potato soup"));
        }
        other => panic!("expected tool message, got {other:?}"),
    }
}

#[tokio::test]
async fn step_budget_is_enforced() {
    let chat = Arc::new(ScriptedChat::looping(vec![tool_call_delta(
        "call_x",
        "recipes_self_query",
        "soup",
    )]));
    let tool = Arc::new(RecordingTool::default());
    let agent = ToolAgent::new(chat, registry(tool.clone()), "sys", 2, Duration::from_secs(30));

    let (events, err) = collect(agent.spawn("soup".into(), 8, CancellationToken::new())).await;
    assert_eq!(events.len(), 4);
    assert!(matches!(err, Some(AgentError::StepLimit { max_steps: 2 })));
    assert_eq!(tool.inputs.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn agent_and_multiplexer_produce_one_answer_frame() {
    let agent = ToolAgent::new(
        Arc::new(answering_chat()),
        registry(Arc::new(RecordingTool::default())),
        "sys",
        4,
        Duration::from_secs(30),
    );
    let cancel = CancellationToken::new();
    let source = agent.spawn("leek soup".into(), 8, cancel.child_token());
    let mux = StreamMultiplexer::new(source, "leek soup", MultiplexerConfig::default(), cancel);

    let (tx, mut rx) = mpsc::channel(8);
    let outcome = tokio::spawn(mux.run(tx));
    let mut frames = Vec::new();
    while let Some(f) = rx.recv().await {
        frames.push(f);
    }
    assert_eq!(
        frames,
        vec![
            Frame::Spinner,
            Frame::Content("Title: Leek Soup".into()),
            Frame::Done
        ]
    );
    assert_eq!(
        outcome.await.unwrap(),
        StreamOutcome::Completed { chars: 16 }
    );
}

#[tokio::test]
async fn dropping_the_source_stops_the_agent() {
    let chat = Arc::new(ScriptedChat::looping(vec![tool_call_delta(
        "call_x",
        "recipes_self_query",
        "soup",
    )]));
    let tool = Arc::new(RecordingTool::default());
    let agent = ToolAgent::new(chat, registry(tool.clone()), "sys", 10_000, Duration::from_secs(30));

    let source = agent.spawn("soup".into(), 1, CancellationToken::new());
    drop(source);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = tool.inputs.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tool.inputs.lock().unwrap().len(), settled);
    assert!(settled < 10_000);
}
