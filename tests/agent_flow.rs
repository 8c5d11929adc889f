use std::sync::{Arc, Mutex};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use tool_union::{
    AgentBuilder, AgentError, AgentState, FieldSpec, FnTool, Fragment, ModelTool, PartialAction,
    PartialObserver, Role, Scripted, StaticToken, StreamIntegrityError, StubModel, ToolError,
    ToolSpec, TransportError, TypeExpr,
};

/// Multiply two integers.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(rename = "multiply")]
struct MultiplyArgs {
    /// First factor
    x: i64,
    /// Second factor
    y: i64,
}

fn int_field(name: &str) -> FieldSpec {
    FieldSpec::required(name, TypeExpr::scalar("i64")).with_description(format!("Operand {name}"))
}

fn add_tool() -> FnTool {
    FnTool::new(
        ToolSpec::new("add", "Add two integers.", vec![int_field("a"), int_field("b")]),
        |args| async move {
            let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
            let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(a + b))
        },
    )
}

fn divide_tool() -> FnTool {
    FnTool::new(
        ToolSpec::new("divide", "Divide a by b.", vec![int_field("a"), int_field("b")]),
        |args| async move {
            let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
            match args.get("b").and_then(Value::as_i64).unwrap_or_default() {
                0 => Err(ToolError::new("division by zero")),
                b => Ok(json!(a / b)),
            }
        },
    )
}

fn reply(content: &str) -> String {
    json!({"selected_tool": {"name": "reply_to_user", "arguments": {"content": content}}}).to_string()
}

#[tokio::test]
async fn chains_tools_until_reply() {
    let model = StubModel::new(vec![
        r#"I'll add first. {"selected_tool": {"name": "add", "arguments": {"a": 2, "b": 3}}}"#.into(),
        r#"{selected_tool: {name: "multiply", arguments: {x: 5 y: 4}}}"#.into(),
        reply("The result is 20."),
    ]);
    let multiply = ModelTool::new(|args: MultiplyArgs| async move { Ok(json!(args.x * args.y)) })
        .unwrap();
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .with_tool(multiply)
        .unwrap()
        .build()
        .unwrap();

    let answer = agent.respond("What is (2 + 3) * 4?").await.unwrap();
    assert_eq!(answer, "The result is 20.");
    assert_eq!(model.calls(), 3);
    assert_eq!(agent.state(), AgentState::Terminated);

    let history = agent.conversation();
    assert_eq!(
        history.roles(),
        vec![
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
    let messages = history.messages();
    let call = messages[1].tool_call.as_ref().unwrap();
    assert_eq!(call.name, "add");
    assert_eq!(Value::Object(call.arguments.clone()), json!({"a": 2, "b": 3}));
    assert_eq!(messages[2].content, "Tool `add` result: 5");
    assert_eq!(messages[2].tool_result.as_ref().unwrap().tool_call_id, call.id);
    assert_eq!(messages[4].content, "Tool `multiply` result: 20");
    assert_eq!(messages[5].content, "The result is 20.");

    // System turn plus the five turns recorded before the last call.
    let last = &model.requests()[2];
    assert_eq!(last.messages.len(), 6);
    assert_eq!(last.messages[0].role, Role::System);
}

#[tokio::test]
async fn multiple_mode_runs_tools_before_the_reply() {
    let model = StubModel::new(vec![json!({"selected_tool": [
        {"name": "add", "arguments": {"a": 1, "b": 2}},
        {"name": "reply_to_user", "arguments": {"content": "3"}}
    ]})
    .to_string()]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .allow_multiple(true)
        .build()
        .unwrap();

    assert_eq!(agent.respond("1 + 2?").await.unwrap(), "3");
    assert_eq!(model.calls(), 1);
    assert_eq!(
        agent.conversation().roles(),
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
}

#[tokio::test]
async fn streams_reply_deltas_to_the_observer() {
    let model = StubModel::streaming(vec![vec![
        "{\"selected_tool\": {\"name\": \"reply_to_user\", ".into(),
        "\"arguments\": {\"content\": \"The sum ".into(),
        "is 89.\"".into(),
        "}}}".into(),
    ]]);
    let deltas = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&deltas);
    let observer = Arc::new(move |partial: &PartialAction| -> Result<(), String> {
        if let Some(delta) = &partial.reply_delta {
            sink.lock().unwrap().push_str(delta);
        }
        Ok(())
    });
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .with_stream(true)
        .with_observer(observer)
        .build()
        .unwrap();

    let answer = agent.respond("Sum?").await.unwrap();
    assert_eq!(answer, "The sum is 89.");
    assert_eq!(deltas.lock().unwrap().as_str(), "The sum is 89.");
    assert!(model.requests()[0].stream);
}

#[tokio::test]
async fn observer_errors_do_not_abort_the_turn() {
    let model = StubModel::streaming(vec![vec![
        "{\"selected_tool\": {\"name\": \"reply_to_user\", \"arguments\": {\"content\": \"ok".into(),
        "\"}}}".into(),
    ]]);
    let observer: Arc<dyn PartialObserver> =
        Arc::new(|_: &PartialAction| -> Result<(), String> { Err("observer broke".into()) });
    let mut agent = AgentBuilder::new(model)
        .with_tool(add_tool())
        .unwrap()
        .with_stream(true)
        .with_observer(observer)
        .build()
        .unwrap();

    assert_eq!(agent.respond("hi").await.unwrap(), "ok");
}

#[tokio::test]
async fn cancellation_mid_stream_returns_cancelled() {
    let model = StubModel::scripted(vec![Scripted::Stalled(vec![
        "{\"selected_tool\": {\"name\": \"reply_to_user\", \"arguments\": {\"content\": \"partial".into(),
    ])]);
    let token = CancellationToken::new();
    let mut agent = AgentBuilder::new(model)
        .with_tool(add_tool())
        .unwrap()
        .with_stream(true)
        .with_cancellation(token.clone())
        .build()
        .unwrap();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = agent.respond("hang").await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(agent.state(), AgentState::Failed);
    assert_eq!(agent.conversation().roles(), vec![Role::User]);
}

#[tokio::test]
async fn shrinking_snapshots_fail_the_turn_without_retry() {
    let model = StubModel::scripted(vec![
        Scripted::Fragments(vec![
            Fragment::Snapshot("{\"selected_tool\": {\"name\": \"reply".into()),
            Fragment::Snapshot("{\"selected".into()),
            Fragment::End,
        ]),
        Scripted::Text(reply("never requested")),
    ]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .with_stream(true)
        .build()
        .unwrap();

    let err = agent.respond("hi").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::StreamIntegrity(StreamIntegrityError::Shrink { .. })
    ));
    assert_eq!(model.calls(), 1);
    assert_eq!(agent.state(), AgentState::Failed);
    assert_eq!(agent.conversation().roles(), vec![Role::User]);
}

#[tokio::test]
async fn recovers_after_a_corrective_retry() {
    let model = StubModel::new(vec!["Sorry, I cannot do that.".into(), reply("Recovered")]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(agent.respond("try").await.unwrap(), "Recovered");
    assert_eq!(model.calls(), 2);

    let retry = &model.requests()[1];
    assert_eq!(retry.messages.len(), 4);
    assert_eq!(retry.messages[2].role, Role::Assistant);
    assert_eq!(retry.messages[2].content, "Sorry, I cannot do that.");
    assert_eq!(retry.messages[3].role, Role::System);

    // Retry turns stay out of the history.
    assert_eq!(agent.conversation().roles(), vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn exhausted_retries_keep_the_raw_reply() {
    let model = StubModel::new(vec!["nope".into(), "still { not json".into()]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .build()
        .unwrap();

    let err = agent.respond("try").await.unwrap_err();
    let AgentError::Parse(failure) = err else {
        panic!("expected parse failure, got {err:?}");
    };
    assert_eq!(failure.raw, "still { not json");
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn padded_tool_names_dispatch_by_their_trimmed_tag() {
    let model = StubModel::new(vec![
        r#"{"selected_tool": {"name": "add", "arguments": {"a": 40, "b": 2}}}"#.into(),
        reply("42"),
    ]);
    let padded = FnTool::new(
        ToolSpec::new(" add ", "Add two integers.", vec![int_field("a"), int_field("b")]),
        |args| async move {
            let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
            let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(a + b))
        },
    );
    let mut agent = AgentBuilder::new(model)
        .with_tool(padded)
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(agent.respond("40 + 2?").await.unwrap(), "42");
    assert_eq!(agent.conversation().messages()[2].content, "Tool `add` result: 42");
}

#[tokio::test]
async fn tool_errors_are_reported_to_the_model() {
    let model = StubModel::new(vec![
        r#"{"selected_tool": {"name": "divide", "arguments": {"a": 1, "b": 0}}}"#.into(),
        reply("I cannot divide by zero."),
    ]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(divide_tool())
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(agent.respond("1 / 0?").await.unwrap(), "I cannot divide by zero.");
    let tool_turn = &agent.conversation().messages()[2];
    assert_eq!(tool_turn.content, "Tool `divide` failed: division by zero");
    assert!(tool_turn.tool_result.as_ref().unwrap().is_error);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn opted_in_tool_errors_are_fatal() {
    let model = StubModel::new(vec![
        r#"{"selected_tool": {"name": "divide", "arguments": {"a": 1, "b": 0}}}"#.into(),
    ]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(divide_tool())
        .unwrap()
        .fatal_tool_errors(["divide"])
        .build()
        .unwrap();

    let err = agent.respond("1 / 0?").await.unwrap_err();
    assert!(matches!(err, AgentError::ToolInvocation { ref name, .. } if name == "divide"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn transport_failures_surface_typed() {
    let model = StubModel::scripted(vec![Scripted::Fail(TransportError::RateLimited {
        provider: "stub".into(),
        body: "slow down".into(),
    })]);
    let mut agent = AgentBuilder::new(model)
        .with_tool(add_tool())
        .unwrap()
        .build()
        .unwrap();

    let err = agent.respond("hi").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Transport(TransportError::RateLimited { .. })
    ));
}

#[tokio::test]
async fn bearer_token_is_attached_to_each_call() {
    let model = StubModel::new(vec![reply("hello")]);
    let mut agent = AgentBuilder::new(model.clone())
        .with_tool(add_tool())
        .unwrap()
        .with_credentials(Arc::new(StaticToken("secret".into())))
        .build()
        .unwrap();

    agent.respond("hi").await.unwrap();
    assert_eq!(model.requests()[0].bearer_token.as_deref(), Some("secret"));
}
