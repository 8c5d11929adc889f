use std::env;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tool_union::{
    init_tracing, AgentBuilder, AppConfig, FieldSpec, FnTool, ModelTool, OpenAiCompatibleClient,
    PartialAction, ToolError, ToolSpec, TypeExpr,
};
use tracing::info;

/// Multiply two integers.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(rename = "multiply")]
struct MultiplyArgs {
    /// First factor
    x: i64,
    /// Second factor
    y: i64,
}

fn add_tool() -> FnTool {
    let operand = |name: &str| {
        FieldSpec::required(name, TypeExpr::scalar("i64")).with_description(format!("Operand {name}"))
    };
    FnTool::new(
        ToolSpec::new("add", "Add two integers.", vec![operand("a"), operand("b")]),
        |args| async move {
            let a = args.get("a").and_then(Value::as_i64);
            let b = args.get("b").and_then(Value::as_i64);
            match (a, b) {
                (Some(a), Some(b)) => a
                    .checked_add(b)
                    .map(|sum| json!(sum))
                    .ok_or_else(|| ToolError::new("integer overflow")),
                _ => Err(ToolError::new("`a` and `b` must be integers")),
            }
        },
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("TOOL_UNION_CONFIG").unwrap_or_else(|_| "tool-union.toml".into());
    let cfg = AppConfig::from_env_or_file(&config_path)?;
    init_tracing(&cfg.logging);

    let question = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let question = if question.trim().is_empty() {
        "What is (47 + 42) * 3?".to_string()
    } else {
        question
    };

    let model = Arc::new(OpenAiCompatibleClient::from_config(&cfg.model)?);
    let multiply = ModelTool::new(|args: MultiplyArgs| async move {
        args.x
            .checked_mul(args.y)
            .map(|product| json!(product))
            .ok_or_else(|| ToolError::new("integer overflow"))
    })?;

    let observer = Arc::new(|partial: &PartialAction| -> Result<(), String> {
        if let Some(delta) = &partial.reply_delta {
            print!("{delta}");
        }
        Ok(())
    });

    let mut agent = AgentBuilder::from_config(model, &cfg)?
        .with_tool(add_tool())?
        .with_tool(multiply)?
        .with_observer(observer)
        .build()?;

    info!(model = %cfg.model.model, stream = cfg.model.stream, "asking");
    let answer = agent.respond(question).await?;
    if cfg.model.stream {
        println!();
    } else {
        println!("{answer}");
    }
    Ok(())
}
