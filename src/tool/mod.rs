pub mod docstring;
pub mod spec;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AgentError, Result, SchemaError, ToolError, ValidationError};

pub use docstring::{DocumentedFn, SignatureParam};
pub use spec::{FieldSpec, ToolKey, ToolSpec, TypeExpr};

/// A capability the model can select. Arguments arrive already validated
/// and converted against the tool's spec.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn invoke(&self, arguments: Map<String, Value>) -> std::result::Result<Value, ToolError>;

    fn name(&self) -> &str {
        &self.spec().name
    }
}

type ToolFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, ToolError>> + Send>>;
type ToolFn = Box<dyn Fn(Map<String, Value>) -> ToolFuture + Send + Sync>;

/// Tool backed by an async closure over the raw argument map.
pub struct FnTool {
    spec: ToolSpec,
    handler: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            spec,
            handler: Box::new(move |arguments| Box::pin(handler(arguments))),
        }
    }

    /// Builds the spec from a documented callable.
    pub fn documented<F, Fut>(callable: &DocumentedFn, handler: F) -> std::result::Result<Self, SchemaError>
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        Ok(Self::new(ToolSpec::from_documented_fn(callable)?, handler))
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("spec", &self.spec).finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> std::result::Result<Value, ToolError> {
        (self.handler)(arguments).await
    }
}

/// Tool whose arguments deserialize into a typed parameter model `T`.
pub struct ModelTool<T, F> {
    spec: ToolSpec,
    handler: F,
    _model: PhantomData<fn(T)>,
}

impl<T, F, Fut> ModelTool<T, F>
where
    T: JsonSchema + DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, ToolError>> + Send,
{
    pub fn new(handler: F) -> std::result::Result<Self, SchemaError> {
        Ok(Self {
            spec: ToolSpec::from_model::<T>()?,
            handler,
            _model: PhantomData,
        })
    }

    pub fn named(name: impl Into<String>, handler: F) -> std::result::Result<Self, SchemaError> {
        Ok(Self {
            spec: ToolSpec::from_model_named::<T>(name)?,
            handler,
            _model: PhantomData,
        })
    }
}

#[async_trait]
impl<T, F, Fut> Tool for ModelTool<T, F>
where
    T: JsonSchema + DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, ToolError>> + Send,
{
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> std::result::Result<Value, ToolError> {
        let model: T = serde_json::from_value(Value::Object(arguments)).map_err(|err| {
            ToolError::new(format!("invalid arguments for `{}`: {err}", self.spec.name))
        })?;
        (self.handler)(model).await
    }
}

/// Ordered set of tools, unique by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> std::result::Result<(), ValidationError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ValidationError> {
        if self.get(tool.name()).is_some() {
            return Err(ValidationError::DuplicateTool(tool.name().to_string()));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn call(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.invoke(arguments)
            .await
            .map_err(|source| AgentError::ToolInvocation {
                name: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    /// Multiply two integers.
    #[derive(Debug, Deserialize, JsonSchema)]
    #[schemars(rename = "multiply")]
    struct MultiplyArgs {
        /// First factor
        x: i64,
        /// Second factor
        y: i64,
    }

    fn echo() -> FnTool {
        FnTool::new(
            ToolSpec::new(
                "echo",
                "Echo the message back.",
                vec![FieldSpec::required("message", TypeExpr::scalar("string"))],
            ),
            |arguments| async move { Ok(arguments.get("message").cloned().unwrap_or(Value::Null)) },
        )
    }

    #[tokio::test]
    async fn calls_registered_closure_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).expect("register");

        let mut arguments = Map::new();
        arguments.insert("message".into(), json!("hi"));
        let output = registry.call("echo", arguments).await.expect("call");
        assert_eq!(output, json!("hi"));
    }

    #[tokio::test]
    async fn model_tool_deserializes_arguments() {
        let tool = ModelTool::new(|args: MultiplyArgs| async move { Ok(json!(args.x * args.y)) })
            .expect("model tool");
        assert_eq!(tool.name(), "multiply");

        let arguments = json!({"x": 6, "y": 7}).as_object().cloned().unwrap_or_default();
        assert_eq!(tool.invoke(arguments).await.expect("invoke"), json!(42));

        let err = tool.invoke(Map::new()).await.expect_err("missing fields");
        assert!(err.message.contains("multiply"));
        assert!(!err.fatal);
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(echo()).expect("first");
        assert_eq!(
            registry.register(echo()),
            Err(ValidationError::DuplicateTool("echo".into()))
        );
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", Map::new()).await.expect_err("missing");
        assert!(matches!(err, AgentError::ToolNotFound(name) if name == "missing"));
    }
}
