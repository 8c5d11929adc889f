//! Schema-constrained tool selection for text-completion language models.
//!
//! The crate provides:
//! - A schema compiler (`SchemaCompiler`) that turns tool definitions into cached schema trees.
//! - An action union (`ActionUnion`) rendered into the prompt as a compact typed schema.
//! - A tolerant response parser and a streaming cursor for partial replies.
//! - An `Agent` that loops between the model and tools until it replies to the user.

mod agent;
mod config;
mod credentials;
mod error;
mod llm;
mod memory;
mod message;
mod parser;
mod schema;
mod stream;
mod telemetry;
mod tool;
mod union;

pub use agent::{Agent, AgentBuilder, AgentState, PartialObserver};
pub use config::{AgentConfig, AppConfig, AuthConfig, LogFormat, LoggingConfig, ModelConfig};
pub use credentials::{CredentialProvider, IssuedToken, NoCredentials, StaticToken, TokenCache};
#[cfg(feature = "http")]
pub use credentials::ClientCredentialsProvider;
pub use error::{
    AgentError, ConfigError, CredentialError, Result, SchemaError, StreamIntegrityError,
    ToolError, TransportError, ValidationError,
};
pub use llm::{ChatRequest, Completion, LanguageModel, RoleMap, Scripted, StubModel};
#[cfg(feature = "http")]
pub use llm::OpenAiCompatibleClient;
pub use memory::Conversation;
pub use message::{Message, Role, ToolCall, ToolResult};
pub use parser::{FieldIssue, ParseFailure, ParseStage, PartialAction, ResponseParser};
pub use schema::{CompiledTool, FieldNode, PrimitiveKind, SchemaCompiler, SchemaNode};
pub use stream::{FeedResult, Fragment, StreamCursor};
pub use telemetry::init_tracing;
pub use tool::{
    DocumentedFn, FieldSpec, FnTool, ModelTool, SignatureParam, Tool, ToolKey, ToolRegistry,
    ToolSpec, TypeExpr,
};
pub use union::{
    Action, ActionUnion, ParseDescriptor, Reply, ToolInvocation, UnionMember,
    DEFAULT_PROPERTY_NAME, REPLY_TO_USER,
};
