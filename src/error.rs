use thiserror::Error;

pub use crate::parser::ParseFailure;

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// A tool definition could not be turned into a schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("tool `{tool}`: field `{field}` has type `{type_name}` with no schema mapping")]
    UnsupportedType {
        tool: String,
        field: String,
        type_name: String,
    },

    #[error("tool `{tool}`: missing description for {}", subject(.field))]
    MissingDescription { tool: String, field: Option<String> },

    #[error("tool `{tool}`: malformed docstring line `{line}`")]
    MalformedDocstring { tool: String, line: String },

    #[error("tool `{tool}`: docstring documents `{argument}` which is not in the signature")]
    UnknownArgument { tool: String, argument: String },

    #[error("tool `{tool}`: parameter `{field}` is declared more than once")]
    DuplicateParameter { tool: String, field: String },

    #[error("tool `{tool}`: type `{reference}` refers to itself")]
    RecursiveType { tool: String, reference: String },

    #[error("tool `{tool}`: unresolved schema reference `{reference}`")]
    UnresolvedReference { tool: String, reference: String },

    #[error("tool `{tool}`: invalid parameter model: {reason}")]
    InvalidModel { tool: String, reason: String },
}

fn subject(field: &Option<String>) -> String {
    match field {
        Some(field) => format!("argument `{field}`"),
        None => "the tool itself".to_string(),
    }
}

/// The action union could not be assembled from the given tools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("At least one tool must be provided")]
    NoTools,

    #[error("property_name must be provided and non-empty")]
    EmptyPropertyName,

    #[error("tools `{first}` and `{second}` resolve to the same action `{literal}`")]
    DuplicateAction {
        first: String,
        second: String,
        literal: String,
    },

    #[error("tool `{0}` collides with the reserved `reply_to_user` action")]
    ReservedName(String),

    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
}

/// The transport violated the growth contract of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamIntegrityError {
    #[error("stream buffer shrank from {previous} to {current} bytes")]
    Shrink { previous: usize, current: usize },

    #[error("stream snapshot diverged from accumulated text at byte {offset}")]
    Diverged { offset: usize },

    #[error("reply content discontinuity: previous `{previous}`, current `{current}`")]
    ContentDiscontinuity { previous: String, current: String },
}

/// Failure raised by a bound tool implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    /// A fatal error ends the session instead of being reported to the model.
    pub fatal: bool,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{provider} request failed with {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} rate limit exceeded: {body}")]
    RateLimited { provider: String, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("stream ended without an end marker")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("token endpoint request failed: {0}")]
    Request(String),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token response missing `access_token`")]
    MissingToken,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error(transparent)]
    StreamIntegrity(#[from] StreamIntegrityError),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: ToolError,
    },

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("language model error: {0}")]
    Transport(#[from] TransportError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("agent reached the step limit of {0} without returning a response")]
    StepLimit(usize),

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
