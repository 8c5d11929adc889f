use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::credentials::{self, CredentialProvider, NoCredentials};
use crate::error::{AgentError, Result};
use crate::llm::{ChatRequest, Completion, LanguageModel};
use crate::memory::Conversation;
use crate::message::{Message, ToolCall, ToolResult};
use crate::parser::{ParseFailure, PartialAction};
use crate::schema::SchemaCompiler;
use crate::stream::{FeedResult, Fragment, StreamCursor};
use crate::tool::{Tool, ToolRegistry};
use crate::union::{Action, ActionUnion, ToolInvocation, DEFAULT_PROPERTY_NAME};

/// Where a session currently is in the model/tool loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentState {
    Idle,
    AwaitingModel,
    Parsing,
    DispatchingTool,
    Terminated,
    Failed,
}

/// Receives best-effort partial actions while a reply streams in.
pub trait PartialObserver: Send + Sync {
    fn on_partial(&self, partial: &PartialAction) -> std::result::Result<(), String>;
}

impl<F> PartialObserver for F
where
    F: Fn(&PartialAction) -> std::result::Result<(), String> + Send + Sync,
{
    fn on_partial(&self, partial: &PartialAction) -> std::result::Result<(), String> {
        self(partial)
    }
}

pub struct AgentBuilder<M: LanguageModel> {
    model: Arc<M>,
    compiler: Arc<SchemaCompiler>,
    tools: ToolRegistry,
    property_name: String,
    allow_multiple: bool,
    system_prompt: String,
    stream: bool,
    max_steps: usize,
    max_parse_retries: usize,
    credentials: Arc<dyn CredentialProvider>,
    observer: Option<Arc<dyn PartialObserver>>,
    cancel: Option<CancellationToken>,
    fatal_tool_errors: HashSet<String>,
    history: Conversation,
}

impl<M: LanguageModel> AgentBuilder<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            model,
            compiler: Arc::new(SchemaCompiler::new()),
            tools: ToolRegistry::new(),
            property_name: DEFAULT_PROPERTY_NAME.to_string(),
            allow_multiple: false,
            system_prompt: "You are a helpful agent.".to_string(),
            stream: false,
            max_steps: 6,
            max_parse_retries: 1,
            credentials: Arc::new(NoCredentials),
            observer: None,
            cancel: None,
            fatal_tool_errors: HashSet::new(),
            history: Conversation::default(),
        }
    }

    /// Applies the `[agent]` section, the stream flag and any OAuth settings.
    pub fn from_config(model: Arc<M>, cfg: &AppConfig) -> Result<Self> {
        let credentials = credentials::from_config(cfg.auth.as_ref())?;
        Ok(Self::new(model)
            .with_property_name(cfg.agent.property_name.clone())
            .allow_multiple(cfg.agent.allow_multiple)
            .with_system_prompt(cfg.agent.system_prompt.clone())
            .with_stream(cfg.model.stream)
            .with_max_steps(cfg.agent.max_steps)
            .with_max_parse_retries(cfg.agent.max_parse_retries)
            .with_credentials(credentials))
    }

    pub fn with_compiler(mut self, compiler: Arc<SchemaCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    pub fn with_property_name(mut self, property_name: impl Into<String>) -> Self {
        self.property_name = property_name.into();
        self
    }

    pub fn allow_multiple(mut self, allow_multiple: bool) -> Self {
        self.allow_multiple = allow_multiple;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_max_parse_retries(mut self, retries: usize) -> Self {
        self.max_parse_retries = retries;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PartialObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Failures of these tools end the session instead of being reported.
    pub fn fatal_tool_errors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fatal_tool_errors.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_history(mut self, history: Conversation) -> Self {
        self.history = history;
        self
    }

    /// Compiles the action union; schema and validation errors surface here.
    pub fn build(self) -> Result<Agent<M>> {
        let union = ActionUnion::build(
            &self.compiler,
            &self.tools.specs(),
            &self.property_name,
            self.allow_multiple,
        )?;
        Ok(Agent {
            model: self.model,
            compiler: self.compiler,
            tools: self.tools,
            union: Arc::new(union),
            system_prompt: self.system_prompt,
            stream: self.stream,
            max_steps: self.max_steps,
            max_parse_retries: self.max_parse_retries,
            credentials: self.credentials,
            observer: self.observer,
            cancel: self.cancel,
            fatal_tool_errors: self.fatal_tool_errors,
            conversation: self.history,
            state: AgentState::Idle,
        })
    }
}

/// One session: alternates between the model and the bound tools until
/// the model replies to the user.
pub struct Agent<M: LanguageModel> {
    model: Arc<M>,
    compiler: Arc<SchemaCompiler>,
    tools: ToolRegistry,
    union: Arc<ActionUnion>,
    system_prompt: String,
    stream: bool,
    max_steps: usize,
    max_parse_retries: usize,
    credentials: Arc<dyn CredentialProvider>,
    observer: Option<Arc<dyn PartialObserver>>,
    cancel: Option<CancellationToken>,
    fatal_tool_errors: HashSet<String>,
    conversation: Conversation,
    state: AgentState,
}

async fn cancellable<F: Future>(cancel: Option<&CancellationToken>, fut: F) -> Result<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

fn corrective_note(failure: &ParseFailure) -> String {
    format!(
        "Your previous reply could not be parsed ({}: {}). Answer again with a single JSON value that follows the schema above.",
        failure.stage, failure.message
    )
}

impl<M: LanguageModel> Agent<M> {
    pub fn builder(model: Arc<M>) -> AgentBuilder<M> {
        AgentBuilder::new(model)
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn union(&self) -> &Arc<ActionUnion> {
        &self.union
    }

    pub fn compiler(&self) -> &Arc<SchemaCompiler> {
        &self.compiler
    }

    /// System turn sent first on every model call.
    pub fn system_message(&self) -> Message {
        Message::system(format!("{}\n\n{}", self.system_prompt, self.union.render()))
    }

    /// Runs one user exchange and returns the reply shown to the user.
    #[instrument(skip_all, fields(tools = self.tools.len(), stream = self.stream))]
    pub async fn respond(&mut self, user_input: impl Into<String>) -> Result<String> {
        self.conversation.push(Message::user(user_input));
        match self.run().await {
            Ok(reply) => {
                self.transition(AgentState::Terminated);
                Ok(reply)
            }
            Err(err) => {
                self.transition(AgentState::Failed);
                error!(%err, "session failed");
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: AgentState) {
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    async fn run(&mut self) -> Result<String> {
        for step in 0..self.max_steps {
            self.transition(AgentState::AwaitingModel);
            let actions = self.next_actions().await?;
            debug!(step, actions = actions.len(), "model selected actions");

            let total = actions.len();
            for (index, action) in actions.into_iter().enumerate() {
                match action {
                    Action::Tool(invocation) => {
                        self.transition(AgentState::DispatchingTool);
                        self.dispatch(invocation).await?;
                    }
                    Action::Reply(reply) => {
                        if index + 1 < total {
                            warn!(ignored = total - index - 1, "ignoring actions after the reply");
                        }
                        self.conversation.push(Message::assistant(reply.content.clone()));
                        return Ok(reply.content);
                    }
                }
            }
        }
        Err(AgentError::StepLimit(self.max_steps))
    }

    /// One model step, with bounded corrective retries on parse failure.
    /// Retry turns are sent for this step only and never enter the history.
    async fn next_actions(&mut self) -> Result<Vec<Action>> {
        let mut transient: Vec<Message> = Vec::new();
        let mut attempt = 0;
        loop {
            match self.call_model(&transient).await {
                Err(AgentError::Parse(failure)) if attempt < self.max_parse_retries => {
                    attempt += 1;
                    warn!(attempt, stage = %failure.stage, "model reply did not parse, retrying");
                    transient.push(Message::assistant(failure.raw.clone()));
                    transient.push(Message::system(corrective_note(&failure)));
                    self.transition(AgentState::AwaitingModel);
                }
                outcome => return outcome,
            }
        }
    }

    async fn call_model(&mut self, transient: &[Message]) -> Result<Vec<Action>> {
        let mut messages = Vec::with_capacity(self.conversation.len() + transient.len() + 1);
        messages.push(self.system_message());
        messages.extend(self.conversation.iter().cloned());
        messages.extend_from_slice(transient);

        let request = ChatRequest {
            messages,
            stream: self.stream,
            bearer_token: self.credentials.bearer_token().await?,
        };
        let completion = cancellable(self.cancel.as_ref(), self.model.complete_chat(&request)).await??;
        self.transition(AgentState::Parsing);

        let mut cursor = StreamCursor::new();
        match completion {
            Completion::Text(text) => {
                let result = cursor.feed(Fragment::Delta(text), &self.union)?;
                self.observe(&result);
            }
            Completion::Stream(mut fragments) => loop {
                match cancellable(self.cancel.as_ref(), fragments.next()).await? {
                    Some(Ok(Fragment::End)) => break,
                    Some(Ok(fragment)) => {
                        let result = cursor.feed(fragment, &self.union)?;
                        self.observe(&result);
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        debug!("stream closed without an end marker");
                        break;
                    }
                }
            },
        }
        Ok(cursor.finish(&self.union)?)
    }

    fn observe(&self, result: &FeedResult) {
        let (Some(observer), FeedResult::Partial(partial)) = (&self.observer, result) else {
            return;
        };
        if let Err(err) = observer.on_partial(partial) {
            warn!(%err, "partial observer failed, continuing");
        }
    }

    async fn dispatch(&mut self, invocation: ToolInvocation) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let rendered = self.union.render_action(&Action::Tool(invocation.clone()));
        let ToolInvocation { name, arguments } = invocation;
        self.conversation.push(Message::assistant_action(
            rendered,
            ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            },
        ));

        info!(tool = %name, "dispatching tool");
        let outcome = cancellable(self.cancel.as_ref(), self.tools.call(&name, arguments)).await?;
        let (content, output, is_error) = match outcome {
            Ok(value) => (format!("Tool `{name}` result: {value}"), value, false),
            Err(AgentError::ToolInvocation { source, .. })
                if !source.fatal && !self.fatal_tool_errors.contains(&name) =>
            {
                warn!(tool = %name, error = %source, "tool failed, reporting to the model");
                (
                    format!("Tool `{name}` failed: {source}"),
                    Value::String(source.message),
                    true,
                )
            }
            Err(err) => return Err(err),
        };

        self.conversation.push(Message::tool(
            content,
            ToolResult {
                tool_call_id: id,
                name,
                output,
                is_error,
            },
        ));
        Ok(())
    }
}
