//! Chat-completion transport abstraction and a scripted test double.

#[cfg(feature = "http")]
pub mod openai;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::{Message, Role};

pub use crate::stream::Fragment;

#[cfg(feature = "http")]
pub use openai::OpenAiCompatibleClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

/// A finished reply, or a stream of fragments ending with [`Fragment::End`].
pub enum Completion {
    Text(String),
    Stream(BoxStream<'static, Result<Fragment, TransportError>>),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(&self, request: &ChatRequest) -> Result<Completion, TransportError>;
}

/// Maps conversation roles onto the roles a backend accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    pub allowed: Vec<Role>,
    pub default: Role,
}

impl Default for RoleMap {
    fn default() -> Self {
        Self {
            allowed: vec![Role::System, Role::User, Role::Assistant, Role::Tool],
            default: Role::User,
        }
    }
}

impl RoleMap {
    pub fn map(&self, role: Role) -> Role {
        if self.allowed.contains(&role) {
            role
        } else {
            self.default
        }
    }
}

/// One scripted reply of a [`StubModel`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Text(String),
    /// Streamed as deltas, then an end marker.
    Chunks(Vec<String>),
    /// Streamed as deltas, then never ends.
    Stalled(Vec<String>),
    /// Streamed exactly as given.
    Fragments(Vec<Fragment>),
    Fail(TransportError),
}

/// Deterministic model for tests: replays scripted replies in order and
/// records every request it receives.
pub struct StubModel {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Self::scripted(responses.into_iter().map(Scripted::Text).collect())
    }

    pub fn streaming(responses: Vec<Vec<String>>) -> Arc<Self> {
        Self::scripted(responses.into_iter().map(Scripted::Chunks).collect())
    }

    pub fn scripted(responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn deltas(chunks: Vec<String>) -> impl futures::Stream<Item = Result<Fragment, TransportError>> {
    stream::iter(chunks.into_iter().map(|chunk| Ok(Fragment::Delta(chunk))))
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(&self, request: &ChatRequest) -> Result<Completion, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| TransportError::Network("StubModel ran out of scripted responses".into()))?;

        match next {
            Scripted::Text(text) => Ok(Completion::Text(text)),
            Scripted::Chunks(chunks) => Ok(Completion::Stream(
                deltas(chunks)
                    .chain(stream::once(async { Ok(Fragment::End) }))
                    .boxed(),
            )),
            Scripted::Stalled(chunks) => Ok(Completion::Stream(
                deltas(chunks).chain(stream::pending()).boxed(),
            )),
            Scripted::Fragments(fragments) => Ok(Completion::Stream(
                stream::iter(fragments.into_iter().map(Ok)).boxed(),
            )),
            Scripted::Fail(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("hi")],
            stream: false,
            bearer_token: None,
        }
    }

    #[tokio::test]
    async fn replays_scripts_and_records_requests() {
        let model = StubModel::new(vec!["first".into()]);
        match model.complete_chat(&request()).await.expect("reply") {
            Completion::Text(text) => assert_eq!(text, "first"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(model.complete_chat(&request()).await.is_err());
        assert_eq!(model.calls(), 2);
        assert_eq!(model.requests()[0].messages[0].content, "hi");
    }

    #[tokio::test]
    async fn streams_end_with_marker() {
        let model = StubModel::streaming(vec![vec!["a".into(), "b".into()]]);
        let Completion::Stream(stream) = model.complete_chat(&request()).await.expect("reply") else {
            panic!("expected stream");
        };
        let fragments: Vec<_> = stream.collect().await;
        assert_eq!(
            fragments,
            vec![
                Ok(Fragment::Delta("a".into())),
                Ok(Fragment::Delta("b".into())),
                Ok(Fragment::End)
            ]
        );
    }

    #[test]
    fn unsupported_roles_fall_back_to_default() {
        assert_eq!(RoleMap::default().map(Role::Tool), Role::Tool);

        let roles = RoleMap {
            allowed: vec![Role::System, Role::User, Role::Assistant],
            default: Role::User,
        };
        assert_eq!(roles.map(Role::Tool), Role::User);
        assert_eq!(roles.map(Role::Assistant), Role::Assistant);
    }
}
