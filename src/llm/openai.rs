use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{ChatRequest, Completion, Fragment, LanguageModel, RoleMap};
use crate::config::ModelConfig;
use crate::error::TransportError;
use crate::message::{Message, Role};

const PROVIDER: &str = "openai";
const SSE_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

fn coalesce_error(status: reqwest::StatusCode, body: String) -> TransportError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return TransportError::RateLimited {
            provider: PROVIDER.into(),
            body,
        };
    }
    TransportError::Http {
        provider: PROVIDER.into(),
        status: status.as_u16(),
        body,
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Client for any endpoint speaking the `/chat/completions` protocol.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    roles: RoleMap,
}

impl OpenAiCompatibleClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|err| TransportError::Network(format!("http client error: {err}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            roles: RoleMap {
                allowed: cfg.allowed_roles.clone(),
                default: cfg.default_role,
            },
        })
    }

    fn to_wire_messages<'a>(&self, messages: &'a [Message]) -> Vec<WireMessage<'a>> {
        messages
            .iter()
            .map(|message| {
                let role = self.roles.map(message.role);
                WireMessage {
                    role: role.as_str(),
                    content: &message.content,
                    tool_call_id: message
                        .tool_result
                        .as_ref()
                        .filter(|_| role == Role::Tool)
                        .map(|result| result.tool_call_id.as_str()),
                }
            })
            .collect()
    }

    fn payload<'a>(&self, request: &'a ChatRequest) -> ChatPayload<'a> {
        ChatPayload {
            model: self.model.clone(),
            messages: self.to_wire_messages(&request.messages),
            stream: request.stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    async fn complete_chat(&self, request: &ChatRequest) -> Result<Completion, TransportError> {
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.payload(request));
        if let Some(token) = request.bearer_token.as_ref().or(self.api_key.as_ref()) {
            builder = builder.bearer_auth(token);
        }

        debug!(model = %self.model, stream = request.stream, "sending chat completion");
        let resp = builder.send().await.map_err(request_error)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, body));
        }

        if !request.stream {
            let body: ChatResponse = resp
                .json()
                .await
                .map_err(|err| TransportError::Decode(format!("response parse error: {err}")))?;
            let first = body
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::Decode("response contained no choices".into()))?;
            return Ok(Completion::Text(first.message.content.unwrap_or_default()));
        }

        let (tx, rx) = mpsc::channel(64);
        let mut body = resp.bytes_stream();
        tokio::spawn(async move {
            // Bytes, so a code point split across chunks survives.
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(request_error(err))).await;
                        return;
                    }
                };
                pending.extend_from_slice(&chunk);

                while let Some(newline) = pending.iter().position(|byte| *byte == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let Some(data) = line.trim().strip_prefix(SSE_PREFIX) else {
                        continue;
                    };
                    let data = data.trim();
                    if data == DONE_MARKER {
                        let _ = tx.send(Ok(Fragment::End)).await;
                        return;
                    }
                    if data.is_empty() {
                        continue;
                    }
                    let parsed: StreamChunk = match serde_json::from_str(data) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            warn!(%err, "skipping unparsable stream event");
                            continue;
                        }
                    };
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            if tx.send(Ok(Fragment::Delta(content))).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            let _ = tx.send(Err(TransportError::Truncated)).await;
        });

        Ok(Completion::Stream(ReceiverStream::new(rx).boxed()))
    }
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: String,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
