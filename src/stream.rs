//! Incremental parsing of a streamed model reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::StreamIntegrityError;
use crate::parser::lenient::{self, Mode};
use crate::parser::span::{self, Scan};
use crate::parser::{partial_action, ParseFailure, ParseStage, PartialAction, ResponseParser};
use crate::union::{Action, ActionUnion};

/// Regions of the buffer considered for a partial action.
const MAX_REGIONS: usize = 8;

/// One unit of streamed model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Fragment {
    /// Text appended to what was received so far.
    Delta(String),
    /// The full text so far; must extend the previous buffer.
    Snapshot(String),
    /// Explicit end of stream.
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedResult {
    Incomplete,
    Partial(PartialAction),
    Complete(Vec<Action>),
}

/// Accumulates fragments for a single model call.
#[derive(Debug, Default)]
pub struct StreamCursor {
    buffer: String,
    completed: Option<Vec<Action>>,
    last_partial: Option<PartialAction>,
    /// Member index and reply content of the last surfaced partial.
    surfaced: Option<(usize, String)>,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_complete(&self) -> bool {
        self.completed.is_some()
    }

    pub fn last_partial(&self) -> Option<&PartialAction> {
        self.last_partial.as_ref()
    }

    pub fn feed(
        &mut self,
        fragment: Fragment,
        union: &ActionUnion,
    ) -> Result<FeedResult, StreamIntegrityError> {
        match fragment {
            Fragment::Delta(text) => self.buffer.push_str(&text),
            Fragment::Snapshot(text) => {
                self.check_snapshot(&text)?;
                self.buffer = text;
            }
            Fragment::End => {}
        }

        if let Some(actions) = &self.completed {
            return Ok(FeedResult::Complete(actions.clone()));
        }

        if let Ok(actions) = ResponseParser::parse_settled(&self.buffer, union) {
            trace!(bytes = self.buffer.len(), "stream completed an action");
            self.completed = Some(actions.clone());
            return Ok(FeedResult::Complete(actions));
        }

        let Some(mut partial) = self.partial(union) else {
            return Ok(FeedResult::Incomplete);
        };

        if let Some(content) = &partial.content {
            partial.reply_delta = self.surface(partial.index, content)?;
        }

        self.last_partial = Some(partial.clone());
        Ok(FeedResult::Partial(partial))
    }

    /// Ends the stream: the completed actions, or a full parse of the buffer.
    pub fn finish(&mut self, union: &ActionUnion) -> Result<Vec<Action>, ParseFailure> {
        if let Some(actions) = self.completed.take() {
            return Ok(actions);
        }
        if self.buffer.trim().is_empty() {
            return Err(ParseFailure::new(&self.buffer, ParseStage::Incomplete, "empty response"));
        }
        ResponseParser::parse(&self.buffer, union)
    }

    /// New reply text since the last surfaced partial of the same member.
    /// Repair drops a bare word that may still grow, so repaired content can
    /// fall back to a prefix of what was surfaced; that yields no delta.
    fn surface(
        &mut self,
        index: usize,
        content: &str,
    ) -> Result<Option<String>, StreamIntegrityError> {
        let previous = match &self.surfaced {
            Some((seen, previous)) if *seen == index => previous.as_str(),
            _ => "",
        };
        if previous.starts_with(content) {
            return Ok(None);
        }
        if !content.starts_with(previous) {
            return Err(StreamIntegrityError::ContentDiscontinuity {
                previous: previous.to_string(),
                current: content.to_string(),
            });
        }
        let delta = content[previous.len()..].to_string();
        self.surfaced = Some((index, content.to_string()));
        Ok(Some(delta))
    }

    fn check_snapshot(&self, snapshot: &str) -> Result<(), StreamIntegrityError> {
        if snapshot.len() < self.buffer.len() {
            return Err(StreamIntegrityError::Shrink {
                previous: self.buffer.len(),
                current: snapshot.len(),
            });
        }
        if let Some(offset) = self
            .buffer
            .bytes()
            .zip(snapshot.bytes())
            .position(|(old, new)| old != new)
        {
            return Err(StreamIntegrityError::Diverged { offset });
        }
        Ok(())
    }

    /// Repairs the outermost span still being written, or else the latest
    /// balanced one, whichever first reads as an action.
    fn partial(&self, union: &ActionUnion) -> Option<PartialAction> {
        let mut open = Vec::new();
        let mut balanced = Vec::new();
        let mut next = span::next_opener(&self.buffer, 0);
        while let Some(start) = next {
            if open.len() + balanced.len() >= MAX_REGIONS {
                break;
            }
            next = match span::scan_from(&self.buffer, start) {
                Scan::Balanced { start: from, end } => {
                    balanced.push((from, end));
                    span::next_opener(&self.buffer, end)
                }
                Scan::Open { start: from } => {
                    open.push((from, self.buffer.len()));
                    span::next_opener(&self.buffer, from + 1)
                }
                Scan::Mismatch { .. } => span::next_opener(&self.buffer, start + 1),
            };
        }

        open.into_iter()
            .chain(balanced.into_iter().rev())
            .find_map(|(start, end)| {
                let json = lenient::normalize(&self.buffer[start..end], Mode::Repair).ok()?;
                let value: Value = serde_json::from_str(&json).ok()?;
                partial_action(&value, union)
            })
    }
}
