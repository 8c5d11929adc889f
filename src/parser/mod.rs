//! Tolerant extraction of actions from model text.

pub mod lenient;
pub mod span;

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::schema::{FieldNode, PrimitiveKind, SchemaNode};
use crate::union::{Action, ActionUnion, Reply, ToolInvocation, UnionMember};

use lenient::{is_json_integer, is_json_number, LenientError, Mode};
use span::Scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStage {
    Span,
    Incomplete,
    Normalize,
    Decode,
    Resolve,
    Validate,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::Span => "span",
            ParseStage::Incomplete => "incomplete",
            ParseStage::Normalize => "normalize",
            ParseStage::Decode => "decode",
            ParseStage::Resolve => "resolve",
            ParseStage::Validate => "validate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// JSON-pointer-like location, e.g. `/selected_tool/arguments/a`.
    pub path: String,
    pub problem: String,
}

/// Model output that could not be turned into actions. `raw` is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub raw: String,
    pub stage: ParseStage,
    pub offset: Option<usize>,
    pub message: String,
    pub issues: Vec<FieldIssue>,
}

impl ParseFailure {
    pub fn new(raw: &str, stage: ParseStage, message: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            stage,
            offset: None,
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn lenient(raw: &str, base: usize, err: &LenientError) -> Self {
        let stage = if err.is_incomplete() {
            ParseStage::Incomplete
        } else {
            ParseStage::Normalize
        };
        Self::new(raw, stage, err.to_string()).at(base + err.offset())
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse model output ({} stage", self.stage)?;
        if let Some(offset) = self.offset {
            write!(f, " at byte {offset}")?;
        }
        write!(f, "): {}", self.message)?;
        for issue in &self.issues {
            write!(f, "; {}: {}", issue.path, issue.problem)?;
        }
        write!(f, "\nraw output: {}", self.raw)
    }
}

impl std::error::Error for ParseFailure {}

/// Candidate spans tried before giving up on a reply.
const MAX_CANDIDATES: usize = 8;

pub struct ResponseParser;

impl ResponseParser {
    /// Extracts validated actions. In single-selection mode the result holds
    /// exactly one action.
    pub fn parse(text: &str, union: &ActionUnion) -> Result<Vec<Action>, ParseFailure> {
        Self::search(text, union, true)
    }

    /// Like [`ResponseParser::parse`], but gives up at the first unclosed
    /// opener. A prefix of a reply can then only complete on a span that the
    /// full reply would also reach first.
    pub(crate) fn parse_settled(text: &str, union: &ActionUnion) -> Result<Vec<Action>, ParseFailure> {
        Self::search(text, union, false)
    }

    fn search(
        text: &str,
        union: &ActionUnion,
        past_open: bool,
    ) -> Result<Vec<Action>, ParseFailure> {
        let Some(mut start) = span::next_opener(text, 0) else {
            return Err(ParseFailure::new(
                text,
                ParseStage::Span,
                "no JSON object or array found",
            ));
        };

        let mut best: Option<ParseFailure> = None;
        for _ in 0..MAX_CANDIDATES {
            let scan = span::scan_from(text, start);
            let (failure, resume) = match scan {
                Scan::Balanced { start, end } => match Self::parse_span(text, start, end, union) {
                    Ok(actions) => return Ok(actions),
                    Err(failure) => {
                        debug!(stage = %failure.stage, start, "candidate span rejected");
                        (failure, Some(end))
                    }
                },
                // A stray opener in prose swallows the rest; look inside it.
                Scan::Open { start } => (
                    ParseFailure::new(text, ParseStage::Incomplete, "unbalanced JSON").at(start),
                    past_open.then_some(start + 1),
                ),
                Scan::Mismatch { start, offset, found } => (
                    ParseFailure::new(text, ParseStage::Span, format!("mismatched `{found}`"))
                        .at(offset),
                    Some(start + 1),
                ),
            };

            if best.as_ref().map_or(true, |seen| failure.stage > seen.stage) {
                best = Some(failure);
            }
            match resume.and_then(|from| span::next_opener(text, from)) {
                Some(next) => start = next,
                None => break,
            }
        }

        Err(best.unwrap_or_else(|| ParseFailure::new(text, ParseStage::Span, "no JSON object or array found")))
    }

    fn parse_span(
        text: &str,
        start: usize,
        end: usize,
        union: &ActionUnion,
    ) -> Result<Vec<Action>, ParseFailure> {
        let json = lenient::normalize(&text[start..end], Mode::Strict)
            .map_err(|err| ParseFailure::lenient(text, start, &err))?;
        let value: Value = serde_json::from_str(&json)
            .map_err(|err| ParseFailure::new(text, ParseStage::Decode, err.to_string()).at(start))?;
        resolve(text, &value, union)
    }
}

/// Locates member objects under the envelope, with the pointer prefix of each.
fn envelope<'v>(value: &'v Value, union: &ActionUnion) -> Result<Vec<(String, &'v Value)>, String> {
    let descriptor = union.descriptor();
    let property = descriptor.property_name.as_str();

    let listed = |items: &'v [Value], prefix: &str| {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| (format!("{prefix}/{index}"), item))
            .collect::<Vec<_>>()
    };

    match value {
        Value::Array(items) => Ok(listed(items.as_slice(), "")),
        Value::Object(object) => {
            let wrapped = object.get(property).or_else(|| {
                // A lone key other than the tag is read as a misspelt envelope.
                match (object.len(), object.iter().next()) {
                    (1, Some((key, inner))) if key != &descriptor.tag_key && (inner.is_object() || inner.is_array()) => {
                        Some(inner)
                    }
                    _ => None,
                }
            });
            match wrapped {
                Some(Value::Array(items)) => Ok(listed(items.as_slice(), &format!("/{property}"))),
                Some(member) => Ok(vec![(format!("/{property}"), member)]),
                None if object.contains_key(&descriptor.tag_key) => Ok(vec![(String::new(), value)]),
                None => Err(format!("expected `{property}` holding an action")),
            }
        }
        _ => Err("expected a JSON object or array".to_string()),
    }
}

fn resolve(raw: &str, value: &Value, union: &ActionUnion) -> Result<Vec<Action>, ParseFailure> {
    let members = envelope(value, union).map_err(|message| ParseFailure::new(raw, ParseStage::Resolve, message))?;
    if members.is_empty() {
        return Err(ParseFailure::new(raw, ParseStage::Resolve, "no action selected"));
    }
    if !union.allow_multiple() && members.len() > 1 {
        return Err(ParseFailure::new(
            raw,
            ParseStage::Resolve,
            format!("expected exactly one action, got {}", members.len()),
        ));
    }

    let descriptor = union.descriptor();
    let mut actions = Vec::with_capacity(members.len());
    let mut issues = Vec::new();
    for (path, member_value) in members {
        let Some(object) = member_value.as_object() else {
            return Err(ParseFailure::new(raw, ParseStage::Resolve, format!("{path}: action must be an object")));
        };
        let tag = object.get(&descriptor.tag_key).and_then(Value::as_str).ok_or_else(|| {
            ParseFailure::new(raw, ParseStage::Resolve, format!("{path}: missing `{}` tag", descriptor.tag_key))
        })?;
        let member = union.resolve_tag(tag).ok_or_else(|| {
            ParseFailure::new(raw, ParseStage::Resolve, format!("{path}: unknown action `{tag}`"))
        })?;

        let arguments_path = format!("{path}/{}", descriptor.arguments_key);
        let arguments = match arguments(object, union) {
            Ok(arguments) => arguments,
            Err(problem) => {
                issues.push(FieldIssue {
                    path: arguments_path,
                    problem,
                });
                continue;
            }
        };
        let validated = coerce_fields(member.arguments.fields(), &arguments, &arguments_path, &mut issues);
        actions.push(action(member, validated));
    }

    if !issues.is_empty() {
        let mut failure = ParseFailure::new(
            raw,
            ParseStage::Validate,
            format!("{} invalid argument(s)", issues.len()),
        );
        failure.issues = issues;
        return Err(failure);
    }
    Ok(actions)
}

/// Arguments of a member: the `arguments` object, or the member's other keys.
fn arguments(object: &Map<String, Value>, union: &ActionUnion) -> Result<Map<String, Value>, String> {
    let descriptor = union.descriptor();
    match object.get(&descriptor.arguments_key) {
        Some(Value::Object(arguments)) => Ok(arguments.clone()),
        Some(Value::Null) | None => Ok(object
            .iter()
            .filter(|(key, _)| **key != descriptor.tag_key && **key != descriptor.arguments_key)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()),
        Some(other) => Err(format!("expected an object, got {}", kind_of(other))),
    }
}

fn action(member: &UnionMember, mut arguments: Map<String, Value>) -> Action {
    if member.terminal {
        let mut take = |key: &str| match arguments.remove(key) {
            Some(Value::String(text)) => text,
            _ => String::new(),
        };
        let role = take("role");
        let content = take("content");
        return Action::Reply(Reply {
            role: if role.is_empty() { "assistant".to_string() } else { role },
            content,
        });
    }
    Action::Tool(ToolInvocation {
        name: member.tag.clone(),
        arguments,
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Converts and default-fills `values` against `fields`, dropping unknown keys.
fn coerce_fields(
    fields: &[FieldNode],
    values: &Map<String, Value>,
    path: &str,
    issues: &mut Vec<FieldIssue>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for field in fields {
        let field_path = format!("{path}/{}", field.name);
        match (values.get(&field.name), &field.default) {
            (Some(Value::Null), Some(default)) | (None, Some(default)) => {
                out.insert(field.name.clone(), default.clone());
            }
            (Some(Value::Null), None) if !field.required => {}
            (Some(value), _) => {
                if let Some(converted) = coerce(&field.node, value, &field_path, issues) {
                    out.insert(field.name.clone(), converted);
                }
            }
            (None, None) if field.required => issues.push(FieldIssue {
                path: field_path,
                problem: "missing required field".to_string(),
            }),
            (None, None) => {}
        }
    }
    for key in values.keys().filter(|key| !fields.iter().any(|f| &f.name == *key)) {
        debug!(path, key = %key, "dropping unknown argument");
    }
    out
}

fn coerce(node: &SchemaNode, value: &Value, path: &str, issues: &mut Vec<FieldIssue>) -> Option<Value> {
    let converted = match node {
        SchemaNode::Primitive { primitive } => primitive_value(*primitive, value),
        SchemaNode::Literal { value: expected } => (value == expected).then(|| value.clone()),
        SchemaNode::Array { items } => {
            let elements = match value {
                Value::Array(elements) => elements.clone(),
                single => vec![single.clone()],
            };
            let mut out = Vec::with_capacity(elements.len());
            for (index, element) in elements.iter().enumerate() {
                out.push(coerce(items, element, &format!("{path}/{index}"), issues)?);
            }
            return Some(Value::Array(out));
        }
        SchemaNode::Map { values } => {
            let Value::Object(entries) = value else {
                issues.push(mismatch(path, node, value));
                return None;
            };
            let mut out = Map::new();
            for (key, entry) in entries {
                out.insert(key.clone(), coerce(values, entry, &format!("{path}/{key}"), issues)?);
            }
            return Some(Value::Object(out));
        }
        SchemaNode::Object { fields, .. } => {
            let Value::Object(entries) = value else {
                issues.push(mismatch(path, node, value));
                return None;
            };
            let before = issues.len();
            let out = coerce_fields(fields, entries, path, issues);
            return (issues.len() == before).then_some(Value::Object(out));
        }
        SchemaNode::Union { members } => members.iter().find_map(|member| {
            let mut scratch = Vec::new();
            coerce(member, value, path, &mut scratch).filter(|_| scratch.is_empty())
        }),
    };

    if converted.is_none() {
        issues.push(mismatch(path, node, value));
    }
    converted
}

fn mismatch(path: &str, node: &SchemaNode, value: &Value) -> FieldIssue {
    FieldIssue {
        path: path.to_string(),
        problem: format!("expected {}, got {}", node.hint(), value),
    }
}

fn primitive_value(kind: PrimitiveKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (PrimitiveKind::String, Value::String(_)) => Some(value.clone()),
        (PrimitiveKind::String, Value::Number(number)) => Some(Value::String(number.to_string())),
        (PrimitiveKind::String, Value::Bool(flag)) => Some(Value::String(flag.to_string())),

        (PrimitiveKind::Integer, Value::Number(number)) => integer(number),
        (PrimitiveKind::Integer, Value::String(text)) => {
            let text = text.trim();
            if !is_json_integer(text) {
                return None;
            }
            text.parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<u64>().map(Value::from))
                .ok()
        }

        (PrimitiveKind::Float, Value::Number(_)) => Some(value.clone()),
        (PrimitiveKind::Float, Value::String(text)) => {
            let text = text.trim();
            if !is_json_number(text) {
                return None;
            }
            text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
        }

        (PrimitiveKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (PrimitiveKind::Boolean, Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },

        (PrimitiveKind::Null, Value::Null) => Some(Value::Null),
        _ => None,
    }
}

/// Largest magnitude at which every integral f64 is exact.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn integer(number: &Number) -> Option<Value> {
    if number.is_i64() || number.is_u64() {
        return Some(Value::Number(number.clone()));
    }
    let float = number.as_f64()?;
    (float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER).then(|| Value::from(float as i64))
}

/// Best-effort view of the action a streaming buffer is building.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PartialAction {
    /// Position of the member inside the envelope array, 0 otherwise.
    pub index: usize,
    /// Tag of the resolved member, once the tag string is complete.
    pub name: Option<String>,
    pub arguments: Map<String, Value>,
    /// Reply text so far, for `reply_to_user`.
    pub content: Option<String>,
    /// Reply text added since the previous partial.
    pub reply_delta: Option<String>,
}

impl PartialAction {
    pub fn is_reply(&self) -> bool {
        self.content.is_some()
    }
}

/// Resolves the last member of a repaired buffer without validating it.
pub(crate) fn partial_action(value: &Value, union: &ActionUnion) -> Option<PartialAction> {
    let members = envelope(value, union).ok()?;
    let index = members.len().checked_sub(1)?;
    let (_, member_value) = members.into_iter().last()?;
    let object = member_value.as_object()?;

    let member = object
        .get(&union.descriptor().tag_key)
        .and_then(Value::as_str)
        .and_then(|tag| union.resolve_tag(tag));
    let arguments = arguments(object, union).unwrap_or_default();
    let content = member
        .filter(|member| member.terminal)
        .map(|_| arguments.get("content").and_then(Value::as_str).unwrap_or_default().to_string());

    Some(PartialAction {
        index,
        name: member.map(|member| member.tag.clone()),
        arguments,
        content,
        reply_delta: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaCompiler;
    use crate::tool::{FieldSpec, ToolSpec, TypeExpr};
    use crate::union::DEFAULT_PROPERTY_NAME;
    use serde_json::json;

    fn tools() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "add",
                "Add two integers.",
                vec![
                    FieldSpec::required("a", TypeExpr::scalar("i64")).with_description("First"),
                    FieldSpec::required("b", TypeExpr::scalar("i64")).with_description("Second"),
                ],
            ),
            ToolSpec::new(
                "search",
                "Search documents.",
                vec![
                    FieldSpec::required("query", TypeExpr::scalar("string")),
                    FieldSpec::required("tags", TypeExpr::array(TypeExpr::scalar("string"))),
                    FieldSpec::optional("limit", TypeExpr::scalar("u32")).with_default(json!(10)),
                    FieldSpec::optional("exact", TypeExpr::scalar("bool")),
                    FieldSpec::optional("boost", TypeExpr::scalar("f64")),
                ],
            ),
        ]
    }

    fn union(allow_multiple: bool) -> ActionUnion {
        ActionUnion::build(&SchemaCompiler::new(), &tools(), DEFAULT_PROPERTY_NAME, allow_multiple)
            .expect("union")
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn parses_strict_envelope() {
        let actions = ResponseParser::parse(
            r#"{"selected_tool":{"name":"add","arguments":{"a":47,"b":42}}}"#,
            &union(false),
        )
        .expect("parse");
        assert_eq!(actions, vec![Action::tool("add", args(json!({"a": 47, "b": 42})))]);
    }

    #[test]
    fn parses_missing_comma_form() {
        let text = "{selected_tool: {name: \"add\", arguments: {a: 1 b: 2}}}";
        let first = ResponseParser::parse(text, &union(false)).expect("parse");
        let second = ResponseParser::parse(text, &union(false)).expect("parse");
        assert_eq!(first, vec![Action::tool("add", args(json!({"a": 1, "b": 2})))]);
        assert_eq!(first, second);
    }

    #[test]
    fn accepts_bare_flat_and_tool_prefixed_members() {
        let union = union(false);
        let expected = vec![Action::tool("add", args(json!({"a": 1, "b": 2})))];
        for text in [
            r#"Calling now: {"name": "add", "arguments": {"a": 1, "b": 2}}"#,
            r#"{"selected_tool": {"name": "tool_add", "a": 1, "b": 2}}"#,
            r#"```json
[{"name": "add", "arguments": {"a": "1", "b": 2.0}}]
```"#,
        ] {
            assert_eq!(ResponseParser::parse(text, &union).expect(text), expected, "{text}");
        }
    }

    #[test]
    fn parses_reply_with_default_role() {
        let actions = ResponseParser::parse(
            "{selected_tool: {name: 'reply_to_user', arguments: {content: '42'}}}",
            &union(false),
        )
        .expect("parse");
        assert_eq!(actions, vec![Action::reply("42")]);
    }

    #[test]
    fn converts_arguments_and_fills_defaults() {
        let text = r#"{"selected_tool": {"name": "search", "arguments": {
            "query": 7, "tags": "rust", "exact": "TRUE", "boost": "1.5", "extra": 1
        }}}"#;
        let actions = ResponseParser::parse(text, &union(false)).expect("parse");
        assert_eq!(
            actions,
            vec![Action::tool(
                "search",
                args(json!({"query": "7", "tags": ["rust"], "limit": 10, "exact": true, "boost": 1.5}))
            )]
        );
    }

    #[test]
    fn null_optional_is_omitted() {
        let text = r#"{"selected_tool": {"name": "search", "arguments": {"query": "q", "tags": [], "exact": null}}}"#;
        let actions = ResponseParser::parse(text, &union(false)).expect("parse");
        assert_eq!(
            actions,
            vec![Action::tool("search", args(json!({"query": "q", "tags": [], "limit": 10})))]
        );
    }

    #[test]
    fn reports_every_field_issue() {
        let text = r#"{"selected_tool": {"name": "add", "arguments": {"a": "one"}}}"#;
        let failure = ResponseParser::parse(text, &union(false)).expect_err("invalid");
        assert_eq!(failure.stage, ParseStage::Validate);
        assert_eq!(failure.raw, text);
        assert_eq!(
            failure.issues,
            vec![
                FieldIssue {
                    path: "/selected_tool/arguments/a".into(),
                    problem: r#"expected int, got "one""#.into(),
                },
                FieldIssue {
                    path: "/selected_tool/arguments/b".into(),
                    problem: "missing required field".into(),
                },
            ]
        );
        assert!(failure.to_string().contains(text));
    }

    #[test]
    fn rejects_integral_violations() {
        let text = r#"{"selected_tool": {"name": "add", "arguments": {"a": 1.5, "b": "2.0"}}}"#;
        let failure = ResponseParser::parse(text, &union(false)).expect_err("invalid");
        assert_eq!(failure.issues.len(), 2);
    }

    #[test]
    fn single_mode_limits_arrays() {
        let one = r#"{"selected_tool": [{"name": "add", "arguments": {"a": 1, "b": 2}}]}"#;
        assert_eq!(ResponseParser::parse(one, &union(false)).expect("one").len(), 1);

        let two = r#"{"selected_tool": [
            {"name": "add", "arguments": {"a": 1, "b": 2}},
            {"name": "reply_to_user", "arguments": {"content": "done"}}
        ]}"#;
        let failure = ResponseParser::parse(two, &union(false)).expect_err("two");
        assert_eq!(failure.stage, ParseStage::Resolve);

        let actions = ResponseParser::parse(two, &union(true)).expect("multiple");
        assert_eq!(actions.len(), 2);
        assert!(actions[1].is_terminal());
    }

    #[test]
    fn reports_stage_of_failure() {
        let union = union(false);
        let cases = [
            ("no json at all", ParseStage::Span),
            ("{\"selected_tool\": [1, 2}", ParseStage::Span),
            ("{\"selected_tool\": {\"name\": \"add\"", ParseStage::Incomplete),
            ("{a: 1, b}", ParseStage::Normalize),
            ("{\"selected_tool\": {\"name\": \"divide\"}}", ParseStage::Resolve),
        ];
        for (text, stage) in cases {
            let failure = ResponseParser::parse(text, &union).expect_err(text);
            assert_eq!(failure.stage, stage, "{text}");
        }

        let failure = ResponseParser::parse("{a: 1, b}", &union).expect_err("colon");
        assert_eq!(failure.offset, Some(7));
    }

    #[test]
    fn skips_non_action_spans() {
        let text = r#"Using [the calculator]. {"selected_tool": {"name": "add", "arguments": {"a": 2, "b": 3}}}"#;
        let actions = ResponseParser::parse(text, &union(false)).expect("parse");
        assert_eq!(actions[0].name(), "add");
    }

    #[test]
    fn looks_inside_stray_unclosed_openers() {
        let union = union(false);
        let expected = vec![Action::tool("add", args(json!({"a": 2, "b": 3})))];
        for text in [
            r#"Using [Bob's calculator]: {"selected_tool": {"name": "add", "arguments": {"a": 2, "b": 3}}}"#,
            r#"Step [1 of 2: {"selected_tool": {"name": "add", "arguments": {"a": 2, "b": 3}}}"#,
        ] {
            assert_eq!(ResponseParser::parse(text, &union).expect(text), expected, "{text}");
            let settled = ResponseParser::parse_settled(text, &union).expect_err(text);
            assert_eq!(settled.stage, ParseStage::Incomplete);
        }
    }

    #[test]
    fn bare_word_reply_may_contain_numbers() {
        let actions = ResponseParser::parse(
            "{selected_tool: {name: reply_to_user, arguments: {content: The sum is 89}}}",
            &union(false),
        )
        .expect("parse");
        assert_eq!(actions, vec![Action::reply("The sum is 89")]);
    }

    #[test]
    fn rendered_actions_round_trip() {
        for allow_multiple in [false, true] {
            let union = union(allow_multiple);
            let actions = [
                Action::tool("add", args(json!({"a": 47, "b": -2}))),
                Action::tool(
                    "search",
                    args(json!({"query": "say \"hi\"\n// not a comment", "tags": ["a", "b"], "limit": 3, "boost": 0.25})),
                ),
                Action::reply("The answer is {42}, isn't it?"),
            ];
            for action in actions {
                let rendered = union.render_action(&action);
                let parsed = ResponseParser::parse(&rendered, &union).expect(&rendered);
                assert_eq!(parsed, vec![action]);
            }
        }
    }
}
