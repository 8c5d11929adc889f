//! The tagged union of every selectable action, rendered for the prompt.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::schema::{FieldNode, PrimitiveKind, SchemaCompiler, SchemaNode};
use crate::tool::ToolSpec;

pub const REPLY_TO_USER: &str = "reply_to_user";
pub const ACTION_TAG: &str = "name";
pub const ARGUMENTS_KEY: &str = "arguments";
pub const DEFAULT_PROPERTY_NAME: &str = "selected_tool";

const REPLY_DESCRIPTION: &str = "Use this when you want to send a natural language response shown to the user. Write naturally, kindly, concisely when possible.";
const SCHEMA_PREAMBLE: &str = "Answer in JSON using this schema:";

/// A validated action extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tool(ToolInvocation),
    Reply(Reply),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Terminal action: text shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub role: String,
    pub content: String,
}

impl Reply {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl Action {
    pub fn tool(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Action::Tool(ToolInvocation {
            name: name.into(),
            arguments,
        })
    }

    pub fn reply(content: impl Into<String>) -> Self {
        Action::Reply(Reply::assistant(content))
    }

    /// Tag the model writes for this action.
    pub fn name(&self) -> &str {
        match self {
            Action::Tool(invocation) => &invocation.name,
            Action::Reply(_) => REPLY_TO_USER,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Reply(_))
    }
}

/// One alternative of the union.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionMember {
    /// Value of the `name` tag as rendered in the prompt.
    pub tag: String,
    /// Collision-checked identity: `tool_<lowercase name>` or `reply_to_user`.
    pub literal: String,
    pub description: String,
    pub arguments: Arc<SchemaNode>,
    pub terminal: bool,
}

/// What the parser needs to map decoded JSON back onto members.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseDescriptor {
    pub property_name: String,
    pub tag_key: String,
    pub arguments_key: String,
    pub allow_multiple: bool,
    tags: HashMap<String, usize>,
    literals: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionUnion {
    members: Vec<UnionMember>,
    descriptor: ParseDescriptor,
    rendered: String,
}

pub fn normalize_literal(name: &str) -> String {
    format!("tool_{}", name.trim().to_ascii_lowercase())
}

impl ActionUnion {
    pub fn build(
        compiler: &SchemaCompiler,
        tools: &[ToolSpec],
        property_name: &str,
        allow_multiple: bool,
    ) -> Result<Self> {
        if tools.is_empty() {
            return Err(ValidationError::NoTools.into());
        }
        let property_name = property_name.trim();
        if property_name.is_empty() {
            return Err(ValidationError::EmptyPropertyName.into());
        }

        let mut members = Vec::with_capacity(tools.len() + 1);
        let mut owners: HashMap<String, String> = HashMap::new();
        for spec in tools {
            let literal = normalize_literal(&spec.name);
            if spec.name.trim().eq_ignore_ascii_case(REPLY_TO_USER)
                || literal == normalize_literal(REPLY_TO_USER)
            {
                return Err(ValidationError::ReservedName(spec.name.clone()).into());
            }
            if let Some(first) = owners.get(&literal) {
                return Err(ValidationError::DuplicateAction {
                    first: first.clone(),
                    second: spec.name.clone(),
                    literal,
                }
                .into());
            }
            owners.insert(literal.clone(), spec.name.clone());

            let compiled = compiler.compile(spec)?;
            members.push(UnionMember {
                tag: compiled.name.clone(),
                literal,
                description: compiled.description.clone(),
                arguments: Arc::clone(&compiled.arguments),
                terminal: false,
            });
        }
        members.push(reply_member());

        let mut tags = HashMap::new();
        let mut literals = HashMap::new();
        for (index, member) in members.iter().enumerate() {
            tags.insert(member.tag.clone(), index);
            literals.insert(member.literal.clone(), index);
        }

        let descriptor = ParseDescriptor {
            property_name: property_name.to_string(),
            tag_key: ACTION_TAG.to_string(),
            arguments_key: ARGUMENTS_KEY.to_string(),
            allow_multiple,
            tags,
            literals,
        };
        let rendered = render_schema(&members, &descriptor);
        debug!(
            members = members.len(),
            property = property_name,
            allow_multiple,
            "built action union"
        );

        Ok(Self {
            members,
            descriptor,
            rendered,
        })
    }

    /// Prompt fragment describing the expected answer.
    pub fn render(&self) -> &str {
        &self.rendered
    }

    pub fn descriptor(&self) -> &ParseDescriptor {
        &self.descriptor
    }

    pub fn members(&self) -> &[UnionMember] {
        &self.members
    }

    pub fn allow_multiple(&self) -> bool {
        self.descriptor.allow_multiple
    }

    pub fn literals(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.literal.as_str()).collect()
    }

    /// Resolves a tag written by the model: the tool name, its
    /// `tool_<name>` form, or the terminal literal.
    pub fn resolve_tag(&self, tag: &str) -> Option<&UnionMember> {
        let tag = tag.trim();
        let index = self
            .descriptor
            .tags
            .get(tag)
            .or_else(|| self.descriptor.literals.get(&tag.to_ascii_lowercase()))
            .or_else(|| self.descriptor.literals.get(&normalize_literal(tag)))?;
        self.members.get(*index)
    }

    /// Renders concrete actions in the shape of the schema.
    pub fn render_actions(&self, actions: &[Action]) -> String {
        let property = &self.descriptor.property_name;
        let mut out = String::from("{\n");
        if self.descriptor.allow_multiple {
            let _ = writeln!(out, "  {property}: [");
            for action in actions {
                out.push_str("    ");
                self.render_concrete(action, 4, &mut out);
                out.push_str(",\n");
            }
            out.push_str("  ],\n");
        } else if let Some(action) = actions.first() {
            let _ = write!(out, "  {property}: ");
            self.render_concrete(action, 2, &mut out);
            out.push_str(",\n");
        }
        out.push('}');
        out
    }

    pub fn render_action(&self, action: &Action) -> String {
        self.render_actions(std::slice::from_ref(action))
    }

    fn render_concrete(&self, action: &Action, indent: usize, out: &mut String) {
        let pad = " ".repeat(indent + 2);
        let member = self.resolve_tag(action.name());
        out.push_str("{\n");
        if let Some(member) = member {
            comment(&member.description, &pad, out);
        }
        let tag = member.map(|m| m.tag.as_str()).unwrap_or(action.name());
        let _ = writeln!(out, "{pad}{ACTION_TAG}: {},", Value::from(tag));
        let _ = writeln!(out, "{pad}{ARGUMENTS_KEY}: {{");

        let arguments = match action {
            Action::Tool(invocation) => invocation.arguments.clone(),
            Action::Reply(reply) => {
                let mut arguments = Map::new();
                arguments.insert("role".into(), Value::from(reply.role.as_str()));
                arguments.insert("content".into(), Value::from(reply.content.as_str()));
                arguments
            }
        };
        let order: Vec<&str> = member
            .map(|m| m.arguments.fields().iter().map(|f| f.name.as_str()).collect())
            .unwrap_or_default();
        let mut keys: Vec<&String> = arguments.keys().collect();
        keys.sort_by_key(|key| order.iter().position(|name| *name == key.as_str()).unwrap_or(usize::MAX));
        for key in keys {
            let _ = writeln!(out, "{pad}  {key}: {},", arguments[key.as_str()]);
        }

        let _ = writeln!(out, "{pad}}},");
        out.push_str(&" ".repeat(indent));
        out.push('}');
    }
}

fn reply_member() -> UnionMember {
    let assistant = Value::from("assistant");
    UnionMember {
        tag: REPLY_TO_USER.to_string(),
        literal: REPLY_TO_USER.to_string(),
        description: REPLY_DESCRIPTION.to_string(),
        arguments: Arc::new(SchemaNode::Object {
            name: Some(REPLY_TO_USER.to_string()),
            description: None,
            fields: vec![
                FieldNode {
                    name: "role".into(),
                    node: Arc::new(SchemaNode::literal(assistant.clone())),
                    description: None,
                    required: false,
                    default: Some(assistant),
                },
                FieldNode {
                    name: "content".into(),
                    node: Arc::new(SchemaNode::primitive(PrimitiveKind::String)),
                    description: None,
                    required: true,
                    default: None,
                },
            ],
        }),
        terminal: true,
    }
}

fn comment(text: &str, pad: &str, out: &mut String) {
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let _ = writeln!(out, "{pad}// {line}");
    }
}

fn render_schema(members: &[UnionMember], descriptor: &ParseDescriptor) -> String {
    let property = &descriptor.property_name;
    let mut out = format!("{SCHEMA_PREAMBLE}\n{{\n");
    if descriptor.allow_multiple {
        let _ = write!(out, "  {property}: [\n    ");
        render_members(members, 4, &mut out);
        out.push_str("\n  ],\n");
    } else {
        let _ = write!(out, "  {property}: ");
        render_members(members, 2, &mut out);
        out.push_str(",\n");
    }
    out.push('}');
    out
}

fn render_members(members: &[UnionMember], indent: usize, out: &mut String) {
    let pad = " ".repeat(indent + 2);
    for (index, member) in members.iter().enumerate() {
        if index > 0 {
            out.push_str(" or ");
        }
        out.push_str("{\n");
        comment(&member.description, &pad, out);
        let _ = writeln!(out, "{pad}{ACTION_TAG}: {},", Value::from(member.tag.as_str()));
        let _ = writeln!(
            out,
            "{pad}{ARGUMENTS_KEY}: {},",
            render_type(&member.arguments, indent + 2)
        );
        out.push_str(&" ".repeat(indent));
        out.push('}');
    }
}

/// Type spelling with objects laid out one field per line.
fn render_type(node: &SchemaNode, indent: usize) -> String {
    match node {
        SchemaNode::Object { fields, .. } => {
            let pad = " ".repeat(indent + 2);
            let mut out = String::from("{\n");
            for field in fields {
                let mut description = field.description.clone().unwrap_or_default();
                if let (Some(default), false) = (&field.default, description.is_empty()) {
                    let _ = write!(description, "\nDefault: {default}");
                }
                comment(&description, &pad, &mut out);
                let mut hint = render_type(&field.node, indent + 2);
                if field.accepts_null() {
                    hint.push_str(" or null");
                }
                let _ = writeln!(out, "{pad}{}: {hint},", field.name);
            }
            out.push_str(&" ".repeat(indent));
            out.push('}');
            out
        }
        SchemaNode::Array { items } => match items.as_ref() {
            SchemaNode::Union { .. } => format!("({})[]", render_type(items, indent)),
            other => format!("{}[]", render_type(other, indent)),
        },
        SchemaNode::Map { values } => format!("map<string, {}>", render_type(values, indent)),
        SchemaNode::Union { members } => members
            .iter()
            .map(|member| render_type(member, indent))
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.hint(),
    }
}
