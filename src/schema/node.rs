use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Leaf kinds a parameter can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
    Null,
}

impl PrimitiveKind {
    /// Spelling used in the rendered prompt schema.
    pub fn hint(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "int",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Boolean => "bool",
            PrimitiveKind::Null => "null",
        }
    }

    /// Resolves a scalar type name from a parameter model or a signature.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim() {
            "string" | "str" | "String" | "&str" | "char" => PrimitiveKind::String,
            "integer" | "int" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16"
            | "u32" | "u64" | "u128" | "usize" => PrimitiveKind::Integer,
            "number" | "float" | "f32" | "f64" => PrimitiveKind::Float,
            "boolean" | "bool" => PrimitiveKind::Boolean,
            "null" | "()" => PrimitiveKind::Null,
            _ => return None,
        };
        Some(kind)
    }
}

/// Canonical, origin-neutral representation of a parameter type.
///
/// Children are reference counted so that nodes resolved once by the
/// compiler's type cache are shared by every tool that uses them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaNode {
    Primitive {
        primitive: PrimitiveKind,
    },
    Object {
        name: Option<String>,
        description: Option<String>,
        fields: Vec<FieldNode>,
    },
    Array {
        items: Arc<SchemaNode>,
    },
    Map {
        values: Arc<SchemaNode>,
    },
    Union {
        members: Vec<Arc<SchemaNode>>,
    },
    Literal {
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldNode {
    pub name: String,
    pub node: Arc<SchemaNode>,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldNode {
    /// Optional fields without a default may be omitted or sent as null.
    pub fn accepts_null(&self) -> bool {
        !self.required && self.default.is_none()
    }
}

impl SchemaNode {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        SchemaNode::Primitive { primitive: kind }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        SchemaNode::Literal {
            value: value.into(),
        }
    }

    pub fn fields(&self) -> &[FieldNode] {
        match self {
            SchemaNode::Object { fields, .. } => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldNode> {
        self.fields().iter().find(|field| field.name == name)
    }

    /// Inline type spelling, e.g. `int[]` or `"a" or "b"`.
    ///
    /// Objects render their fields inline on one line; the union renderer
    /// lays out top-level argument objects across lines instead.
    pub fn hint(&self) -> String {
        match self {
            SchemaNode::Primitive { primitive } => primitive.hint().to_string(),
            SchemaNode::Literal { value } => value.to_string(),
            SchemaNode::Array { items } => match items.as_ref() {
                SchemaNode::Union { .. } => format!("({})[]", items.hint()),
                _ => format!("{}[]", items.hint()),
            },
            SchemaNode::Map { values } => format!("map<string, {}>", values.hint()),
            SchemaNode::Union { members } => members
                .iter()
                .map(|member| member.hint())
                .collect::<Vec<_>>()
                .join(" or "),
            SchemaNode::Object { fields, .. } => {
                let inner = fields
                    .iter()
                    .map(|field| format!("{}: {}", field.name, field_hint(field)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {inner} }}")
            }
        }
    }
}

/// Spelling of a field's type, with `or null` for omittable fields.
pub fn field_hint(field: &FieldNode) -> String {
    let hint = field.node.hint();
    let already_null = matches!(
        field.node.as_ref(),
        SchemaNode::Primitive {
            primitive: PrimitiveKind::Null
        }
    );
    if field.accepts_null() && !already_null {
        format!("{hint} or null")
    } else {
        hint
    }
}

impl fmt::Display for SchemaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint())
    }
}
