use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SchemaError;

/// Origin-neutral type expression carried by a [`ToolSpec`] parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeExpr {
    Scalar {
        name: String,
    },
    Array {
        items: Box<TypeExpr>,
    },
    /// String-keyed map; untyped values resolve to strings.
    Map {
        values: Option<Box<TypeExpr>>,
    },
    Object {
        name: Option<String>,
        description: Option<String>,
        fields: Vec<FieldSpec>,
    },
    Enum {
        values: Vec<Value>,
    },
    Literal {
        value: Value,
    },
    Union {
        members: Vec<TypeExpr>,
    },
}

impl TypeExpr {
    pub fn scalar(name: impl Into<String>) -> Self {
        TypeExpr::Scalar { name: name.into() }
    }

    pub fn array(items: TypeExpr) -> Self {
        TypeExpr::Array {
            items: Box::new(items),
        }
    }

    pub fn map(values: TypeExpr) -> Self {
        TypeExpr::Map {
            values: Some(Box::new(values)),
        }
    }

    /// Canonical key used by the compiler's type cache.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeExpr,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// A defaulted field is never required.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }
}

/// Identity of a tool definition in the compiler cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolKey {
    Model { type_id: TypeId, name: String },
    Callable { name: String, fingerprint: u64 },
}

/// Immutable, normalized description of one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<FieldSpec>,
    pub key: ToolKey,
}

impl ToolSpec {
    /// Declares a tool directly. The cache key fingerprints the whole definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<FieldSpec>,
    ) -> Self {
        let name = name.into().trim().to_string();
        let description = description.into();
        let key = ToolKey::Callable {
            fingerprint: fingerprint(&name, &description, &parameters),
            name: name.clone(),
        };
        Self {
            name,
            description,
            parameters,
            key,
        }
    }

    /// Builds a spec from a typed parameter model; the schema title names the tool.
    pub fn from_model<T: JsonSchema + 'static>() -> Result<Self, SchemaError> {
        Self::model_spec::<T>(None)
    }

    pub fn from_model_named<T: JsonSchema + 'static>(
        name: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        Self::model_spec::<T>(Some(name.into()))
    }

    fn model_spec<T: JsonSchema + 'static>(name: Option<String>) -> Result<Self, SchemaError> {
        let root = serde_json::to_value(schemars::schema_for!(T)).map_err(|err| {
            SchemaError::InvalidModel {
                tool: T::schema_name(),
                reason: err.to_string(),
            }
        })?;

        let name = name
            .or_else(|| text(&root, "title"))
            .unwrap_or_else(T::schema_name)
            .trim()
            .to_string();
        let description = text(&root, "description").unwrap_or_default();
        let definitions = root
            .get("definitions")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let walker = ModelWalker {
            tool: &name,
            definitions: &definitions,
        };
        if root.get("properties").is_none() && root.get("type") != Some(&Value::from("object")) {
            return Err(SchemaError::InvalidModel {
                tool: name.clone(),
                reason: "parameter model must be an object".into(),
            });
        }
        let parameters = walker.fields(&root, &mut Vec::new())?;

        Ok(Self {
            key: ToolKey::Model {
                type_id: TypeId::of::<T>(),
                name: name.clone(),
            },
            name,
            description,
            parameters,
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&FieldSpec> {
        self.parameters.iter().find(|param| param.name == name)
    }
}

pub(crate) fn fingerprint(name: &str, description: &str, parameters: &[FieldSpec]) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    description.hash(&mut hasher);
    serde_json::to_string(parameters)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

fn text(schema: &Value, key: &str) -> Option<String> {
    schema
        .get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Walks the JSON form of a schemars root schema into [`TypeExpr`]s.
struct ModelWalker<'a> {
    tool: &'a str,
    definitions: &'a Map<String, Value>,
}

impl ModelWalker<'_> {
    fn fields(&self, object: &Value, stack: &mut Vec<String>) -> Result<Vec<FieldSpec>, SchemaError> {
        let required: Vec<&str> = object
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(properties) = object.get("properties").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut fields = Vec::with_capacity(properties.len());
        for (name, schema) in properties {
            let ty = self.expr(name, schema, stack)?;
            let default = schema.get("default").cloned();
            fields.push(FieldSpec {
                name: name.clone(),
                ty,
                required: required.contains(&name.as_str()) && default.is_none(),
                default,
                description: text(schema, "description"),
            });
        }
        Ok(fields)
    }

    fn expr(&self, field: &str, schema: &Value, stack: &mut Vec<String>) -> Result<TypeExpr, SchemaError> {
        let unsupported = |type_name: String| SchemaError::UnsupportedType {
            tool: self.tool.to_string(),
            field: field.to_string(),
            type_name,
        };

        let Some(object) = schema.as_object() else {
            return Err(unsupported("any".into()));
        };

        if let Some(reference) = object.get("$ref").and_then(Value::as_str) {
            return self.reference(field, reference, stack);
        }

        if let Some(value) = object.get("const") {
            return Ok(TypeExpr::Literal {
                value: value.clone(),
            });
        }

        if let Some(values) = object.get("enum").and_then(Value::as_array) {
            return Ok(TypeExpr::Enum {
                values: values.clone(),
            });
        }

        for combinator in ["allOf", "anyOf", "oneOf"] {
            let Some(members) = object.get(combinator).and_then(Value::as_array) else {
                continue;
            };
            let mut resolved = Vec::with_capacity(members.len());
            for member in members {
                if member.get("type") == Some(&Value::from("null")) {
                    continue;
                }
                resolved.push(self.expr(field, member, stack)?);
            }
            return match resolved.len() {
                0 => Ok(TypeExpr::scalar("null")),
                1 => Ok(resolved.remove(0)),
                _ if combinator == "allOf" => Err(unsupported("allOf".into())),
                _ => Ok(TypeExpr::Union { members: resolved }),
            };
        }

        match object.get("type") {
            Some(Value::String(kind)) => self.typed(field, kind, object, stack),
            Some(Value::Array(kinds)) => {
                let mut members = Vec::new();
                for kind in kinds.iter().filter_map(Value::as_str) {
                    if kind != "null" {
                        members.push(self.typed(field, kind, object, stack)?);
                    }
                }
                match members.len() {
                    0 => Ok(TypeExpr::scalar("null")),
                    1 => Ok(members.remove(0)),
                    _ => Ok(TypeExpr::Union { members }),
                }
            }
            _ => Err(unsupported("any".into())),
        }
    }

    fn typed(
        &self,
        field: &str,
        kind: &str,
        object: &Map<String, Value>,
        stack: &mut Vec<String>,
    ) -> Result<TypeExpr, SchemaError> {
        match kind {
            "array" => {
                let items = object.get("items").ok_or_else(|| SchemaError::UnsupportedType {
                    tool: self.tool.to_string(),
                    field: field.to_string(),
                    type_name: "array without items".into(),
                })?;
                Ok(TypeExpr::array(self.expr(field, items, stack)?))
            }
            "object" if object.contains_key("properties") => {
                let schema = Value::Object(object.clone());
                Ok(TypeExpr::Object {
                    name: text(&schema, "title"),
                    description: text(&schema, "description"),
                    fields: self.fields(&schema, stack)?,
                })
            }
            "object" => match object.get("additionalProperties") {
                Some(values @ Value::Object(_)) => Ok(TypeExpr::map(self.expr(field, values, stack)?)),
                _ => Ok(TypeExpr::Map { values: None }),
            },
            scalar => Ok(TypeExpr::scalar(scalar)),
        }
    }

    fn reference(&self, field: &str, reference: &str, stack: &mut Vec<String>) -> Result<TypeExpr, SchemaError> {
        let unresolved = || SchemaError::UnresolvedReference {
            tool: self.tool.to_string(),
            reference: reference.to_string(),
        };
        let name = reference
            .strip_prefix("#/definitions/")
            .ok_or_else(unresolved)?;
        let target = self.definitions.get(name).ok_or_else(unresolved)?;

        if stack.iter().any(|seen| seen == name) {
            return Err(SchemaError::RecursiveType {
                tool: self.tool.to_string(),
                reference: name.to_string(),
            });
        }

        stack.push(name.to_string());
        let resolved = self.expr(field, target, stack);
        stack.pop();

        match resolved? {
            TypeExpr::Object {
                name: None,
                description,
                fields,
            } => Ok(TypeExpr::Object {
                name: Some(name.to_string()),
                description,
                fields,
            }),
            other => Ok(other),
        }
    }
}
