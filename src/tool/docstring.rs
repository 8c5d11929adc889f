//! Adapter from a documented callable to a [`ToolSpec`].
//!
//! The docstring follows the Google layout: a summary paragraph, then an
//! `Args:` section listing `name: description` or `name (type): description`
//! entries. `Returns:`, `Raises:` and similar sections are skipped.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::error::SchemaError;
use crate::tool::spec::{fingerprint, FieldSpec, ToolKey, ToolSpec, TypeExpr};

const ARG_LINE: &str = r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:\s*(.*)$";

const ARGS_HEADERS: &[&str] = &["Args:", "Arguments:", "Parameters:"];
const OTHER_HEADERS: &[&str] = &[
    "Returns:",
    "Return:",
    "Raises:",
    "Yields:",
    "Examples:",
    "Example:",
    "Note:",
    "Notes:",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParam {
    pub name: String,
    /// Rust type name as written in the signature, e.g. `Vec<i64>`.
    pub type_name: String,
    pub default: Option<Value>,
}

/// A callable described by its signature and docstring.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentedFn {
    pub name: String,
    pub docstring: String,
    pub params: Vec<SignatureParam>,
}

impl DocumentedFn {
    pub fn new(name: impl Into<String>, docstring: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docstring: docstring.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(SignatureParam {
            name: name.into(),
            type_name: type_name.into(),
            default: None,
        });
        self
    }

    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        default: Value,
    ) -> Self {
        self.params.push(SignatureParam {
            name: name.into(),
            type_name: type_name.into(),
            default: Some(default),
        });
        self
    }
}

#[derive(Debug, Default, PartialEq)]
struct ParsedDoc {
    summary: String,
    args: Vec<DocArg>,
}

#[derive(Debug, PartialEq)]
struct DocArg {
    name: String,
    type_name: Option<String>,
    description: String,
}

#[derive(PartialEq)]
enum Section {
    Summary,
    Args,
    Skipped,
}

fn parse_docstring(tool: &str, docstring: &str) -> Result<ParsedDoc, SchemaError> {
    let pattern = Regex::new(ARG_LINE).map_err(|err| SchemaError::InvalidModel {
        tool: tool.to_string(),
        reason: err.to_string(),
    })?;

    let mut parsed = ParsedDoc::default();
    let mut summary = Vec::new();
    let mut section = Section::Summary;
    let mut entry_indent: Option<usize> = None;

    for line in docstring.lines() {
        let trimmed = line.trim();
        if ARGS_HEADERS.contains(&trimmed) {
            section = Section::Args;
            entry_indent = None;
            continue;
        }
        if OTHER_HEADERS.contains(&trimmed) {
            section = Section::Skipped;
            continue;
        }

        match section {
            Section::Summary => {
                if !trimmed.is_empty() {
                    summary.push(trimmed);
                } else if !summary.is_empty() {
                    // The summary is the first paragraph only.
                    section = Section::Skipped;
                }
            }
            Section::Skipped => {}
            Section::Args => {
                if trimmed.is_empty() {
                    continue;
                }
                let indent = line.len() - line.trim_start().len();
                let base = *entry_indent.get_or_insert(indent);

                if indent > base {
                    let Some(last) = parsed.args.last_mut() else {
                        return Err(SchemaError::MalformedDocstring {
                            tool: tool.to_string(),
                            line: trimmed.to_string(),
                        });
                    };
                    last.description.push(' ');
                    last.description.push_str(trimmed);
                    continue;
                }

                let captures =
                    pattern
                        .captures(trimmed)
                        .ok_or_else(|| SchemaError::MalformedDocstring {
                            tool: tool.to_string(),
                            line: trimmed.to_string(),
                        })?;
                parsed.args.push(DocArg {
                    name: captures[1].to_string(),
                    type_name: captures
                        .get(2)
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|t| !t.is_empty()),
                    description: captures[3].trim().to_string(),
                });
            }
        }
    }

    parsed.summary = summary.join(" ");
    Ok(parsed)
}

/// Parses a Rust type name into a type expression and an optionality flag.
fn parse_type_name(raw: &str) -> (TypeExpr, bool) {
    let name = raw.trim();
    if let Some(inner) = generic(name, "Option") {
        let (ty, _) = parse_type_name(inner);
        return (ty, true);
    }
    if let Some(inner) = generic(name, "Vec")
        .or_else(|| generic(name, "VecDeque"))
        .or_else(|| generic(name, "HashSet"))
        .or_else(|| generic(name, "BTreeSet"))
        .or_else(|| slice(name))
    {
        let (ty, _) = parse_type_name(inner);
        return (TypeExpr::array(ty), false);
    }
    if let Some(inner) = generic(name, "HashMap").or_else(|| generic(name, "BTreeMap")) {
        let values = inner.split_once(',').map(|(_, value)| value.trim());
        let ty = match values {
            Some(value) if !value.is_empty() => TypeExpr::map(parse_type_name(value).0),
            _ => TypeExpr::Map { values: None },
        };
        return (ty, false);
    }
    // Docstring annotations such as `int, optional`.
    if let Some((base, flag)) = name.split_once(',') {
        let (ty, _) = parse_type_name(base);
        return (ty, flag.trim() == "optional");
    }
    (TypeExpr::scalar(name), false)
}

fn generic<'a>(name: &'a str, wrapper: &str) -> Option<&'a str> {
    let inner = name
        .strip_prefix(wrapper)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')?;
    Some(inner.trim())
}

fn slice(name: &str) -> Option<&str> {
    let name = name.strip_prefix('&').unwrap_or(name).trim_start();
    let inner = name.strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.trim())
}

impl ToolSpec {
    pub fn from_documented_fn(callable: &DocumentedFn) -> Result<Self, SchemaError> {
        let tool = callable.name.trim();
        let doc = parse_docstring(tool, &callable.docstring)?;
        if doc.summary.is_empty() {
            return Err(SchemaError::MissingDescription {
                tool: tool.to_string(),
                field: None,
            });
        }

        let mut documented: HashMap<&str, &DocArg> = HashMap::new();
        for arg in &doc.args {
            if !callable.params.iter().any(|param| param.name == arg.name) {
                return Err(SchemaError::UnknownArgument {
                    tool: tool.to_string(),
                    argument: arg.name.clone(),
                });
            }
            documented.insert(arg.name.as_str(), arg);
        }

        let mut parameters = Vec::with_capacity(callable.params.len());
        for param in &callable.params {
            if parameters.iter().any(|seen: &FieldSpec| seen.name == param.name) {
                return Err(SchemaError::DuplicateParameter {
                    tool: tool.to_string(),
                    field: param.name.clone(),
                });
            }
            let arg = documented
                .get(param.name.as_str())
                .filter(|arg| !arg.description.is_empty())
                .ok_or_else(|| SchemaError::MissingDescription {
                    tool: tool.to_string(),
                    field: Some(param.name.clone()),
                })?;

            let type_name = match (param.type_name.trim(), &arg.type_name) {
                ("", Some(annotated)) => annotated.as_str(),
                (declared, _) => declared,
            };
            let (ty, optional) = parse_type_name(type_name);

            let mut field = FieldSpec {
                name: param.name.clone(),
                ty,
                required: !optional,
                default: None,
                description: Some(arg.description.clone()),
            };
            if let Some(default) = &param.default {
                field = field.with_default(default.clone());
            }
            parameters.push(field);
        }

        Ok(Self {
            key: ToolKey::Callable {
                name: tool.to_string(),
                fingerprint: fingerprint(tool, &callable.docstring, &parameters),
            },
            name: tool.to_string(),
            description: doc.summary,
            parameters,
        })
    }
}
