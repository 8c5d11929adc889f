use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::SchemaError;
use crate::schema::node::{FieldNode, PrimitiveKind, SchemaNode};
use crate::tool::spec::{FieldSpec, ToolKey, ToolSpec, TypeExpr};

/// A tool whose parameters were resolved to schema nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTool {
    pub name: String,
    pub description: String,
    /// Always an [`SchemaNode::Object`] holding the parameters.
    pub arguments: Arc<SchemaNode>,
}

impl CompiledTool {
    pub fn fields(&self) -> &[FieldNode] {
        self.arguments.fields()
    }
}

/// Turns [`ToolSpec`]s into schema nodes, memoizing tools and field types.
///
/// Both caches are populate-once: a racing insert keeps the first value,
/// and every writer derives an equal one. Guards are never held while
/// recursing.
#[derive(Debug, Default)]
pub struct SchemaCompiler {
    tools: DashMap<ToolKey, Arc<CompiledTool>>,
    types: DashMap<String, Arc<SchemaNode>>,
    derivations: AtomicUsize,
}

impl SchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, spec: &ToolSpec) -> Result<Arc<CompiledTool>, SchemaError> {
        if let Some(hit) = self.tools.get(&spec.key) {
            return Ok(Arc::clone(hit.value()));
        }

        let name = spec.name.trim();
        if name.is_empty() || spec.description.trim().is_empty() {
            return Err(SchemaError::MissingDescription {
                tool: spec.name.clone(),
                field: None,
            });
        }

        let fields = self.fields(name, &spec.parameters)?;
        let compiled = Arc::new(CompiledTool {
            name: name.to_string(),
            description: spec.description.trim().to_string(),
            arguments: Arc::new(SchemaNode::Object {
                name: Some(name.to_string()),
                description: None,
                fields,
            }),
        });
        self.derivations.fetch_add(1, Ordering::Relaxed);
        debug!(tool = name, "compiled tool schema");

        let entry = self.tools.entry(spec.key.clone()).or_insert(compiled);
        Ok(Arc::clone(entry.value()))
    }

    /// Number of tool compilations that missed the cache.
    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }

    pub fn cached_tools(&self) -> usize {
        self.tools.len()
    }

    pub fn cached_types(&self) -> usize {
        self.types.len()
    }

    fn fields(&self, tool: &str, specs: &[FieldSpec]) -> Result<Vec<FieldNode>, SchemaError> {
        let mut fields: Vec<FieldNode> = Vec::with_capacity(specs.len());
        for spec in specs {
            if fields.iter().any(|field| field.name == spec.name) {
                return Err(SchemaError::DuplicateParameter {
                    tool: tool.to_string(),
                    field: spec.name.clone(),
                });
            }
            fields.push(FieldNode {
                name: spec.name.clone(),
                node: self.resolve(tool, &spec.name, &spec.ty)?,
                description: spec
                    .description
                    .as_ref()
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty()),
                required: spec.required && spec.default.is_none(),
                default: spec.default.clone(),
            });
        }
        Ok(fields)
    }

    fn resolve(&self, tool: &str, field: &str, ty: &TypeExpr) -> Result<Arc<SchemaNode>, SchemaError> {
        let key = ty.canonical();
        if let Some(hit) = self.types.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        let node = match ty {
            TypeExpr::Scalar { name } => {
                let kind = PrimitiveKind::from_name(name).ok_or_else(|| SchemaError::UnsupportedType {
                    tool: tool.to_string(),
                    field: field.to_string(),
                    type_name: name.clone(),
                })?;
                SchemaNode::primitive(kind)
            }
            TypeExpr::Array { items } => SchemaNode::Array {
                items: self.resolve(tool, field, items)?,
            },
            TypeExpr::Map { values } => SchemaNode::Map {
                values: match values {
                    Some(values) => self.resolve(tool, field, values)?,
                    None => self.resolve(tool, field, &TypeExpr::scalar("string"))?,
                },
            },
            TypeExpr::Object {
                name,
                description,
                fields,
            } => SchemaNode::Object {
                name: name.clone(),
                description: description.clone(),
                fields: self.fields(tool, fields)?,
            },
            TypeExpr::Enum { values } => SchemaNode::Union {
                members: values
                    .iter()
                    .map(|value| Arc::new(SchemaNode::literal(value.clone())))
                    .collect(),
            },
            TypeExpr::Literal { value } => SchemaNode::literal(value.clone()),
            TypeExpr::Union { members } => {
                let mut flat = Vec::with_capacity(members.len());
                for member in members {
                    let resolved = self.resolve(tool, field, member)?;
                    match resolved.as_ref() {
                        SchemaNode::Union { members } => flat.extend(members.iter().cloned()),
                        _ => flat.push(resolved),
                    }
                }
                SchemaNode::Union { members: flat }
            }
        };

        let entry = self.types.entry(key).or_insert_with(|| Arc::new(node));
        Ok(Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::docstring::DocumentedFn;
    use serde_json::json;

    fn add_spec() -> ToolSpec {
        ToolSpec::new(
            "add",
            "Add two integers.",
            vec![
                FieldSpec::required("a", TypeExpr::scalar("i64")).with_description("First"),
                FieldSpec::required("b", TypeExpr::scalar("i64"))
                    .with_description("Second")
                    .with_default(json!(5)),
            ],
        )
    }

    #[test]
    fn compiling_twice_hits_the_cache() {
        let compiler = SchemaCompiler::new();
        let first = compiler.compile(&add_spec()).expect("compile");
        let second = compiler.compile(&add_spec()).expect("compile");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.derivations(), 1);
        assert_eq!(compiler.cached_tools(), 1);
    }

    #[test]
    fn shares_field_types_between_tools() {
        let compiler = SchemaCompiler::new();
        let add = compiler.compile(&add_spec()).expect("add");
        let multiply = compiler
            .compile(&ToolSpec::new(
                "multiply",
                "Multiply two integers.",
                vec![FieldSpec::required("x", TypeExpr::scalar("i64"))],
            ))
            .expect("multiply");

        assert!(Arc::ptr_eq(&add.fields()[0].node, &multiply.fields()[0].node));
        assert_eq!(compiler.derivations(), 2);
    }

    #[test]
    fn maps_parameter_shapes() {
        let compiler = SchemaCompiler::new();
        let spec = ToolSpec::new(
            "shape",
            "Shapes.",
            vec![
                FieldSpec::required("tags", TypeExpr::array(TypeExpr::scalar("String"))),
                FieldSpec::required("scores", TypeExpr::Map { values: None }),
                FieldSpec::optional("unit", TypeExpr::Enum {
                    values: vec![json!("c"), json!("f")],
                }),
            ],
        );
        let compiled = compiler.compile(&spec).expect("compile");
        let hints: Vec<String> = compiled.fields().iter().map(|f| f.node.hint()).collect();
        assert_eq!(hints, vec!["string[]", "map<string, string>", r#""c" or "f""#]);
        assert!(!compiled.fields()[2].required);
    }

    #[test]
    fn rejects_unknown_scalars_and_blank_descriptions() {
        let compiler = SchemaCompiler::new();
        let unknown = ToolSpec::new(
            "wait",
            "Wait.",
            vec![FieldSpec::required("for", TypeExpr::scalar("Duration"))],
        );
        assert_eq!(
            compiler.compile(&unknown),
            Err(SchemaError::UnsupportedType {
                tool: "wait".into(),
                field: "for".into(),
                type_name: "Duration".into(),
            })
        );

        let blank = ToolSpec::new("wait", "  ", Vec::new());
        assert!(matches!(
            compiler.compile(&blank),
            Err(SchemaError::MissingDescription { field: None, .. })
        ));
        assert_eq!(compiler.derivations(), 0);
    }

    #[test]
    fn rejects_duplicate_parameters() {
        let compiler = SchemaCompiler::new();
        let spec = ToolSpec::new(
            "dup",
            "Duplicate.",
            vec![
                FieldSpec::required("a", TypeExpr::scalar("int")),
                FieldSpec::required("a", TypeExpr::scalar("int")),
            ],
        );
        assert!(matches!(
            compiler.compile(&spec),
            Err(SchemaError::DuplicateParameter { ref field, .. }) if field == "a"
        ));
    }

    #[test]
    fn compiles_documented_callables() {
        let compiler = SchemaCompiler::new();
        let callable = DocumentedFn::new("scale", "Scale values.\n\nArgs:\n    values: Inputs\n")
            .param("values", "Vec<f64>");
        let spec = ToolSpec::from_documented_fn(&callable).expect("spec");
        let compiled = compiler.compile(&spec).expect("compile");
        assert_eq!(compiled.fields()[0].node.hint(), "float[]");
    }

    #[test]
    fn concurrent_compiles_converge() {
        let compiler = Arc::new(SchemaCompiler::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let compiler = Arc::clone(&compiler);
                std::thread::spawn(move || compiler.compile(&add_spec()))
            })
            .collect();
        let compiled: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join").expect("compile"))
            .collect();
        assert!(compiled.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
