//! Canonical parameter schemas and the caching compiler that produces them.

pub mod compiler;
pub mod node;

pub use compiler::{CompiledTool, SchemaCompiler};
pub use node::{FieldNode, PrimitiveKind, SchemaNode};
