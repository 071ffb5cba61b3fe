//! Resource block schemas
//!
//! Each resource type has a statically declared shape: the attributes and
//! nested blocks its body may carry. A [Registry] holds the shape tables and
//! is built once, then injected into the decoder; applications may extend a
//! type's shape before the registry is frozen (the `require` block on `mod`
//! is added this way).

use crate::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use crate::resource::BlockType;
use crate::sources::Source;
use hcl_edit::structure::Body;
use hcl_edit::Span as _;
use indexmap::IndexMap;

/// Expected shape of one block type's body
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub attributes: Vec<&'static str>,
    pub required: Vec<&'static str>,
    pub blocks: Vec<&'static str>,
}

impl Schema {
    fn new(attributes: &[&'static str], required: &[&'static str], blocks: &[&'static str]) -> Self {
        Self {
            attributes: attributes.to_vec(),
            required: required.to_vec(),
            blocks: blocks.to_vec(),
        }
    }

    pub fn allows_attribute(&self, name: &str) -> bool {
        self.attributes.contains(&name)
    }

    pub fn allows_block(&self, name: &str) -> bool {
        self.blocks.contains(&name)
    }
}

/// Identity shape shared by every resource body
const CORE_ATTRIBUTES: &[&str] = &["title", "description", "tags"];

/// Legacy attributes that only warn instead of erroring, per block type
const DEPRECATED_ATTRIBUTES: &[(&str, BlockType)] = &[
    ("search_path", BlockType::Query),
    ("search_path_prefix", BlockType::Query),
];

/// Schema tables for all decodable block types plus nested block shapes
#[derive(Debug, Clone)]
pub struct Registry {
    schemas: IndexMap<BlockType, Schema>,
    nested: IndexMap<&'static str, Schema>,
}

impl Registry {
    /// The standard table set shared by the CLI family
    pub fn standard() -> Self {
        let mut registry = Self {
            schemas: IndexMap::new(),
            nested: IndexMap::new(),
        };

        registry.declare(
            BlockType::Mod,
            &["documentation", "categories", "color", "database"],
            &[],
            &[],
        );
        registry.declare(
            BlockType::Variable,
            &["default", "type", "sensitive", "enum", "format"],
            &[],
            &[],
        );
        registry.declare(
            BlockType::Query,
            &["documentation", "sql", "database"],
            &["sql"],
            &[],
        );
        registry.declare(
            BlockType::Benchmark,
            &["documentation", "children", "base", "type", "display", "width"],
            &[],
            &[],
        );
        // connection bodies merge the shared core with the union of the
        // backend field shapes (each backend embeds the same core)
        registry.declare(
            BlockType::Connection,
            &[
                "connection_string",
                "host",
                "port",
                "database",
                "username",
                "password",
                "filename",
                "search_path",
                "search_path_prefix",
            ],
            &[],
            &[],
        );
        registry.declare(
            BlockType::Pipeline,
            &["documentation", "max_concurrency"],
            &[],
            &["param", "step"],
        );

        registry.declare_nested("param", Schema::new(&["description", "default", "type"], &[], &[]));
        registry.declare_nested(
            "step",
            Schema::new(
                &["title", "description", "depends_on", "sql", "query", "value", "args"],
                &[],
                &[],
            ),
        );
        registry.declare_nested("require", Schema::new(&[], &[], &["mod"]));
        registry.declare_nested("require_mod", Schema::new(&["version", "args"], &["version"], &[]));

        // application-supplied addition: a require block is only valid on mod
        registry.add_block(BlockType::Mod, "require");

        registry
    }

    /// Declare a block type's shape; the shared core attributes are merged in
    fn declare(
        &mut self,
        block_type: BlockType,
        attributes: &[&'static str],
        required: &[&'static str],
        blocks: &[&'static str],
    ) {
        let mut schema = Schema::new(CORE_ATTRIBUTES, required, blocks);
        schema.attributes.extend_from_slice(attributes);
        self.schemas.insert(block_type, schema);
    }

    fn declare_nested(&mut self, name: &'static str, schema: Schema) {
        self.nested.insert(name, schema);
    }

    /// Extend an already declared type with an extra nested block
    pub fn add_block(&mut self, block_type: BlockType, name: &'static str) {
        if let Some(schema) = self.schemas.get_mut(&block_type) {
            schema.blocks.push(name);
        }
    }

    pub fn schema_for(&self, block_type: BlockType) -> Option<&Schema> {
        self.schemas.get(&block_type)
    }

    pub fn nested_schema(&self, name: &str) -> Option<&Schema> {
        self.nested.get(name)
    }

    pub fn is_deprecated(&self, attribute: &str, block_type: BlockType) -> bool {
        DEPRECATED_ATTRIBUTES
            .iter()
            .any(|(name, bt)| *name == attribute && *bt == block_type)
    }

    /// Validate all attributes and nested blocks of a body against a schema
    ///
    /// Evaluation uses partial decoding that silently ignores unknown names,
    /// so unsupported attributes and blocks must be diagnosed here. An
    /// unknown name is an error, except the deprecation allow-list which
    /// downgrades to a warning. A violation never blocks the body's sibling
    /// attributes from decoding.
    pub fn validate(
        &self,
        block_type: BlockType,
        body: &Body,
        schema: &Schema,
        source: &Source,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();

        for block in body.blocks() {
            if !schema.allows_block(block.ident.value().as_str()) {
                diags.push(
                    Diagnostic::error(format!(
                        "Unsupported block type: blocks of type '{}' are not expected here",
                        block.ident.value()
                    ))
                    .with_range(SourceRange::new(source.clone(), block.span())),
                );
            }
        }

        for attribute in body.attributes() {
            let name = attribute.key.value().as_str();
            if schema.allows_attribute(name) {
                continue;
            }
            let range = SourceRange::new(source.clone(), attribute.span());
            if self.is_deprecated(name, block_type) {
                diags.push(
                    Diagnostic::warning(format!(
                        "Deprecated attribute: '{name}' is deprecated for '{block_type}' blocks and will be ignored"
                    ))
                    .with_range(range),
                );
            } else {
                diags.push(
                    Diagnostic::error(format!("Unsupported attribute: '{name}' not expected here"))
                        .with_range(range),
                );
            }
        }

        for required in &schema.required {
            if !body.attributes().any(|a| a.key.value().as_str() == *required) {
                diags.push(Diagnostic::error(format!(
                    "Missing required attribute: '{required}' must be set on '{block_type}' blocks"
                )));
            }
        }

        diags
    }
}
