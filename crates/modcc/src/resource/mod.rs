//! The decoded resource model
//!
//! Every resource variant holds a shared [ResourceCore] (identity, source
//! range, common attributes) by composition. Dispatch over the capability set
//! (identify, validate, resolve, serialize, compare) goes through [Resource].

mod benchmark;
mod connection;
mod local;
mod pipeline;
mod query;
mod variable;

pub use benchmark::Benchmark;
pub use connection::{Connection, ConnectionBackend, FileBackend, ServerBackend};
pub use local::Local;
pub use pipeline::{Pipeline, PipelineParam, PipelineStep};
pub use query::Query;
pub use variable::Variable;

use crate::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use crate::reference::{ParsedName, SymbolRef};
use hcl::Value;
use indexmap::IndexMap;

/// Block types decodable from mod source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Mod,
    Variable,
    Locals,
    Query,
    Benchmark,
    Connection,
    Pipeline,
}

impl BlockType {
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "mod" => Some(Self::Mod),
            "variable" => Some(Self::Variable),
            "locals" => Some(Self::Locals),
            "query" => Some(Self::Query),
            "benchmark" => Some(Self::Benchmark),
            "connection" => Some(Self::Connection),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }

    /// The block identifier as written in source
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mod => "mod",
            Self::Variable => "variable",
            Self::Locals => "locals",
            Self::Query => "query",
            Self::Benchmark => "benchmark",
            Self::Connection => "connection",
            Self::Pipeline => "pipeline",
        }
    }

    /// The type segment used in references and resource names
    ///
    /// Differs from the block identifier for variables (`var.x`) and locals
    /// (`local.x`).
    pub fn reference_type(self) -> &'static str {
        match self {
            Self::Variable => "var",
            Self::Locals => "local",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and common attributes shared by every resource
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceCore {
    pub short_name: String,
    /// `type.shortName`, or `type.subtype.shortName` for subtyped resources
    pub unqualified_name: String,
    /// `mod.type.shortName` - unique within a loaded workspace
    pub full_name: String,
    pub block_type: BlockType,
    #[serde(skip)]
    pub decl_range: SourceRange,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: IndexMap<String, String>,
    /// Optional single-level same-type inheritance source
    pub base: Option<String>,
    /// Symbol paths this resource's expressions refer to
    pub references: Vec<SymbolRef>,
    #[serde(skip)]
    pub is_top_level: bool,
}

// structural equality: the declaration range is where a resource was written,
// not what it is, and must not make two loads of the same source unequal
impl PartialEq for ResourceCore {
    fn eq(&self, other: &Self) -> bool {
        self.short_name == other.short_name
            && self.unqualified_name == other.unqualified_name
            && self.full_name == other.full_name
            && self.block_type == other.block_type
            && self.title == other.title
            && self.description == other.description
            && self.tags == other.tags
            && self.base == other.base
            && self.references == other.references
            && self.is_top_level == other.is_top_level
    }
}

impl ResourceCore {
    /// `name_path` is the label path of the block: `["q1"]` for most types,
    /// `["postgres", "main"]` for subtyped ones.
    pub fn new(
        block_type: BlockType,
        name_path: &[String],
        mod_short_name: &str,
        decl_range: SourceRange,
    ) -> Self {
        let short_name = name_path.last().cloned().unwrap_or_default();
        let unqualified_name = format!("{}.{}", block_type.reference_type(), name_path.join("."));
        let full_name = format!("{mod_short_name}.{unqualified_name}");
        Self {
            short_name,
            unqualified_name,
            full_name,
            block_type,
            decl_range,
            title: None,
            description: None,
            tags: IndexMap::new(),
            base: None,
            references: Vec::new(),
            is_top_level: false,
        }
    }

    /// Fill unset common attributes from a base resource's core
    pub fn merge_base(&mut self, base: &ResourceCore) {
        if self.title.is_none() {
            self.title = base.title.clone();
        }
        if self.description.is_none() {
            self.description = base.description.clone();
        }
        for (key, value) in &base.tags {
            self.tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// A decoded resource
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "resource_kind", rename_all = "lowercase")]
pub enum Resource {
    Query(Query),
    Variable(Variable),
    Local(Local),
    Benchmark(Benchmark),
    Connection(Connection),
    Pipeline(Pipeline),
}

impl Resource {
    pub fn core(&self) -> &ResourceCore {
        match self {
            Resource::Query(r) => &r.core,
            Resource::Variable(r) => &r.core,
            Resource::Local(r) => &r.core,
            Resource::Benchmark(r) => &r.core,
            Resource::Connection(r) => &r.core,
            Resource::Pipeline(r) => &r.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut ResourceCore {
        match self {
            Resource::Query(r) => &mut r.core,
            Resource::Variable(r) => &mut r.core,
            Resource::Local(r) => &mut r.core,
            Resource::Benchmark(r) => &mut r.core,
            Resource::Connection(r) => &mut r.core,
            Resource::Pipeline(r) => &mut r.core,
        }
    }

    /// Fully qualified name, `mod.type.shortName`
    pub fn name(&self) -> &str {
        &self.core().full_name
    }

    pub fn block_type(&self) -> BlockType {
        self.core().block_type
    }

    /// Whether this resource participates in the mod tree
    pub fn is_tree_item(&self) -> bool {
        matches!(self, Resource::Benchmark(_))
    }

    pub fn get_children(&self) -> &[String] {
        match self {
            Resource::Benchmark(b) => &b.children,
            _ => &[],
        }
    }

    pub fn get_parents(&self) -> &[String] {
        match self {
            Resource::Benchmark(b) => &b.parents,
            _ => &[],
        }
    }

    /// The value registered in the reference namespace once decoded
    ///
    /// Variables and locals bind their value directly (`var.x` IS the
    /// value); every other resource binds an object of its salient fields.
    pub fn reference_value(&self) -> Value {
        match self {
            Resource::Variable(v) => v.value.clone(),
            Resource::Local(l) => l.value.clone(),
            other => {
                let mut map = hcl::value::Map::new();
                let core = other.core();
                map.insert("name".into(), Value::String(core.full_name.clone()));
                map.insert("short_name".into(), Value::String(core.short_name.clone()));
                map.insert(
                    "resource_type".into(),
                    Value::String(core.block_type.reference_type().to_string()),
                );
                if let Some(title) = &core.title {
                    map.insert("title".into(), Value::String(title.clone()));
                }
                match other {
                    Resource::Query(q) => {
                        if let Some(sql) = &q.sql {
                            map.insert("sql".into(), Value::String(sql.clone()));
                        }
                    }
                    Resource::Benchmark(b) => {
                        map.insert(
                            "children".into(),
                            Value::Array(
                                b.declared_children
                                    .iter()
                                    .cloned()
                                    .map(Value::String)
                                    .collect(),
                            ),
                        );
                    }
                    Resource::Connection(c) => {
                        map.insert("type".into(), Value::String(c.connection_type.clone()));
                        c.backend.extend_reference_value(&mut map);
                    }
                    Resource::Pipeline(_) | Resource::Variable(_) | Resource::Local(_) => {}
                }
                Value::Object(map)
            }
        }
    }

    /// Post-decode hook: resolve the `base` reference and run per-type
    /// validation. `lookup` resolves an already decoded resource.
    pub fn on_decoded<'a>(
        &mut self,
        lookup: &dyn Fn(&ParsedName) -> Option<&'a Resource>,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();

        if let Some(base_name) = self.core().base.clone() {
            match self.resolve_base(&base_name, lookup) {
                Ok(()) => {}
                Err(diag) => diags.push(diag),
            }
        }

        diags.extend(self.validate());
        diags
    }

    fn resolve_base<'a>(
        &mut self,
        base_name: &str,
        lookup: &dyn Fn(&ParsedName) -> Option<&'a Resource>,
    ) -> Result<(), Diagnostic> {
        let range = self.core().decl_range.clone();
        let not_found = || {
            Diagnostic::error(format!("Could not resolve base resource '{base_name}'"))
                .with_range(range.clone())
        };

        let parsed = ParsedName::parse(base_name).map_err(|_| not_found())?;
        let base = lookup(&parsed).ok_or_else(not_found)?;

        if base.block_type() != self.block_type() {
            return Err(Diagnostic::error(format!(
                "Base resource '{base_name}' is not a '{}'",
                self.block_type()
            ))
            .with_range(range));
        }

        let base = base.clone();
        self.core_mut().merge_base(base.core());
        match (self, &base) {
            (Resource::Query(target), Resource::Query(base)) => target.merge_base(base),
            (Resource::Benchmark(target), Resource::Benchmark(base)) => target.merge_base(base),
            _ => {}
        }
        Ok(())
    }

    /// Per-type validation run after a successful structural decode
    fn validate(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        match self {
            Resource::Query(q) => {
                if q.sql.is_none() {
                    diags.push(
                        Diagnostic::error(format!("Query '{}' has no sql", q.core.full_name))
                            .with_range(q.core.decl_range.clone()),
                    );
                }
            }
            Resource::Connection(c) => diags.extend(c.validate()),
            _ => {}
        }
        diags
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn core_names_use_reference_type() {
        let core = ResourceCore::new(
            BlockType::Variable,
            &["region".to_string()],
            "acme",
            SourceRange::default(),
        );
        assert_eq!(core.unqualified_name, "var.region");
        assert_eq!(core.full_name, "acme.var.region");
    }

    #[test]
    fn subtyped_core_names_include_subtype() {
        let core = ResourceCore::new(
            BlockType::Connection,
            &["postgres".to_string(), "main".to_string()],
            "acme",
            SourceRange::default(),
        );
        assert_eq!(core.unqualified_name, "connection.postgres.main");
        assert_eq!(core.short_name, "main");
    }

    #[test]
    fn merge_base_keeps_own_values() {
        let mut core = ResourceCore::new(
            BlockType::Query,
            &["q1".to_string()],
            "acme",
            SourceRange::default(),
        );
        core.title = Some("own".into());

        let mut base = core.clone();
        base.title = Some("base".into());
        base.description = Some("from base".into());

        core.merge_base(&base);
        assert_eq!(core.title.as_deref(), Some("own"));
        assert_eq!(core.description.as_deref(), Some("from base"));
    }
}
