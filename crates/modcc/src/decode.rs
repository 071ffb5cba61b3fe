//! The decode orchestrator
//!
//! Source blocks move through `Pending -> {Decoded | Deferred | Invalid}`;
//! deferred blocks return to pending for the next pass. Each pass decodes
//! every pending block against the pass-frozen evaluation context, then the
//! context is rebuilt from the values registered during the pass. The loop
//! stops when nothing is unresolved, or when a pass fails to shrink the
//! unresolved set (a cycle or an unsatisfiable reference).
//!
//! For an acyclic, fully satisfiable dependency graph the loop therefore
//! terminates in at most (longest dependency chain) passes, independent of
//! declaration order.

use crate::context::DecodeContext;
use crate::dependency::EvalOutcome;
use crate::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use crate::mod_def::{Mod, ModRequirement, Require};
use crate::reference::{collect_symbol_refs, SymbolRef};
use crate::resource::{
    Benchmark, BlockType, Connection, ConnectionBackend, Local, Pipeline, PipelineParam,
    PipelineStep, Query, Resource, ResourceCore, Variable,
};
use crate::schema::Registry;
use crate::sources::{ModSources, Source};
use crate::tree::build_resource_tree;
use hcl::Value;
use hcl_edit::structure::{Attribute, Block, Body};
use hcl_edit::Span as _;
use indexmap::IndexMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A consistent detail message for all "not a valid identifier" diagnostics.
const BAD_IDENTIFIER_DETAIL: &str = "A name must start with a letter or underscore and may contain only letters, digits, underscores, and dashes.";

/// Drives block decoding against an injected schema [Registry]
#[derive(Debug, Clone, derive_new::new)]
pub struct Decoder {
    registry: Registry,
}

impl Decoder {
    pub fn standard() -> Self {
        Self::new(Registry::standard())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decode all source blocks into the context's mod
    ///
    /// Runs the fixpoint pass loop, then assembles the resource tree.
    /// Diagnostics accumulate across the whole load; only a stalled fixpoint
    /// stops early.
    pub fn decode(&self, ctx: &mut DecodeContext, sources: &ModSources) -> Diagnostics {
        let mut diags = Diagnostics::new();

        // adopt the mod identity before any resource names are derived
        diags.extend(self.adopt_mod_identity(ctx, sources));

        // top level attributes are not valid mod source
        for (_, source, attribute) in sources.attributes() {
            diags.push(
                Diagnostic::error(format!(
                    "Unsupported attribute: '{}' not expected at top level",
                    attribute.key.value()
                ))
                .with_range(SourceRange::new(source.clone(), attribute.span())),
            );
        }

        let mut pending = Vec::new();
        for (_, source, block) in sources.blocks() {
            let (units, more_diags) = self.prepare(source, block);
            pending.extend(units);
            diags.extend(more_diags);
        }

        // we may need to decode more than once as we gather dependencies as
        // we go; continue as long as the number of unresolved blocks shrinks
        let mut prev_unresolved = 0;
        loop {
            if ctx.is_cancelled() {
                diags.push(Diagnostic::warning("decode cancelled"));
                return diags;
            }

            ctx.passes += 1;
            let (still_pending, pass_diags) = self.run_pass(ctx, pending);
            diags.extend(pass_diags);
            pending = still_pending;

            ctx.rebuild_eval_context();

            let unresolved = ctx.tracker.unresolved_count();
            if unresolved == 0 {
                tracing::debug!(passes = ctx.passes, "decode complete with no unresolved blocks");
                break;
            }
            if prev_unresolved != 0 && unresolved >= prev_unresolved {
                diags.push(ctx.unresolved_error());
                return diags;
            }
            prev_unresolved = unresolved;
        }

        diags.extend(build_resource_tree(ctx));
        diags
    }

    /// Take the mod's name and file identity from its `mod` block, if the
    /// context still holds a default mod
    fn adopt_mod_identity(&self, ctx: &mut DecodeContext, sources: &ModSources) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut seen: Option<usize> = None;
        for (index, source, block) in sources.blocks() {
            if block.ident.value().as_str() != "mod" {
                continue;
            }
            if seen.is_some() {
                diags.push(
                    Diagnostic::error("Multiple mod definition blocks found")
                        .with_range(sources.block_range(index)),
                );
                continue;
            }
            seen = Some(index);

            let Some(label) = block.labels.first() else {
                continue; // missing label reported during prepare
            };
            if ctx.current_mod.is_default() {
                let short_name = label.as_str().to_string();
                ctx.current_mod.short_name = short_name.clone();
                ctx.current_mod.full_name = format!("mod.{short_name}");
            }
            ctx.current_mod.decl_range = sources.block_range(index);
            ctx.current_mod.mod_file_path = source.clone();
        }
        diags
    }

    /// Validate a block's labels and expand it into pending decode units
    fn prepare<'a>(
        &self,
        source: &'a Source,
        block: &'a Block,
    ) -> (Vec<Pending<'a>>, Diagnostics) {
        let range = SourceRange::new(source.clone(), block.span());
        let ident = block.ident.value().as_str();
        let Some(block_type) = BlockType::from_ident(ident) else {
            let diag = Diagnostic::error(format!(
                "Unsupported block type: blocks of type '{ident}' are not expected here"
            ))
            .with_range(range);
            return (Vec::new(), diag.into());
        };

        let expected_labels = match block_type {
            BlockType::Locals => 0,
            BlockType::Connection => 2,
            _ => 1,
        };
        if block.labels.len() != expected_labels {
            let diag = Diagnostic::error(format!(
                "Invalid block: '{ident}' blocks expect {expected_labels} label(s)"
            ))
            .with_range(range);
            return (Vec::new(), diag.into());
        }

        let mut name_path = Vec::with_capacity(block.labels.len());
        for label in &block.labels {
            if hcl::Identifier::new(label.as_str()).is_err() {
                let diag = Diagnostic::error("Invalid name")
                    .with_detail(BAD_IDENTIFIER_DETAIL)
                    .with_range(range);
                return (Vec::new(), diag.into());
            }
            name_path.push(label.as_str().to_string());
        }

        // a locals block is not a single resource: each attribute becomes an
        // independently evaluated decode unit; a bad attribute name does not
        // block its siblings
        if block_type == BlockType::Locals {
            let mut units = Vec::new();
            let mut diags = Diagnostics::new();
            for attr in block.body.attributes() {
                let name = attr.key.value().as_str();
                if hcl::Identifier::new(name).is_err() {
                    diags.push(
                        Diagnostic::error("Invalid local value name")
                            .with_detail(BAD_IDENTIFIER_DETAIL)
                            .with_range(SourceRange::new(source.clone(), attr.span())),
                    );
                    continue;
                }
                units.push(Pending::LocalAttr {
                    name: name.to_string(),
                    key: format!("local.{name}"),
                    attr,
                    source,
                });
            }
            return (units, diags);
        }

        let key = format!("{}.{}", block_type.reference_type(), name_path.join("."));
        let unit = Pending::Block {
            block_type,
            name_path,
            key,
            block,
            source,
        };
        (vec![unit], Diagnostics::new())
    }

    /// Decode every pending unit once; returns the units that deferred
    fn run_pass<'a>(
        &self,
        ctx: &mut DecodeContext,
        pending: Vec<Pending<'a>>,
    ) -> (Vec<Pending<'a>>, Diagnostics) {
        let mut still_pending = Vec::new();
        let mut diags = Diagnostics::new();

        for unit in pending {
            tracing::trace!(key = unit.key(), pass = ctx.passes, "decode attempt");
            let outcome = match catch_unwind(AssertUnwindSafe(|| self.decode_unit(&unit, ctx))) {
                Ok(outcome) => outcome,
                Err(panic) => BlockOutcome::fatal(
                    Diagnostic::error("Unexpected error while decoding block")
                        .with_detail(panic_message(panic)),
                ),
            };

            if outcome.diags.has_errors() {
                // invalid: report and do not retry
                ctx.tracker.resolve(unit.key());
                diags.extend(outcome.diags);
                continue;
            }

            if !outcome.deferrals.is_empty() {
                // re-record from scratch so the missing sets reflect this pass
                ctx.tracker.resolve(unit.key());
                for (key, missing) in outcome.deferrals {
                    ctx.tracker.record(&key, missing);
                }
                still_pending.push(unit);
                continue;
            }

            // decoded: surface warnings, run the post-decode hook, register
            // the value, and add named top level resources to the mod
            diags.extend(outcome.diags);

            if let Some(patch) = outcome.mod_patch {
                patch.apply(&mut ctx.current_mod);
                ctx.tracker.resolve(unit.key());
            }

            if let Some(mut resource) = outcome.resource {
                resource.core_mut().is_top_level = true;

                let hook_diags = {
                    let lookup = |name: &crate::reference::ParsedName| ctx.get_resource(name);
                    resource.on_decoded(&lookup)
                };
                let failed = hook_diags.has_errors();
                diags.extend(hook_diags);
                if failed {
                    ctx.tracker.resolve(unit.key());
                    continue;
                }

                ctx.register_resource(&resource);
                if !resource.core().short_name.is_empty() {
                    diags.extend(ctx.current_mod.add_resource(resource));
                }
            }
        }

        (still_pending, diags)
    }

    fn decode_unit(&self, unit: &Pending, ctx: &DecodeContext) -> BlockOutcome {
        match unit {
            Pending::LocalAttr {
                name,
                key,
                attr,
                source,
            } => self.decode_local_attr(name, key, attr, source, ctx),
            Pending::Block {
                block_type,
                name_path,
                key,
                block,
                source,
                ..
            } => match block_type {
                BlockType::Mod => self.decode_mod_block(block, key, source, ctx),
                BlockType::Variable => self.decode_variable(block, name_path, key, source, ctx),
                BlockType::Query => self.decode_query(block, name_path, key, source, ctx),
                BlockType::Benchmark => self.decode_benchmark(block, name_path, key, source, ctx),
                BlockType::Connection => self.decode_connection(block, name_path, key, source, ctx),
                BlockType::Pipeline => self.decode_pipeline(block, name_path, key, source, ctx),
                BlockType::Locals => unreachable!("locals expand into attribute units"),
            },
        }
    }

    fn decode_local_attr(
        &self,
        name: &str,
        key: &str,
        attr: &Attribute,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let range = SourceRange::new(source.clone(), attr.span());
        match ctx.evaluate(&attr.value, &range) {
            EvalOutcome::Value(value) => {
                let mut core = ResourceCore::new(
                    BlockType::Locals,
                    &[name.to_string()],
                    &ctx.current_mod.short_name,
                    range,
                );
                core.references = collect_symbol_refs(&attr.value.clone().into());
                BlockOutcome::resource(Resource::Local(Local::new(core, value)))
            }
            EvalOutcome::Unresolved(missing) => BlockOutcome::deferred(key, missing),
            EvalOutcome::Fatal(diags) => BlockOutcome {
                resource: None,
                mod_patch: None,
                diags,
                deferrals: Vec::new(),
            },
        }
    }

    fn decode_query(
        &self,
        block: &Block,
        name_path: &[String],
        key: &str,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let mut body = BodyDecoder::new(self, ctx, source, key);
        body.validate_schema(BlockType::Query, &block.body);

        let mut core = self.new_core(BlockType::Query, name_path, block, source, ctx);
        body.decode_core(&block.body, &mut core);

        let mut query = Query::new(core);
        query.sql = body.attr_string(&block.body, "sql");
        query.database = body.attr_string(&block.body, "database");
        query.documentation = body.attr_string(&block.body, "documentation");

        body.finish(Some(Resource::Query(query)))
    }

    fn decode_variable(
        &self,
        block: &Block,
        name_path: &[String],
        key: &str,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let mut body = BodyDecoder::new(self, ctx, source, key);
        body.validate_schema(BlockType::Variable, &block.body);

        let mut core = self.new_core(BlockType::Variable, name_path, block, source, ctx);
        body.decode_core(&block.body, &mut core);

        let mut variable = Variable::new(core);
        variable.default = body.attr_value(&block.body, "default");
        variable.enum_values = body.attr_value(&block.body, "enum");
        variable.sensitive = body.attr_bool(&block.body, "sensitive").unwrap_or(false);
        // keep the type expression as written; it is a constraint, not a value
        variable.type_string = find_attr(&block.body, "type")
            .map(|attr| attr.value.to_string().trim().to_string());

        // an externally supplied value wins over the decoded default
        variable.value = match ctx.variable_override(&variable.core.short_name) {
            Some(value) => value.clone(),
            None => variable.default.clone().unwrap_or(Value::Null),
        };

        body.finish(Some(Resource::Variable(variable)))
    }

    fn decode_benchmark(
        &self,
        block: &Block,
        name_path: &[String],
        key: &str,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let mut body = BodyDecoder::new(self, ctx, source, key);
        body.validate_schema(BlockType::Benchmark, &block.body);

        let mut core = self.new_core(BlockType::Benchmark, name_path, block, source, ctx);
        body.decode_core(&block.body, &mut core);
        core.base = body.attr_reference_name(&block.body, "base");

        let mut benchmark = Benchmark::new(core);
        benchmark.documentation = body.attr_string(&block.body, "documentation");
        benchmark.display = body.attr_string(&block.body, "display");
        benchmark.benchmark_type = body.attr_string(&block.body, "type");
        benchmark.width = body.attr_i64(&block.body, "width");
        benchmark.declared_children = body.attr_string_vec(&block.body, "children");

        body.finish(Some(Resource::Benchmark(benchmark)))
    }

    fn decode_connection(
        &self,
        block: &Block,
        name_path: &[String],
        key: &str,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let mut body = BodyDecoder::new(self, ctx, source, key);
        body.validate_schema(BlockType::Connection, &block.body);

        let connection_type = name_path[0].clone();
        let mut core = self.new_core(BlockType::Connection, name_path, block, source, ctx);
        body.decode_core(&block.body, &mut core);

        let Some(mut backend) = ConnectionBackend::for_type(&connection_type) else {
            body.diags.push(
                Diagnostic::error(format!("Unsupported connection type '{connection_type}'"))
                    .with_range(core.decl_range.clone()),
            );
            return body.finish(None);
        };

        match &mut backend {
            ConnectionBackend::Server(server) => {
                server.connection_string = body.attr_string(&block.body, "connection_string");
                server.host = body.attr_string(&block.body, "host");
                server.port = body.attr_i64(&block.body, "port");
                server.database = body.attr_string(&block.body, "database");
                server.username = body.attr_string(&block.body, "username");
                server.password = body.attr_string(&block.body, "password");
                server.search_path = body.attr_string_vec(&block.body, "search_path");
                server.search_path_prefix = body.attr_string_vec(&block.body, "search_path_prefix");
            }
            ConnectionBackend::File(file) => {
                file.connection_string = body.attr_string(&block.body, "connection_string");
                file.filename = body.attr_string(&block.body, "filename");
            }
        }

        body.finish(Some(Resource::Connection(Connection::new(
            core,
            connection_type,
            backend,
        ))))
    }

    fn decode_pipeline(
        &self,
        block: &Block,
        name_path: &[String],
        key: &str,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let mut body = BodyDecoder::new(self, ctx, source, key);
        body.validate_schema(BlockType::Pipeline, &block.body);

        let mut core = self.new_core(BlockType::Pipeline, name_path, block, source, ctx);
        body.decode_core(&block.body, &mut core);

        let mut pipeline = Pipeline::new(core);
        pipeline.documentation = body.attr_string(&block.body, "documentation");
        pipeline.max_concurrency = body.attr_i64(&block.body, "max_concurrency");

        // nested blocks defer under their parent-qualified key so a step
        // named like a top level block cannot collide in cycle detection
        for nested in block.body.blocks() {
            match nested.ident.value().as_str() {
                "param" => {
                    let Some(label) = nested.labels.first() else {
                        body.diags.push(
                            Diagnostic::error("param blocks expect a name label")
                                .with_range(SourceRange::new(source.clone(), nested.span())),
                        );
                        continue;
                    };
                    let mut nested_body = body.nested(&format!("{key}.{}", label.as_str()));
                    nested_body.validate_nested_schema("param", &nested.body);

                    let mut param = PipelineParam::new(label.as_str().to_string());
                    param.description = nested_body.attr_string(&nested.body, "description");
                    param.default = nested_body.attr_value(&nested.body, "default");
                    param.type_string = find_attr(&nested.body, "type")
                        .map(|attr| attr.value.to_string().trim().to_string());
                    body.absorb(nested_body);
                    pipeline.params.push(param);
                }
                "step" => {
                    let (Some(type_label), Some(name_label)) =
                        (nested.labels.first(), nested.labels.get(1))
                    else {
                        body.diags.push(
                            Diagnostic::error("step blocks expect type and name labels")
                                .with_range(SourceRange::new(source.clone(), nested.span())),
                        );
                        continue;
                    };
                    let mut nested_body = body.nested(&format!("{key}.{}", name_label.as_str()));
                    nested_body.validate_nested_schema("step", &nested.body);

                    let mut step = PipelineStep::new(
                        type_label.as_str().to_string(),
                        name_label.as_str().to_string(),
                    );
                    step.title = nested_body.attr_string(&nested.body, "title");
                    step.description = nested_body.attr_string(&nested.body, "description");
                    step.depends_on = nested_body.attr_string_vec(&nested.body, "depends_on");
                    step.sql = nested_body.attr_string(&nested.body, "sql");
                    step.query = nested_body.attr_reference_name(&nested.body, "query");
                    step.args = nested_body.attr_value(&nested.body, "args");
                    step.value = nested_body.attr_value(&nested.body, "value");
                    body.absorb(nested_body);
                    pipeline.steps.push(step);
                }
                // unknown nested blocks were reported by schema validation
                _ => {}
            }
        }

        body.finish(Some(Resource::Pipeline(pipeline)))
    }

    fn decode_mod_block(
        &self,
        block: &Block,
        key: &str,
        source: &Source,
        ctx: &DecodeContext,
    ) -> BlockOutcome {
        let mut body = BodyDecoder::new(self, ctx, source, key);
        body.validate_schema(BlockType::Mod, &block.body);

        let mut patch = ModPatch::default();
        patch.title = body.attr_string(&block.body, "title");
        patch.description = body.attr_string(&block.body, "description");
        patch.documentation = body.attr_string(&block.body, "documentation");
        patch.tags = body.attr_string_map(&block.body, "tags");
        patch.categories = body.attr_string_vec(&block.body, "categories");
        patch.color = body.attr_string(&block.body, "color");
        patch.database = body.attr_database(&block.body, "database");

        for nested in block.body.blocks() {
            if nested.ident.value().as_str() != "require" {
                continue;
            }
            let mut nested_body = body.nested(&format!("{key}.require"));
            nested_body.validate_nested_schema("require", &nested.body);
            let require = nested_body.decode_require(&nested.body, source);
            body.absorb(nested_body);
            patch.require = Some(require);
        }

        let mut outcome = body.finish(None);
        outcome.mod_patch = Some(patch);
        outcome
    }

    fn new_core(
        &self,
        block_type: BlockType,
        name_path: &[String],
        block: &Block,
        source: &Source,
        ctx: &DecodeContext,
    ) -> ResourceCore {
        let range = SourceRange::new(source.clone(), block.span());
        let mut core = ResourceCore::new(block_type, name_path, &ctx.current_mod.short_name, range);
        // record which symbols this resource's expressions refer to
        for attr in block.body.attributes() {
            for symbol in collect_symbol_refs(&attr.value.clone().into()) {
                if !core.references.contains(&symbol) {
                    core.references.push(symbol);
                }
            }
        }
        core
    }
}

/// Decode the `mod` block of a modfile without decoding any resources
///
/// Used before full workspace parsing, for example to identify dependency
/// requirements. Deferrals are ignored: attributes referencing not yet
/// available values stay unset.
pub fn parse_mod_definition(
    decoder: &Decoder,
    sources: &ModSources,
    mod_path: &std::path::Path,
) -> (Option<Mod>, Diagnostics) {
    let mut diags = Diagnostics::new();

    let Some((index, source, block)) = sources
        .blocks()
        .find(|(_, _, block)| block.ident.value().as_str() == "mod")
    else {
        return (None, diags);
    };

    let Some(label) = block.labels.first() else {
        diags.push(
            Diagnostic::error("Invalid block: 'mod' blocks expect 1 label(s)")
                .with_range(sources.block_range(index)),
        );
        return (None, diags);
    };

    let mut mod_def = Mod::new(label.as_str(), mod_path, sources.block_range(index));
    mod_def.mod_file_path = source.clone();

    let ctx = DecodeContext::new(mod_def);
    let outcome = decoder.decode_mod_block(block, "mod", source, &ctx);
    let mut mod_def = ctx.current_mod;
    // dependency errors are ignored here: only literal attributes matter for
    // the definition pass
    if outcome.diags.has_errors() {
        diags.extend(outcome.diags);
        return (None, diags);
    }
    diags.extend(outcome.diags);
    if let Some(patch) = outcome.mod_patch {
        patch.apply(&mut mod_def);
    }

    (Some(mod_def), diags)
}

/// Pending decode unit
enum Pending<'a> {
    Block {
        block_type: BlockType,
        name_path: Vec<String>,
        key: String,
        block: &'a Block,
        source: &'a Source,
    },
    LocalAttr {
        name: String,
        key: String,
        attr: &'a Attribute,
        source: &'a Source,
    },
}

impl Pending<'_> {
    fn key(&self) -> &str {
        match self {
            Pending::Block { key, .. } => key,
            Pending::LocalAttr { key, .. } => key,
        }
    }
}

/// Result of one block decode attempt
struct BlockOutcome {
    resource: Option<Resource>,
    mod_patch: Option<ModPatch>,
    diags: Diagnostics,
    /// (dependency key, missing symbols) per deferral site
    deferrals: Vec<(String, Vec<SymbolRef>)>,
}

impl BlockOutcome {
    fn resource(resource: Resource) -> Self {
        Self {
            resource: Some(resource),
            mod_patch: None,
            diags: Diagnostics::new(),
            deferrals: Vec::new(),
        }
    }

    fn deferred(key: &str, missing: Vec<SymbolRef>) -> Self {
        Self {
            resource: None,
            mod_patch: None,
            diags: Diagnostics::new(),
            deferrals: vec![(key.to_string(), missing)],
        }
    }

    fn fatal(diagnostic: Diagnostic) -> Self {
        Self {
            resource: None,
            mod_patch: None,
            diags: diagnostic.into(),
            deferrals: Vec::new(),
        }
    }
}

/// Attribute updates for the mod being decoded
#[derive(Debug, Default)]
struct ModPatch {
    title: Option<String>,
    description: Option<String>,
    documentation: Option<String>,
    tags: IndexMap<String, String>,
    categories: Vec<String>,
    color: Option<String>,
    database: Option<String>,
    require: Option<Require>,
}

impl ModPatch {
    fn apply(self, mod_def: &mut Mod) {
        if self.title.is_some() {
            mod_def.title = self.title;
        }
        if self.description.is_some() {
            mod_def.description = self.description;
        }
        if self.documentation.is_some() {
            mod_def.documentation = self.documentation;
        }
        if !self.tags.is_empty() {
            mod_def.tags = self.tags;
        }
        if !self.categories.is_empty() {
            mod_def.categories = self.categories;
        }
        if self.color.is_some() {
            mod_def.color = self.color;
        }
        if self.database.is_some() {
            mod_def.database = self.database;
        }
        if let Some(require) = self.require {
            mod_def.require = require;
        }
    }
}

/// Helper for evaluating one block body's attributes
///
/// Collects diagnostics and deferrals so the per-type decode functions stay
/// declarative. Fatal evaluation errors and deferrals never abort the body:
/// every sibling attribute still gets decoded and reported.
struct BodyDecoder<'d> {
    registry: &'d Registry,
    ctx: &'d DecodeContext,
    source: &'d Source,
    key: String,
    diags: Diagnostics,
    deferrals: Vec<(String, Vec<SymbolRef>)>,
}

impl<'d> BodyDecoder<'d> {
    fn new(decoder: &'d Decoder, ctx: &'d DecodeContext, source: &'d Source, key: &str) -> Self {
        Self {
            registry: &decoder.registry,
            ctx,
            source,
            key: key.to_string(),
            diags: Diagnostics::new(),
            deferrals: Vec::new(),
        }
    }

    /// A decoder for a nested block, deferring under its own qualified key
    fn nested(&self, key: &str) -> BodyDecoder<'d> {
        BodyDecoder {
            registry: self.registry,
            ctx: self.ctx,
            source: self.source,
            key: key.to_string(),
            diags: Diagnostics::new(),
            deferrals: Vec::new(),
        }
    }

    /// Fold a nested decoder's results back into this one
    fn absorb(&mut self, nested: BodyDecoder) {
        self.diags.extend(nested.diags);
        self.deferrals.extend(nested.deferrals);
    }

    fn validate_schema(&mut self, block_type: BlockType, body: &Body) {
        if let Some(schema) = self.registry.schema_for(block_type) {
            self.diags
                .extend(self.registry.validate(block_type, body, schema, self.source));
        }
    }

    fn validate_nested_schema(&mut self, name: &str, body: &Body) {
        if let Some(schema) = self.registry.nested_schema(name) {
            // nested schemas have no deprecation allow-list; the block type
            // only matters for that lookup
            self.diags
                .extend(self.registry.validate(BlockType::Pipeline, body, schema, self.source));
        }
    }

    fn decode_core(&mut self, body: &Body, core: &mut ResourceCore) {
        core.title = self.attr_string(body, "title");
        core.description = self.attr_string(body, "description");
        core.tags = self.attr_string_map(body, "tags");
    }

    /// Evaluate an attribute if present; deferral and fatal outcomes are
    /// recorded and `None` returned
    fn attr_value(&mut self, body: &Body, name: &str) -> Option<Value> {
        let attr = find_attr(body, name)?;
        let range = SourceRange::new(self.source.clone(), attr.span());
        match self.ctx.evaluate(&attr.value, &range) {
            EvalOutcome::Value(value) => Some(value),
            EvalOutcome::Unresolved(missing) => {
                self.deferrals.push((self.key.clone(), missing));
                None
            }
            EvalOutcome::Fatal(diags) => {
                self.diags.extend(diags);
                None
            }
        }
    }

    fn attr_string(&mut self, body: &Body, name: &str) -> Option<String> {
        match self.attr_value(body, name)? {
            Value::String(value) => Some(value),
            other => {
                self.attr_type_error(body, name, "a string", &other);
                None
            }
        }
    }

    fn attr_bool(&mut self, body: &Body, name: &str) -> Option<bool> {
        match self.attr_value(body, name)? {
            Value::Bool(value) => Some(value),
            other => {
                self.attr_type_error(body, name, "a bool", &other);
                None
            }
        }
    }

    fn attr_i64(&mut self, body: &Body, name: &str) -> Option<i64> {
        match self.attr_value(body, name)? {
            Value::Number(value) => value.as_i64(),
            other => {
                self.attr_type_error(body, name, "a number", &other);
                None
            }
        }
    }

    fn attr_string_vec(&mut self, body: &Body, name: &str) -> Vec<String> {
        let Some(value) = self.attr_value(body, name) else {
            return Vec::new();
        };
        match value {
            Value::Array(items) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => strings.push(s),
                        other => {
                            self.attr_type_error(body, name, "a list of strings", &other);
                            return Vec::new();
                        }
                    }
                }
                strings
            }
            other => {
                self.attr_type_error(body, name, "a list of strings", &other);
                Vec::new()
            }
        }
    }

    fn attr_string_map(&mut self, body: &Body, name: &str) -> IndexMap<String, String> {
        let Some(value) = self.attr_value(body, name) else {
            return IndexMap::new();
        };
        match value {
            Value::Object(map) => {
                let mut strings = IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    match item {
                        Value::String(s) => {
                            strings.insert(key, s);
                        }
                        other => {
                            self.attr_type_error(body, name, "a map of strings", &other);
                            return IndexMap::new();
                        }
                    }
                }
                strings
            }
            other => {
                self.attr_type_error(body, name, "a map of strings", &other);
                IndexMap::new()
            }
        }
    }

    /// Decode an attribute that names another resource (`base = benchmark.x`,
    /// `query = query.q1`)
    ///
    /// Evaluation drives the deferral machinery (the referenced resource must
    /// be decoded first); the stored value is the reference text itself.
    fn attr_reference_name(&mut self, body: &Body, name: &str) -> Option<String> {
        let attr = find_attr(body, name)?;
        let referenced = {
            let expr: hcl::Expression = attr.value.clone().into();
            collect_symbol_refs(&expr).into_iter().next()
        };
        self.attr_value(body, name)?;
        referenced.map(|symbol| symbol.to_string())
    }

    /// Decode a `database` attribute: either a connection string or a
    /// reference to a connection resource
    fn attr_database(&mut self, body: &Body, name: &str) -> Option<String> {
        let attr = find_attr(body, name)?;
        let referenced = {
            let expr: hcl::Expression = attr.value.clone().into();
            collect_symbol_refs(&expr)
                .into_iter()
                .next()
                .map(|symbol| symbol.to_string())
        };
        match self.attr_value(body, name)? {
            Value::String(value) => Some(value),
            Value::Object(_) => referenced,
            other => {
                self.attr_type_error(body, name, "a connection string or connection", &other);
                None
            }
        }
    }

    fn decode_require(&mut self, body: &Body, source: &Source) -> Require {
        let mut require = Require::default();
        for nested in body.blocks() {
            if nested.ident.value().as_str() != "mod" {
                continue;
            }
            let Some(label) = nested.labels.first() else {
                self.diags.push(
                    Diagnostic::error("require mod blocks expect a name label")
                        .with_range(SourceRange::new(source.clone(), nested.span())),
                );
                continue;
            };

            if let Some(schema) = self.registry.nested_schema("require_mod") {
                self.diags
                    .extend(self.registry.validate(BlockType::Mod, &nested.body, schema, source));
            }

            let version = self.attr_string(&nested.body, "version").unwrap_or_default();
            let mut requirement = ModRequirement::new(label.as_str().to_string(), version);
            if let Some(Value::Object(args)) = self.attr_value(&nested.body, "args") {
                requirement.args = args.into_iter().collect();
            }
            require.mods.push(requirement);
        }
        require
    }

    fn attr_type_error(&mut self, body: &Body, name: &str, expected: &str, actual: &Value) {
        let range = find_attr(body, name)
            .map(|attr| SourceRange::new(self.source.clone(), attr.span()))
            .unwrap_or_default();
        self.diags.push(
            Diagnostic::error(format!("Attribute '{name}' must be {expected}"))
                .with_detail(format!("found {}", value_kind(actual)))
                .with_range(range),
        );
    }

    fn finish(self, resource: Option<Resource>) -> BlockOutcome {
        BlockOutcome {
            resource,
            mod_patch: None,
            diags: self.diags,
            deferrals: self.deferrals,
        }
    }
}

fn find_attr<'b>(body: &'b Body, name: &str) -> Option<&'b Attribute> {
    body.attributes()
        .find(|attr| attr.key.value().as_str() == name)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
