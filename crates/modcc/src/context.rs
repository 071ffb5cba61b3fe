//! Decode context
//!
//! [DecodeContext] carries the mutable state of one mod load: the mod being
//! decoded, the reference namespace, the dependency tracker and the loaded
//! dependency mods. Values registered during a pass become visible to
//! evaluation only when the eval context is rebuilt at the pass boundary;
//! this keeps pass counts independent of declaration order.

use crate::dependency::{evaluate_expression, DependencyTracker, EvalOutcome};
use crate::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use crate::mod_def::Mod;
use crate::namespace::{ConnectionBinding, ConnectionSeed, ReferenceValues, LOCAL_ALIAS};
use crate::reference::ParsedName;
use crate::resource::Resource;
use hcl::eval::Context;
use hcl::Value;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct DecodeContext {
    /// The mod currently being decoded
    pub current_mod: Mod,

    values: ReferenceValues,
    /// Snapshot of the namespace the eval context was last built from
    vars: hcl::value::Map<String, Value>,
    eval_ctx: Context<'static>,
    pub tracker: DependencyTracker,

    /// Direct dependency mods, keyed by alias
    dependency_mods: IndexMap<String, Mod>,

    binding: ConnectionBinding,
    connections: Vec<ConnectionSeed>,
    config_value_maps: IndexMap<String, hcl::value::Map<String, Value>>,
    /// Pre-seeded variable values (e.g. from the command line)
    variable_overrides: IndexMap<String, Value>,

    cancel: Option<Arc<AtomicBool>>,
    /// Number of fixpoint passes run so far
    pub passes: usize,
}

impl DecodeContext {
    pub fn new(current_mod: Mod) -> Self {
        let mut ctx = Self {
            current_mod,
            values: ReferenceValues::new(),
            vars: hcl::value::Map::new(),
            eval_ctx: Context::new(),
            tracker: DependencyTracker::new(),
            dependency_mods: IndexMap::new(),
            binding: ConnectionBinding::default(),
            connections: Vec::new(),
            config_value_maps: IndexMap::new(),
            variable_overrides: IndexMap::new(),
            cancel: None,
            passes: 0,
        };
        ctx.rebuild_eval_context();
        ctx
    }

    /// Pre-seed variable values; these win over decoded defaults
    pub fn with_variables(mut self, variables: IndexMap<String, Value>) -> Self {
        for (name, value) in &variables {
            self.values
                .bind(LOCAL_ALIAS, "var", &[name.as_str()], value.clone());
        }
        self.variable_overrides = variables;
        self.rebuild_eval_context();
        self
    }

    /// Supply connection descriptors and the binding regime
    ///
    /// Early binding binds the resolved values into the namespace now; late
    /// binding only injects temporary placeholders at rebuild time.
    pub fn with_connections(
        mut self,
        connections: Vec<ConnectionSeed>,
        binding: ConnectionBinding,
    ) -> Self {
        self.binding = binding;
        if binding == ConnectionBinding::Early {
            for seed in &connections {
                let value = seed.value.clone().unwrap_or(Value::Null);
                self.values.bind(
                    LOCAL_ALIAS,
                    "connection",
                    &[seed.connection_type.as_str(), seed.short_name.as_str()],
                    value,
                );
            }
        }
        self.connections = connections;
        self.rebuild_eval_context();
        self
    }

    /// Merge a host supplied config value map under its own top level key
    pub fn with_config_value_map(
        mut self,
        name: &str,
        values: hcl::value::Map<String, Value>,
    ) -> Self {
        self.config_value_maps.insert(name.to_string(), values);
        self.rebuild_eval_context();
        self
    }

    pub fn with_config_value_maps(
        mut self,
        maps: &IndexMap<String, hcl::value::Map<String, Value>>,
    ) -> Self {
        for (name, values) in maps {
            self.config_value_maps.insert(name.clone(), values.clone());
        }
        self.rebuild_eval_context();
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Attach an already decoded dependency mod and expose its top level
    /// resources under its alias
    pub fn add_dependency_mod(&mut self, dep: Mod) -> Diagnostics {
        let diags = Diagnostics::new();
        let alias = dep.alias().to_string();

        for resource in dep.resources.iter() {
            let core = resource.core();
            let resource_type = core.block_type.reference_type();
            // connection names nest by subtype
            let name_path: Vec<&str> = core
                .unqualified_name
                .split('.')
                .skip(1)
                .collect();
            self.values
                .bind(&alias, resource_type, &name_path, resource.reference_value());
        }

        self.dependency_mods.insert(alias, dep);
        self.rebuild_eval_context();
        diags
    }

    pub fn dependency_mods(&self) -> &IndexMap<String, Mod> {
        &self.dependency_mods
    }

    pub(crate) fn dependency_mod_mut(&mut self, alias: &str) -> Option<&mut Mod> {
        self.dependency_mods.get_mut(alias)
    }

    /// Find a mod by alias or short name: the current mod, or one of its
    /// direct loaded dependencies
    pub fn get_mod(&self, name: &str) -> Option<&Mod> {
        if name == self.current_mod.short_name || name == LOCAL_ALIAS {
            return Some(&self.current_mod);
        }
        self.dependency_mods.get(name)
    }

    /// Resolve a resource from the current mod or a direct dependency
    pub fn get_resource(&self, parsed_name: &ParsedName) -> Option<&Resource> {
        let owner = match &parsed_name.mod_alias {
            Some(alias) => self.get_mod(alias)?,
            None => &self.current_mod,
        };
        owner.get_resource(parsed_name)
    }

    pub fn variable_override(&self, name: &str) -> Option<&Value> {
        self.variable_overrides.get(name)
    }

    /// Rebuild the evaluation context from the reference values
    ///
    /// Called at pass boundaries; values registered mid-pass are invisible
    /// until then.
    pub fn rebuild_eval_context(&mut self) {
        self.vars = self
            .values
            .build_vars(self.binding, &self.connections, &self.config_value_maps);
        self.eval_ctx = ReferenceValues::build_context(&self.vars);
    }

    /// Evaluate an expression against the pass-frozen namespace
    pub fn evaluate(&self, expr: &hcl_edit::expr::Expression, range: &SourceRange) -> EvalOutcome {
        let expr: hcl::Expression = expr.clone().into();
        evaluate_expression(&expr, &self.eval_ctx, &self.vars, range)
    }

    /// Register a decoded resource's value in the namespace (first writer
    /// wins) and clear its dependency record
    pub fn register_resource(&mut self, resource: &Resource) -> Diagnostics {
        let diags = Diagnostics::new();
        let core = resource.core();
        let name_path: Vec<&str> = core.unqualified_name.split('.').skip(1).collect();
        self.values.bind(
            LOCAL_ALIAS,
            core.block_type.reference_type(),
            &name_path,
            resource.reference_value(),
        );
        self.tracker.resolve(&core.unqualified_name);
        diags
    }

    /// Terminal stall diagnostic listing every unresolved block
    pub fn unresolved_error(&self) -> Diagnostic {
        Diagnostic::error(format!(
            "Failed to resolve dependencies after {} passes",
            self.passes
        ))
        .with_detail(format!("Unresolved blocks:\n{}", self.tracker.dump()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnostic::SourceRange;
    use crate::resource::{BlockType, Query, ResourceCore};
    use std::path::Path;

    fn ctx() -> DecodeContext {
        DecodeContext::new(Mod::new("acme", Path::new("."), SourceRange::default()))
    }

    fn query_resource(mod_name: &str, name: &str) -> Resource {
        let core = ResourceCore::new(
            BlockType::Query,
            &[name.to_string()],
            mod_name,
            SourceRange::default(),
        );
        let mut q = Query::new(core);
        q.sql = Some("select 1".into());
        Resource::Query(q)
    }

    #[test]
    fn registered_resource_is_invisible_until_rebuild() {
        let mut ctx = ctx();
        ctx.register_resource(&query_resource("acme", "q1"));

        let expr: hcl_edit::expr::Expression = "query.q1.sql".parse().unwrap();
        let outcome = ctx.evaluate(&expr, &SourceRange::default());
        assert!(matches!(outcome, EvalOutcome::Unresolved(_)));

        ctx.rebuild_eval_context();
        let outcome = ctx.evaluate(&expr, &SourceRange::default());
        assert!(matches!(outcome, EvalOutcome::Value(_)));
    }

    #[test]
    fn dependency_resources_resolve_under_alias_only() {
        let mut dep = Mod::new("insights", Path::new("."), SourceRange::default());
        dep.dependency_alias = Some("dep".into());
        dep.add_resource(query_resource("insights", "q1"));

        let mut ctx = ctx();
        ctx.add_dependency_mod(dep);

        let expr: hcl_edit::expr::Expression = "dep.query.q1.sql".parse().unwrap();
        assert!(matches!(
            ctx.evaluate(&expr, &SourceRange::default()),
            EvalOutcome::Value(_)
        ));

        let expr: hcl_edit::expr::Expression = "query.q1.sql".parse().unwrap();
        assert!(matches!(
            ctx.evaluate(&expr, &SourceRange::default()),
            EvalOutcome::Unresolved(_)
        ));
    }

    #[test]
    fn variable_overrides_win_over_later_binds() {
        let mut overrides = IndexMap::new();
        overrides.insert("region".to_string(), Value::String("us".into()));
        let mut ctx = ctx().with_variables(overrides);

        // a decoded variable default must not displace the seed
        let mut var = crate::resource::Variable::new(ResourceCore::new(
            BlockType::Variable,
            &["region".to_string()],
            "acme",
            SourceRange::default(),
        ));
        var.value = Value::String("eu".into());
        ctx.register_resource(&Resource::Variable(var));
        ctx.rebuild_eval_context();

        let expr: hcl_edit::expr::Expression = "var.region".parse().unwrap();
        let EvalOutcome::Value(value) = ctx.evaluate(&expr, &SourceRange::default()) else {
            panic!("expected value");
        };
        assert_eq!(value, Value::String("us".into()));
    }
}
