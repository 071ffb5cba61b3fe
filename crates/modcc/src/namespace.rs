//! The reference namespace
//!
//! [ReferenceValues] is the raw data the evaluation context is built from.
//! When resolving references like
//! - `query.q1`
//! - `var.v1`
//! - `mod1.query.my_query.sql`
//!
//! it is keyed by mod alias, then resource type, then resource name. The
//! current mod's alias is `"local"` and its entries are flattened one level
//! shallower than dependency aliases, so `var.x` means "my variable x" and
//! `dep.var.x` means "dependency dep's variable x".
//!
//! A name, once bound, is never overwritten (first writer wins). This
//! preserves externally pre-seeded values such as variable values supplied on
//! the command line.

use crate::reference::SymbolRef;
use hcl::eval::Context;
use hcl::{Identifier, Value};
use indexmap::IndexMap;

/// Alias under which the current mod's own values are stored
pub const LOCAL_ALIAS: &str = "local";

/// resource type -> name -> value
pub type ReferenceTypeValues = IndexMap<String, IndexMap<String, Value>>;

/// How connection values enter the namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionBinding {
    /// Fully resolved connection values are available at decode time
    Early,
    /// Only placeholder descriptors are bound; real resolution happens after
    /// parsing
    #[default]
    Late,
}

/// An externally supplied connection descriptor
///
/// `value` carries the resolved value for early binding; late binding only
/// uses the identity fields.
#[derive(Debug, Clone, derive_new::new)]
pub struct ConnectionSeed {
    pub connection_type: String,
    pub short_name: String,
    #[new(default)]
    pub value: Option<Value>,
}

impl ConnectionSeed {
    /// Placeholder descriptor bound under late binding
    fn temporary_value(&self) -> Value {
        let mut map = hcl::value::Map::new();
        map.insert(
            "name".into(),
            Value::String(format!(
                "connection.{}.{}",
                self.connection_type, self.short_name
            )),
        );
        map.insert("short_name".into(), Value::String(self.short_name.clone()));
        map.insert("type".into(), Value::String(self.connection_type.clone()));
        map.insert("resource_type".into(), Value::String("connection".into()));
        map.insert("temporary".into(), Value::Bool(true));
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceValues {
    /// mod alias -> resource type -> name -> value
    values: IndexMap<String, ReferenceTypeValues>,
}

impl ReferenceValues {
    pub fn new() -> Self {
        let mut values = IndexMap::new();
        values.insert(LOCAL_ALIAS.to_string(), ReferenceTypeValues::new());
        Self { values }
    }

    /// Bind a value; first writer wins
    ///
    /// `name_path` is `[name]`, or `[subtype, name]` for subtyped resources
    /// which nest one level deeper. Returns false when the name was already
    /// bound (the existing value is kept).
    pub fn bind(&mut self, alias: &str, resource_type: &str, name_path: &[&str], value: Value) -> bool {
        let for_alias = self.values.entry(alias.to_string()).or_default();
        let for_type = for_alias.entry(resource_type.to_string()).or_default();

        match name_path {
            [name] => {
                if for_type.contains_key(*name) {
                    tracing::trace!(
                        alias,
                        resource_type,
                        name = *name,
                        "already bound, keeping existing value"
                    );
                    return false;
                }
                for_type.insert(name.to_string(), value);
                true
            }
            [subtype, name] => {
                let slot = for_type
                    .entry(subtype.to_string())
                    .or_insert_with(|| Value::Object(hcl::value::Map::new()));
                let Value::Object(map) = slot else {
                    return false;
                };
                if map.contains_key(*name) {
                    return false;
                }
                map.insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Build the variable map the evaluation context exposes
    ///
    /// Idempotent given the same inputs; call after every batch of mutations
    /// and before the next decode pass.
    pub fn build_vars(
        &self,
        binding: ConnectionBinding,
        connections: &[ConnectionSeed],
        config_value_maps: &IndexMap<String, hcl::value::Map<String, Value>>,
    ) -> hcl::value::Map<String, Value> {
        let mut vars = hcl::value::Map::new();

        for (alias, type_values) in &self.values {
            if alias == LOCAL_ALIAS {
                // flattened: var.x rather than local_mod.var.x
                for (resource_type, names) in type_values {
                    vars.insert(resource_type.clone(), object_from(names));
                }
                continue;
            }

            let mut for_alias = hcl::value::Map::new();
            for (resource_type, names) in type_values {
                for_alias.insert(resource_type.clone(), object_from(names));
            }
            vars.insert(alias.clone(), Value::Object(for_alias));
        }

        // host supplied config value maps are merged verbatim under their own
        // top level key
        for (name, value_map) in config_value_maps {
            vars.insert(name.clone(), Value::Object(value_map.clone()));
        }

        if binding == ConnectionBinding::Late && !connections.is_empty() {
            let entry = vars
                .entry("connection".to_string())
                .or_insert_with(|| Value::Object(hcl::value::Map::new()));
            if let Value::Object(by_type) = entry {
                for seed in connections {
                    let slot = by_type
                        .entry(seed.connection_type.clone())
                        .or_insert_with(|| Value::Object(hcl::value::Map::new()));
                    if let Value::Object(names) = slot {
                        names
                            .entry(seed.short_name.clone())
                            .or_insert_with(|| seed.temporary_value());
                    }
                }
            }
        }

        vars
    }

    /// Build the evaluation context from a variable map
    pub fn build_context(vars: &hcl::value::Map<String, Value>) -> Context<'static> {
        let mut ctx = Context::new();
        for (name, value) in vars {
            ctx.declare_var(Identifier::sanitized(name), value.clone());
        }
        ctx
    }
}

fn object_from(names: &IndexMap<String, Value>) -> Value {
    Value::Object(names.clone().into_iter().collect())
}

/// Whether a symbol path can be traversed in the given variable map
///
/// A path that runs into a missing key is unresolved; a path that bottoms out
/// in a non-object value early is considered resolved (further traversal
/// failures are value shape errors, not missing symbols).
pub fn resolves(vars: &hcl::value::Map<String, Value>, symbol: &SymbolRef) -> bool {
    let segments = symbol.segments();
    let Some(first) = segments.first() else {
        return false;
    };

    let mut current = match vars.get(first.as_str()) {
        Some(value) => value,
        None => return false,
    };

    for segment in &segments[1..] {
        match current {
            Value::Object(map) => match map.get(segment.as_str()) {
                Some(value) => current = value,
                None => return false,
            },
            _ => return true,
        }
    }

    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reference::collect_symbol_refs;
    use pretty_assertions::assert_eq;

    fn symbol(path: &str) -> SymbolRef {
        let expr: hcl_edit::expr::Expression = path.parse().unwrap();
        collect_symbol_refs(&expr.into()).remove(0)
    }

    #[test]
    fn first_writer_wins() {
        let mut values = ReferenceValues::new();
        assert!(values.bind(LOCAL_ALIAS, "var", &["region"], Value::String("seeded".into())));
        assert!(!values.bind(LOCAL_ALIAS, "var", &["region"], Value::String("decoded".into())));

        let vars = values.build_vars(ConnectionBinding::Late, &[], &IndexMap::new());
        let Some(Value::Object(var_map)) = vars.get("var") else {
            panic!("var map missing");
        };
        assert_eq!(var_map.get("region"), Some(&Value::String("seeded".into())));
    }

    #[test]
    fn local_alias_is_flattened_dependency_alias_is_not() {
        let mut values = ReferenceValues::new();
        values.bind(LOCAL_ALIAS, "var", &["x"], Value::Bool(true));
        values.bind("dep", "var", &["x"], Value::Bool(false));

        let vars = values.build_vars(ConnectionBinding::Late, &[], &IndexMap::new());
        assert!(resolves(&vars, &symbol("var.x")));
        assert!(resolves(&vars, &symbol("dep.var.x")));
        assert!(!resolves(&vars, &symbol("dep.var.y")));
    }

    #[test]
    fn late_binding_adds_temporary_placeholders() {
        let values = ReferenceValues::new();
        let seeds = vec![ConnectionSeed::new("postgres".into(), "main".into())];
        let vars = values.build_vars(ConnectionBinding::Late, &seeds, &IndexMap::new());

        let Some(Value::Object(by_type)) = vars.get("connection") else {
            panic!("connection map missing");
        };
        let Some(Value::Object(names)) = by_type.get("postgres") else {
            panic!("postgres map missing");
        };
        let Some(Value::Object(descriptor)) = names.get("main") else {
            panic!("descriptor missing");
        };
        assert_eq!(descriptor.get("temporary"), Some(&Value::Bool(true)));
        assert!(descriptor.get("host").is_none());
    }

    #[test]
    fn config_value_maps_are_merged_verbatim() {
        let values = ReferenceValues::new();
        let mut notifiers = hcl::value::Map::new();
        notifiers.insert("default".to_string(), Value::String("slack".into()));
        let mut config = IndexMap::new();
        config.insert("notifier".to_string(), notifiers);

        let vars = values.build_vars(ConnectionBinding::Late, &[], &config);
        assert!(resolves(&vars, &symbol("notifier.default")));
    }

    #[test]
    fn subtyped_binding_nests_one_level_deeper() {
        let mut values = ReferenceValues::new();
        values.bind(
            LOCAL_ALIAS,
            "connection",
            &["postgres", "main"],
            Value::Bool(true),
        );
        let vars = values.build_vars(ConnectionBinding::Late, &[], &IndexMap::new());
        assert!(resolves(&vars, &symbol("connection.postgres.main")));
        assert!(!resolves(&vars, &symbol("connection.postgres.other")));
    }
}
