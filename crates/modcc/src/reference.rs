//! Resource reference names and symbol paths
//!
//! A resource is referred to in expressions and child lists by a dotted name.
//! Supported shapes:
//! - `type.name` (current mod)
//! - `type.subtype.name` (current mod, subtyped resource such as a connection)
//! - `alias.type.name` (dependency mod)
//! - `alias.type.subtype.name`
//!
//! The three part form is ambiguous on its face; it is resolved by the fixed
//! set of resource types that carry a subtype ([has_subtypes]). Composing a
//! [ParsedName] back into a string and re-parsing yields the same structure.

use crate::visit::VisitTraversals;
use hcl::{Expression, Identifier, Traversal, TraversalOperator};

/// Reference-form resource type strings
///
/// These are the names used in expressions (`var.x`, `local.y`), which differ
/// from block identifiers for variables (`variable` block, `var` reference)
/// and locals (`locals` block, `local` reference).
pub const REFERENCE_TYPES: &[&str] = &[
    "mod",
    "var",
    "local",
    "query",
    "benchmark",
    "connection",
    "pipeline",
];

/// Resource types whose short name is qualified by a subtype label
pub fn has_subtypes(reference_type: &str) -> bool {
    reference_type == "connection"
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NameError {
    #[error("'{0}' is not a valid resource reference")]
    InvalidResourceName(String),
    #[error("'{0}' is not a known resource type")]
    UnknownResourceType(String),
}

/// Structured decomposition of a dotted resource reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub mod_alias: Option<String>,
    pub item_type: String,
    pub subtype: Option<String>,
    pub name: String,
}

impl ParsedName {
    pub fn parse(input: &str) -> Result<Self, NameError> {
        let parts: Vec<&str> = input.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(NameError::InvalidResourceName(input.to_string()));
        }

        let (mod_alias, item_type, subtype, name) = match parts.as_slice() {
            [item_type, name] => (None, *item_type, None, *name),
            [first, second, name] => {
                if has_subtypes(first) {
                    (None, *first, Some(*second), *name)
                } else {
                    (Some(*first), *second, None, *name)
                }
            }
            [alias, item_type, subtype, name] if has_subtypes(item_type) => {
                (Some(*alias), *item_type, Some(*subtype), *name)
            }
            _ => return Err(NameError::InvalidResourceName(input.to_string())),
        };

        if !REFERENCE_TYPES.contains(&item_type) {
            return Err(NameError::UnknownResourceType(item_type.to_string()));
        }

        Ok(Self {
            mod_alias: mod_alias.map(str::to_string),
            item_type: item_type.to_string(),
            subtype: subtype.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// The `type.name` (or `type.subtype.name`) form used as a lookup key
    /// within a single mod
    pub fn unqualified(&self) -> String {
        match &self.subtype {
            Some(subtype) => format!("{}.{}.{}", self.item_type, subtype, self.name),
            None => format!("{}.{}", self.item_type, self.name),
        }
    }

    pub fn compose(&self) -> String {
        match &self.mod_alias {
            Some(alias) => format!("{}.{}", alias, self.unqualified()),
            None => self.unqualified(),
        }
    }
}

impl std::fmt::Display for ParsedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.compose())
    }
}

/// A dotted symbol path referenced by an expression, e.g. `var.region` or
/// `dep.query.q1.sql`
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SymbolRef(#[serde(serialize_with = "serialize_path")] Vec<Identifier>);

fn serialize_path<S: serde::Serializer>(
    path: &[Identifier],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&join_path(path))
}

impl SymbolRef {
    pub fn new(path: Vec<Identifier>) -> Self {
        Self(path)
    }

    pub fn segments(&self) -> &[Identifier] {
        &self.0
    }

    /// Longest `GetAttr` prefix of a traversal, the part that names a symbol
    pub fn from_traversal(traversal: &Traversal) -> Option<Self> {
        let Expression::Variable(var) = &traversal.expr else {
            return None;
        };

        let mut path = vec![Identifier::unchecked(var.as_str())];
        for operator in &traversal.operators {
            let TraversalOperator::GetAttr(ident) = operator else {
                break;
            };

            path.push(ident.clone());
        }

        Some(Self(path))
    }
}

impl std::fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&join_path(&self.0))
    }
}

fn join_path(path: &[Identifier]) -> String {
    path.iter()
        .map(Identifier::as_str)
        .collect::<Vec<_>>()
        .join(".")
}

/// Collect every symbol path an expression refers to
pub fn collect_symbol_refs(expr: &Expression) -> Vec<SymbolRef> {
    let mut refs: Vec<SymbolRef> = Vec::new();
    expr.visit_traversals(&mut |traversal: &Traversal| {
        if let Some(symbol) = SymbolRef::from_traversal(traversal) {
            if !refs.contains(&symbol) {
                refs.push(symbol);
            }
        }
    });
    refs
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(input: &str) {
        let parsed = ParsedName::parse(input).expect("must parse");
        assert_eq!(parsed.compose(), input);
        assert_eq!(ParsedName::parse(&parsed.compose()).unwrap(), parsed);
    }

    #[test]
    fn parse_compose_roundtrip() {
        roundtrip("query.q1");
        roundtrip("connection.postgres.main");
        roundtrip("dep_alias.query.q1");
        roundtrip("dep_alias.connection.postgres.main");
    }

    #[test]
    fn three_part_prefers_subtype_over_alias() {
        let parsed = ParsedName::parse("connection.postgres.main").unwrap();
        assert_eq!(parsed.mod_alias, None);
        assert_eq!(parsed.subtype.as_deref(), Some("postgres"));

        let parsed = ParsedName::parse("dep.query.q1").unwrap();
        assert_eq!(parsed.mod_alias.as_deref(), Some("dep"));
        assert_eq!(parsed.subtype, None);
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(ParsedName::parse("query").is_err());
        assert!(ParsedName::parse("query..q1").is_err());
        assert!(ParsedName::parse("dep.widget.q1").is_err());
    }

    #[test]
    fn collects_symbols_from_nested_expressions() {
        let expr: hcl_edit::expr::Expression = "[var.region, local.zone[0]]".parse().unwrap();
        let refs = collect_symbol_refs(&expr.into());
        let rendered: Vec<String> = refs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["var.region", "local.zone"]);
    }
}
