//! Decode failure classification and dependency tracking
//!
//! Every attribute evaluation goes through [evaluate_expression], which
//! returns a structured [EvalOutcome] instead of string-matched error text:
//! - `Value`: evaluation succeeded
//! - `Unresolved`: every error was a "symbol not yet available" kind; holds
//!   the symbol paths the expression still needs
//! - `Fatal`: anything else
//!
//! Deferred blocks are recorded in the [DependencyTracker] between passes.

use crate::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use crate::namespace::resolves;
use crate::reference::{collect_symbol_refs, SymbolRef};
use hcl::eval::{Context, ErrorKind, Evaluate};
use hcl::{Expression, Value};
use indexmap::IndexMap;

/// Outcome of evaluating one expression against the current namespace
#[derive(Debug)]
pub enum EvalOutcome {
    Value(Value),
    Unresolved(Vec<SymbolRef>),
    Fatal(Diagnostics),
}

/// Whether an evaluation error means "symbol not yet available"
///
/// - undefined variable: the namespace has no top level node of that name yet
/// - no such key: the referenced object exists but is partially populated
/// - index out of bounds: the referenced collection is missing an element
fn is_missing_symbol_error(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UndefinedVar(_) | ErrorKind::NoSuchKey(_) | ErrorKind::Index(_)
    )
}

/// Evaluate an expression, classifying failure as deferrable or fatal
pub fn evaluate_expression(
    expr: &Expression,
    eval_ctx: &Context,
    vars: &hcl::value::Map<String, Value>,
    range: &SourceRange,
) -> EvalOutcome {
    match expr.evaluate(eval_ctx) {
        Ok(value) => EvalOutcome::Value(value),
        Err(_) => {
            // re-evaluate in place to collect every error, not just the first
            let mut probe = expr.clone();
            let Err(errors) = probe.evaluate_in_place(eval_ctx) else {
                // in-place evaluation resolved what evaluate could not;
                // treat the partially reduced expression as fatal
                return EvalOutcome::Fatal(
                    Diagnostic::error("Inconsistent expression evaluation")
                        .with_range(range.clone())
                        .into(),
                );
            };

            if !errors.iter().all(|e| is_missing_symbol_error(e.kind())) {
                let diags = errors
                    .iter()
                    .map(|e| {
                        Diagnostic::error("Failed to evaluate expression")
                            .with_detail(e.to_string())
                            .with_range(range.clone())
                    })
                    .collect();
                return EvalOutcome::Fatal(diags);
            }

            // the errors are all deferrable; extract the symbols the
            // expression refers to that the namespace cannot resolve yet
            let missing: Vec<SymbolRef> = collect_symbol_refs(expr)
                .into_iter()
                .filter(|symbol| !resolves(vars, symbol))
                .collect();

            if missing.is_empty() {
                // nothing identifiable to wait for - retrying cannot help
                let diags = errors
                    .iter()
                    .map(|e| {
                        Diagnostic::error("Failed to evaluate expression")
                            .with_detail(e.to_string())
                            .with_range(range.clone())
                    })
                    .collect();
                return EvalOutcome::Fatal(diags);
            }

            EvalOutcome::Unresolved(missing)
        }
    }
}

/// A block whose decode deferred; exists only between passes
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct UnresolvedBlock {
    /// Dependency key: the block's unqualified name, parent-qualified for
    /// nested blocks
    pub name: String,
    /// Symbol paths the block is waiting on
    pub missing: Vec<SymbolRef>,
}

/// Records what each deferred block is waiting on
#[derive(Debug, Default)]
pub struct DependencyTracker {
    unresolved: IndexMap<String, UnresolvedBlock>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or extend) a deferred block's missing symbols
    pub fn record(&mut self, name: &str, missing: Vec<SymbolRef>) {
        tracing::debug!(name, ?missing, "block deferred");
        match self.unresolved.get_mut(name) {
            Some(existing) => {
                for symbol in missing {
                    if !existing.missing.contains(&symbol) {
                        existing.missing.push(symbol);
                    }
                }
            }
            None => {
                self.unresolved
                    .insert(name.to_string(), UnresolvedBlock::new(name.to_string(), missing));
            }
        }
    }

    /// Remove a block (and any of its nested keys) once it decodes
    pub fn resolve(&mut self, name: &str) {
        let nested_prefix = format!("{name}.");
        self.unresolved
            .retain(|key, _| key != name && !key.starts_with(&nested_prefix));
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &UnresolvedBlock> {
        self.unresolved.values()
    }

    /// Human readable "what's waiting on what", for terminal failure output
    pub fn dump(&self) -> String {
        let mut lines = Vec::with_capacity(self.unresolved.len());
        for block in self.unresolved.values() {
            let missing: Vec<String> = block.missing.iter().map(ToString::to_string).collect();
            lines.push(format!("\t{} -> missing: {}", block.name, missing.join(", ")));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::namespace::{ConnectionBinding, ReferenceValues, LOCAL_ALIAS};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn outcome_for(input: &str, values: &ReferenceValues) -> EvalOutcome {
        let vars = values.build_vars(ConnectionBinding::Late, &[], &IndexMap::new());
        let ctx = ReferenceValues::build_context(&vars);
        let expr: hcl_edit::expr::Expression = input.parse().unwrap();
        evaluate_expression(&expr.into(), &ctx, &vars, &SourceRange::default())
    }

    #[test]
    fn undefined_variable_defers() {
        let values = ReferenceValues::new();
        let EvalOutcome::Unresolved(missing) = outcome_for("var.region", &values) else {
            panic!("expected deferral");
        };
        assert_eq!(missing[0].to_string(), "var.region");
    }

    #[test]
    fn missing_key_on_partial_object_defers() {
        let mut values = ReferenceValues::new();
        values.bind(LOCAL_ALIAS, "query", &["other"], Value::Bool(true));
        let EvalOutcome::Unresolved(missing) = outcome_for("query.q1", &values) else {
            panic!("expected deferral");
        };
        assert_eq!(missing[0].to_string(), "query.q1");
    }

    #[test]
    fn resolved_symbol_evaluates() {
        let mut values = ReferenceValues::new();
        values.bind(LOCAL_ALIAS, "var", &["region"], Value::String("eu".into()));
        let EvalOutcome::Value(value) = outcome_for("var.region", &values) else {
            panic!("expected value");
        };
        assert_eq!(value, Value::String("eu".into()));
    }

    #[test]
    fn type_error_is_fatal() {
        let mut values = ReferenceValues::new();
        values.bind(LOCAL_ALIAS, "var", &["region"], Value::String("eu".into()));
        let EvalOutcome::Fatal(diags) = outcome_for("var.region + 1", &values) else {
            panic!("expected fatal outcome");
        };
        assert!(diags.has_errors());
    }

    #[test]
    fn tracker_resolve_removes_nested_keys() {
        let mut tracker = DependencyTracker::new();
        tracker.record("pipeline.p", vec![]);
        tracker.record("pipeline.p.step1", vec![]);
        tracker.record("pipeline.p2", vec![]);
        tracker.resolve("pipeline.p");
        assert_eq!(tracker.unresolved_count(), 1);
        assert_eq!(tracker.blocks().next().unwrap().name, "pipeline.p2");
    }

    #[test]
    fn dump_lists_missing_symbols() {
        let mut values = ReferenceValues::new();
        values.bind(LOCAL_ALIAS, "var", &["a"], Value::Bool(true));
        let EvalOutcome::Unresolved(missing) = outcome_for("[var.a, var.b]", &values) else {
            panic!("expected deferral");
        };

        let mut tracker = DependencyTracker::new();
        tracker.record("query.q1", missing);
        assert!(tracker.dump().contains("query.q1 -> missing: var.b"));
    }
}
