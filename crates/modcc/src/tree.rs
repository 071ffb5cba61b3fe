//! Resource tree assembly and comparison
//!
//! After the fixpoint loop completes, declared child lists are resolved into
//! parent/child links. A parent's `children` own the relationship; the child
//! resource stays owned by its own mod and only receives a back-reference.
//! Link failures are cross-reference errors: decoding is already done, so
//! they are fatal rather than deferrable.

use crate::context::DecodeContext;
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::mod_def::Mod;
use crate::reference::ParsedName;
use crate::resource::Resource;
use indexmap::IndexMap;

/// Resource types a benchmark may declare as children
const SUPPORTED_CHILDREN: &[&str] = &["benchmark", "query"];

/// Resolve every declared child list and link the tree
pub fn build_resource_tree(ctx: &mut DecodeContext) -> Diagnostics {
    let mut diags = Diagnostics::new();

    // collect edges first; linking mutates resources on both ends
    let mut edges: Vec<Edge> = Vec::new();
    for resource in ctx.current_mod.resources.iter() {
        let Resource::Benchmark(benchmark) = resource else {
            continue;
        };
        let (resolved, more_diags) = resolve_children(
            &benchmark.core.unqualified_name,
            &benchmark.core.full_name,
            &benchmark.declared_children,
            ctx,
        );
        edges.extend(resolved);
        diags.extend(more_diags);
    }

    for edge in edges {
        apply_edge(ctx, edge);
    }

    // top level benchmarks without parents become children of the mod
    let mod_name = ctx.current_mod.full_name.clone();
    let mut mod_children = Vec::new();
    for resource in ctx.current_mod.resources.iter_mut() {
        let Resource::Benchmark(benchmark) = resource else {
            continue;
        };
        if benchmark.parents.is_empty() && benchmark.core.is_top_level {
            benchmark.parents.push(mod_name.clone());
            mod_children.push(benchmark.core.full_name.clone());
        }
    }
    ctx.current_mod.children.extend(mod_children);

    diags
}

struct Edge {
    parent_unqualified: String,
    parent_full: String,
    child_alias: Option<String>,
    child_unqualified: String,
    child_full: String,
}

/// Resolve one parent's declared child names
///
/// Duplicate names yield exactly one diagnostic per duplicated name and the
/// child is attached once; an unresolvable name yields one diagnostic per
/// failure.
fn resolve_children(
    parent_unqualified: &str,
    parent_full: &str,
    declared: &[String],
    ctx: &DecodeContext,
) -> (Vec<Edge>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut edges = Vec::new();

    let mut name_counts: IndexMap<&str, usize> = IndexMap::new();
    for name in declared {
        let count = name_counts.entry(name.as_str()).or_insert(0);
        *count += 1;
        // raise one error per duplicated name, on its second occurrence
        if *count == 2 {
            diags.push(Diagnostic::error(format!(
                "'{parent_unqualified}' has duplicate child name '{name}'"
            )));
        }
        if *count > 1 {
            continue;
        }

        let parsed = match ParsedName::parse(name) {
            Ok(parsed) if SUPPORTED_CHILDREN.contains(&parsed.item_type.as_str()) => parsed,
            _ => {
                diags.push(Diagnostic::error(format!(
                    "Invalid child '{name}' of '{parent_unqualified}'"
                )));
                continue;
            }
        };

        // the owning mod is the current mod or one of its direct dependencies
        let Some(owner) = parsed
            .mod_alias
            .as_deref()
            .map_or(Some(&ctx.current_mod), |alias| ctx.get_mod(alias))
        else {
            diags.push(Diagnostic::error(format!(
                "Could not resolve mod for child '{name}' of '{parent_unqualified}'"
            )));
            continue;
        };

        let Some(child) = owner.get_resource(&parsed) else {
            diags.push(Diagnostic::error(format!(
                "Could not resolve child '{name}' of '{parent_unqualified}'"
            )));
            continue;
        };

        edges.push(Edge {
            parent_unqualified: parent_unqualified.to_string(),
            parent_full: parent_full.to_string(),
            child_alias: parsed.mod_alias.clone(),
            child_unqualified: parsed.unqualified(),
            child_full: child.name().to_string(),
        });
    }

    (edges, diags)
}

fn apply_edge(ctx: &mut DecodeContext, edge: Edge) {
    if let Some(Resource::Benchmark(parent)) = ctx
        .current_mod
        .resources
        .get_mut(&edge.parent_unqualified)
    {
        parent.children.push(edge.child_full.clone());
    }

    // back-reference on the child, which may live in a dependency mod
    let owner = match &edge.child_alias {
        Some(alias) => ctx.dependency_mod_mut(alias),
        None => Some(&mut ctx.current_mod),
    };
    if let Some(owner) = owner {
        if let Some(Resource::Benchmark(child)) = owner.resources.get_mut(&edge.child_unqualified)
        {
            child.parents.push(edge.parent_full);
        }
    }
}

/// Differences between two decodes of the same tree item
#[derive(Debug, Clone, Default, PartialEq, derive_new::new)]
pub struct TreeDiff {
    pub name: String,
    #[new(default)]
    pub changed_properties: Vec<String>,
    #[new(default)]
    pub added: Vec<String>,
    #[new(default)]
    pub removed: Vec<String>,
}

impl TreeDiff {
    pub fn add_property_diff(&mut self, property: &str) {
        if !self.changed_properties.iter().any(|p| p == property) {
            self.changed_properties.push(property.to_string());
        }
    }

    pub fn add_added_item(&mut self, name: &str) {
        self.added.push(name.to_string());
    }

    pub fn add_removed_item(&mut self, name: &str) {
        self.removed.push(name.to_string());
    }

    /// Compare two child name lists: reordering is a property change, names
    /// only present on one side are added/removed items
    pub fn populate_child_diffs(&mut self, old_children: &[String], new_children: &[String]) {
        for (i, child) in old_children.iter().enumerate() {
            if new_children.get(i).is_some_and(|new| new != child) {
                self.add_property_diff("children");
            }
            if !new_children.contains(child) {
                self.add_removed_item(child);
            }
        }
        for child in new_children {
            if !old_children.contains(child) {
                self.add_added_item(child);
            }
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_properties.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn merge(&mut self, other: &TreeDiff) {
        for added in &other.added {
            self.add_added_item(added);
        }
        for removed in &other.removed {
            self.add_removed_item(removed);
        }
        for changed in &other.changed_properties {
            self.add_property_diff(changed);
        }
    }
}

/// Whole-graph comparison of two loads, used to detect whether a reload
/// produced a materially different tree
pub fn diff_mods(old: &Mod, new: &Mod) -> TreeDiff {
    let mut diff = TreeDiff::new(new.full_name.clone());
    diff.populate_child_diffs(&old.children, &new.children);

    for resource in new.resources.iter() {
        let Resource::Benchmark(new_benchmark) = resource else {
            continue;
        };
        let parsed = ParsedName {
            mod_alias: None,
            item_type: "benchmark".to_string(),
            subtype: None,
            name: new_benchmark.core.short_name.clone(),
        };
        match old.get_resource(&parsed) {
            Some(Resource::Benchmark(old_benchmark)) => {
                let child_diff = old_benchmark.diff(new_benchmark);
                if child_diff.has_changes() {
                    diff.add_property_diff("children");
                    diff.merge(&child_diff);
                }
            }
            _ => diff.add_added_item(&new_benchmark.core.full_name),
        }
    }

    diff
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reordered_children_are_a_property_change() {
        let mut diff = TreeDiff::new("benchmark.b".into());
        diff.populate_child_diffs(
            &["a.query.one".into(), "a.query.two".into()],
            &["a.query.two".into(), "a.query.one".into()],
        );
        assert_eq!(diff.changed_properties, vec!["children"]);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn added_and_removed_children_are_reported() {
        let mut diff = TreeDiff::new("benchmark.b".into());
        diff.populate_child_diffs(&["a.query.one".into()], &["a.query.two".into()]);
        assert_eq!(diff.removed, vec!["a.query.one"]);
        assert_eq!(diff.added, vec!["a.query.two"]);
        assert!(diff.has_changes());
    }

    #[test]
    fn merge_deduplicates_property_diffs() {
        let mut a = TreeDiff::new("benchmark.b".into());
        a.add_property_diff("title");
        let mut b = TreeDiff::new("benchmark.b".into());
        b.add_property_diff("title");
        b.add_added_item("a.query.one");
        a.merge(&b);
        assert_eq!(a.changed_properties, vec!["title"]);
        assert_eq!(a.added, vec!["a.query.one"]);
    }
}
