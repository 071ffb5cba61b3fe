//! Benchmark resource

use super::ResourceCore;
use crate::tree::TreeDiff;

/// A tree-capable grouping of queries and other benchmarks
///
/// `declared_children` is the child list as written in source.  `children`
/// and `parents` are filled by tree assembly after all decode passes:
/// children hold the relationship (the child resource itself is owned by its
/// own mod), parents are back-references only.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Benchmark {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub documentation: Option<String>,
    pub display: Option<String>,
    #[serde(rename = "type")]
    pub benchmark_type: Option<String>,
    pub width: Option<i64>,
    pub declared_children: Vec<String>,
    pub children: Vec<String>,
    pub parents: Vec<String>,
}

impl Benchmark {
    pub fn new(core: ResourceCore) -> Self {
        Self {
            core,
            documentation: None,
            display: None,
            benchmark_type: None,
            width: None,
            declared_children: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Fill unset properties from a base benchmark
    pub fn merge_base(&mut self, base: &Benchmark) {
        if self.documentation.is_none() {
            self.documentation = base.documentation.clone();
        }
        if self.display.is_none() {
            self.display = base.display.clone();
        }
        if self.benchmark_type.is_none() {
            self.benchmark_type = base.benchmark_type.clone();
        }
        if self.width.is_none() {
            self.width = base.width;
        }
        if self.declared_children.is_empty() {
            self.declared_children = base.declared_children.clone();
        }
    }

    /// Structural comparison against another decode of this benchmark
    pub fn diff(&self, other: &Benchmark) -> TreeDiff {
        let mut diff = TreeDiff::new(self.core.full_name.clone());

        if self.core.title != other.core.title {
            diff.add_property_diff("title");
        }
        if self.core.description != other.core.description {
            diff.add_property_diff("description");
        }
        if self.core.tags != other.core.tags {
            diff.add_property_diff("tags");
        }
        if self.benchmark_type != other.benchmark_type {
            diff.add_property_diff("type");
        }
        if self.display != other.display {
            diff.add_property_diff("display");
        }
        if self.width != other.width {
            diff.add_property_diff("width");
        }

        diff.populate_child_diffs(&self.children, &other.children);
        diff
    }
}
