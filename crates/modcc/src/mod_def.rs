//! The Mod package container
//!
//! A Mod owns the decoded resource collection of one package of source files
//! plus the dependency constraints its `require` block declares (consumed by
//! the installer, not produced here). A reload creates a new Mod rather than
//! mutating the old one; [Mod::equals] compares two loads structurally.

use crate::diagnostic::{Diagnostic, Diagnostics, SourceRange};
use crate::reference::ParsedName;
use crate::resource::Resource;
use hcl::Value;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Mod short name used when a package directory defines no `mod` block
const DEFAULT_MOD_NAME: &str = "local";

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Mod {
    pub short_name: String,
    /// `mod.<shortName>`
    pub full_name: String,
    /// Installation location of the package
    #[serde(skip)]
    pub mod_path: PathBuf,
    /// Path of the mod definition file; empty for a default mod
    #[serde(skip)]
    pub mod_file_path: Option<PathBuf>,
    #[serde(skip)]
    pub decl_range: SourceRange,

    pub title: Option<String>,
    pub description: Option<String>,
    pub documentation: Option<String>,
    pub tags: IndexMap<String, String>,
    pub categories: Vec<String>,
    pub color: Option<String>,
    /// Default database for queries in this mod; either a connection string
    /// or a connection reference
    pub database: Option<String>,

    /// Set when this mod was loaded as a dependency
    pub version: Option<String>,
    pub dependency_alias: Option<String>,

    pub require: Require,
    pub resources: ModResources,
    /// Full names of the mod's direct tree children
    pub children: Vec<String>,
}

impl Mod {
    pub fn new(short_name: &str, mod_path: &Path, decl_range: SourceRange) -> Self {
        Self {
            short_name: short_name.to_string(),
            full_name: format!("mod.{short_name}"),
            mod_path: mod_path.to_path_buf(),
            mod_file_path: None,
            decl_range,
            title: None,
            description: None,
            documentation: None,
            tags: IndexMap::new(),
            categories: Vec::new(),
            color: None,
            database: None,
            version: None,
            dependency_alias: None,
            require: Require::default(),
            resources: ModResources::default(),
            children: Vec::new(),
        }
    }

    /// Default mod for a package directory without a mod definition
    pub fn default_for_path(mod_path: &Path) -> Self {
        let mut def = Self::new(DEFAULT_MOD_NAME, mod_path, SourceRange::default());
        let folder_name = mod_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        def.title = folder_name;
        def
    }

    pub fn is_default(&self) -> bool {
        self.mod_file_path.is_none()
    }

    /// `mod.<shortName>`
    pub fn name(&self) -> &str {
        &self.full_name
    }

    /// The alias under which expressions refer to this mod's resources
    pub fn alias(&self) -> &str {
        self.dependency_alias.as_deref().unwrap_or(&self.short_name)
    }

    pub fn add_resource(&mut self, resource: Resource) -> Diagnostics {
        self.resources.add(resource)
    }

    pub fn get_resource(&self, parsed_name: &ParsedName) -> Option<&Resource> {
        self.resources.get(parsed_name)
    }

    /// Visit every resource; stop when the visitor returns false
    pub fn walk_resources(&self, mut visitor: impl FnMut(&Resource) -> bool) {
        self.resources.walk(&mut visitor)
    }

    pub fn top_level_resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(|r| r.core().is_top_level)
    }

    pub fn get_children(&self) -> &[String] {
        &self.children
    }

    pub fn has_dependent_mods(&self) -> bool {
        !self.require.mods.is_empty()
    }

    pub fn get_mod_dependency(&self, name: &str) -> Option<&ModRequirement> {
        self.require.mods.iter().find(|m| m.name == name)
    }

    /// Structural comparison with another load of this package
    pub fn equals(&self, other: &Mod) -> bool {
        self.short_name == other.short_name
            && self.full_name == other.full_name
            && self.title == other.title
            && self.description == other.description
            && self.documentation == other.documentation
            && self.tags == other.tags
            && self.categories == other.categories
            && self.color == other.color
            && self.database == other.database
            && self.children == other.children
            && self.resources == other.resources
    }
}

/// Declared dependency constraints of a mod, from its `require` block
///
/// Consumed by the version resolver/installer; this engine only decodes it.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Require {
    pub mods: Vec<ModRequirement>,
}

impl Require {
    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, derive_new::new)]
pub struct ModRequirement {
    /// Dependency name, e.g. `github.com/acme/mod-insights`
    pub name: String,
    pub version: String,
    /// Variable values passed down to the dependency
    #[new(default)]
    pub args: IndexMap<String, Value>,
}

/// All decoded resources of one mod, keyed by unqualified name
///
/// Insertion order is preserved; a name can only be bound once.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ModResources {
    resources: IndexMap<String, Resource>,
}

impl ModResources {
    pub fn add(&mut self, resource: Resource) -> Diagnostics {
        let key = resource.core().unqualified_name.clone();
        let mut diags = Diagnostics::new();
        if self.resources.contains_key(&key) {
            diags.push(
                Diagnostic::error(format!("Mod defines more than one resource named '{key}'"))
                    .with_range(resource.core().decl_range.clone()),
            );
            return diags;
        }
        tracing::debug!(name = %resource.name(), "resource added");
        self.resources.insert(key, resource);
        diags
    }

    pub fn get(&self, parsed_name: &ParsedName) -> Option<&Resource> {
        self.resources.get(&parsed_name.unqualified())
    }

    pub fn get_mut(&mut self, unqualified_name: &str) -> Option<&mut Resource> {
        self.resources.get_mut(unqualified_name)
    }

    pub fn walk(&self, visitor: &mut impl FnMut(&Resource) -> bool) {
        for resource in self.resources.values() {
            if !visitor(resource) {
                return;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.values_mut()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnostic::SourceRange;
    use crate::resource::{BlockType, Query, ResourceCore};

    fn query(name: &str) -> Resource {
        let core = ResourceCore::new(
            BlockType::Query,
            &[name.to_string()],
            "acme",
            SourceRange::default(),
        );
        let mut q = Query::new(core);
        q.sql = Some("select 1".into());
        Resource::Query(q)
    }

    #[test]
    fn duplicate_resource_name_is_rejected() {
        let mut mod_def = Mod::new("acme", Path::new("."), SourceRange::default());
        assert!(!mod_def.add_resource(query("q1")).has_errors());
        assert!(mod_def.add_resource(query("q1")).has_errors());
        assert_eq!(mod_def.resources.len(), 1);
    }

    #[test]
    fn get_resource_by_parsed_name() {
        let mut mod_def = Mod::new("acme", Path::new("."), SourceRange::default());
        mod_def.add_resource(query("q1"));
        let parsed = ParsedName::parse("query.q1").unwrap();
        assert!(mod_def.get_resource(&parsed).is_some());
    }

    #[test]
    fn default_mod_takes_folder_title() {
        let mod_def = Mod::default_for_path(Path::new("/workspaces/insights"));
        assert!(mod_def.is_default());
        assert_eq!(mod_def.short_name, "local");
        assert_eq!(mod_def.title.as_deref(), Some("insights"));
    }

    #[test]
    fn walk_stops_when_visitor_returns_false() {
        let mut mod_def = Mod::new("acme", Path::new("."), SourceRange::default());
        mod_def.add_resource(query("q1"));
        mod_def.add_resource(query("q2"));
        let mut seen = 0;
        mod_def.walk_resources(|_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }
}
