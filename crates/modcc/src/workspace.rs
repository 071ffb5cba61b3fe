//! Loading a root mod together with its dependency mods
//!
//! Dependency packages arrive already version-resolved and located on disk
//! (the installer is an external collaborator); each one decodes into an
//! independent Mod. Decoding within a single mod is sequential, but
//! independent dependency packages decode in parallel, one scoped thread per
//! package, with a mutex protecting the shared result map while results
//! attach to the root load.

use crate::context::DecodeContext;
use crate::decode::{parse_mod_definition, Decoder};
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::mod_def::Mod;
use crate::namespace::{ConnectionBinding, ConnectionSeed};
use crate::sources::ModSources;
use hcl::Value;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// One resolved dependency package, ready to decode
#[derive(Debug, derive_new::new)]
pub struct DependencyPackage {
    /// The alias under which the root mod references this dependency
    pub alias: String,
    pub version: Option<String>,
    pub mod_path: PathBuf,
    pub sources: ModSources,
}

/// Externally supplied inputs for a workspace load
#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Pre-seeded variable values for the root mod (e.g. from the CLI)
    pub variables: IndexMap<String, Value>,
    pub connections: Vec<ConnectionSeed>,
    pub binding: ConnectionBinding,
    pub config_value_maps: IndexMap<String, hcl::value::Map<String, Value>>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl LoadOptions {
    fn context_for(&self, mod_def: Mod, include_variables: bool) -> DecodeContext {
        let mut ctx = DecodeContext::new(mod_def)
            .with_connections(self.connections.clone(), self.binding)
            .with_config_value_maps(&self.config_value_maps);
        if include_variables {
            ctx = ctx.with_variables(self.variables.clone());
        }
        if let Some(cancel) = &self.cancel {
            ctx = ctx.with_cancel_flag(cancel.clone());
        }
        ctx
    }
}

/// Decode the root package and its direct dependencies
///
/// Returns the finalized root Mod; diagnostics accumulate across the whole
/// load and are never silently dropped.
pub fn load_workspace(
    decoder: &Decoder,
    root_path: &Path,
    root_sources: &ModSources,
    dependencies: Vec<DependencyPackage>,
    options: &LoadOptions,
) -> (Mod, Diagnostics) {
    let mut diags = Diagnostics::new();

    // decode dependency packages in parallel; the mutex guards the shared
    // result map while completed loads attach
    let results: Mutex<Vec<(Mod, Diagnostics)>> = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for package in &dependencies {
            let results = &results;
            scope.spawn(move || {
                let (dep_mod, dep_diags) = load_dependency(decoder, package, options);
                results
                    .lock()
                    .expect("dependency result lock poisoned")
                    .push((dep_mod, dep_diags));
            });
        }
    });

    let (root_mod, root_diags) = parse_root_definition(decoder, root_path, root_sources);
    diags.extend(root_diags);
    let mut ctx = options.context_for(root_mod, true);

    let mut results = results.into_inner().expect("dependency result lock poisoned");
    // deterministic attach order regardless of completion order
    results.sort_by(|(a, _), (b, _)| a.alias().cmp(b.alias()));
    for (dep_mod, dep_diags) in results {
        diags.extend(dep_diags);
        diags.extend(ctx.add_dependency_mod(dep_mod));
    }

    diags.extend(decoder.decode(&mut ctx, root_sources));
    (ctx.current_mod, diags)
}

/// Convenience wrapper: load a workspace directly from a package directory
pub fn load_workspace_from_path(
    decoder: &Decoder,
    path: &Path,
    options: &LoadOptions,
) -> Result<(Mod, Diagnostics), crate::sources::LoadError> {
    let mut sources = ModSources::default();
    sources.load_directory(path)?;
    Ok(load_workspace(decoder, path, &sources, Vec::new(), options))
}

fn load_dependency(
    decoder: &Decoder,
    package: &DependencyPackage,
    options: &LoadOptions,
) -> (Mod, Diagnostics) {
    tracing::info!(alias = %package.alias, "loading dependency mod");
    let mut diags = Diagnostics::new();

    let (mod_def, def_diags) = parse_mod_definition(decoder, &package.sources, &package.mod_path);
    diags.extend(def_diags);
    let mut mod_def = mod_def.unwrap_or_else(|| Mod::default_for_path(&package.mod_path));
    mod_def.dependency_alias = Some(package.alias.clone());
    mod_def.version = package.version.clone();

    // dependency mods do not see the root mod's variable seeds
    let mut ctx = options.context_for(mod_def, false);
    diags.extend(decoder.decode(&mut ctx, &package.sources));
    (ctx.current_mod, diags)
}

fn parse_root_definition(
    decoder: &Decoder,
    root_path: &Path,
    sources: &ModSources,
) -> (Mod, Diagnostics) {
    let (mod_def, diags) = parse_mod_definition(decoder, sources, root_path);
    match mod_def {
        Some(mod_def) => (mod_def, diags),
        None => {
            tracing::debug!(path = %root_path.display(), "no mod definition, creating default mod");
            (Mod::default_for_path(root_path), diags)
        }
    }
}

/// Verify that a mod with dependency requirements has them installed
///
/// The caller supplies the set of installed packages; a requirement with no
/// matching package is reported rather than silently skipped.
pub fn ensure_dependencies_installed(
    mod_def: &Mod,
    installed: &[DependencyPackage],
) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for requirement in &mod_def.require.mods {
        let found = installed.iter().any(|package| {
            package.alias == requirement.name
                || package
                    .mod_path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy() == requirement.name)
        });
        if !found {
            diags.push(Diagnostic::error(format!(
                "not all dependencies are installed - missing '{}'",
                requirement.name
            )));
        }
    }
    diags
}
