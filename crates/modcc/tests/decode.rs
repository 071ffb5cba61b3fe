//! End to end decode tests
//!
//! Each test builds sources with the `mod_sources!` macro and runs a full
//! decode, exercising the fixpoint loop, the namespace and tree assembly
//! together.

use modcc::context::DecodeContext;
use modcc::decode::Decoder;
use modcc::diagnostic::Diagnostics;
use modcc::mod_def::Mod;
use modcc::mod_sources;
use modcc::namespace::{ConnectionBinding, ConnectionSeed};
use modcc::reference::ParsedName;
use modcc::resource::Resource;
use modcc::sources::ModSources;
use modcc::tree::diff_mods;
use modcc::workspace::{load_workspace, DependencyPackage, LoadOptions};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

fn decode(sources: &ModSources) -> (DecodeContext, Diagnostics) {
    let decoder = Decoder::standard();
    let mut ctx = DecodeContext::new(Mod::default_for_path(Path::new("/workspaces/acme")));
    let diags = decoder.decode(&mut ctx, sources);
    (ctx, diags)
}

fn get<'m>(mod_def: &'m Mod, name: &str) -> &'m Resource {
    let parsed = ParsedName::parse(name).expect("name must parse");
    mod_def
        .get_resource(&parsed)
        .unwrap_or_else(|| panic!("resource {name} missing"))
}

#[test]
fn variable_locals_resource_chain_takes_three_passes() {
    let sources = mod_sources! {r#"
    query "instances" { sql = "select * from ${local.full}" }
    locals { full = "${var.region}-x" }
    variable "region" { default = "eu" }
    "#};

    let (ctx, diags) = decode(&sources);
    assert!(!diags.has_errors(), "{diags}");
    assert_eq!(ctx.passes, 3);
    assert!(ctx.tracker.is_empty());

    let Resource::Local(local) = get(&ctx.current_mod, "local.full") else {
        panic!("local.full is not a local");
    };
    assert_eq!(local.value, hcl::Value::String("eu-x".into()));

    let Resource::Query(query) = get(&ctx.current_mod, "query.instances") else {
        panic!("query.instances is not a query");
    };
    assert_eq!(query.sql.as_deref(), Some("select * from eu-x"));
}

#[test]
fn declaration_order_does_not_change_the_result() {
    let forward = mod_sources! {r#"
    variable "region" { default = "eu" }
    locals { full = "${var.region}-x" }
    query "q" { sql = "select '${local.full}'" }
    "#};
    let backward = mod_sources! {r#"
    query "q" { sql = "select '${local.full}'" }
    locals { full = "${var.region}-x" }
    variable "region" { default = "eu" }
    "#};

    let (ctx_a, diags_a) = decode(&forward);
    let (ctx_b, diags_b) = decode(&backward);
    assert!(!diags_a.has_errors(), "{diags_a}");
    assert!(!diags_b.has_errors(), "{diags_b}");
    assert!(ctx_a.current_mod.equals(&ctx_b.current_mod));
}

#[test]
fn decoding_twice_yields_structurally_equal_mods() {
    let input = r#"
    variable "region" { default = "eu" }
    query "q" { sql = "select '${var.region}'" }
    benchmark "all" { children = ["query.q"] }
    "#;
    let (ctx_a, _) = decode(&mod_sources! {input});
    let (ctx_b, _) = decode(&mod_sources! {input});
    assert!(ctx_a.current_mod.equals(&ctx_b.current_mod));
    assert!(!diff_mods(&ctx_a.current_mod, &ctx_b.current_mod).has_changes());
}

#[test]
fn cycle_terminates_via_stall_within_block_count_passes() {
    let sources = mod_sources! {r#"
    locals {
      a = local.b
      b = local.c
      c = local.a
    }
    "#};
    let (ctx, diags) = decode(&sources);
    assert!(diags.has_errors());
    // the stall rule fires within a pass bound of the number of blocks
    assert!(ctx.passes <= 3, "took {} passes", ctx.passes);
    let stall = diags.errors().next().unwrap();
    let detail = stall.detail.as_deref().unwrap_or_default();
    assert!(detail.contains("local.a"), "{detail}");
    assert!(detail.contains("local.b"), "{detail}");
    assert!(detail.contains("local.c"), "{detail}");
}

#[test]
fn unsatisfiable_reference_reports_the_missing_symbol() {
    let sources = mod_sources! {r#"
    query "q" { sql = var.never_set }
    "#};
    let (_, diags) = decode(&sources);
    assert!(diags.has_errors());
    let stall = diags.errors().next().unwrap();
    let detail = stall.detail.as_deref().unwrap_or_default();
    assert!(detail.contains("query.q -> missing: var.never_set"), "{detail}");
}

#[test]
fn duplicate_child_yields_one_diagnostic_and_one_attachment() {
    let sources = mod_sources! {r#"
    benchmark "b1" { title = "child" }
    benchmark "parent" {
      children = ["benchmark.b1", "benchmark.b1"]
    }
    "#};
    let (ctx, diags) = decode(&sources);

    let duplicate_diags: Vec<_> = diags
        .errors()
        .filter(|d| d.summary.contains("duplicate child"))
        .collect();
    assert_eq!(duplicate_diags.len(), 1);

    let Resource::Benchmark(parent) = get(&ctx.current_mod, "benchmark.parent") else {
        panic!("parent is not a benchmark");
    };
    assert_eq!(parent.children, vec!["local.benchmark.b1"]);
}

#[test]
fn children_link_both_directions() {
    let sources = mod_sources! {r#"
    mod "acme" {}
    query "q" { sql = "select 1" }
    benchmark "child" { children = ["query.q"] }
    benchmark "parent" { children = ["benchmark.child"] }
    "#};
    let (ctx, diags) = decode(&sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Benchmark(parent) = get(&ctx.current_mod, "benchmark.parent") else {
        panic!("not a benchmark");
    };
    assert_eq!(parent.children, vec!["acme.benchmark.child", ]);

    let Resource::Benchmark(child) = get(&ctx.current_mod, "benchmark.child") else {
        panic!("not a benchmark");
    };
    assert!(child.parents.contains(&"acme.benchmark.parent".to_string()));
    assert_eq!(child.children, vec!["acme.query.q"]);

    // parent has no parents of its own, so it hangs off the mod
    assert!(ctx.current_mod.children.contains(&"acme.benchmark.parent".to_string()));
}

#[test]
fn unresolvable_child_is_a_hard_error() {
    let sources = mod_sources! {r#"
    benchmark "parent" { children = ["query.does_not_exist"] }
    "#};
    let (_, diags) = decode(&sources);
    assert!(diags.has_errors());
    assert!(diags
        .errors()
        .any(|d| d.summary.contains("Could not resolve child")));
}

#[test]
fn unknown_attribute_reports_range_and_keeps_siblings() {
    let sources = mod_sources! {"bad.hcl" => r#"
query "q" {
  sql = "select 1"
  wibble = true
  title = "still decoded"
}
query "other" { sql = "select 2" }
"#};
    let (ctx, diags) = decode(&sources);

    let schema_errors: Vec<_> = diags
        .errors()
        .filter(|d| d.summary.contains("wibble"))
        .collect();
    assert_eq!(schema_errors.len(), 1);
    let range = schema_errors[0].range.as_ref().expect("range must be set");
    assert_eq!(range.path.as_deref(), Some(Path::new("bad.hcl")));
    assert!(range.span.is_some());

    // the sibling block still decoded
    assert!(ctx
        .current_mod
        .get_resource(&ParsedName::parse("query.other").unwrap())
        .is_some());
}

#[test]
fn cli_variable_values_win_over_defaults() {
    let sources = mod_sources! {r#"
    variable "region" { default = "eu" }
    query "q" { sql = "select '${var.region}'" }
    "#};

    let decoder = Decoder::standard();
    let mut overrides = indexmap::IndexMap::new();
    overrides.insert("region".to_string(), hcl::Value::String("us".into()));
    let mut ctx = DecodeContext::new(Mod::default_for_path(Path::new("/workspaces/acme")))
        .with_variables(overrides);
    let diags = decoder.decode(&mut ctx, &sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Variable(variable) = get(&ctx.current_mod, "var.region") else {
        panic!("not a variable");
    };
    assert_eq!(variable.value, hcl::Value::String("us".into()));

    let Resource::Query(query) = get(&ctx.current_mod, "query.q") else {
        panic!("not a query");
    };
    assert_eq!(query.sql.as_deref(), Some("select 'us'"));
}

#[test]
fn dependency_alias_resolves_to_dependency_not_local() {
    let decoder = Decoder::standard();
    let dep = DependencyPackage::new(
        "dep_alias".to_string(),
        Some("1.2.3".to_string()),
        PathBuf::from("/deps/dep"),
        mod_sources! {r#"
        mod "dep_mod" {}
        query "q1" { sql = "select 'dependency'" }
        "#},
    );
    let root = mod_sources! {r#"
    mod "root_mod" {}
    query "q1" { sql = "select 'root'" }
    query "probe" { sql = dep_alias.query.q1.sql }
    "#};

    let (root_mod, diags) = load_workspace(
        &decoder,
        Path::new("/root"),
        &root,
        vec![dep],
        &LoadOptions::default(),
    );
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Query(probe) = get(&root_mod, "query.probe") else {
        panic!("not a query");
    };
    // the alias must reach the dependency's q1, never the root's own q1
    assert_eq!(probe.sql.as_deref(), Some("select 'dependency'"));
}

#[test]
fn cross_mod_children_resolve_through_the_alias() {
    let decoder = Decoder::standard();
    let dep = DependencyPackage::new(
        "base".to_string(),
        None,
        PathBuf::from("/deps/base"),
        mod_sources! {r#"
        mod "base_mod" {}
        query "q1" { sql = "select 1" }
        "#},
    );
    let root = mod_sources! {r#"
    mod "root_mod" {}
    benchmark "all" { children = ["base.query.q1"] }
    "#};

    let (root_mod, diags) = load_workspace(
        &decoder,
        Path::new("/root"),
        &root,
        vec![dep],
        &LoadOptions::default(),
    );
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Benchmark(all) = get(&root_mod, "benchmark.all") else {
        panic!("not a benchmark");
    };
    assert_eq!(all.children, vec!["base_mod.query.q1"]);
}

#[test]
fn late_binding_connections_stay_temporary() {
    let sources = mod_sources! {r#"
    query "q" { sql = "select '${connection.postgres.main.name}'" }
    "#};

    let decoder = Decoder::standard();
    let seeds = vec![ConnectionSeed::new("postgres".into(), "main".into())];
    let mut ctx = DecodeContext::new(Mod::default_for_path(Path::new("/workspaces/acme")))
        .with_connections(seeds, ConnectionBinding::Late);
    let diags = decoder.decode(&mut ctx, &sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Query(query) = get(&ctx.current_mod, "query.q") else {
        panic!("not a query");
    };
    assert_eq!(query.sql.as_deref(), Some("select 'connection.postgres.main'"));
}

#[test]
fn early_binding_connections_expose_resolved_values() {
    let sources = mod_sources! {r#"
    query "q" { sql = "select '${connection.postgres.main.connection_string}'" }
    "#};

    let mut value = hcl::value::Map::new();
    value.insert(
        "connection_string".to_string(),
        hcl::Value::String("postgres://db/main".into()),
    );
    let mut seed = ConnectionSeed::new("postgres".into(), "main".into());
    seed.value = Some(hcl::Value::Object(value));

    let decoder = Decoder::standard();
    let mut ctx = DecodeContext::new(Mod::default_for_path(Path::new("/workspaces/acme")))
        .with_connections(vec![seed], ConnectionBinding::Early);
    let diags = decoder.decode(&mut ctx, &sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Query(query) = get(&ctx.current_mod, "query.q") else {
        panic!("not a query");
    };
    assert_eq!(query.sql.as_deref(), Some("select 'postgres://db/main'"));
}

#[test]
fn connection_blocks_decode_with_subtyped_names() {
    let sources = mod_sources! {r#"
    connection "postgres" "main" {
      host     = "db.internal"
      database = "metrics"
      username = "reader"
    }
    "#};
    let (ctx, diags) = decode(&sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Connection(connection) = get(&ctx.current_mod, "connection.postgres.main")
    else {
        panic!("not a connection");
    };
    assert_eq!(connection.connection_type, "postgres");
    assert_eq!(
        connection.connection_string().as_deref(),
        Some("postgres://reader@db.internal/metrics")
    );
}

#[test]
fn base_resource_provides_defaults() {
    let sources = mod_sources! {r#"
    benchmark "base_def" {
      title = "base title"
      tags  = { team = "sec" }
    }
    benchmark "derived" {
      base        = benchmark.base_def
      description = "own description"
    }
    "#};
    let (ctx, diags) = decode(&sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Benchmark(derived) = get(&ctx.current_mod, "benchmark.derived") else {
        panic!("not a benchmark");
    };
    assert_eq!(derived.core.title.as_deref(), Some("base title"));
    assert_eq!(derived.core.description.as_deref(), Some("own description"));
    assert_eq!(derived.core.tags.get("team").map(String::as_str), Some("sec"));
    assert_eq!(derived.core.base.as_deref(), Some("benchmark.base_def"));
}

#[test]
fn nested_step_key_does_not_collide_with_top_level_block() {
    // a pipeline step named like a top level query must not be mistaken for
    // it in dependency tracking
    let sources = mod_sources! {r#"
    query "q1" { sql = "select 1" }
    pipeline "p" {
      step "query" "q1" {
        sql = query.q1.sql
      }
    }
    "#};
    let (ctx, diags) = decode(&sources);
    assert!(!diags.has_errors(), "{diags}");
    assert!(ctx.tracker.is_empty());

    let Resource::Pipeline(pipeline) = get(&ctx.current_mod, "pipeline.p") else {
        panic!("not a pipeline");
    };
    assert_eq!(pipeline.steps.len(), 1);
    assert_eq!(pipeline.steps[0].sql.as_deref(), Some("select 1"));
}

#[test]
fn pipeline_params_and_steps_decode() {
    let sources = mod_sources! {r#"
    pipeline "ingest" {
      title = "Ingest"
      param "batch_size" {
        default = 100
      }
      step "query" "fetch" {
        sql = "select * from source"
      }
      step "transform" "shape" {
        value = { mode = "strict" }
      }
    }
    "#};
    let (ctx, diags) = decode(&sources);
    assert!(!diags.has_errors(), "{diags}");

    let Resource::Pipeline(pipeline) = get(&ctx.current_mod, "pipeline.ingest") else {
        panic!("not a pipeline");
    };
    assert_eq!(pipeline.params.len(), 1);
    assert_eq!(
        pipeline.get_param("batch_size").unwrap().default,
        Some(hcl::Value::Number(100.into()))
    );
    assert_eq!(pipeline.steps.len(), 2);
    assert!(pipeline.get_step("shape").is_some());
}

#[test]
fn reload_diff_detects_added_and_changed_children() {
    let before = mod_sources! {r#"
    query "q1" { sql = "select 1" }
    benchmark "all" { children = ["query.q1"] }
    "#};
    let after = mod_sources! {r#"
    query "q1" { sql = "select 1" }
    query "q2" { sql = "select 2" }
    benchmark "all" { children = ["query.q1", "query.q2"] }
    benchmark "extra" {}
    "#};

    let (ctx_before, _) = decode(&before);
    let (ctx_after, _) = decode(&after);

    let diff = diff_mods(&ctx_before.current_mod, &ctx_after.current_mod);
    assert!(diff.has_changes());
    assert!(diff.added.iter().any(|name| name.contains("q2")));
    assert!(diff.added.iter().any(|name| name.contains("extra")));
    assert!(!ctx_before.current_mod.equals(&ctx_after.current_mod));
}
