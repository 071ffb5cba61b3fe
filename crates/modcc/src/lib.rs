//! # modcc - mod configuration compiler
//!
//! Turns a package ("mod") of declarative HCL source files into a fully
//! resolved, typed graph of named resources (queries, variables, benchmarks,
//! connections, pipelines).
//!
//! ## Introduction for developers
//!
//! Read this to understand how `modcc` works internally.
//!
//! ### HCL Terms
//!
//! Quick introduction to terms used to describe elements of HCL documents.
//!
//! In hcl terms...
//! - a file gets parsed as a `body`
//! - ...which is just a list of `structures`
//! - ...where there are two kinds:
//!   - `attribute`: a "key = value" pair
//!   - or `block`:
//!     - 1 `identifier`
//!     - followed by 0 or more `labels`
//!     - and a `body` enclosed in `{` and `}`
//!
//! This is a valid mod source file:
//! ```hcl
//! mod "insights" {
//!   title = "Insights"
//! }
//!
//! variable "region" {
//!   default = "eu-west-1"
//! }
//!
//! locals {
//!   prefix = "${var.region}-prod"
//! }
//!
//! query "instances" {
//!   sql = "select * from instances where name like '${local.prefix}%'"
//! }
//!
//! benchmark "all" {
//!   children = ["query.instances"]
//! }
//! ```
//!
//! ### Loading files
//!
//! Mod documents are parsed as bodies ([hcl_edit::structure::Body]) and
//! collected into [sources::ModSources], which tracks each root attribute and
//! block together with its source path so diagnostics can point back at the
//! original file. At this point the loaded documents only have to be valid
//! HCL to be accepted; nothing is evaluated yet and the decode loop performs
//! no further I/O.
//!
//! ### Decoding
//!
//! see [decode::Decoder::decode]
//!
//! Resources may reference each other (`query.q1.sql`, `var.region`,
//! `dep_mod.query.q2`) in any declaration order, so decoding is iterative: a
//! block whose expressions reference a symbol that is not yet available is
//! *deferred* and retried on the next pass, once more values have been
//! registered. The loop stops when nothing is unresolved, or when a full
//! pass resolves nothing new - a dependency cycle or a reference nothing can
//! ever satisfy - in which case every still-unresolved block and its missing
//! symbols are reported ([context::DecodeContext::unresolved_error]).
//!
//! Classification of "not yet available" vs. "genuinely broken" is
//! structured, not string-matched: see [dependency::EvalOutcome].
//!
//! ### The reference namespace
//!
//! Evaluation happens against an [hcl::eval::Context] built from
//! [namespace::ReferenceValues]: a nested map of mod alias, resource type and
//! resource name. The current mod is flattened one level (`var.x`), while
//! dependency mods stay nested under their alias (`dep.var.x`). Bound names
//! are never overwritten - first writer wins - which is what keeps variable
//! values supplied on the command line authoritative over decoded defaults.
//!
//! The context is rebuilt only at pass boundaries, so a pass always sees a
//! frozen namespace and pass counts do not depend on declaration order.
//!
//! ### The resource tree
//!
//! After the fixpoint completes, declared child lists (`children =
//! ["benchmark.b1", ...]`) are resolved into parent/child links across the
//! current mod and its direct dependencies: see [tree::build_resource_tree].
//! Structural comparison of two loads ([tree::diff_mods],
//! [mod_def::Mod::equals]) detects whether a reload materially changed the
//! graph.

pub mod context;
pub mod decode;
pub mod dependency;
pub mod diagnostic;
pub mod mod_def;
pub mod namespace;
pub mod reference;
pub mod resource;
pub mod schema;
pub mod sources;
pub mod tree;
mod visit;
pub mod workspace;
