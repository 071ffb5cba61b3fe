//! Local value resource
//!
//! A `locals` block is not a single resource - each of its attributes is
//! independently evaluated and becomes its own named local value.

use super::ResourceCore;
use hcl::Value;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Local {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub value: Value,
}

impl Local {
    pub fn new(core: ResourceCore, value: Value) -> Self {
        Self { core, value }
    }
}
