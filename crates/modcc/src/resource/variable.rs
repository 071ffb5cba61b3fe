//! Variable resource

use super::ResourceCore;
use hcl::Value;

/// A mod input variable
///
/// `value` is the effective value for this load: an externally supplied
/// binding when one was pre-seeded (e.g. from the command line), otherwise
/// the evaluated `default`, otherwise null.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Variable {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub default: Option<Value>,
    pub value: Value,
    /// The `type` expression as written in source
    pub type_string: Option<String>,
    pub enum_values: Option<Value>,
    pub sensitive: bool,
}

impl Variable {
    pub fn new(core: ResourceCore) -> Self {
        Self {
            core,
            default: None,
            value: Value::Null,
            type_string: None,
            enum_values: None,
            sensitive: false,
        }
    }
}
