//! Query resource

use super::ResourceCore;

/// A named SQL query
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Query {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub sql: Option<String>,
    pub database: Option<String>,
    pub documentation: Option<String>,
}

impl Query {
    pub fn new(core: ResourceCore) -> Self {
        Self {
            core,
            sql: None,
            database: None,
            documentation: None,
        }
    }

    /// Fill unset properties from a base query
    pub fn merge_base(&mut self, base: &Query) {
        if self.sql.is_none() {
            self.sql = base.sql.clone();
        }
        if self.database.is_none() {
            self.database = base.database.clone();
        }
        if self.documentation.is_none() {
            self.documentation = base.documentation.clone();
        }
    }
}
