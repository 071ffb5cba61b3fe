//! Pipeline resource

use super::ResourceCore;
use hcl::Value;

/// A named sequence of steps with declared parameters
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Pipeline {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub documentation: Option<String>,
    pub max_concurrency: Option<i64>,
    pub params: Vec<PipelineParam>,
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(core: ResourceCore) -> Self {
        Self {
            core,
            documentation: None,
            max_concurrency: None,
            params: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn get_param(&self, name: &str) -> Option<&PipelineParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_step(&self, name: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, derive_new::new)]
pub struct PipelineParam {
    pub name: String,
    #[new(default)]
    pub description: Option<String>,
    #[new(default)]
    pub default: Option<Value>,
    #[new(default)]
    pub type_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, derive_new::new)]
pub struct PipelineStep {
    /// Step kind label, e.g. `query`
    pub step_type: String,
    pub name: String,
    #[new(default)]
    pub title: Option<String>,
    #[new(default)]
    pub description: Option<String>,
    #[new(default)]
    pub depends_on: Vec<String>,
    #[new(default)]
    pub sql: Option<String>,
    #[new(default)]
    pub query: Option<String>,
    #[new(default)]
    pub args: Option<Value>,
    #[new(default)]
    pub value: Option<Value>,
}
