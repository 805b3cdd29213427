/// Pipeline document model
///
/// The structured form of a pipeline file after template rendering.
use serde::{Deserialize, Serialize};

use super::template::{vars_from_toml, Vars};
use crate::error::StitchesError;

/// Top-level pipeline document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    /// GRASS database directory
    #[serde(default, alias = "gisdbase")]
    pub database: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub mapset: Option<String>,

    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl PipelineDocument {
    pub fn parse(name: &str, content: &str) -> Result<Self, StitchesError> {
        toml::from_str(content).map_err(|e| StitchesError::load(name, e.to_string()))
    }
}

/// One `[[tasks]]` entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub task: Option<String>,

    #[serde(default)]
    pub pipeline: Option<String>,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub removes: Vec<String>,

    #[serde(default)]
    pub always: bool,

    #[serde(default)]
    pub params: toml::Table,
}

/// What a task record asks for
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Built-in operation such as `grass` or `script`
    Builtin(String),
    /// `module:function` reference resolved through the callable registry
    Callable(String),
    /// Nested pipeline with its render variables
    Pipeline { path: String, vars: Vars },
}

impl TaskRecord {
    /// Classify the record; exactly one of `task`/`pipeline` must be set.
    pub fn kind(&self, pipeline: &str, index: usize) -> Result<TaskKind, StitchesError> {
        match (&self.task, &self.pipeline) {
            (Some(task), None) => {
                if task.contains(':') {
                    Ok(TaskKind::Callable(task.clone()))
                } else {
                    Ok(TaskKind::Builtin(task.clone()))
                }
            }
            (None, Some(path)) => {
                let vars = match self.params.get("vars") {
                    Some(toml::Value::Table(table)) => vars_from_toml(table),
                    Some(_) => {
                        return Err(StitchesError::load(
                            pipeline,
                            format!("task {}: `params.vars` must be a table", index),
                        ))
                    }
                    None => Vars::new(),
                };
                Ok(TaskKind::Pipeline {
                    path: path.clone(),
                    vars,
                })
            }
            _ => Err(StitchesError::AmbiguousTaskDefinition {
                pipeline: pipeline.to_string(),
                index,
            }),
        }
    }

    /// Scope override passed to a nested pipeline through its params
    pub fn scope_param(&self, key: &str) -> Option<String> {
        let value = match key {
            "database" => self
                .params
                .get("database")
                .or_else(|| self.params.get("gisdbase")),
            other => self.params.get(other),
        };
        value.and_then(|v| v.as_str()).map(str::to_string)
    }

    /// Fields that contribute to the parameter fingerprint. `message` and
    /// `always` are presentation/scheduling only.
    pub fn contributing(&self) -> serde_json::Value {
        serde_json::json!({
            "task": self.task,
            "params": self.params,
            "inputs": self.inputs,
            "outputs": self.outputs,
            "removes": self.removes,
        })
    }
}
