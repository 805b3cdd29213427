/// Pipeline flattening
///
/// Expands nested pipelines into one ordered task list. Each leaf task gets
/// an identity built from ordinal positions along its nesting path (`2`,
/// `1/0`, `1/3/0`), so identities survive as long as the order within each
/// enclosing pipeline is unchanged.
use anyhow::Context;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::definition::{PipelineDocument, TaskKind, TaskRecord};
use super::resource::{Resource, ResourceRef};
use super::template::{render, Vars};
use crate::error::StitchesError;
use crate::workspace::{Scope, DEFAULT_MAPSET};

/// Where pipeline documents come from
pub trait PipelineSource {
    /// Raw (unrendered) document text
    fn read(&self, name: &str) -> anyhow::Result<String>;

    /// Identity used for cycle detection
    fn canonical(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Loads pipelines from a directory (the directory of the root pipeline)
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Source rooted at the pipeline's directory, plus the pipeline's name in it
    pub fn for_pipeline(path: &Path) -> anyhow::Result<(Self, String)> {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(path)
        };
        let name = abs
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Pipeline path has no file name: {}", path.display()))?
            .to_string_lossy()
            .into_owned();
        let root = abs
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((Self::new(root), name))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PipelineSource for FileSource {
    fn read(&self, name: &str) -> anyhow::Result<String> {
        let path = self.root.join(name);
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read pipeline: {}", path.display()))
    }

    fn canonical(&self, name: &str) -> String {
        let path = self.root.join(name);
        path.canonicalize()
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

/// In-memory pipeline documents keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: BTreeMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, content: &str) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: &str, content: &str) {
        self.documents.insert(name.to_string(), content.to_string());
    }
}

impl PipelineSource for MemorySource {
    fn read(&self, name: &str) -> anyhow::Result<String> {
        self.documents
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No such pipeline: {}", name))
    }
}

/// Scope coordinates that may still be unresolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeOverrides {
    pub database: Option<String>,
    pub location: Option<String>,
    pub mapset: Option<String>,
}

impl ScopeOverrides {
    fn from_record(record: &TaskRecord) -> Self {
        Self {
            database: record.scope_param("database"),
            location: record.scope_param("location"),
            mapset: record.scope_param("mapset"),
        }
    }
}

/// Where a leaf task dispatches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Builtin(String),
    Callable(String),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Builtin(name) | Target::Callable(name) => name,
        }
    }
}

/// A leaf task with its identity, scope and resolved resources
#[derive(Debug, Clone)]
pub struct FlatTask {
    pub id: String,
    /// Pipeline the task was declared in
    pub pipeline: String,
    pub message: String,
    pub target: Target,
    pub params: toml::Table,
    pub inputs: Vec<Resource>,
    pub outputs: Vec<Resource>,
    pub removes: Vec<Resource>,
    pub always: bool,
    pub scope: Scope,
    /// Fields that feed the parameter fingerprint
    pub contributing: serde_json::Value,
}

/// Result of flattening the root pipeline
#[derive(Debug, Clone)]
pub struct FlatPipeline {
    /// Scope of the root pipeline; the state store lives here
    pub scope: Scope,
    pub tasks: Vec<FlatTask>,
}

impl FlatPipeline {
    pub fn task(&self, id: &str) -> Option<&FlatTask> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

pub struct Flattener<'a, S: PipelineSource> {
    source: &'a S,
    base_dir: PathBuf,
    chain: Vec<String>,
}

impl<'a, S: PipelineSource> Flattener<'a, S> {
    /// `base_dir` anchors relative `file/` references
    pub fn new(source: &'a S, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            base_dir: base_dir.into(),
            chain: Vec::new(),
        }
    }

    /// Flatten `root` rendered with `vars`; `initial` supplies scope fields
    /// the root document does not set.
    pub fn flatten(
        &mut self,
        root: &str,
        vars: &Vars,
        initial: &ScopeOverrides,
    ) -> Result<FlatPipeline, StitchesError> {
        self.chain.clear();
        let mut tasks = Vec::new();
        let scope = self.expand(root, None, vars, initial, None, &mut tasks)?;
        debug!(pipeline = root, tasks = tasks.len(), "flattened pipeline");
        Ok(FlatPipeline { scope, tasks })
    }

    fn expand(
        &mut self,
        name: &str,
        prefix: Option<&str>,
        vars: &Vars,
        overrides: &ScopeOverrides,
        inherited: Option<&Scope>,
        out: &mut Vec<FlatTask>,
    ) -> Result<Scope, StitchesError> {
        let canonical = self.source.canonical(name);
        if self.chain.contains(&canonical) {
            let mut chain = self.chain.clone();
            chain.push(canonical);
            return Err(StitchesError::CyclicPipeline { chain });
        }

        let raw = self
            .source
            .read(name)
            .map_err(|e| StitchesError::load(name, format!("{:#}", e)))?;
        let rendered = render(&raw, vars).map_err(|e| StitchesError::load(name, e))?;
        let doc = PipelineDocument::parse(name, &rendered)?;

        let scope = resolve_scope(name, &doc, overrides, inherited)?;

        self.chain.push(canonical);
        for (index, record) in doc.tasks.iter().enumerate() {
            let id = match prefix {
                Some(prefix) => format!("{}/{}", prefix, index),
                None => index.to_string(),
            };

            match record.kind(name, index)? {
                TaskKind::Pipeline { path, vars } => {
                    let nested = ScopeOverrides::from_record(record);
                    self.expand(&path, Some(&id), &vars, &nested, Some(&scope), out)?;
                }
                TaskKind::Builtin(task) => {
                    out.push(self.leaf(name, id, Target::Builtin(task), record, &scope)?)
                }
                TaskKind::Callable(task) => {
                    out.push(self.leaf(name, id, Target::Callable(task), record, &scope)?)
                }
            }
        }
        self.chain.pop();

        Ok(scope)
    }

    fn leaf(
        &self,
        pipeline: &str,
        id: String,
        target: Target,
        record: &TaskRecord,
        scope: &Scope,
    ) -> Result<FlatTask, StitchesError> {
        let resolve = |refs: &[String]| -> Result<Vec<Resource>, StitchesError> {
            refs.iter()
                .map(|r| ResourceRef::parse(r).map(|parsed| parsed.resolve(scope, &self.base_dir)))
                .collect()
        };

        Ok(FlatTask {
            id,
            pipeline: pipeline.to_string(),
            message: record.message.clone().unwrap_or_default(),
            target,
            params: record.params.clone(),
            inputs: resolve(&record.inputs)?,
            outputs: resolve(&record.outputs)?,
            removes: resolve(&record.removes)?,
            always: record.always,
            scope: scope.clone(),
            contributing: record.contributing(),
        })
    }
}

fn resolve_scope(
    name: &str,
    doc: &PipelineDocument,
    overrides: &ScopeOverrides,
    inherited: Option<&Scope>,
) -> Result<Scope, StitchesError> {
    let pick = |own: &Option<String>, given: &Option<String>, parent: Option<&String>| {
        own.clone().or_else(|| given.clone()).or_else(|| parent.cloned())
    };

    let database = pick(
        &doc.database,
        &overrides.database,
        inherited.map(|s| &s.database),
    )
    .ok_or_else(|| StitchesError::load(name, "no GRASS database specified"))?;
    let location = pick(
        &doc.location,
        &overrides.location,
        inherited.map(|s| &s.location),
    )
    .ok_or_else(|| StitchesError::load(name, "no location specified"))?;
    let mapset = pick(&doc.mapset, &overrides.mapset, inherited.map(|s| &s.mapset))
        .unwrap_or_else(|| DEFAULT_MAPSET.to_string());

    Ok(Scope {
        database,
        location,
        mapset,
    })
}
