/// Skip evaluation
///
/// Walks the flattened pipeline in order and decides, per task, whether it
/// must execute or can be skipped. A task is skipped only when its scope,
/// parameters and inputs match the recorded fingerprint, every output
/// exists, and every map it consumes was either produced by a task skipped
/// earlier in this run or exists independently of the pipeline.
use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::warn;

use super::fingerprint::{
    file_signature, params_fingerprint, scope_fingerprint, HashMethod, Provenance, Signature,
};
use super::store::{FingerprintRecord, StateStore};
use crate::pipeline::{FlatPipeline, FlatTask, Locator, Resource, ResourceKind};
use crate::workspace::{Scope, Workspace};

/// Terminal state of a task in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Skipped,
    Executed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Executed => "executed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a task has to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    Forced,
    Only,
    Always,
    NoRecord,
    ScopeChanged,
    ScopeUnavailable { error: String },
    ParamsChanged,
    InputMissing { resource: String },
    InputChanged { resource: String },
    InputUnreadable { resource: String, error: String },
    ProducerExecuted { resource: String, producer: String },
    UnknownProvenance { resource: String },
    OutputMissing { resource: String },
    OutputUnreadable { resource: String, error: String },
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "forced"),
            Self::Only => write!(f, "selected with --only"),
            Self::Always => write!(f, "marked always"),
            Self::NoRecord => write!(f, "no previous record"),
            Self::ScopeChanged => write!(f, "region or mapset changed"),
            Self::ScopeUnavailable { error } => write!(f, "region unavailable: {}", error),
            Self::ParamsChanged => write!(f, "parameters changed"),
            Self::InputMissing { resource } => write!(f, "input {} is missing", resource),
            Self::InputChanged { resource } => write!(f, "input {} changed", resource),
            Self::InputUnreadable { resource, error } => {
                write!(f, "input {} unreadable: {}", resource, error)
            }
            Self::ProducerExecuted { resource, producer } => {
                write!(f, "input {} is rebuilt by [{}]", resource, producer)
            }
            Self::UnknownProvenance { resource } => {
                write!(f, "input {} has no known producer", resource)
            }
            Self::OutputMissing { resource } => write!(f, "output {} is missing", resource),
            Self::OutputUnreadable { resource, error } => {
                write!(f, "output {} could not be checked: {}", resource, error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    /// Fingerprints match
    Unchanged,
    /// `--skip` / `--only` directive; the record is left untouched
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipCause),
    Run(Vec<InvalidationReason>),
}

/// Run-level overrides of the skip rules
#[derive(Debug, Clone, Default)]
pub struct Directives {
    /// Run every task
    pub force: bool,
    /// Run only this task, skip all others
    pub only: Option<String>,
    /// Identities to skip regardless of fingerprints
    pub skip: BTreeSet<String>,
}

pub struct SkipEvaluator<'a> {
    workspace: &'a dyn Workspace,
    method: HashMethod,
    directives: Directives,
    /// Keys of every output declared anywhere in the pipeline
    pipeline_outputs: BTreeSet<String>,
    /// Resource key -> task that produced it so far in this run
    producers: HashMap<String, String>,
    statuses: HashMap<String, TaskStatus>,
    /// Scope fingerprints computed before dispatch, keyed by scope
    scope_cache: BTreeMap<Scope, Result<String, String>>,
}

impl<'a> SkipEvaluator<'a> {
    pub fn new(
        workspace: &'a dyn Workspace,
        method: HashMethod,
        directives: Directives,
        pipeline: &FlatPipeline,
    ) -> Self {
        let pipeline_outputs = pipeline
            .tasks
            .iter()
            .flat_map(|t| t.outputs.iter())
            .filter(|r| r.is_map())
            .map(Resource::key)
            .collect();

        Self {
            workspace,
            method,
            directives,
            pipeline_outputs,
            producers: HashMap::new(),
            statuses: HashMap::new(),
            scope_cache: BTreeMap::new(),
        }
    }

    pub fn status(&self, id: &str) -> TaskStatus {
        self.statuses
            .get(id)
            .copied()
            .unwrap_or(TaskStatus::Pending)
    }

    /// Decide whether `task` runs, given the previous run's `store`
    pub fn decide(&mut self, task: &FlatTask, store: &StateStore) -> Decision {
        if self.directives.force {
            return Decision::Run(vec![InvalidationReason::Forced]);
        }
        if let Some(only) = &self.directives.only {
            return if *only == task.id {
                Decision::Run(vec![InvalidationReason::Only])
            } else {
                Decision::Skip(SkipCause::Directive)
            };
        }
        if self.directives.skip.contains(&task.id) {
            return Decision::Skip(SkipCause::Directive);
        }
        if task.always {
            return Decision::Run(vec![InvalidationReason::Always]);
        }

        let mut reasons = Vec::new();

        for output in &task.outputs {
            let resource = output.reference().to_string();
            match self.resource_exists(output) {
                Ok(true) => {}
                Ok(false) => reasons.push(InvalidationReason::OutputMissing { resource }),
                Err(e) => reasons.push(InvalidationReason::OutputUnreadable {
                    resource,
                    error: format!("{:#}", e),
                }),
            }
        }

        let Some(record) = store.get(&task.id) else {
            reasons.push(InvalidationReason::NoRecord);
            return Decision::Run(reasons);
        };

        match self.scope_fingerprint(&task.scope) {
            Ok(current) if current == record.scope => {}
            Ok(_) => reasons.push(InvalidationReason::ScopeChanged),
            Err(error) => reasons.push(InvalidationReason::ScopeUnavailable { error }),
        }

        if params_fingerprint(&task.contributing) != record.params {
            reasons.push(InvalidationReason::ParamsChanged);
        }

        for input in &task.inputs {
            if let Some(reason) = self.check_input(input, record) {
                reasons.push(reason);
            }
        }

        if reasons.is_empty() {
            Decision::Skip(SkipCause::Unchanged)
        } else {
            Decision::Run(reasons)
        }
    }

    fn check_input(&self, input: &Resource, record: &FingerprintRecord) -> Option<InvalidationReason> {
        let resource = input.reference().to_string();
        let current = match self.signature(input) {
            Ok(sig) => sig,
            Err(e) => {
                return Some(InvalidationReason::InputUnreadable {
                    resource,
                    error: format!("{:#}", e),
                })
            }
        };

        if let Signature::Map { provenance, .. } = &current {
            match provenance {
                Provenance::Unknown => return Some(InvalidationReason::UnknownProvenance { resource }),
                Provenance::Task(producer) if self.status(producer) != TaskStatus::Skipped => {
                    return Some(InvalidationReason::ProducerExecuted {
                        resource,
                        producer: producer.clone(),
                    })
                }
                _ => {}
            }
        }

        if !current.exists() {
            return Some(InvalidationReason::InputMissing { resource });
        }

        if record.inputs.get(&input.key()) != Some(&current) {
            return Some(InvalidationReason::InputChanged { resource });
        }

        None
    }

    /// Provenance of a map as seen at this point of the run
    fn provenance(&self, resource: &Resource, exists: bool) -> Provenance {
        let key = resource.key();
        if let Some(producer) = self.producers.get(&key) {
            Provenance::Task(producer.clone())
        } else if !exists || self.pipeline_outputs.contains(&key) {
            Provenance::Unknown
        } else {
            Provenance::External
        }
    }

    fn map_exists(&self, resource: &Resource) -> Result<bool> {
        match (resource.kind(), resource.locator()) {
            (ResourceKind::Map(kind), Locator::Map { name, scope }) => {
                self.workspace.map_exists(kind, name, scope)
            }
            _ => Ok(false),
        }
    }

    fn resource_exists(&self, resource: &Resource) -> Result<bool> {
        match resource.locator() {
            Locator::File(path) => Ok(path.exists()),
            Locator::Map { .. } => self.map_exists(resource),
        }
    }

    /// Current signature of a resource
    pub fn signature(&self, resource: &Resource) -> Result<Signature> {
        match resource.locator() {
            Locator::File(path) => file_signature(path, self.method),
            Locator::Map { .. } => {
                let exists = self.map_exists(resource)?;
                Ok(Signature::Map {
                    exists,
                    provenance: self.provenance(resource, exists),
                })
            }
        }
    }

    fn scope_fingerprint(&mut self, scope: &Scope) -> Result<String, String> {
        if let Some(cached) = self.scope_cache.get(scope) {
            return cached.clone();
        }
        let fingerprint = self
            .workspace
            .region(scope)
            .map(|region| scope_fingerprint(scope, &region))
            .map_err(|e| format!("{:#}", e));
        self.scope_cache.insert(scope.clone(), fingerprint.clone());
        fingerprint
    }

    /// Fingerprint the task's post-state
    pub fn snapshot(&mut self, task: &FlatTask, skipped: bool) -> Result<FingerprintRecord> {
        // Tasks may change the region; never reuse a pre-dispatch reading.
        self.scope_cache.clear();
        let scope = self
            .scope_fingerprint(&task.scope)
            .map_err(|e| anyhow::anyhow!("region unavailable: {}", e))?;

        let mut inputs = BTreeMap::new();
        for input in &task.inputs {
            inputs.insert(input.key(), self.signature(input)?);
        }

        let mut outputs = BTreeMap::new();
        for output in &task.outputs {
            let signature = match output.locator() {
                Locator::File(path) => file_signature(path, self.method)?,
                Locator::Map { .. } => Signature::Map {
                    exists: self.map_exists(output)?,
                    provenance: Provenance::Task(task.id.clone()),
                },
            };
            outputs.insert(output.key(), signature);
        }

        Ok(FingerprintRecord {
            params: params_fingerprint(&task.contributing),
            scope,
            inputs,
            outputs,
            skipped,
            message: task.message.clone(),
            recorded_at: Utc::now(),
        })
    }

    /// Settle a task: stage its new record and advance producer tracking
    pub fn complete(
        &mut self,
        task: &FlatTask,
        status: TaskStatus,
        cause: Option<SkipCause>,
        store: &mut StateStore,
    ) {
        match (status, cause) {
            (TaskStatus::Skipped, Some(SkipCause::Directive)) => {}
            (TaskStatus::Skipped, _) | (TaskStatus::Executed, _) => {
                match self.snapshot(task, status == TaskStatus::Skipped) {
                    Ok(record) => store.insert(&task.id, record),
                    Err(e) => {
                        warn!(task = %task.id, error = %format!("{:#}", e), "cannot record fingerprint");
                        store.remove(&task.id);
                    }
                }
            }
            (TaskStatus::Failed, _) => {
                store.remove(&task.id);
            }
            (TaskStatus::Pending, _) => return,
        }

        self.statuses.insert(task.id.clone(), status);

        for output in task.outputs.iter().filter(|r| r.is_map()) {
            self.producers.insert(output.key(), task.id.clone());
        }
        for removed in &task.removes {
            self.producers.remove(&removed.key());
        }
    }

    /// Mark a task's outcome without touching the store (dry runs)
    pub fn assume(&mut self, task: &FlatTask, status: TaskStatus) {
        self.statuses.insert(task.id.clone(), status);
        for output in task.outputs.iter().filter(|r| r.is_map()) {
            self.producers.insert(output.key(), task.id.clone());
        }
        for removed in &task.removes {
            self.producers.remove(&removed.key());
        }
    }
}
