/// Execution coordinator
///
/// Drives a flattened pipeline: evaluates each task in order, dispatches
/// the ones that must run, deletes their declared `removes`, stages new
/// fingerprint records and stops at the first failure. Persisting the
/// store is left to the caller so state is written even when a run fails.
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info, warn};

use crate::cache::{
    Decision, Directives, HashMethod, SkipCause, SkipEvaluator, StateStore, TaskStatus,
};
use crate::dispatch::{Dispatcher, RunLog, TaskContext};
use crate::error::DispatchFailure;
use crate::pipeline::{FlatPipeline, FlatTask, Locator, ResourceKind};
use crate::report::{Reporter, RunEvent};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub directives: Directives,
    /// Evaluate only; nothing is dispatched and nothing should be persisted
    pub dry_run: bool,
    pub hash_method: HashMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub id: String,
    pub status: TaskStatus,
    pub decision: Decision,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
    pub log: RunLog,
    pub failure: Option<DispatchFailure>,
    /// Records dropped because their tasks left the pipeline
    pub pruned: usize,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.outcomes
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.status)
    }

    /// Identities with the given terminal status, in execution order
    pub fn ids_with(&self, status: TaskStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.id.as_str())
            .collect()
    }
}

pub struct Runner<'a> {
    workspace: &'a dyn Workspace,
    dispatcher: &'a dyn Dispatcher,
    options: RunOptions,
}

impl<'a> Runner<'a> {
    pub fn new(
        workspace: &'a dyn Workspace,
        dispatcher: &'a dyn Dispatcher,
        options: RunOptions,
    ) -> Self {
        Self {
            workspace,
            dispatcher,
            options,
        }
    }

    pub fn run(
        &self,
        pipeline: &FlatPipeline,
        store: &mut StateStore,
        reporter: &mut dyn Reporter,
    ) -> RunReport {
        let mut evaluator = SkipEvaluator::new(
            self.workspace,
            self.options.hash_method,
            self.options.directives.clone(),
            pipeline,
        );
        let mut report = RunReport::default();

        for task in &pipeline.tasks {
            reporter.report(&RunEvent::TaskStart {
                id: task.id.clone(),
                message: task.message.clone(),
            });

            let decision = evaluator.decide(task, store);
            let status = match &decision {
                Decision::Skip(cause) => {
                    debug!(task = %task.id, decision = "skip", cause = ?cause, "evaluated");
                    reporter.report(&RunEvent::TaskSkip {
                        id: task.id.clone(),
                    });
                    self.settle(&mut evaluator, task, TaskStatus::Skipped, Some(*cause), store);
                    TaskStatus::Skipped
                }
                Decision::Run(reasons) => {
                    let reason = reasons
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ");
                    info!(task = %task.id, decision = "run", reason = %reason, "evaluated");

                    if self.options.dry_run {
                        reporter.report(&RunEvent::TaskPending {
                            id: task.id.clone(),
                        });
                        evaluator.assume(task, TaskStatus::Executed);
                        TaskStatus::Pending
                    } else {
                        match self.execute(task, &mut report.log) {
                            Ok(()) => {
                                reporter.report(&RunEvent::TaskComplete {
                                    id: task.id.clone(),
                                });
                                evaluator.complete(task, TaskStatus::Executed, None, store);
                                TaskStatus::Executed
                            }
                            Err(failure) => {
                                reporter.report(&RunEvent::TaskFatal {
                                    detail: failure.to_string(),
                                });
                                evaluator.complete(task, TaskStatus::Failed, None, store);
                                report.failure = Some(failure);
                                TaskStatus::Failed
                            }
                        }
                    }
                }
            };

            report.outcomes.push(TaskOutcome {
                id: task.id.clone(),
                status,
                decision,
            });

            if status == TaskStatus::Failed {
                warn!(task = %task.id, "halting pipeline after failure");
                break;
            }
        }

        if report.success() && !self.options.dry_run {
            let ids: BTreeSet<String> = pipeline.tasks.iter().map(|t| t.id.clone()).collect();
            report.pruned = store.retain_ids(&ids);
            if report.pruned > 0 {
                debug!(pruned = report.pruned, "pruned stale records");
            }
        }

        report
    }

    fn settle(
        &self,
        evaluator: &mut SkipEvaluator<'_>,
        task: &FlatTask,
        status: TaskStatus,
        cause: Option<SkipCause>,
        store: &mut StateStore,
    ) {
        if self.options.dry_run {
            evaluator.assume(task, status);
        } else {
            evaluator.complete(task, status, cause, store);
        }
    }

    fn execute(&self, task: &FlatTask, log: &mut RunLog) -> Result<(), DispatchFailure> {
        self.workspace
            .ensure_mapset(&task.scope)
            .map_err(|e| DispatchFailure::new(&task.id, format!("{:#}", e)))?;

        let ctx = TaskContext {
            id: &task.id,
            pipeline: &task.pipeline,
            params: &task.params,
            scope: &task.scope,
        };
        self.dispatcher.dispatch(&task.target, &ctx, log)?;

        self.delete_removes(task);
        Ok(())
    }

    /// Best-effort deletion of a finished task's `removes`
    fn delete_removes(&self, task: &FlatTask) {
        for resource in &task.removes {
            let result = match (resource.kind(), resource.locator()) {
                (ResourceKind::Map(kind), Locator::Map { name, scope }) => {
                    self.workspace.remove_map(kind, name, scope)
                }
                (_, Locator::File(path)) if path.is_dir() => {
                    fs::remove_dir_all(path).map_err(anyhow::Error::from)
                }
                (_, Locator::File(path)) if path.exists() => {
                    fs::remove_file(path).map_err(anyhow::Error::from)
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!(task = %task.id, resource = %resource, error = %e, "failed to remove resource");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TaskRegistry;
    use crate::pipeline::{Flattener, MemorySource, ScopeOverrides, Vars};
    use crate::report::SilentReporter;
    use crate::workspace::{MapKind, MemoryWorkspace, Scope};
    use std::io;
    use std::rc::Rc;

    fn flatten(src: &str) -> FlatPipeline {
        let source = MemorySource::new().with("main", src);
        Flattener::new(&source, "/work")
            .flatten(
                "main",
                &Vars::new(),
                &ScopeOverrides {
                    database: Some("db".into()),
                    location: Some("loc".into()),
                    mapset: None,
                },
            )
            .unwrap()
    }

    fn quiet() -> SilentReporter {
        SilentReporter::new(Box::new(io::sink()), Box::new(io::sink()), false)
    }

    fn scope() -> Scope {
        Scope::new("db", "loc", "PERMANENT")
    }

    /// `make` creates the vector named by `params.output`
    fn registry(ws: &Rc<MemoryWorkspace>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        let make_ws = Rc::clone(ws);
        registry.register_builtin("make", move |ctx, log| {
            if let Some(name) = ctx.params.get("output").and_then(|v| v.as_str()) {
                make_ws.insert_map(MapKind::Vector, name, ctx.scope);
            }
            log.write_stdout(format!("{}\n", ctx.id).as_bytes());
            Ok(())
        });
        registry.register_builtin("fail", |_, log| {
            log.write_stderr(b"ERROR: nope\n");
            anyhow::bail!("module failed")
        });
        registry
    }

    const PIPELINE: &str = r#"
        [[tasks]]
        task = "make"
        outputs = ["vector/a"]
        removes = ["vector/tmp"]
        params = { output = "a" }

        [[tasks]]
        task = "make"
        inputs = ["vector/a"]
        outputs = ["vector/b"]
        params = { output = "b" }
    "#;

    #[test]
    fn test_run_then_skip() {
        let ws = Rc::new(MemoryWorkspace::new());
        ws.insert_map(MapKind::Vector, "tmp", &scope());
        let registry = registry(&ws);
        let pipeline = flatten(PIPELINE);
        let mut store = StateStore::in_memory();
        let runner = Runner::new(ws.as_ref(), &registry, RunOptions::default());

        let first = runner.run(&pipeline, &mut store, &mut quiet());
        assert!(first.success());
        assert_eq!(first.ids_with(TaskStatus::Executed), vec!["0", "1"]);
        assert_eq!(first.log.stdout(), b"0\n1\n");
        assert!(!ws.has_map(MapKind::Vector, "tmp", &scope()));
        assert!(ws.has_mapset(&scope()));

        let second = runner.run(&pipeline, &mut store, &mut quiet());
        assert_eq!(second.ids_with(TaskStatus::Skipped), vec!["0", "1"]);
        assert!(second.log.is_empty());
    }

    #[test]
    fn test_failure_halts_and_keeps_log() {
        let ws = Rc::new(MemoryWorkspace::new());
        let registry = registry(&ws);
        let pipeline = flatten(
            r#"
            [[tasks]]
            task = "make"
            params = { output = "a" }

            [[tasks]]
            task = "fail"

            [[tasks]]
            task = "make"
            params = { output = "c" }
            "#,
        );
        let mut store = StateStore::in_memory();
        let runner = Runner::new(ws.as_ref(), &registry, RunOptions::default());

        let report = runner.run(&pipeline, &mut store, &mut quiet());
        assert!(!report.success());
        assert_eq!(report.status("0"), Some(TaskStatus::Executed));
        assert_eq!(report.status("1"), Some(TaskStatus::Failed));
        assert_eq!(report.status("2"), None);
        assert_eq!(report.failure.as_ref().unwrap().task, "1");
        assert_eq!(report.log.stderr(), b"ERROR: nope\n");
        assert!(store.get("0").is_some());
        assert!(store.get("1").is_none());
    }

    #[test]
    fn test_dry_run_does_not_dispatch_or_record() {
        let ws = Rc::new(MemoryWorkspace::new());
        let registry = registry(&ws);
        let pipeline = flatten(PIPELINE);
        let mut store = StateStore::in_memory();
        let runner = Runner::new(
            ws.as_ref(),
            &registry,
            RunOptions {
                dry_run: true,
                ..Default::default()
            },
        );

        let report = runner.run(&pipeline, &mut store, &mut quiet());
        assert_eq!(report.ids_with(TaskStatus::Pending), vec!["0", "1"]);
        assert!(store.is_empty());
        assert!(!ws.has_map(MapKind::Vector, "a", &scope()));
    }

    #[test]
    fn test_prune_after_full_run() {
        let ws = Rc::new(MemoryWorkspace::new());
        let registry = registry(&ws);
        let mut store = StateStore::in_memory();
        let runner = Runner::new(ws.as_ref(), &registry, RunOptions::default());

        runner.run(&flatten(PIPELINE), &mut store, &mut quiet());
        assert_eq!(store.len(), 2);

        let shorter = flatten("[[tasks]]\ntask = 'make'\nparams = { output = 'a' }\n");
        let report = runner.run(&shorter, &mut store, &mut quiet());
        assert_eq!(report.pruned, 1);
        assert!(store.get("1").is_none());
    }
}
