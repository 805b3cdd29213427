//! Task dispatch
//!
//! The coordinator hands each task that must run to a [`Dispatcher`]. The
//! stock dispatcher is a [`TaskRegistry`] mapping builtin names (`grass`,
//! `script`) and `module:function` callables to Rust closures.

pub mod builtins;
pub mod log;

pub use log::RunLog;

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::DispatchFailure;
use crate::pipeline::Target;
use crate::workspace::{GrassWorkspace, Scope};

/// Everything a task body gets to see
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub id: &'a str,
    pub pipeline: &'a str,
    pub params: &'a toml::Table,
    pub scope: &'a Scope,
}

/// Executes one task. Blocking; returns only once the task has finished.
pub trait Dispatcher {
    fn dispatch(
        &self,
        target: &Target,
        ctx: &TaskContext<'_>,
        log: &mut RunLog,
    ) -> Result<(), DispatchFailure>;
}

/// A task body
pub type TaskFn = Box<dyn Fn(&TaskContext<'_>, &mut RunLog) -> anyhow::Result<()>>;

#[derive(Default)]
pub struct TaskRegistry {
    builtins: BTreeMap<String, TaskFn>,
    callables: BTreeMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `grass` and `script` builtins
    pub fn with_grass(grass: GrassWorkspace) -> Self {
        let mut registry = Self::new();
        registry.register_builtin("grass", move |ctx, log| builtins::grass(&grass, ctx, log));
        registry.register_builtin("script", builtins::script);
        registry
    }

    pub fn register_builtin<F>(&mut self, name: &str, task: F)
    where
        F: Fn(&TaskContext<'_>, &mut RunLog) -> anyhow::Result<()> + 'static,
    {
        self.builtins.insert(name.to_string(), Box::new(task));
    }

    /// Register a `module:function` callable
    pub fn register_callable<F>(&mut self, name: &str, task: F)
    where
        F: Fn(&TaskContext<'_>, &mut RunLog) -> anyhow::Result<()> + 'static,
    {
        self.callables.insert(name.to_string(), Box::new(task));
    }

    fn lookup(&self, target: &Target) -> Option<&TaskFn> {
        match target {
            Target::Builtin(name) => self.builtins.get(name),
            Target::Callable(name) => self.callables.get(name),
        }
    }
}

impl Dispatcher for TaskRegistry {
    fn dispatch(
        &self,
        target: &Target,
        ctx: &TaskContext<'_>,
        log: &mut RunLog,
    ) -> Result<(), DispatchFailure> {
        let task = self.lookup(target).ok_or_else(|| {
            DispatchFailure::new(
                ctx.id,
                format!(
                    "task \"{}\" not found, in \"{}\"",
                    target.name(),
                    ctx.pipeline
                ),
            )
        })?;

        debug!(task = ctx.id, target = target.name(), "dispatching");
        task(ctx, log).map_err(|e| DispatchFailure::new(ctx.id, format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx<'a>(params: &'a toml::Table, scope: &'a Scope) -> TaskContext<'a> {
        TaskContext {
            id: "1/0",
            pipeline: "main.toml",
            params,
            scope,
        }
    }

    #[test]
    fn test_unknown_task_fails() {
        let registry = TaskRegistry::new();
        let params = toml::Table::new();
        let scope = Scope::new("db", "loc", "PERMANENT");
        let mut log = RunLog::new();

        let err = registry
            .dispatch(&Target::Builtin("nope".into()), &ctx(&params, &scope), &mut log)
            .unwrap_err();
        assert_eq!(err.task, "1/0");
        assert!(err.detail.contains("\"nope\" not found"));
    }

    #[test]
    fn test_callable_receives_params() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);

        let mut registry = TaskRegistry::new();
        registry.register_callable("tasks:buffer", move |ctx, log| {
            *sink.borrow_mut() = ctx.params.get("distance").and_then(|v| v.as_integer());
            log.write_stdout(b"buffered\n");
            Ok(())
        });

        let mut params = toml::Table::new();
        params.insert("distance".into(), toml::Value::Integer(50));
        let scope = Scope::new("db", "loc", "PERMANENT");
        let mut log = RunLog::new();

        registry
            .dispatch(
                &Target::Callable("tasks:buffer".into()),
                &ctx(&params, &scope),
                &mut log,
            )
            .unwrap();
        assert_eq!(*seen.borrow(), Some(50));
        assert_eq!(log.stdout(), b"buffered\n");

        // builtins and callables are separate namespaces
        assert!(registry
            .dispatch(&Target::Builtin("tasks:buffer".into()), &ctx(&params, &scope), &mut log)
            .is_err());
    }

    #[test]
    fn test_task_error_becomes_failure() {
        let mut registry = TaskRegistry::new();
        registry.register_builtin("boom", |_, _| anyhow::bail!("exploded"));
        let params = toml::Table::new();
        let scope = Scope::new("db", "loc", "PERMANENT");

        let err = registry
            .dispatch(&Target::Builtin("boom".into()), &ctx(&params, &scope), &mut RunLog::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Task [1/0] failed: exploded");
    }
}
