// Common test utilities shared across acceptance tests
//
// Pipelines run against an in-memory workspace. The `grass` builtin is
// replaced by a recorder that notes which tasks were dispatched and
// creates the map named by `params.output`, the way a GRASS module would.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

use stitches::cache::{Directives, HashMethod, StateStore};
use stitches::dispatch::TaskRegistry;
use stitches::pipeline::{FlatPipeline, Flattener, MemorySource, ScopeOverrides, Vars};
use stitches::report::SilentReporter;
use stitches::runner::{RunOptions, RunReport, Runner};
use stitches::workspace::{MapKind, MemoryWorkspace, Scope};

pub struct TestPipeline {
    temp_dir: TempDir,
    pub workspace: Rc<MemoryWorkspace>,
    pub dispatched: Rc<RefCell<Vec<String>>>,
    pub store: StateStore,
    source: MemorySource,
    registry: TaskRegistry,
}

impl TestPipeline {
    /// Harness with `main` as the root pipeline
    pub fn new(main: &str) -> Self {
        let workspace = Rc::new(MemoryWorkspace::new());
        let dispatched = Rc::new(RefCell::new(Vec::new()));
        let registry = recording_registry(&workspace, &dispatched);

        Self {
            temp_dir: TempDir::new().unwrap(),
            workspace,
            dispatched,
            store: StateStore::in_memory(),
            source: MemorySource::new().with("main", main),
            registry,
        }
    }

    #[allow(dead_code)]
    pub fn with_pipeline(mut self, name: &str, content: &str) -> Self {
        self.source.insert(name, content);
        self
    }

    /// Replace the root pipeline between runs
    #[allow(dead_code)]
    pub fn set_main(&mut self, content: &str) {
        self.source.insert("main", content);
    }

    #[allow(dead_code)]
    pub fn registry_mut(&mut self) -> &mut TaskRegistry {
        &mut self.registry
    }

    pub fn scope() -> Scope {
        Scope::new("db", "loc", "PERMANENT")
    }

    #[allow(dead_code)]
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    #[allow(dead_code)]
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn flatten(&self) -> FlatPipeline {
        Flattener::new(&self.source, self.temp_dir.path())
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

    pub fn run(&mut self) -> RunReport {
        self.run_with(Directives::default())
    }

    pub fn run_with(&mut self, directives: Directives) -> RunReport {
        self.dispatched.borrow_mut().clear();
        let pipeline = self.flatten();
        let options = RunOptions {
            directives,
            dry_run: false,
            hash_method: HashMethod::Mtime,
        };
        let mut reporter = SilentReporter::new(
            Box::new(std::io::sink()),
            Box::new(std::io::sink()),
            false,
        );
        Runner::new(self.workspace.as_ref(), &self.registry, options).run(
            &pipeline,
            &mut self.store,
            &mut reporter,
        )
    }

    /// Identities dispatched by the last run
    pub fn executed(&self) -> Vec<String> {
        self.dispatched.borrow().clone()
    }
}

/// Registry whose `grass` builtin records the task and creates its outputs
fn recording_registry(
    workspace: &Rc<MemoryWorkspace>,
    dispatched: &Rc<RefCell<Vec<String>>>,
) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    let ws = Rc::clone(workspace);
    let seen = Rc::clone(dispatched);

    registry.register_builtin("grass", move |ctx, log| {
        seen.borrow_mut().push(ctx.id.to_string());
        log.write_stdout(format!("{}\n", ctx.id).as_bytes());

        // Modules name their map kind by prefix: v.* vector, r.* raster
        let module = ctx.params.get("module").and_then(|v| v.as_str()).unwrap_or_default();
        let kind = if module.starts_with("r.") {
            MapKind::Raster
        } else {
            MapKind::Vector
        };
        if let Some(output) = ctx.params.get("output").and_then(|v| v.as_str()) {
            ws.insert_map(kind, output, ctx.scope);
        }
        Ok(())
    });

    registry
}
