/// `stitches run` command implementation
///
/// Loads and flattens the pipeline, evaluates and runs it against GRASS,
/// persists the fingerprint state and writes the task log.
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use super::load_pipeline;
use crate::cache::{Directives, StateStore};
use crate::cli::RunArgs;
use crate::dispatch::log::failure_log_name;
use crate::dispatch::TaskRegistry;
use crate::report::{Reporter, SilentReporter, VerboseReporter};
use crate::runner::{RunOptions, Runner};
use crate::workspace::{GrassWorkspace, Workspace};

pub fn run(args: &RunArgs) -> Result<()> {
    let (config, pipeline) = load_pipeline(&args.pipeline, &args.scope)?;

    let grass = GrassWorkspace::locate(&config.grass, config.workspace.crs.clone())?;
    let registry = TaskRegistry::with_grass(grass.clone());

    // The state document lives in the root mapset, so it must be a real one
    if !args.dry_run {
        grass
            .ensure_mapset(&pipeline.scope)
            .with_context(|| format!("Failed to prepare mapset {}", pipeline.scope))?;
    }

    let state_path = StateStore::path_for(&pipeline.scope, &config.state.file_name);
    let mut store = StateStore::load(&state_path)?;

    let options = RunOptions {
        directives: Directives {
            force: args.force,
            only: args.only.clone(),
            skip: args.skip.iter().cloned().collect(),
        },
        dry_run: args.dry_run,
        hash_method: config.state.hash,
    };

    let mut reporter: Box<dyn Reporter> = if args.verbose || args.dry_run {
        Box::new(VerboseReporter::stdio())
    } else {
        Box::new(SilentReporter::stdio())
    };

    let report = Runner::new(&grass, &registry, options).run(&pipeline, &mut store, reporter.as_mut());

    if !args.dry_run {
        match store.save() {
            Ok(()) => info!(path = %state_path.display(), records = store.len(), "saved state"),
            // The task failure is what gets reported; state is best-effort here
            Err(e) if !report.success() => {
                warn!(path = %state_path.display(), error = %format!("{:#}", e), "failed to save state")
            }
            Err(e) => return Err(e),
        }
    }

    let log_path = args.log.clone().or_else(|| {
        (!report.success()).then(|| PathBuf::from(failure_log_name(chrono::Local::now())))
    });
    if let Some(path) = log_path {
        report
            .log
            .write_to(&path)
            .with_context(|| format!("Failed to write task log {}", path.display()))?;
        if !report.success() {
            eprintln!("Task output written to {}", path.display());
        }
    }

    if !report.success() {
        std::process::exit(1);
    }

    Ok(())
}
