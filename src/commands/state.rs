/// `stitches state` command implementation
use anyhow::{Context, Result};

use super::load_pipeline;
use crate::cache::StateStore;
use crate::cli::StateArgs;

pub fn run(args: &StateArgs) -> Result<()> {
    let (config, pipeline) = load_pipeline(&args.pipeline, &args.scope)?;
    let path = StateStore::path_for(&pipeline.scope, &config.state.file_name);
    let mut store = StateStore::load(&path)?;

    if args.clear {
        let count = store.len();
        store.clear();
        if path.exists() {
            store.save()?;
        }
        println!("Cleared {} record(s) from {}", count, path.display());
        return Ok(());
    }

    if args.json {
        let records: serde_json::Map<String, serde_json::Value> = store
            .records()
            .map(|(id, record)| serde_json::to_value(record).map(|value| (id.clone(), value)))
            .collect::<Result<_, _>>()
            .context("Failed to serialize state")?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if store.is_empty() {
        println!("No recorded tasks in {}", path.display());
        return Ok(());
    }

    println!("{}", path.display());
    for (id, record) in store.records() {
        let known = if pipeline.task(id).is_some() { "" } else { " (stale)" };
        println!(
            "  [{}]{} {}  {}  {}",
            id,
            known,
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            if record.skipped { "skipped " } else { "executed" },
            record.message
        );
    }

    Ok(())
}
