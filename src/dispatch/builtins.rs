/// Builtin tasks
///
/// `grass` runs one GRASS module in the task's mapset; `script` runs an
/// arbitrary program. Both capture output into the run log and fail on a
/// non-zero exit status.
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use tracing::debug;

use super::{RunLog, TaskContext};
use crate::workspace::GrassWorkspace;

/// Long flags GRASS accepts on every module
const GLOBAL_FLAGS: &[&str] = &["overwrite", "quiet", "verbose", "help"];

/// `params.module` plus the module's command-line arguments
pub fn module_args(params: &toml::Table) -> Result<(String, Vec<String>)> {
    let module = params
        .get("module")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("grass task requires a string `module` parameter"))?
        .to_string();

    let mut args = Vec::new();
    for (key, value) in params.iter().filter(|(k, _)| k.as_str() != "module") {
        match value {
            toml::Value::Boolean(false) => {}
            toml::Value::Boolean(true) => {
                if key.len() == 1 && !GLOBAL_FLAGS.contains(&key.as_str()) {
                    args.push(format!("-{}", key));
                } else {
                    args.push(format!("--{}", key));
                }
            }
            toml::Value::String(flags) if key == "flags" => {
                if !flags.is_empty() {
                    args.push(format!("-{}", flags));
                }
            }
            other => args.push(format!("{}={}", key, scalar_list(key, other)?)),
        }
    }

    Ok((module, args))
}

fn scalar_list(key: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::Array(items) => Ok(items
            .iter()
            .map(|item| scalar(key, item))
            .collect::<Result<Vec<_>>>()?
            .join(",")),
        other => scalar(key, other),
    }
}

fn scalar(key: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => {
            anyhow::bail!("parameter `{}` cannot be passed to a GRASS module", key)
        }
    }
}

fn check_status(name: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    match output.status.code() {
        Some(code) => anyhow::bail!("{} exited with code {}: {}", name, code, last.trim()),
        None => anyhow::bail!("{} was terminated by a signal", name),
    }
}

pub fn grass(grass: &GrassWorkspace, ctx: &TaskContext<'_>, log: &mut RunLog) -> Result<()> {
    let (module, args) = module_args(ctx.params)?;
    let output = grass.exec(ctx.scope, &module, &args)?;
    log.append(&output);
    check_status(&module, &output)
}

pub fn script(ctx: &TaskContext<'_>, log: &mut RunLog) -> Result<()> {
    let cmd: Vec<String> = match ctx.params.get("cmd") {
        Some(toml::Value::Array(items)) => items
            .iter()
            .map(|item| scalar("cmd", item))
            .collect::<Result<_>>()?,
        Some(_) => anyhow::bail!("script `cmd` must be an array of arguments"),
        None => anyhow::bail!("script task requires a `cmd` parameter"),
    };
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("script `cmd` is empty"))?;

    // Resolve from PATH, falling back to the name as given
    let program_path = which::which(program).unwrap_or_else(|_| PathBuf::from(program));

    let mut command = Command::new(&program_path);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command = ?command, "running script");

    let output = command
        .output()
        .with_context(|| format!("Failed to spawn {}", program))?;
    log.append(&output);
    check_status(program, &output)
}
