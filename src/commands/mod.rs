pub mod run;
pub mod state;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::ScopeArgs;
use crate::config::StitchesConfig;
use crate::pipeline::{FileSource, FlatPipeline, Flattener, ScopeOverrides, Vars};

/// Parse `--vars "name=value name2=value2"`
pub fn parse_vars(raw: Option<&str>) -> Result<Vars> {
    let mut vars = Vars::new();
    for pair in raw.unwrap_or_default().split_whitespace() {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid variable {:?}, expected name=value", pair))?;
        if name.is_empty() {
            anyhow::bail!("Invalid variable {:?}, empty name", pair);
        }
        vars.insert(name.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Scope fields for the root pipeline: command line (or environment) first,
/// then the config file
pub fn initial_scope(args: &ScopeArgs, config: &StitchesConfig) -> ScopeOverrides {
    ScopeOverrides {
        database: args
            .gisdbase
            .clone()
            .or_else(|| config.workspace.database.clone()),
        location: args
            .location
            .clone()
            .or_else(|| config.workspace.location.clone()),
        mapset: args
            .mapset
            .clone()
            .or_else(|| config.workspace.mapset.clone()),
    }
}

/// Config, plus the flattened pipeline at `path`
pub fn load_pipeline(path: &Path, args: &ScopeArgs) -> Result<(StitchesConfig, FlatPipeline)> {
    let config = StitchesConfig::load(args.config.as_deref())?;
    let vars = parse_vars(args.vars.as_deref())?;

    let (source, name) = FileSource::for_pipeline(path)?;
    let base_dir: PathBuf = source.root().to_path_buf();
    let pipeline = Flattener::new(&source, base_dir)
        .flatten(&name, &vars, &initial_scope(args, &config))
        .with_context(|| format!("Failed to load pipeline {}", path.display()))?;

    Ok((config, pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;

    #[test]
    fn test_parse_vars() {
        let vars = parse_vars(Some("zone=33  name=roads path=a=b")).unwrap();
        assert_eq!(vars.get("zone").map(String::as_str), Some("33"));
        assert_eq!(vars.get("name").map(String::as_str), Some("roads"));
        assert_eq!(vars.get("path").map(String::as_str), Some("a=b"));

        assert!(parse_vars(None).unwrap().is_empty());
        assert!(parse_vars(Some("novalue")).is_err());
        assert!(parse_vars(Some("=x")).is_err());
    }

    #[test]
    fn test_initial_scope_prefers_command_line() {
        let config = StitchesConfig {
            workspace: WorkspaceConfig {
                database: Some("/cfg/db".into()),
                location: Some("cfgloc".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let args = ScopeArgs {
            location: Some("cli".into()),
            ..Default::default()
        };

        let scope = initial_scope(&args, &config);
        assert_eq!(scope.database.as_deref(), Some("/cfg/db"));
        assert_eq!(scope.location.as_deref(), Some("cli"));
        assert_eq!(scope.mapset, None);
    }
}
