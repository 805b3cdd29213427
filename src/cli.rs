use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Stitches - declarative, incremental GRASS GIS pipelines
///
/// Runs the tasks of a pipeline file in order, skipping every task whose
/// parameters, inputs and region are unchanged since it last ran.
#[derive(Parser, Debug)]
#[command(name = "stitches")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative, incremental GRASS GIS pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run(RunArgs),

    /// Inspect or clear the recorded fingerprints of a pipeline
    State(StateArgs),
}

/// Workspace arguments shared across commands
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "STITCHES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Initial GRASS GIS database directory
    #[arg(long, env = "STITCHES_GISDBASE")]
    pub gisdbase: Option<String>,

    /// Initial GRASS location
    #[arg(long, env = "STITCHES_LOCATION")]
    pub location: Option<String>,

    /// Initial GRASS mapset
    #[arg(long, env = "STITCHES_MAPSET")]
    pub mapset: Option<String>,

    /// Initial pipeline variables ("name=value name2=value2")
    #[arg(long)]
    pub vars: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Pipeline file
    pub pipeline: PathBuf,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Task identities to skip (repeatable, comma-separated)
    #[arg(long, value_delimiter = ',', conflicts_with = "only")]
    pub skip: Vec<String>,

    /// Force all tasks to run
    #[arg(long, conflicts_with = "only")]
    pub force: bool,

    /// Run a single task
    #[arg(long)]
    pub only: Option<String>,

    /// Task log output path
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Show every task and its outcome
    #[arg(short, long)]
    pub verbose: bool,

    /// Evaluate the pipeline without running or recording anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Pipeline file
    pub pipeline: PathBuf,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Delete all recorded fingerprints
    #[arg(long)]
    pub clear: bool,

    /// Print records as JSON
    #[arg(long, conflicts_with = "clear")]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "stitches",
            "run",
            "main.toml",
            "--location",
            "nz",
            "--skip",
            "0,2",
            "--skip",
            "1/0",
            "--vars",
            "zone=33 name=roads",
            "-v",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.pipeline, PathBuf::from("main.toml"));
        assert_eq!(args.scope.location.as_deref(), Some("nz"));
        assert_eq!(args.skip, vec!["0", "2", "1/0"]);
        assert_eq!(args.scope.vars.as_deref(), Some("zone=33 name=roads"));
        assert!(args.verbose);
        assert!(!args.force);
    }

    #[test]
    fn test_only_conflicts_with_force() {
        assert!(Cli::try_parse_from(["stitches", "run", "p.toml", "--only", "1", "--force"]).is_err());
        assert!(Cli::try_parse_from(["stitches", "run", "p.toml", "--only", "1", "--skip", "0"]).is_err());
    }
}
