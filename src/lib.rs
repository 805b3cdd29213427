// Library interface for Stitches
// The binary, integration tests and embedders all drive the engine through these modules

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod config_expansion;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod workspace;

// Re-export commonly used types
pub use cache::{Directives, HashMethod, StateStore, TaskStatus};
pub use config::StitchesConfig;
pub use dispatch::{Dispatcher, RunLog, TaskContext, TaskRegistry};
pub use error::{DispatchFailure, StitchesError};
pub use pipeline::{FlatPipeline, Flattener};
pub use runner::{RunOptions, RunReport, Runner};
pub use workspace::{Scope, Workspace};
