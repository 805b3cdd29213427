//! Pipeline documents, resource references and flattening

pub mod definition;
pub mod flatten;
pub mod resource;
pub mod template;

pub use definition::{PipelineDocument, TaskKind, TaskRecord};
pub use flatten::{
    FileSource, FlatPipeline, FlatTask, Flattener, MemorySource, PipelineSource, ScopeOverrides,
    Target,
};
pub use resource::{Locator, Resource, ResourceKind, ResourceRef};
pub use template::Vars;
