pub mod assemble;
pub mod compose;
pub mod config;
pub mod error;
pub mod observability;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod recipe;
pub mod registry;
pub mod source;
pub mod tasks;
pub mod transforms;
pub mod validation;

pub use config::EffectiveConfig;
pub use error::PipeminError;
pub use pipeline::{Artifact, Pipeline, Transform};
pub use recipe::{Project, Recipe};
pub use registry::{Fragment, PipeRegistry};
pub use tasks::{Runner, TaskName, TaskRunner, maybe_register};
pub use transforms::TransformCatalog;
