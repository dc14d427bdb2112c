use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{Level, instrument};

use crate::error::PipeminError;
use crate::observability::MetricsCollector;

/// A single file flowing through a pipeline.
///
/// `relative` is the path below `base`; persistence writes it below the
/// destination directory unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub base: PathBuf,
    pub relative: PathBuf,
    pub contents: Vec<u8>,
    pub metadata: Map<String, Value>,
}

impl Artifact {
    pub fn new(relative: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            base: PathBuf::new(),
            relative: relative.into(),
            contents: contents.into(),
            metadata: Map::new(),
        }
    }

    pub fn load(base: &Path, path: &Path) -> Result<Self> {
        let contents =
            fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        let relative = path
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or(path.as_os_str())));

        let mut metadata = Map::new();
        metadata.insert(
            "source_path".to_string(),
            Value::String(path.to_string_lossy().to_string()),
        );

        Ok(Self {
            base: base.to_path_buf(),
            relative,
            contents,
            metadata,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.base.join(&self.relative)
    }

    /// Relative path with `/` separators, the form used inside markup and archives.
    pub fn relative_str(&self) -> String {
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Lowercased extension including the leading dot.
    pub fn extension(&self) -> Option<String> {
        self.relative
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_path(&self.relative)
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.contents)
            .with_context(|| format!("File is not valid UTF-8: {}", self.relative.display()))
    }

    pub fn replace_contents(&mut self, contents: impl Into<Vec<u8>>) {
        self.contents = contents.into();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Script,
    Style,
    Markup,
    Other,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "mjs" => FileKind::Script,
            "css" => FileKind::Style,
            "html" | "htm" => FileKind::Markup,
            _ => FileKind::Other,
        }
    }
}

/// A unit of stream processing, produced by a [`TransformFactory`] right
/// before it runs.
pub trait Transform: Send {
    fn name(&self) -> &str;
    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>>;
}

pub type TransformFactory = Arc<dyn Fn() -> Result<Box<dyn Transform>> + Send + Sync>;

type StreamFn = Arc<dyn Fn(Vec<Artifact>) -> Result<Vec<Artifact>> + Send + Sync>;

struct FnTransform {
    name: String,
    f: StreamFn,
}

impl Transform for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        (self.f)(input)
    }
}

#[derive(Clone)]
pub struct Step {
    name: String,
    factory: TransformFactory,
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: Vec<Artifact>, metrics: &MetricsCollector) -> Result<Vec<Artifact>> {
        let span = tracing::span!(Level::DEBUG, "fragment", fragment = self.name.as_str());
        let _span_guard = span.enter();
        let _timer = metrics.start_fragment(&self.name);

        let fail = |source: anyhow::Error| PipeminError::FragmentExecution {
            fragment: self.name.clone(),
            source,
        };
        let transform = (self.factory)().map_err(fail)?;
        tracing::trace!(transform = transform.name(), inputs = input.len(), "Applying");
        let output = transform.apply(input).map_err(fail)?;
        Ok(output)
    }
}

/// A lazily built pipeline. Factories inside it run only from [`Pipeline::run`].
#[derive(Clone, Default)]
pub enum Pipeline {
    /// Passes the stream through unchanged.
    #[default]
    Identity,
    Step(Step),
    /// Each element consumes the previous one's output.
    Sequential(Vec<Pipeline>),
    /// Each branch consumes a copy of the input; outputs are concatenated.
    Merged(Vec<Pipeline>),
}

impl Pipeline {
    pub fn step<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Transform>> + Send + Sync + 'static,
    {
        Pipeline::Step(Step {
            name: name.into(),
            factory: Arc::new(factory),
        })
    }

    /// Step backed by a plain stream function.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Artifact>) -> Result<Vec<Artifact>> + Send + Sync + 'static,
    {
        let name = name.into();
        let f: StreamFn = Arc::new(f);
        let transform_name = name.clone();
        Pipeline::step(name, move || {
            Ok(Box::new(FnTransform {
                name: transform_name.clone(),
                f: f.clone(),
            }) as Box<dyn Transform>)
        })
    }

    /// Chains `next` after `self`, flattening nested sequences.
    pub fn then(self, next: Pipeline) -> Pipeline {
        match (self, next) {
            (Pipeline::Identity, next) => next,
            (current, Pipeline::Identity) => current,
            (Pipeline::Sequential(mut steps), Pipeline::Sequential(more)) => {
                steps.extend(more);
                Pipeline::Sequential(steps)
            }
            (Pipeline::Sequential(mut steps), next) => {
                steps.push(next);
                Pipeline::Sequential(steps)
            }
            (current, Pipeline::Sequential(more)) => {
                let mut steps = Vec::with_capacity(more.len() + 1);
                steps.push(current);
                steps.extend(more);
                Pipeline::Sequential(steps)
            }
            (current, next) => Pipeline::Sequential(vec![current, next]),
        }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            Pipeline::Identity => true,
            Pipeline::Sequential(steps) => steps.iter().all(Pipeline::is_identity),
            _ => false,
        }
    }

    /// Step names in execution order; merged branches are listed in branch order.
    pub fn describe(&self) -> Vec<String> {
        match self {
            Pipeline::Identity => Vec::new(),
            Pipeline::Step(step) => vec![step.name.clone()],
            Pipeline::Sequential(parts) | Pipeline::Merged(parts) => {
                parts.iter().flat_map(Pipeline::describe).collect()
            }
        }
    }

    pub fn run(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        self.run_with(input, &MetricsCollector::new())
    }

    #[instrument(level = "trace", skip_all, fields(inputs = input.len()))]
    pub fn run_with(&self, input: Vec<Artifact>, metrics: &MetricsCollector) -> Result<Vec<Artifact>> {
        match self {
            Pipeline::Identity => Ok(input),
            Pipeline::Step(step) => step.execute(input, metrics),
            Pipeline::Sequential(steps) => steps
                .iter()
                .try_fold(input, |stream, step| step.run_with(stream, metrics)),
            Pipeline::Merged(branches) => {
                let mut output = Vec::new();
                for branch in branches {
                    output.extend(branch.run_with(input.clone(), metrics)?);
                }
                Ok(output)
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::Identity => f.write_str("Identity"),
            Pipeline::Step(step) => f.debug_tuple("Step").field(&step.name).finish(),
            Pipeline::Sequential(steps) => f.debug_tuple("Sequential").field(steps).finish(),
            Pipeline::Merged(branches) => f.debug_tuple("Merged").field(branches).finish(),
        }
    }
}

