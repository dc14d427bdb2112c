use std::collections::HashMap;

use tracing::debug;

use crate::pipeline::Pipeline;

/// Stage names other producers register fragments against.
pub mod stage {
    pub const ASSET: &str = "asset";
    pub const POST_ASSET: &str = "postAsset";
    pub const BUILD: &str = "build";
    pub const PRE_BUILD: &str = "preBuild";
    pub const POST_BUILD: &str = "postBuild";
    pub const POST_MERGE: &str = "postMerge";
    pub const PROCESS_JS: &str = "processJs";
    pub const PROCESS_CSS: &str = "processCss";
    pub const PROCESS_HTML: &str = "processHtml";

    pub const ALL: [&str; 9] = [
        ASSET,
        POST_ASSET,
        BUILD,
        PRE_BUILD,
        POST_BUILD,
        POST_MERGE,
        PROCESS_JS,
        PROCESS_CSS,
        PROCESS_HTML,
    ];

    pub fn is_known(name: &str) -> bool {
        ALL.contains(&name)
    }
}

/// Lower runs earlier.
pub type Order = f64;

#[derive(Debug, Clone)]
pub struct Fragment {
    pub order: Order,
    pub pipeline: Pipeline,
}

impl Fragment {
    pub fn new(order: Order, pipeline: Pipeline) -> Self {
        Self { order, pipeline }
    }
}

/// Fragments grouped by stage name, in registration order.
///
/// Filled during a single-threaded registration phase; share it behind an
/// `Arc` once composition starts.
#[derive(Debug, Default)]
pub struct PipeRegistry {
    stages: HashMap<String, Vec<Fragment>>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: impl Into<String>, order: Order, pipeline: Pipeline) {
        let stage = stage.into();
        debug!(
            stage = stage.as_str(),
            order,
            steps = ?pipeline.describe(),
            "Registering pipe fragment"
        );
        self.stages
            .entry(stage)
            .or_default()
            .push(Fragment::new(order, pipeline));
    }

    pub fn get(&self, stage: &str) -> Vec<Fragment> {
        self.stages.get(stage).cloned().unwrap_or_default()
    }

    pub fn known_stages(&self) -> Vec<String> {
        let mut names: Vec<_> = self.stages.keys().cloned().collect();
        names.sort();
        names
    }
}
