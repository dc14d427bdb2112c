use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::compose;
use crate::config::EffectiveConfig;
use crate::registry::{PipeRegistry, stage};
use crate::tasks::Runner;

/// Snapshot of what a build would run, in execution order.
#[derive(Debug, Serialize)]
pub struct BuildPlan {
    pub generated_at: DateTime<Utc>,
    pub config_hash: String,
    pub stages: Vec<StagePlan>,
    pub tasks: Vec<TaskPlan>,
}

#[derive(Debug, Serialize)]
pub struct StagePlan {
    pub name: String,
    pub composition: Composition,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Composition {
    Merged,
    Sequential,
}

impl Composition {
    pub fn of(stage_name: &str) -> Self {
        match stage_name {
            stage::ASSET | stage::BUILD => Composition::Merged,
            _ => Composition::Sequential,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskPlan {
    pub name: String,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

pub fn build_plan(
    config: &EffectiveConfig,
    registry: &PipeRegistry,
    runner: &Runner,
) -> Result<BuildPlan> {
    let mut names: Vec<String> = stage::ALL.iter().map(|s| s.to_string()).collect();
    for extra in registry.known_stages() {
        if !names.contains(&extra) {
            names.push(extra);
        }
    }

    let stages = names
        .into_iter()
        .map(|name| {
            let fragments = registry.get(&name);
            let composition = Composition::of(&name);
            let pipeline = match composition {
                Composition::Merged => compose::merged(&fragments),
                Composition::Sequential => compose::sequential(&fragments),
            };
            StagePlan {
                name,
                composition,
                steps: pipeline.describe(),
            }
        })
        .collect();

    let dangling = runner.dangling_dependencies();
    let tasks = runner
        .tasks()
        .map(|(name, entry)| TaskPlan {
            name: name.to_string(),
            dependencies: entry.dependencies.clone(),
            missing: dangling
                .iter()
                .filter(|d| d.task == name)
                .map(|d| d.dependency.clone())
                .collect(),
        })
        .collect();

    Ok(BuildPlan {
        generated_at: Utc::now(),
        config_hash: hash_config(config)?,
        stages,
        tasks,
    })
}

pub fn write_plan(plan: &BuildPlan, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create plan file: {}", path.display()))?;
    serde_yaml::to_writer(file, plan)
        .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
    Ok(())
}

pub fn hash_config(config: &EffectiveConfig) -> Result<String> {
    let serialized = serde_json::to_vec(config).context("Failed to serialize configuration")?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(format!("{:x}", hasher.finalize()))
}
