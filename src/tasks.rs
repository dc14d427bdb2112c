//! Conditional task registration and the runner that executes tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::PipeminError;

/// A configured task name: a non-empty string enables the task, `""` or
/// `false` removes it from the recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum TaskName {
    Enabled(String),
    Disabled,
}

impl TaskName {
    pub fn name(&self) -> Option<&str> {
        match self {
            TaskName::Enabled(name) => Some(name),
            TaskName::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, TaskName::Enabled(_))
    }

    /// Name other tasks use to depend on this one. A disabled task is still
    /// referenced by `default`, so the dependency dangles instead of vanishing.
    pub fn dependency_name(&self, default: &str) -> String {
        self.name().unwrap_or(default).to_string()
    }
}

impl From<&str> for TaskName {
    fn from(name: &str) -> Self {
        if name.is_empty() {
            TaskName::Disabled
        } else {
            TaskName::Enabled(name.to_string())
        }
    }
}

impl TryFrom<Value> for TaskName {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(TaskName::from(name.as_str())),
            Value::Bool(false) | Value::Null => Ok(TaskName::Disabled),
            other => Err(format!(
                "task name must be a string, or false to disable the task (got {other})"
            )),
        }
    }
}

impl From<TaskName> for Value {
    fn from(name: TaskName) -> Self {
        match name {
            TaskName::Enabled(name) => Value::String(name),
            TaskName::Disabled => Value::Bool(false),
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskName::Enabled(name) => f.write_str(name),
            TaskName::Disabled => f.write_str("<disabled>"),
        }
    }
}

/// Dependency names, given either as one name or as a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies(Vec<String>);

impl Dependencies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Dependencies {
    fn from(name: &str) -> Self {
        Dependencies(vec![name.to_string()])
    }
}

impl From<String> for Dependencies {
    fn from(name: String) -> Self {
        Dependencies(vec![name])
    }
}

impl From<Vec<String>> for Dependencies {
    fn from(names: Vec<String>) -> Self {
        Dependencies(names)
    }
}

impl From<Vec<&str>> for Dependencies {
    fn from(names: Vec<&str>) -> Self {
        Dependencies(names.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Dependencies {
    fn from(names: [&str; N]) -> Self {
        Dependencies(names.iter().map(|n| n.to_string()).collect())
    }
}

pub type TaskBody = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// The executor tasks are exposed to.
pub trait TaskRunner {
    fn register_task(&mut self, name: &str, dependencies: Vec<String>, body: TaskBody);
}

/// Registers `body` under `name` unless the name is disabled.
///
/// Returns whether a task was registered.
pub fn maybe_register<R>(
    runner: &mut R,
    name: &TaskName,
    dependencies: impl Into<Dependencies>,
    body: TaskBody,
) -> bool
where
    R: TaskRunner + ?Sized,
{
    match name {
        TaskName::Enabled(name) => {
            let dependencies = dependencies.into().into_vec();
            debug!(task = name.as_str(), ?dependencies, "Registering task");
            runner.register_task(name, dependencies, body);
            true
        }
        TaskName::Disabled => {
            debug!("Task disabled by configuration; skipping registration");
            false
        }
    }
}

#[derive(Clone)]
pub struct TaskEntry {
    pub dependencies: Vec<String>,
    body: TaskBody,
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDependency {
    pub task: String,
    pub dependency: String,
}

/// Runs registered tasks after their dependencies.
#[derive(Debug, Default)]
pub struct Runner {
    tasks: BTreeMap<String, TaskEntry>,
}

impl TaskRunner for Runner {
    fn register_task(&mut self, name: &str, dependencies: Vec<String>, body: TaskBody) {
        self.tasks
            .insert(name.to_string(), TaskEntry { dependencies, body });
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, name: &str) -> Option<&TaskEntry> {
        self.tasks.get(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn tasks(&self) -> impl Iterator<Item = (&str, &TaskEntry)> {
        self.tasks.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn dangling_dependencies(&self) -> Vec<DanglingDependency> {
        self.tasks
            .iter()
            .flat_map(|(task, entry)| {
                entry
                    .dependencies
                    .iter()
                    .filter(|dep| !self.tasks.contains_key(dep.as_str()))
                    .map(move |dep| DanglingDependency {
                        task: task.clone(),
                        dependency: dep.clone(),
                    })
            })
            .collect()
    }

    /// Runs `name` after its dependencies; each task runs at most once.
    pub fn run(&self, name: &str) -> Result<()> {
        self.run_all(&[name.to_string()])
    }

    pub fn run_all(&self, names: &[String]) -> Result<()> {
        let mut completed = BTreeSet::new();
        let mut active = Vec::new();
        for name in names {
            if !self.tasks.contains_key(name) {
                return Err(PipeminError::UnknownTask { name: name.clone() }.into());
            }
            self.visit(name, &mut completed, &mut active)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        name: &str,
        completed: &mut BTreeSet<String>,
        active: &mut Vec<String>,
    ) -> Result<()> {
        if completed.contains(name) {
            return Ok(());
        }
        if active.iter().any(|a| a == name) {
            anyhow::bail!(
                "Task '{}' depends on itself through {}",
                name,
                active.join(" -> ")
            );
        }
        let entry = self
            .tasks
            .get(name)
            .ok_or_else(|| PipeminError::UnknownTask {
                name: name.to_string(),
            })?;

        active.push(name.to_string());
        for dependency in &entry.dependencies {
            if !self.tasks.contains_key(dependency) {
                return Err(PipeminError::DanglingTaskDependency {
                    task: name.to_string(),
                    dependency: dependency.clone(),
                }
                .into());
            }
            self.visit(dependency, completed, active)?;
        }
        active.pop();

        self.execute(name, entry)?;
        completed.insert(name.to_string());
        Ok(())
    }

    #[instrument(skip(self, entry), fields(dependencies = ?entry.dependencies))]
    fn execute(&self, name: &str, entry: &TaskEntry) -> Result<()> {
        info!("Starting task");
        let started = std::time::Instant::now();
        (entry.body)()?;
        info!(
            duration_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "Finished task"
        );
        Ok(())
    }
}
