use serde::Serialize;

use crate::config::{EffectiveConfig, PipeSpec};
use crate::registry::stage;
use crate::tasks::Runner;
use crate::transforms::TransformCatalog;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_config(config: &EffectiveConfig, catalog: &TransformCatalog) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.paths.pipemin_dist.as_os_str().is_empty() {
        report.errors.push("paths.pipeminDist cannot be empty".into());
    }

    let package = &config.paths.pipemin_package;
    if package.as_os_str().is_empty() {
        report
            .errors
            .push("paths.pipeminPackage cannot be empty".into());
    } else if package.extension().and_then(|e| e.to_str()) != Some("zip") {
        report.warnings.push(format!(
            "paths.pipeminPackage '{}' does not end in .zip",
            package.display()
        ));
    }

    for ext in &config.rev_replace_extensions {
        if !ext.starts_with('.') {
            report.warnings.push(format!(
                "revReplaceExtensions entry '{ext}' has no leading dot and will never match"
            ));
        }
    }

    for (label, patterns) in [
        ("index", &config.sources.index),
        ("assets", &config.sources.assets),
        ("build", &config.sources.build),
        ("rawAssets", &config.sources.raw_assets),
    ] {
        for pattern in patterns {
            if let Err(err) = glob::Pattern::new(pattern) {
                report.errors.push(format!(
                    "sources.{label} pattern '{pattern}' is not a valid glob: {err}"
                ));
            }
        }
    }

    let tasks = &config.tasks;
    if !tasks.pipemin_build.is_enabled()
        && !tasks.pipemin_clean_dist.is_enabled()
        && !tasks.pipemin_package.is_enabled()
    {
        report
            .warnings
            .push("All tasks are disabled; the recipe exposes nothing".into());
    }

    for (idx, spec) in config.pipes.iter().enumerate() {
        report.merge(validate_pipe(idx, spec, config, catalog));
    }

    report
}

fn validate_pipe(
    idx: usize,
    spec: &PipeSpec,
    config: &EffectiveConfig,
    catalog: &TransformCatalog,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let label = format!("pipes[{}] ('{}' on '{}')", idx, spec.transform, spec.stage);

    if !stage::is_known(&spec.stage) {
        report.errors.push(format!(
            "{label}: unknown stage; expected one of {}",
            stage::ALL.join(", ")
        ));
    }
    if !spec.order.is_finite() {
        report.errors.push(format!("{label}: order must be finite"));
    }

    let params = spec.params.clone().unwrap_or_default();
    if let Err(err) = catalog.create(&spec.transform, params, config) {
        report
            .errors
            .push(format!("{label}: {:#}", err.context("Failed to instantiate transform")));
    }

    report
}

/// Warnings for dependencies on tasks the runner does not know.
pub fn validate_tasks(runner: &Runner) -> ValidationReport {
    let mut report = ValidationReport::default();
    for dangling in runner.dangling_dependencies() {
        report.warnings.push(format!(
            "Task '{}' depends on '{}', which is not registered; running it will fail",
            dangling.task, dangling.dependency
        ));
    }
    report
}
