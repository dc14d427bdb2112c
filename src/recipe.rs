//! Wires registry contributions into the `build`, `package` and `clean:dist` tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::assemble::{KindPipeline, PageAssembler};
use crate::compose;
use crate::config::{DEFAULT_BUILD_TASK, DEFAULT_CLEAN_DIST_TASK, EffectiveConfig};
use crate::error::PipeminError;
use crate::observability::{MetricsCollector, SizeReport, log_size};
use crate::output::{package_dir, remove_dir, write_dest};
use crate::pipeline::{Pipeline, Transform};
use crate::registry::{PipeRegistry, stage};
use crate::source::SourceSet;
use crate::tasks::{Dependencies, Runner, TaskRunner, maybe_register};
use crate::transforms::{SortFiles, TransformCatalog};

/// Registers the pipes this recipe contributes itself.
pub fn contribute(
    root: &Path,
    config: &Arc<EffectiveConfig>,
    catalog: &TransformCatalog,
    registry: &mut PipeRegistry,
) -> Result<()> {
    let sources = &config.sources;
    let assets = SourceSet::new(
        root,
        sources
            .assets
            .iter()
            .chain(sources.raw_assets.iter())
            .cloned(),
    );
    registry.register(stage::ASSET, 0.0, assets.pipeline("assetRaw"));
    registry.register(
        stage::POST_ASSET,
        config.order.asset_sort,
        Pipeline::step("postAssetSort", || {
            Ok(Box::new(SortFiles::new()) as Box<dyn Transform>)
        }),
    );
    registry.register(
        stage::BUILD,
        0.0,
        SourceSet::new(root, sources.build.iter().cloned()).pipeline("buildRaw"),
    );

    let minify = config.order.pipemin_minify;
    let options = &config.pipemin_build;
    registry.register(
        stage::PROCESS_JS,
        minify,
        catalog.pipeline("minify-js", options.uglify.clone(), config.clone())?,
    );
    registry.register(
        stage::PROCESS_CSS,
        minify,
        catalog.pipeline("minify-css", options.csso.clone(), config.clone())?,
    );
    registry.register(
        stage::PROCESS_HTML,
        minify,
        catalog.pipeline("minify-html", options.html_minify.clone(), config.clone())?,
    );
    Ok(())
}

/// Registers the `pipes` entries of the configuration.
pub fn register_configured_pipes(
    config: &Arc<EffectiveConfig>,
    catalog: &TransformCatalog,
    registry: &mut PipeRegistry,
) -> Result<()> {
    for (idx, spec) in config.pipes.iter().enumerate() {
        if !stage::is_known(&spec.stage) {
            warn!(
                stage = spec.stage.as_str(),
                "Pipe registered against a stage no pipeline reads"
            );
        }
        let pipeline = catalog
            .pipeline(
                &spec.transform,
                spec.params.clone().unwrap_or_default(),
                config.clone(),
            )
            .map_err(|err| PipeminError::configuration(format!("pipes[{idx}]: {err}")))?;
        registry.register(spec.stage.clone(), spec.order, pipeline);
    }
    Ok(())
}

pub struct Recipe {
    root: PathBuf,
    config: Arc<EffectiveConfig>,
    registry: Arc<PipeRegistry>,
    metrics: MetricsCollector,
}

impl Recipe {
    pub fn new(
        root: impl Into<PathBuf>,
        config: Arc<EffectiveConfig>,
        registry: Arc<PipeRegistry>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            registry,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn registry(&self) -> &PipeRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.pipemin_dist)
    }

    pub fn package_path(&self) -> PathBuf {
        self.root.join(&self.config.paths.pipemin_package)
    }

    /// The asset side-input: raw assets unioned, then the post-asset steps.
    pub fn asset_pipeline(&self) -> Pipeline {
        compose::merged(&self.registry.get(stage::ASSET))
            .then(compose::sequential(&self.registry.get(stage::POST_ASSET)))
    }

    /// Index sources through `preBuild` and the page assembler.
    pub fn pipemin_pipeline(&self) -> Pipeline {
        let registry = &self.registry;
        let order = &self.config.order;
        let assets = self.asset_pipeline();
        let script = KindPipeline::script(registry, order);
        let style = KindPipeline::style(registry, order);
        let markup = KindPipeline::markup(registry);
        let metrics = self.metrics.clone();

        let assembler = Pipeline::step("pipemin", move || {
            Ok(Box::new(PageAssembler::new(
                assets.clone(),
                script.clone(),
                style.clone(),
                markup.clone(),
                metrics.clone(),
            )) as Box<dyn Transform>)
        });

        SourceSet::new(&self.root, self.config.sources.index.iter().cloned())
            .pipeline("index")
            .then(compose::sequential(&registry.get(stage::PRE_BUILD)))
            .then(assembler)
    }

    /// Files appended by `build` producers, then `postBuild`.
    pub fn raw_build_pipeline(&self) -> Pipeline {
        compose::merged(&self.registry.get(stage::BUILD))
            .then(compose::sequential(&self.registry.get(stage::POST_BUILD)))
    }

    /// The whole build stream, composed from the registry as it is now.
    pub fn build_pipeline(&self) -> Pipeline {
        compose::merge_of([self.pipemin_pipeline(), self.raw_build_pipeline()])
            .then(compose::sequential(&self.registry.get(stage::POST_MERGE)))
    }

    #[instrument(skip(self), fields(dist = %self.dist_dir().display()))]
    pub fn build(&self) -> Result<SizeReport> {
        let started = Instant::now();
        let output = self.build_pipeline().run_with(Vec::new(), &self.metrics)?;
        write_dest(&output, &self.dist_dir())?;
        let report = log_size("build", &output);
        self.metrics.record_output(&report);
        self.metrics.record_total_duration(started.elapsed());
        Ok(report)
    }

    #[instrument(skip(self), fields(archive = %self.package_path().display()))]
    pub fn package(&self) -> Result<usize> {
        let dist = self.dist_dir();
        let archive = self.package_path();
        let files = package_dir(&dist, &archive)
            .with_context(|| format!("Failed to package {}", dist.display()))?;
        info!(files, "Package written");
        Ok(files)
    }

    #[instrument(skip(self))]
    pub fn clean_dist(&self) -> Result<()> {
        let dist = self.dist_dir();
        if let (Ok(dist), Ok(root)) = (dist.canonicalize(), self.root.canonicalize())
            && root.starts_with(&dist)
        {
            return Err(PipeminError::configuration(format!(
                "Refusing to remove '{}': it contains the working directory",
                dist.display()
            ))
            .into());
        }
        remove_dir(&dist)?;
        Ok(())
    }

    /// Exposes the three tasks under their configured names.
    ///
    /// Each task may be disabled on its own; dependents keep referring to it
    /// by its default name.
    pub fn bind<R>(self: &Arc<Self>, runner: &mut R)
    where
        R: TaskRunner + ?Sized,
    {
        let tasks = &self.config.tasks;

        let recipe = self.clone();
        maybe_register(
            runner,
            &tasks.pipemin_build,
            tasks
                .pipemin_clean_dist
                .dependency_name(DEFAULT_CLEAN_DIST_TASK),
            Arc::new(move || recipe.build().map(|_| ())),
        );

        let recipe = self.clone();
        maybe_register(
            runner,
            &tasks.pipemin_package,
            tasks.pipemin_build.dependency_name(DEFAULT_BUILD_TASK),
            Arc::new(move || recipe.package().map(|_| ())),
        );

        let recipe = self.clone();
        maybe_register(
            runner,
            &tasks.pipemin_clean_dist,
            Dependencies::none(),
            Arc::new(move || recipe.clean_dist()),
        );
    }
}

/// A recipe bound to a runner, ready to execute tasks.
pub struct Project {
    pub recipe: Arc<Recipe>,
    pub runner: Runner,
}

impl Project {
    /// Registers recipe and configured pipes, then binds the tasks.
    pub fn setup(
        root: impl Into<PathBuf>,
        config: EffectiveConfig,
        catalog: &TransformCatalog,
    ) -> Result<Self> {
        let root = root.into();
        let config = Arc::new(config);

        let mut registry = PipeRegistry::new();
        contribute(&root, &config, catalog, &mut registry)?;
        register_configured_pipes(&config, catalog, &mut registry)?;

        let recipe = Arc::new(Recipe::new(root, config, Arc::new(registry)));
        let mut runner = Runner::new();
        recipe.bind(&mut runner);

        for dangling in runner.dangling_dependencies() {
            warn!(
                task = dangling.task.as_str(),
                dependency = dangling.dependency.as_str(),
                "Task depends on a task that is not registered"
            );
        }

        Ok(Self { recipe, runner })
    }

    pub fn run(&self, tasks: &[String]) -> Result<()> {
        self.runner.run_all(tasks)
    }
}
