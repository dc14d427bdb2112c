use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use pipemin::config::EffectiveConfig;
use pipemin::observability::log_snapshot;
use pipemin::plan::{build_plan, write_plan};
use pipemin::recipe::Project;
use pipemin::transforms::TransformCatalog;
use pipemin::validation::{validate_config, validate_tasks};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    let root = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let config = EffectiveConfig::load(&root, cli.config.as_deref())?;
    let catalog = TransformCatalog::default();

    match cli.command {
        Commands::Run {
            tasks,
            print_metrics,
            metrics_json,
        } => run_tasks(root, config, &catalog, tasks, print_metrics, metrics_json),
        Commands::Tasks => list_tasks(root, config, &catalog),
        Commands::Plan { output } => plan_command(root, config, &catalog, output),
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
        Commands::Validate => validate_command(root, config, &catalog),
        Commands::ListTransforms => {
            println!("Available transforms:");
            for name in catalog.known_transforms() {
                println!("- {name}");
            }
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn run_tasks(
    root: PathBuf,
    config: EffectiveConfig,
    catalog: &TransformCatalog,
    tasks: Vec<String>,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
) -> Result<()> {
    let default_task = config.tasks.pipemin_build.name().map(str::to_string);
    let project = Project::setup(root, config, catalog)?;

    let tasks = if tasks.is_empty() {
        match default_task {
            Some(name) => vec![name],
            None => bail!("No task given and the build task is disabled"),
        }
    } else {
        tasks
    };

    project.run(&tasks)?;

    if print_metrics || metrics_json.is_some() {
        let snapshot = project.recipe.metrics().snapshot();
        if print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = metrics_json {
            create_parent(&path)?;
            let file = File::create(&path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
    }

    Ok(())
}

fn list_tasks(root: PathBuf, config: EffectiveConfig, catalog: &TransformCatalog) -> Result<()> {
    let project = Project::setup(root, config, catalog)?;
    println!("Registered tasks:");
    for (name, entry) in project.runner.tasks() {
        if entry.dependencies.is_empty() {
            println!("- {name}");
        } else {
            println!("- {name} (after {})", entry.dependencies.join(", "));
        }
    }
    Ok(())
}

fn plan_command(
    root: PathBuf,
    config: EffectiveConfig,
    catalog: &TransformCatalog,
    output: Option<PathBuf>,
) -> Result<()> {
    let project = Project::setup(root, config, catalog)?;
    let plan = build_plan(
        project.recipe.config(),
        project.recipe.registry(),
        &project.runner,
    )?;
    match output {
        Some(path) => {
            create_parent(&path)?;
            write_plan(&plan, &path)?;
            info!(plan = %path.display(), "Build plan written");
        }
        None => print!("{}", serde_yaml::to_string(&plan)?),
    }
    Ok(())
}

fn validate_command(
    root: PathBuf,
    config: EffectiveConfig,
    catalog: &TransformCatalog,
) -> Result<()> {
    let mut report = validate_config(&config, catalog);
    if report.is_ok() {
        let project = Project::setup(root, config, catalog)?;
        report.merge(validate_tasks(&project.runner));
    }

    for warning in &report.warnings {
        warn!("{warning}");
    }
    if report.is_ok() {
        info!("Configuration validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!("{error_msg}");
        }
        Err(anyhow!(
            "Configuration validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "pipemin",
    version,
    about = "Composable build recipe with ordered pipe hooks"
)]
struct Cli {
    /// Configuration file (defaults to pipemin.yaml when present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
    /// Working directory sources and outputs are resolved against
    #[arg(long = "cwd", short = 'C', global = true)]
    cwd: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks and their dependencies (default: the build task)
    Run {
        tasks: Vec<String>,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
    },
    /// List registered tasks
    Tasks,
    /// Print or write the composed build plan
    Plan {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
    Validate,
    ListTransforms,
}
