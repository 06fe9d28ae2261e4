//! cadence CLI - Test action orchestration engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cadence::config::{self, Config};
use cadence::context::ContextFactory;
use cadence::orchestrator::{Orchestrator, TestCase};
use cadence::plan::load_plan;
use cadence::registry::Registry;
use cadence::report::{ConsoleReporter, JUnitReporter, MultiReporter};
use cadence::scheduler::Scheduler;

const DEFAULT_CONFIG_FILE: &str = "cadence.toml";

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Test action orchestration engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: cadence.toml, if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tests of one or more plan files
    Run {
        /// Plan files
        #[arg(required = true)]
        plans: Vec<PathBuf>,

        /// Override the number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// Check plan files without running them
    Validate {
        /// Plan files
        #[arg(required = true)]
        plans: Vec<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a configuration file with the default settings
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            plans,
            workers,
            junit,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(workers) = workers {
                config.engine.max_workers = workers;
            }
            let code = run_tests(config, &plans, junit, cli.verbose)?;
            std::process::exit(code);
        }
        Commands::Validate { plans, format } => {
            validate_plans(&load_config(cli.config.as_deref())?, &plans, &format)
        }
        Commands::Init => init_config(),
    }
}

/// Loads the given configuration file, or `cadence.toml` when it exists,
/// or the defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
        None => return Ok(Config::default()),
    };

    let config = config::load_config(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn load_tests(plans: &[PathBuf], registry: &Registry) -> Result<Vec<TestCase>> {
    let mut tests = Vec::new();
    for path in plans {
        let built = load_plan(path)?
            .build(registry)
            .with_context(|| format!("Invalid plan: {}", path.display()))?;
        info!("Loaded {} test(s) from {}", built.len(), path.display());
        tests.extend(built);
    }
    Ok(tests)
}

fn run_tests(
    config: Config,
    plans: &[PathBuf],
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.engine.max_workers.max(1))
        .enable_all()
        .build()
        .context("Failed to start worker pool")?;

    runtime.block_on(async {
        let registry =
            Registry::with_builtins(&config.engine).context("Invalid engine configuration")?;
        let tests = load_tests(plans, &registry)?;

        let reporter = create_reporter(&config, junit_path, verbose);
        let factory = ContextFactory::new(Scheduler::current());
        let orchestrator = Orchestrator::new(config.engine.clone(), factory, reporter);

        let result = orchestrator.run(&tests).await;
        if !orchestrator.shutdown().await {
            warn!("Some background work had to be aborted at shutdown");
        }
        Ok::<_, anyhow::Error>(result.exit_code())
    })
}

/// Tests found in one plan file, as printed by `validate --format json`.
#[derive(Serialize)]
struct PlanSummary {
    path: PathBuf,
    tests: Vec<String>,
}

fn validate_plans(config: &Config, plans: &[PathBuf], format: &str) -> Result<()> {
    let registry =
        Registry::with_builtins(&config.engine).context("Invalid engine configuration")?;

    let mut summaries = Vec::with_capacity(plans.len());
    let mut failed = false;
    for path in plans {
        match load_plan(path).and_then(|plan| {
            plan.build(&registry)
                .with_context(|| format!("Invalid plan: {}", path.display()))
        }) {
            Ok(tests) => summaries.push(PlanSummary {
                path: path.clone(),
                tests: tests.iter().map(|t| t.name().to_string()).collect(),
            }),
            Err(e) => {
                eprintln!("{:#}", e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&summaries)?;
            println!("{}", json);
        }
        _ => {
            for summary in &summaries {
                println!("{}: {} test(s)", summary.path.display(), summary.tests.len());
                for name in &summary.tests {
                    println!("  {}", name);
                }
            }
            println!("Plans are valid!");
        }
    }
    Ok(())
}

fn init_config() -> Result<()> {
    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if path.exists() {
        eprintln!("{DEFAULT_CONFIG_FILE} already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    let content = toml::to_string_pretty(&Config::default())
        .context("Failed to render default configuration")?;
    std::fs::write(&path, format!("# cadence configuration file\n\n{}", content))?;
    println!("Created {DEFAULT_CONFIG_FILE}");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  cadence run <plan.toml>");

    Ok(())
}

fn create_reporter(
    config: &Config,
    junit_override: Option<PathBuf>,
    verbose: bool,
) -> MultiReporter {
    let mut multi = MultiReporter::new().with_reporter(ConsoleReporter::new(verbose));

    let junit_path = junit_override.or_else(|| {
        config
            .report
            .junit
            .then(|| config.report.output_dir.join(&config.report.junit_file))
    });
    if let Some(path) = junit_path {
        multi = multi.with_reporter(JUnitReporter::new(path));
    }

    multi
}
