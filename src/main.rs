use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use infest::ast::{Printer, SourceFile};
use infest::config::Config;
use infest::coverage::CoverageIndex;
use infest::generator::{Generated, MutantGenerator};
use infest::mutation::{CommandAdapter, OutcomeKind, RunReport, Scheduler};
use infest::mutator::MutatorRegistry;

#[derive(Parser)]
#[command(name = "infest")]
#[command(version)]
#[command(about = "Mutation testing for parsed source trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate mutants, run the tests against each and report the score
    Run {
        /// Parsed source file(s) as JSON
        #[arg(long, required = true, num_args = 1..)]
        ast: Vec<PathBuf>,

        /// Line coverage JSON
        #[arg(long)]
        coverage: Option<PathBuf>,

        /// Write the full report as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the mutants that would be run, without running anything
    List {
        /// Parsed source file(s) as JSON
        #[arg(long, required = true, num_args = 1..)]
        ast: Vec<PathBuf>,

        /// Line coverage JSON
        #[arg(long)]
        coverage: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Commands::Run {
            ast,
            coverage,
            json,
        } => run(config, &ast, coverage.as_deref(), json.as_deref()).await,
        Commands::Init { force } => init(cli.config, force),
        Commands::List { ast, coverage } => list(&config, &ast, coverage.as_deref()),
    }
}

fn init(path: Option<PathBuf>, force: bool) -> Result<ExitCode> {
    let path = path
        .or_else(Config::default_config_path)
        .context("No configuration path given and no default location available")?;
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
    }
    Config::default().save(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn load_sources(paths: &[PathBuf]) -> Result<Vec<Arc<SourceFile>>> {
    paths
        .iter()
        .map(|path| SourceFile::load(path).map(Arc::new))
        .collect()
}

fn load_coverage(path: Option<&Path>) -> Result<Option<CoverageIndex>> {
    path.map(|p| {
        CoverageIndex::load(p).with_context(|| format!("Failed to load coverage from {:?}", p))
    })
    .transpose()
}

async fn run(
    config: Config,
    ast: &[PathBuf],
    coverage: Option<&Path>,
    json: Option<&Path>,
) -> Result<ExitCode> {
    let sources = load_sources(ast)?;
    let coverage = load_coverage(coverage)?.map(Arc::new);
    let registry = Arc::new(MutatorRegistry::from_config(&config.mutators)?);

    let scheduler = Scheduler::new(CommandAdapter::from_config(&config.adapter), &config)?;
    let handle = scheduler.start(sources, registry, coverage).await?;

    let token = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight mutants");
            token.cancel();
        }
    });

    let report = handle.wait().await?;
    print_report(&report);

    if let Some(json) = json {
        let contents = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(json, contents).with_context(|| format!("Failed to write report to {:?}", json))?;
        tracing::info!("Report written to {}", json.display());
    }

    if let Err(e) = report.score.check(&config.scoring) {
        tracing::error!("{}", e);
        return Ok(ExitCode::FAILURE);
    }
    if report.partial {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn list(config: &Config, ast: &[PathBuf], coverage: Option<&Path>) -> Result<ExitCode> {
    let sources = load_sources(ast)?;
    let coverage = load_coverage(coverage)?;
    let registry = MutatorRegistry::from_config(&config.mutators)?;
    let printer = Printer::new(config.printer.clone());

    let mut count = 0;
    for source in &sources {
        let generator = MutantGenerator::new(source, &registry)
            .with_coverage(coverage.as_ref(), config.run.only_covered);
        for item in generator.iter() {
            let (label, mutant) = match &item {
                Generated::Mutant(m) => ("", m),
                Generated::NotCovered(m) => (" [not covered]", m),
                Generated::Skipped(m) => (" [ignored]", m),
                Generated::Fault(d) => {
                    println!("! {} at {} ({}): {}", d.operator, d.file.display(), d.path, d.message);
                    continue;
                }
            };
            count += 1;
            let replacement = printer
                .print_with_source(&mutant.replacement, &source.text)
                .unwrap_or_else(|e| format!("<{}>", e));
            println!("{} {}{}", mutant.id, mutant.describe(), label);
            if let Some(original) = source.snippet(&mutant.path) {
                println!("    - {}", original);
            }
            println!("    + {}", replacement);
        }
    }
    println!("{} mutant(s)", count);
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport) {
    for (kind, results) in report.categorized() {
        if matches!(kind, OutcomeKind::Killed | OutcomeKind::Skipped) {
            continue;
        }
        println!("{} ({}):", kind, results.len());
        for result in results {
            println!(
                "  {} {}: {}",
                result.mutant.id,
                result.mutant.describe(),
                result.mutant.replacement
            );
        }
    }

    let score = &report.score;
    println!();
    println!(
        "{} mutants: {} killed, {} escaped, {} errored, {} timed out, {} not covered, {} skipped",
        score.total,
        score.killed,
        score.escaped,
        score.errored,
        score.timed_out,
        score.not_covered,
        score.skipped
    );
    println!("Mutation Score Indicator (MSI): {:.2}%", score.msi * 100.0);
    println!("Mutation Code Coverage: {:.2}%", score.mutation_code_coverage * 100.0);
    println!("Covered Code MSI: {:.2}%", score.covered_msi * 100.0);
    if !report.diagnostics.is_empty() {
        println!("{} operator fault(s) during generation", report.diagnostics.len());
    }
    if report.partial {
        println!("Run was cancelled; scores cover completed mutants only");
    }
}
