//! Parallel mutant scheduler.
//!
//! Generation runs in the dispatching task and feeds a bounded channel; a
//! fixed pool of workers pulls from it. When the channel is full generation
//! waits, so at most `lookahead` mutants are buffered at any time.

use crate::ast::SourceFile;
use crate::config::{Config, ConfigError};
use crate::coverage::CoverageIndex;
use crate::generator::{Generated, MutantGenerator};
use crate::mutation::executor::{
    create_workspace, execute_mutant, truncate_output, workspace_path, AdapterReport,
    ExecutionSettings, ProcessExit, TestAdapter, TestRequest, TestSelection,
};
use crate::mutation::{Mutant, MutantResult, Outcome, OutcomeKind, RunReport, ScoringPolicy};
use crate::mutator::MutatorRegistry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};

/// Problems that stop a run before (or instead of) producing a report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no source files to mutate")]
    NoSources,

    #[error("syntax tree of {0} is empty")]
    EmptyAst(PathBuf),

    #[error("workspace root {path} is not writable: {source}")]
    WorkspaceUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project root {0} does not exist")]
    ProjectRootMissing(PathBuf),

    #[error("test suite fails without any mutation: {0}")]
    BaselineFailed(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

/// One unit of work for a worker.
struct Job {
    mutant: Mutant,
    source: Arc<SourceFile>,
}

/// Shared flag telling a run to stop dispatching.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A run in progress.
pub struct RunHandle {
    cancel: CancelToken,
    task: JoinHandle<Result<RunReport, EngineError>>,
}

impl RunHandle {
    /// Stop dispatching new mutants. Buffered mutants are marked skipped,
    /// in-flight ones finish, and the report is flagged partial.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<RunReport, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Worker(e.to_string()))?
    }
}

pub struct Scheduler<A: TestAdapter> {
    adapter: Arc<A>,
    settings: Arc<ExecutionSettings>,
    workers: usize,
    lookahead: usize,
    only_covered: bool,
    baseline: bool,
    policy: ScoringPolicy,
}

impl<A: TestAdapter> Scheduler<A> {
    pub fn new(adapter: A, config: &Config) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            adapter: Arc::new(adapter),
            settings: Arc::new(ExecutionSettings::from_config(config)?),
            workers: config.run.workers(),
            lookahead: config.run.lookahead.max(1),
            only_covered: config.run.only_covered,
            baseline: config.run.baseline,
            policy: ScoringPolicy::from(&config.scoring),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Checks that would otherwise fail every mutant the same way.
    pub async fn preflight(
        &self,
        sources: &[Arc<SourceFile>],
        registry: &MutatorRegistry,
    ) -> Result<(), EngineError> {
        if registry.is_empty() {
            return Err(ConfigError::NoMutators.into());
        }
        if sources.is_empty() {
            return Err(EngineError::NoSources);
        }
        if let Some(empty) = sources.iter().find(|s| s.is_empty()) {
            return Err(EngineError::EmptyAst(empty.path.clone()));
        }
        if let Some(project_root) = &self.settings.project_root {
            if !project_root.is_dir() {
                return Err(EngineError::ProjectRootMissing(project_root.clone()));
            }
        }

        let root = self.settings.workspace_root.clone();
        let writable = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new()
                .prefix("infest-check-")
                .tempfile_in(&root)?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?;
        writable.map_err(|source| EngineError::WorkspaceUnwritable {
            path: self.settings.workspace_root.clone(),
            source,
        })
    }

    /// Run the whole suite against the unmodified sources.
    pub async fn run_baseline(&self, sources: &[Arc<SourceFile>]) -> Result<(), EngineError> {
        tracing::info!("Running test suite against unmodified sources");

        let workspace = create_workspace(&self.settings, 0)
            .await
            .map_err(|e| EngineError::BaselineFailed(format!("{:#}", e)))?;

        let mut artifact = workspace.path().to_path_buf();
        for (i, source) in sources.iter().enumerate() {
            let path = workspace_path(workspace.path(), &source.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EngineError::BaselineFailed(e.to_string()))?;
            }
            tokio::fs::write(&path, &source.text)
                .await
                .map_err(|e| EngineError::BaselineFailed(e.to_string()))?;
            if i == 0 {
                artifact = path;
            }
        }

        let request = TestRequest {
            selection: TestSelection::All,
            artifact,
            workspace: workspace.path().to_path_buf(),
            timeout: self.settings.timeout,
        };
        let report = match tokio::time::timeout(self.settings.timeout, self.adapter.run_tests(request)).await {
            Ok(report) => report,
            Err(_) => AdapterReport {
                passed: false,
                failure_details: String::new(),
                exit: ProcessExit::TimedOut,
            },
        };

        if let Err(e) = workspace.close() {
            tracing::warn!("Failed to remove baseline workspace: {}", e);
        }

        match report.exit {
            ProcessExit::Exited(_) if report.passed => Ok(()),
            ProcessExit::TimedOut => Err(EngineError::BaselineFailed(format!(
                "timed out after {:?}",
                self.settings.timeout
            ))),
            ProcessExit::LaunchFailed(reason) => Err(EngineError::BaselineFailed(reason)),
            _ => Err(EngineError::BaselineFailed(truncate_output(
                &report.failure_details,
                self.settings.max_output_bytes,
            ))),
        }
    }

    /// Check, optionally run the baseline, then start dispatching.
    pub async fn start(
        &self,
        sources: Vec<Arc<SourceFile>>,
        registry: Arc<MutatorRegistry>,
        coverage: Option<Arc<CoverageIndex>>,
    ) -> Result<RunHandle, EngineError> {
        self.preflight(&sources, &registry).await?;
        if self.baseline {
            self.run_baseline(&sources).await?;
        }

        tracing::info!(
            "Starting mutation run: {} file(s), {} operator(s), {} worker(s)",
            sources.len(),
            registry.len(),
            self.workers
        );

        let cancel = CancelToken::default();
        let task = tokio::spawn(dispatch(
            sources,
            registry,
            coverage,
            self.adapter.clone(),
            self.settings.clone(),
            RunOptions {
                workers: self.workers,
                lookahead: self.lookahead,
                only_covered: self.only_covered,
                policy: self.policy,
            },
            cancel.clone(),
        ));

        Ok(RunHandle { cancel, task })
    }

    /// Run to completion.
    pub async fn run(
        &self,
        sources: Vec<Arc<SourceFile>>,
        registry: Arc<MutatorRegistry>,
        coverage: Option<Arc<CoverageIndex>>,
    ) -> Result<RunReport, EngineError> {
        self.start(sources, registry, coverage).await?.wait().await
    }
}

#[derive(Clone, Copy)]
struct RunOptions {
    workers: usize,
    lookahead: usize,
    only_covered: bool,
    policy: ScoringPolicy,
}

async fn dispatch<A: TestAdapter>(
    sources: Vec<Arc<SourceFile>>,
    registry: Arc<MutatorRegistry>,
    coverage: Option<Arc<CoverageIndex>>,
    adapter: Arc<A>,
    settings: Arc<ExecutionSettings>,
    options: RunOptions,
    cancel: CancelToken,
) -> Result<RunReport, EngineError> {
    let started_at = chrono::Utc::now();
    let (tx, rx) = mpsc::channel::<Job>(options.lookahead);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = Vec::with_capacity(options.workers);
    for slot in 0..options.workers {
        workers.push(tokio::spawn(work(
            slot,
            rx.clone(),
            adapter.clone(),
            settings.clone(),
            cancel.clone(),
        )));
    }

    let mut results = Vec::new();
    let mut diagnostics = Vec::new();
    let mut dispatched = 0usize;

    'files: for source in &sources {
        let generator = MutantGenerator::new(source, &registry)
            .with_coverage(coverage.as_deref(), options.only_covered);
        for item in generator.iter() {
            if cancel.is_cancelled() {
                tracing::info!("Run cancelled after dispatching {} mutant(s)", dispatched);
                break 'files;
            }
            match item {
                Generated::Mutant(mutant) => {
                    let job = Job {
                        mutant,
                        source: source.clone(),
                    };
                    if tx.send(job).await.is_err() {
                        break 'files;
                    }
                    dispatched += 1;
                }
                Generated::NotCovered(mutant) => results.push(MutantResult::new(
                    mutant.record(&settings.printer, &source.text),
                    Outcome::not_executed(OutcomeKind::NotCovered, "no test covers this code"),
                )),
                Generated::Skipped(mutant) => results.push(MutantResult::new(
                    mutant.record(&settings.printer, &source.text),
                    Outcome::not_executed(OutcomeKind::Skipped, "operator ignored here by configuration"),
                )),
                Generated::Fault(diagnostic) => diagnostics.push(diagnostic),
            }
        }
    }
    drop(tx);

    for (slot, worker) in workers.into_iter().enumerate() {
        match worker.await {
            Ok(finished) => results.extend(finished),
            Err(e) => tracing::error!("Worker {} failed: {}", slot, e),
        }
    }

    let partial = cancel.is_cancelled();
    let report =
        RunReport::new(results, diagnostics, partial, &options.policy).with_started_at(started_at);
    tracing::info!(
        "Mutation run {}: {} mutant(s), {} killed, {} escaped, MSI {:.2}%",
        if partial { "cancelled" } else { "complete" },
        report.score.total,
        report.score.killed,
        report.score.escaped,
        report.score.msi * 100.0
    );
    Ok(report)
}

/// Worker loop: pull, execute, repeat until the channel closes.
async fn work<A: TestAdapter>(
    slot: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    adapter: Arc<A>,
    settings: Arc<ExecutionSettings>,
    cancel: CancelToken,
) -> Vec<MutantResult> {
    let mut results = Vec::new();
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(Job { mutant, source }) = job else {
            break;
        };
        let record = mutant.record(&settings.printer, &source.text);
        if cancel.is_cancelled() {
            results.push(MutantResult::new(
                record,
                Outcome::not_executed(OutcomeKind::Skipped, "run cancelled"),
            ));
            continue;
        }

        // A panicking adapter loses this mutant only, not the worker.
        let start_time = Instant::now();
        let execution = tokio::spawn({
            let adapter = adapter.clone();
            let settings = settings.clone();
            async move { execute_mutant(adapter.as_ref(), &source, mutant, &settings, slot).await }
        });
        let result = match execution.await {
            Ok(result) => result,
            Err(e) => {
                let reason = abort_reason(e);
                tracing::error!("Mutant {} ({}) aborted: {}", record.id, record.describe(), reason);
                let duration_ms = start_time.elapsed().as_millis() as u64;
                MutantResult::new(
                    record,
                    Outcome::new(OutcomeKind::Errored, duration_ms)
                        .with_diagnostic(format!("test adapter failed: {}", reason)),
                )
            }
        };
        results.push(result);
    }
    results
}

fn abort_reason(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string()),
        Err(error) => error.to_string(),
    }
}
