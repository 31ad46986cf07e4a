//! Mutant executor.
//!
//! Runs one mutant in its own workspace:
//! 1. Creates a fresh temporary workspace (optionally a copy of the project)
//! 2. Writes the patched source into it
//! 3. Hands the covering tests (or the whole suite) to the test adapter
//! 4. Classifies the adapter's report
//!
//! The workspace is removed on every exit path.

use crate::ast::{Printer, ShapeError, SourceFile};
use crate::config::{AdapterConfig, Config, ConfigError};
use crate::coverage::TestId;
use crate::mutation::{Mutant, MutantResult, Outcome, OutcomeKind};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Which tests the adapter should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelection {
    /// The whole suite
    All,
    /// Only these tests
    Only(BTreeSet<TestId>),
}

impl TestSelection {
    pub fn for_mutant(mutant: &Mutant) -> Self {
        if mutant.covering_tests.is_empty() {
            Self::All
        } else {
            Self::Only(mutant.covering_tests.clone())
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub selection: TestSelection,
    /// Patched source file inside the workspace
    pub artifact: PathBuf,
    /// Workspace root; tests run from here
    pub workspace: PathBuf,
    pub timeout: Duration,
}

/// How the runner process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    /// Killed by a signal or otherwise ended without an exit code
    Crashed(String),
    TimedOut,
    LaunchFailed(String),
}

/// Raw result of one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterReport {
    /// Every selected test passed
    pub passed: bool,
    /// Runner output describing failures (usually stdout and stderr)
    pub failure_details: String,
    pub exit: ProcessExit,
}

impl AdapterReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            failure_details: String::new(),
            exit: ProcessExit::Exited(0),
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            failure_details: details.into(),
            exit: ProcessExit::Exited(1),
        }
    }
}

/// Boundary to the external test runner.
pub trait TestAdapter: Send + Sync + 'static {
    fn run_tests(&self, request: TestRequest) -> impl Future<Output = AdapterReport> + Send;
}

/// Runs a shell command per mutant.
///
/// `{artifact}`, `{workspace}` and `{tests}` in the command are replaced with
/// the patched file, the workspace and the space separated, quoted test ids
/// (empty when the whole suite runs). The same values are exported as
/// `INFEST_ARTIFACT`, `INFEST_WORKSPACE` and `INFEST_TESTS` (comma separated).
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    command: String,
}

impl CommandAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(config.command.clone())
    }

    fn render(&self, request: &TestRequest) -> String {
        let tests = match &request.selection {
            TestSelection::All => String::new(),
            TestSelection::Only(tests) => tests
                .iter()
                .map(|t| shell_quote(t.as_str()))
                .collect::<Vec<_>>()
                .join(" "),
        };
        self.command
            .replace("{artifact}", &shell_quote(&request.artifact.to_string_lossy()))
            .replace("{workspace}", &shell_quote(&request.workspace.to_string_lossy()))
            .replace("{tests}", &tests)
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl TestAdapter for CommandAdapter {
    async fn run_tests(&self, request: TestRequest) -> AdapterReport {
        let command_line = self.render(&request);
        let tests_env = match &request.selection {
            TestSelection::All => String::new(),
            TestSelection::Only(tests) => tests
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(","),
        };

        tracing::debug!("Running `{}` in {}", command_line, request.workspace.display());

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .current_dir(&request.workspace)
            .env("INFEST_ARTIFACT", &request.artifact)
            .env("INFEST_WORKSPACE", &request.workspace)
            .env("INFEST_TESTS", tests_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The runner and everything it forks share one group that can be
        // killed as a whole.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return AdapterReport {
                    passed: false,
                    failure_details: String::new(),
                    exit: ProcessExit::LaunchFailed(e.to_string()),
                }
            }
        };
        let group = ProcessGroup::of(&child);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::time::timeout(request.timeout, async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_to_end(stdout), read_to_end(stderr));
            status.map(|status| (status, stdout, stderr))
        })
        .await;

        match finished {
            Ok(Ok((status, stdout, stderr))) => {
                let combined = format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&stdout),
                    String::from_utf8_lossy(&stderr)
                );
                let exit = match status.code() {
                    Some(code) => ProcessExit::Exited(code),
                    None => ProcessExit::Crashed(status.to_string()),
                };
                AdapterReport {
                    passed: status.success(),
                    failure_details: combined,
                    exit,
                }
            }
            Ok(Err(e)) => AdapterReport {
                passed: false,
                failure_details: String::new(),
                exit: ProcessExit::LaunchFailed(e.to_string()),
            },
            Err(_) => {
                tracing::debug!("Test command timed out after {:?}", request.timeout);
                group.kill();
                if let Err(e) = child.wait().await {
                    tracing::warn!("Failed to reap timed out test runner: {}", e);
                }
                AdapterReport {
                    passed: false,
                    failure_details: String::new(),
                    exit: ProcessExit::TimedOut,
                }
            }
        }
    }
}

async fn read_to_end<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            tracing::debug!("Failed to read test runner output: {}", e);
        }
    }
    buf
}

/// Process group of a spawned runner.
///
/// Killed when dropped too, so a runner abandoned by an outer timeout or a
/// cancelled task takes its descendants down with it.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        Self(child.id())
    }

    #[cfg(unix)]
    fn kill(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.0.and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            // Already gone
            Ok(()) | Err(Errno::ESRCH) | Err(Errno::EPERM) => {}
            Err(e) => tracing::warn!("Failed to kill test runner group {}: {}", pgid, e),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Everything a worker needs besides the mutant itself.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    /// Output fragments meaning the mutant could not run at all
    pub error_patterns: Vec<String>,
    /// First capture group names a failing test
    pub failing_test: Regex,
    pub printer: Printer,
    /// Directory workspaces are created in
    pub workspace_root: PathBuf,
    /// Project copied into every workspace
    pub project_root: Option<PathBuf>,
}

impl ExecutionSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let pattern = &config.adapter.failing_test_pattern;
        let failing_test = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self {
            timeout: Duration::from_secs(config.run.timeout_seconds),
            max_output_bytes: config.run.max_output_bytes,
            error_patterns: config.adapter.error_patterns.clone(),
            failing_test,
            printer: Printer::new(config.printer.clone()),
            workspace_root: config.run.workspace_root(),
            project_root: config.run.project_root.clone(),
        })
    }

    /// Map a runner report to an outcome.
    pub fn classify(&self, report: &AdapterReport, duration_ms: u64) -> Outcome {
        let details = || truncate_output(&report.failure_details, self.max_output_bytes);
        match &report.exit {
            ProcessExit::TimedOut => Outcome::new(OutcomeKind::TimedOut, duration_ms),
            ProcessExit::LaunchFailed(reason) => Outcome::new(OutcomeKind::Errored, duration_ms)
                .with_diagnostic(format!("failed to launch test runner: {}", reason)),
            ProcessExit::Crashed(reason) => Outcome::new(OutcomeKind::Errored, duration_ms)
                .with_diagnostic(format!("test runner crashed ({})\n{}", reason, details())),
            ProcessExit::Exited(_) => {
                if self
                    .error_patterns
                    .iter()
                    .any(|p| report.failure_details.contains(p.as_str()))
                {
                    Outcome::new(OutcomeKind::Errored, duration_ms).with_diagnostic(details())
                } else if report.passed {
                    Outcome::new(OutcomeKind::Escaped, duration_ms)
                } else {
                    Outcome::new(OutcomeKind::Killed, duration_ms)
                        .with_killing_test(extract_failing_test(
                            &report.failure_details,
                            &self.failing_test,
                        ))
                        .with_diagnostic(details())
                }
            }
        }
    }
}

/// Run the tests against one mutant.
///
/// Never fails: problems preparing the workspace become `Errored` outcomes.
pub async fn execute_mutant<A: TestAdapter>(
    adapter: &A,
    source: &SourceFile,
    mutant: Mutant,
    settings: &ExecutionSettings,
    slot: usize,
) -> MutantResult {
    let start_time = Instant::now();

    let outcome = match create_workspace(settings, slot).await {
        Ok(workspace) => {
            let outcome = run_in_workspace(adapter, source, &mutant, settings, workspace.path(), start_time).await;
            let path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                tracing::warn!("Failed to remove workspace {}: {}", path.display(), e);
            }
            outcome
        }
        Err(e) => Outcome::new(OutcomeKind::Errored, elapsed_ms(start_time))
            .with_diagnostic(format!("{:#}", e)),
    };

    match outcome.kind {
        OutcomeKind::Errored => tracing::warn!(
            "Mutant {} ({}) errored: {}",
            mutant.id,
            mutant.describe(),
            outcome.diagnostic.as_deref().unwrap_or("")
        ),
        kind => tracing::debug!(
            "Mutant {} ({}) = {} ({}ms)",
            mutant.id,
            mutant.describe(),
            kind,
            outcome.duration_ms
        ),
    }

    MutantResult::new(mutant.record(&settings.printer, &source.text), outcome)
}

async fn run_in_workspace<A: TestAdapter>(
    adapter: &A,
    source: &SourceFile,
    mutant: &Mutant,
    settings: &ExecutionSettings,
    workspace: &Path,
    start_time: Instant,
) -> Outcome {
    let artifact = match materialize(source, mutant, &settings.printer, workspace).await {
        Ok(artifact) => artifact,
        Err(e) => {
            return Outcome::new(OutcomeKind::Errored, elapsed_ms(start_time))
                .with_diagnostic(format!("{:#}", e))
        }
    };

    let request = TestRequest {
        selection: TestSelection::for_mutant(mutant),
        artifact,
        workspace: workspace.to_path_buf(),
        timeout: settings.timeout,
    };

    let report = match tokio::time::timeout(settings.timeout, adapter.run_tests(request)).await {
        Ok(report) => report,
        Err(_) => AdapterReport {
            passed: false,
            failure_details: String::new(),
            exit: ProcessExit::TimedOut,
        },
    };

    settings.classify(&report, elapsed_ms(start_time))
}

fn elapsed_ms(start_time: Instant) -> u64 {
    start_time.elapsed().as_millis() as u64
}

/// Fresh workspace for one execution slot, holding a project copy when
/// configured.
pub(crate) async fn create_workspace(
    settings: &ExecutionSettings,
    slot: usize,
) -> Result<tempfile::TempDir> {
    let root = settings.workspace_root.clone();
    let project_root = settings.project_root.clone();

    // Use spawn_blocking since fs_extra::dir::copy is synchronous
    tokio::task::spawn_blocking(move || -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace root {:?}", root))?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("infest-{}-", slot))
            .tempdir_in(&root)
            .with_context(|| format!("Failed to create workspace in {:?}", root))?;

        if let Some(project_root) = project_root {
            let options = fs_extra::dir::CopyOptions {
                overwrite: true,
                skip_exist: false,
                buffer_size: 64 * 1024,
                copy_inside: true,
                content_only: true,
                depth: 0,
            };
            fs_extra::dir::copy(&project_root, workspace.path(), &options)
                .map_err(|e| anyhow::anyhow!("Failed to copy project {:?}: {}", project_root, e))?;
        }

        Ok(workspace)
    })
    .await?
}

/// Where `file` lands inside a workspace.
pub(crate) fn workspace_path(workspace: &Path, file: &Path) -> PathBuf {
    if file.is_relative() {
        workspace.join(file)
    } else {
        match file.file_name() {
            Some(name) => workspace.join(name),
            None => workspace.join("source"),
        }
    }
}

/// Write the patched source into `workspace` and return its path.
pub async fn materialize(
    source: &SourceFile,
    mutant: &Mutant,
    printer: &Printer,
    workspace: &Path,
) -> Result<PathBuf> {
    let patched = patch_source(source, mutant, printer)
        .with_context(|| format!("Failed to patch {} at {}", source.path.display(), mutant.path))?;
    let artifact = workspace_path(workspace, &mutant.file);
    if let Some(parent) = artifact.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    tokio::fs::write(&artifact, patched)
        .await
        .with_context(|| format!("Failed to write mutated file {:?}", artifact))?;
    Ok(artifact)
}

/// Original text with the mutated node swapped in.
///
/// Splices the printed replacement over the node's span. Nodes without a
/// usable span fall back to reprinting the whole tree.
pub fn patch_source(
    source: &SourceFile,
    mutant: &Mutant,
    printer: &Printer,
) -> Result<String, ShapeError> {
    let target = source.node_at(&mutant.path)?;
    if let Some(span) = target.span {
        if source.text.get(span.start..span.end).is_some() && span.start < span.end {
            let printed = printer.print_with_source(&mutant.replacement, &source.text)?;
            let mut patched = String::with_capacity(source.text.len() + printed.len());
            patched.push_str(&source.text[..span.start]);
            patched.push_str(&printed);
            patched.push_str(&source.text[span.end..]);
            return Ok(patched);
        }
    }
    let tree = source.ast.with_replaced(&mutant.path, mutant.replacement.clone())?;
    printer.print_with_source(&tree, &source.text)
}

/// First failing test named in runner output.
pub fn extract_failing_test(output: &str, pattern: &Regex) -> Option<String> {
    output.lines().find_map(|line| {
        pattern
            .captures(line.trim_end())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Cut `output` to at most `max_bytes` (on a char boundary), marking the cut.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut end = max_bytes;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &output[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, Node, NodeKind, NodePath, Span};
    use crate::mutation::MutantId;
    use std::sync::Mutex;

    fn settings(root: &Path) -> ExecutionSettings {
        let mut config = Config::default();
        config.run.tmp_dir = Some(root.to_path_buf());
        config.run.timeout_seconds = 5;
        config.adapter.error_patterns = vec!["Parse error".to_string()];
        ExecutionSettings::from_config(&config).unwrap()
    }

    const SOURCE: &str = "<?php\n$a = 10 * 3;\n";

    /// `$a = 10 * 3;` with spans matching `SOURCE`.
    fn source_file() -> SourceFile {
        let product = Node::binary(BinaryOperator::Mul, Node::int(10), Node::int(3)).with_span(Span {
            start: 11,
            end: 17,
            start_line: 2,
            end_line: 2,
        });
        let stmt = Node::expr_stmt(Node::assign(Node::var("$a"), product));
        SourceFile::new("src/calc.php", SOURCE, Node::module(vec![stmt]))
    }

    fn division_mutant(tests: &[&str]) -> Mutant {
        let path = NodePath::from(vec![0, 0, 1]);
        Mutant {
            id: MutantId::derive(Path::new("src/calc.php"), &path, "Multiplication", 0),
            operator: "Multiplication".to_string(),
            file: PathBuf::from("src/calc.php"),
            path,
            replacement: Node::binary(BinaryOperator::Div, Node::int(10), Node::int(3)),
            line: Some(2),
            scope: None,
            covering_tests: tests.iter().map(|t| TestId::from(*t)).collect(),
        }
    }

    /// Records what it was asked to run, then replies with a fixed report.
    struct Recording {
        report: AdapterReport,
        seen: Mutex<Vec<(TestSelection, String, PathBuf)>>,
    }

    impl Recording {
        fn new(report: AdapterReport) -> Self {
            Self {
                report,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl TestAdapter for Recording {
        async fn run_tests(&self, request: TestRequest) -> AdapterReport {
            let contents = std::fs::read_to_string(&request.artifact).unwrap();
            self.seen
                .lock()
                .unwrap()
                .push((request.selection, contents, request.workspace));
            self.report.clone()
        }
    }

    struct Sleepy;

    impl TestAdapter for Sleepy {
        async fn run_tests(&self, _request: TestRequest) -> AdapterReport {
            tokio::time::sleep(Duration::from_secs(60)).await;
            AdapterReport::passed()
        }
    }

    // =========================================================================
    // extract_failing_test tests
    // =========================================================================

    #[test]
    fn test_extract_failing_test_default_pattern() {
        let pattern = Regex::new(&Config::default().adapter.failing_test_pattern).unwrap();
        let output = "There was 1 failure:\n\n1) CalcTest::testMultiply\nFailed asserting that 3 matches 30.\n";
        assert_eq!(
            extract_failing_test(output, &pattern),
            Some("CalcTest::testMultiply".to_string())
        );
    }

    #[test]
    fn test_extract_failing_test_cargo_pattern() {
        let pattern = Regex::new(r"^test (\S+) \.\.\. FAILED$").unwrap();
        let output = r#"
running 3 tests
test first_test ... ok
test foo::bar::test_two ... FAILED
test third_test ... FAILED
"#;
        // Should return the first failure
        assert_eq!(
            extract_failing_test(output, &pattern),
            Some("foo::bar::test_two".to_string())
        );
    }

    #[test]
    fn test_extract_failing_test_none() {
        let pattern = Regex::new(r"^test (\S+) \.\.\. FAILED$").unwrap();
        assert_eq!(extract_failing_test("running 1 test\ntest foo ... ok\n", &pattern), None);
        assert_eq!(extract_failing_test("", &pattern), None);
    }

    // =========================================================================
    // truncate_output tests
    // =========================================================================

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("hello", 100), "hello");

        let long = "a".repeat(100);
        let truncated = truncate_output(&long, 50);
        assert!(truncated.starts_with(&"a".repeat(50)));
        assert!(truncated.ends_with("...(truncated)"));
    }

    #[test]
    fn test_truncate_output_exact_boundary() {
        let exact = "a".repeat(50);
        assert_eq!(truncate_output(&exact, 50), exact);
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        // 'é' is two bytes; cutting at 3 would split the second one
        let truncated = truncate_output("éééé", 3);
        assert_eq!(truncated, "é...(truncated)");
    }

    // =========================================================================
    // patch_source tests
    // =========================================================================

    #[test]
    fn test_patch_source_splices_span() {
        let patched = patch_source(&source_file(), &division_mutant(&[]), &Printer::default()).unwrap();
        assert_eq!(patched, "<?php\n$a = 10 / 3;\n");
    }

    #[test]
    fn test_patch_source_reprints_without_span() {
        let mut file = source_file();
        file.ast.children[0].children[0].children[1].span = None;
        let patched = patch_source(&file, &division_mutant(&[]), &Printer::default()).unwrap();
        assert_eq!(patched, "$a = 10 / 3;");
    }

    #[test]
    fn test_patch_source_keeps_unknown_constructs_verbatim() {
        // `$qb->where(fn($u) => $u)->getQuery();` with the closure opaque
        let text = "<?php\n$qb->where(fn($u) => $u)->getQuery();\n";
        let closure = Node::leaf(NodeKind::Other).with_span(Span {
            start: 17,
            end: 29,
            start_line: 2,
            end_line: 2,
        });
        let where_call = Node::method_call(Node::var("$qb"), "where", vec![closure]);
        let chain = Node::method_call(where_call.clone(), "getQuery", vec![]).with_span(Span {
            start: 6,
            end: 42,
            start_line: 2,
            end_line: 2,
        });
        let file = SourceFile::new("src/repo.php", text, Node::module(vec![Node::expr_stmt(chain)]));

        let path = NodePath::from(vec![0, 0]);
        let mutant = Mutant {
            id: MutantId::derive(Path::new("src/repo.php"), &path, "MethodCallRemovalChain", 0),
            operator: "MethodCallRemovalChain".to_string(),
            file: PathBuf::from("src/repo.php"),
            path,
            replacement: where_call,
            line: Some(2),
            scope: None,
            covering_tests: BTreeSet::new(),
        };
        let patched = patch_source(&file, &mutant, &Printer::default()).unwrap();
        assert_eq!(patched, "<?php\n$qb->where(fn($u) => $u);\n");
    }

    #[test]
    fn test_patch_source_bad_path() {
        let mut mutant = division_mutant(&[]);
        mutant.path = NodePath::from(vec![4, 4]);
        assert!(patch_source(&source_file(), &mutant, &Printer::default()).is_err());
    }

    // =========================================================================
    // classify tests
    // =========================================================================

    #[test]
    fn test_classify_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        assert_eq!(
            settings.classify(&AdapterReport::passed(), 1).kind,
            OutcomeKind::Escaped
        );

        let killed = settings.classify(&AdapterReport::failed("1) CalcTest::testIt\n"), 1);
        assert_eq!(killed.kind, OutcomeKind::Killed);
        assert_eq!(killed.killing_test.as_deref(), Some("CalcTest::testIt"));

        let parse_error = settings.classify(&AdapterReport::failed("PHP Parse error: oops"), 1);
        assert_eq!(parse_error.kind, OutcomeKind::Errored);

        let crashed = AdapterReport {
            passed: false,
            failure_details: "segfault".to_string(),
            exit: ProcessExit::Crashed("signal: 11".to_string()),
        };
        assert_eq!(settings.classify(&crashed, 1).kind, OutcomeKind::Errored);

        let launch = AdapterReport {
            passed: false,
            failure_details: String::new(),
            exit: ProcessExit::LaunchFailed("not found".to_string()),
        };
        assert_eq!(settings.classify(&launch, 1).kind, OutcomeKind::Errored);

        let timed_out = AdapterReport {
            passed: false,
            failure_details: String::new(),
            exit: ProcessExit::TimedOut,
        };
        assert_eq!(settings.classify(&timed_out, 1).kind, OutcomeKind::TimedOut);
    }

    // =========================================================================
    // execute_mutant tests
    // =========================================================================

    #[tokio::test]
    async fn test_execute_mutant_runs_covering_tests_on_patched_copy() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let adapter = Recording::new(AdapterReport::failed("1) CalcTest::testIt\n"));

        let result = execute_mutant(
            &adapter,
            &source_file(),
            division_mutant(&["CalcTest::testIt"]),
            &settings,
            0,
        )
        .await;
        assert_eq!(result.outcome.kind, OutcomeKind::Killed);

        let seen = adapter.seen.lock().unwrap();
        let (selection, contents, workspace) = &seen[0];
        assert_eq!(
            *selection,
            TestSelection::Only([TestId::from("CalcTest::testIt")].into_iter().collect())
        );
        assert_eq!(contents, "<?php\n$a = 10 / 3;\n");
        // workspace is gone once the mutant is done
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_execute_mutant_full_suite_without_coverage() {
        let root = tempfile::tempdir().unwrap();
        let adapter = Recording::new(AdapterReport::passed());
        let result = execute_mutant(&adapter, &source_file(), division_mutant(&[]), &settings(root.path()), 3).await;
        assert_eq!(result.outcome.kind, OutcomeKind::Escaped);
        assert_eq!(adapter.seen.lock().unwrap()[0].0, TestSelection::All);
    }

    #[tokio::test]
    async fn test_execute_mutant_times_out() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = settings(root.path());
        settings.timeout = Duration::from_millis(50);

        let result = execute_mutant(&Sleepy, &source_file(), division_mutant(&[]), &settings, 0).await;
        assert_eq!(result.outcome.kind, OutcomeKind::TimedOut);
        // nothing left behind in the workspace root
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_execute_mutant_patch_failure_is_errored() {
        let root = tempfile::tempdir().unwrap();
        let adapter = Recording::new(AdapterReport::passed());
        let mut mutant = division_mutant(&[]);
        mutant.path = NodePath::from(vec![9]);

        let result = execute_mutant(&adapter, &source_file(), mutant, &settings(root.path()), 0).await;
        assert_eq!(result.outcome.kind, OutcomeKind::Errored);
        assert!(adapter.seen.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_execute_mutant_copies_project() {
        let root = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("src")).unwrap();
        std::fs::write(project.path().join("src/calc.php"), SOURCE).unwrap();
        std::fs::write(project.path().join("phpunit.xml"), "<phpunit/>").unwrap();

        let mut settings = settings(root.path());
        settings.project_root = Some(project.path().to_path_buf());
        let adapter = CommandAdapter::new("test -f phpunit.xml && grep -q '10 / 3' src/calc.php");

        let result = execute_mutant(&adapter, &source_file(), division_mutant(&[]), &settings, 0).await;
        assert_eq!(result.outcome.kind, OutcomeKind::Escaped);
        // the project itself is untouched
        assert_eq!(
            std::fs::read_to_string(project.path().join("src/calc.php")).unwrap(),
            SOURCE
        );
    }

    // =========================================================================
    // CommandAdapter tests
    // =========================================================================

    fn request(workspace: &Path, selection: TestSelection, timeout: Duration) -> TestRequest {
        TestRequest {
            selection,
            artifact: workspace.join("a.php"),
            workspace: workspace.to_path_buf(),
            timeout,
        }
    }

    #[test]
    fn test_command_adapter_render() {
        let adapter = CommandAdapter::new("phpunit --filter {tests} {artifact}");
        let selection = TestSelection::Only(
            [TestId::from("A::b"), TestId::from("it's")].into_iter().collect(),
        );
        let rendered = adapter.render(&request(Path::new("/w"), selection, Duration::from_secs(1)));
        assert_eq!(rendered, r"phpunit --filter 'A::b' 'it'\''s' '/w/a.php'");
    }

    #[tokio::test]
    async fn test_command_adapter_pass_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_secs(5);

        let report = CommandAdapter::new("true")
            .run_tests(request(dir.path(), TestSelection::All, timeout))
            .await;
        assert!(report.passed);
        assert_eq!(report.exit, ProcessExit::Exited(0));

        let report = CommandAdapter::new("echo '1) T::x'; exit 3")
            .run_tests(request(dir.path(), TestSelection::All, timeout))
            .await;
        assert!(!report.passed);
        assert_eq!(report.exit, ProcessExit::Exited(3));
        assert!(report.failure_details.contains("1) T::x"));
    }

    #[tokio::test]
    async fn test_command_adapter_exports_environment() {
        let dir = tempfile::tempdir().unwrap();
        let selection = TestSelection::Only([TestId::from("A"), TestId::from("B")].into_iter().collect());
        let report = CommandAdapter::new("test \"$INFEST_TESTS\" = 'A,B'")
            .run_tests(request(dir.path(), selection, Duration::from_secs(5)))
            .await;
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_command_adapter_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let report = CommandAdapter::new("sleep 30")
            .run_tests(request(dir.path(), TestSelection::All, Duration::from_millis(100)))
            .await;
        assert_eq!(report.exit, ProcessExit::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_adapter_timeout_kills_forked_runner() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        // The subshell stands in for a test runner forked by the command.
        let command = format!("(sleep 1; touch {}) & wait", shell_quote(&marker.to_string_lossy()));

        let report = CommandAdapter::new(command)
            .run_tests(request(dir.path(), TestSelection::All, Duration::from_millis(200)))
            .await;
        assert_eq!(report.exit, ProcessExit::TimedOut);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked runner outlived the timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_command_kills_forked_runner() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let command = format!("(sleep 1; touch {}) & wait", shell_quote(&marker.to_string_lossy()));
        let adapter = CommandAdapter::new(command);

        // An outer timeout drops the adapter future before its own fires.
        let outer = tokio::time::timeout(
            Duration::from_millis(200),
            adapter.run_tests(request(dir.path(), TestSelection::All, Duration::from_secs(30))),
        )
        .await;
        assert!(outer.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked runner outlived the dropped future");
    }

    #[tokio::test]
    async fn test_command_adapter_missing_workspace() {
        let report = CommandAdapter::new("true")
            .run_tests(request(
                Path::new("/nonexistent/infest/workspace"),
                TestSelection::All,
                Duration::from_secs(5),
            ))
            .await;
        assert!(matches!(report.exit, ProcessExit::LaunchFailed(_)));
    }
}
