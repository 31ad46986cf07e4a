//! Mutant execution and scoring.
//!
//! This module provides:
//! - The data carried from generation to reporting (mutants, outcomes, results)
//! - The executor that runs one mutant against the test suite
//! - The scheduler that runs many mutants on a bounded pool of workers
//! - The scorer that turns outcomes into a mutation score

pub mod executor;
pub mod scheduler;
pub mod score;

pub use executor::{AdapterReport, CommandAdapter, ProcessExit, TestAdapter, TestRequest, TestSelection};
pub use scheduler::{EngineError, RunHandle, Scheduler};
pub use score::{MutationScore, ScoringPolicy};

use crate::ast::{Node, NodePath, Printer};
use crate::coverage::TestId;
use crate::generator::Diagnostic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Hex digits kept from the digest.
const ID_LENGTH: usize = 12;

/// Stable identifier of a mutant, derived from where and how it was made.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutantId(String);

impl MutantId {
    pub fn derive(file: &Path, path: &NodePath, operator: &str, ordinal: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(path.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(operator.as_bytes());
        hasher.update([0]);
        hasher.update(ordinal.to_le_bytes());
        let mut hex = format!("{:x}", hasher.finalize());
        hex.truncate(ID_LENGTH);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One proposed change to one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutant {
    pub id: MutantId,
    /// Name of the operator that produced it
    pub operator: String,
    /// Source file, as named in the AST document
    pub file: PathBuf,
    /// Location of the replaced node in the file's tree
    pub path: NodePath,
    /// Detached subtree standing in for the node at `path`
    pub replacement: Node,
    /// Source line of the replaced node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// `Class::method` the node sits in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Tests known to execute the replaced node
    #[serde(default)]
    pub covering_tests: BTreeSet<TestId>,
}

impl Mutant {
    /// Short human-readable location, e.g. `Multiplication at src/Calc.php:12`.
    pub fn describe(&self) -> String {
        describe(&self.operator, &self.file, self.line, &self.path)
    }

    /// What outlives the run: provenance and the printed replacement.
    pub fn record(&self, printer: &Printer, source: &str) -> MutantRecord {
        let replacement = printer
            .print_with_source(&self.replacement, source)
            .unwrap_or_else(|e| format!("<{}>", e));
        MutantRecord {
            id: self.id.clone(),
            operator: self.operator.clone(),
            file: self.file.clone(),
            path: self.path.clone(),
            replacement,
            line: self.line,
            scope: self.scope.clone(),
        }
    }
}

fn describe(operator: &str, file: &Path, line: Option<usize>, path: &NodePath) -> String {
    match line {
        Some(line) => format!("{} at {}:{}", operator, file.display(), line),
        None => format!("{} at {} ({})", operator, file.display(), path),
    }
}

/// A finished mutant as kept in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantRecord {
    pub id: MutantId,
    pub operator: String,
    pub file: PathBuf,
    pub path: NodePath,
    /// Printed code that stood in for the node at `path`
    pub replacement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl MutantRecord {
    pub fn describe(&self) -> String {
        describe(&self.operator, &self.file, self.line, &self.path)
    }
}

/// Classification of a mutant after (or instead of) running the tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A test failed - the change was detected
    Killed,
    /// All selected tests passed - the change went unnoticed
    Escaped,
    /// The mutant could not be tested (crash, launch or patch failure)
    Errored,
    /// Tests took too long and were stopped
    TimedOut,
    /// No test executes the mutated code
    NotCovered,
    /// Excluded by configuration or by cancellation
    Skipped,
}

impl OutcomeKind {
    /// Every kind, escaped first since those need attention.
    pub const REPORT_ORDER: [OutcomeKind; 6] = [
        OutcomeKind::Escaped,
        OutcomeKind::Errored,
        OutcomeKind::TimedOut,
        OutcomeKind::NotCovered,
        OutcomeKind::Killed,
        OutcomeKind::Skipped,
    ];
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => write!(f, "killed"),
            Self::Escaped => write!(f, "escaped"),
            Self::Errored => write!(f, "errored"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::NotCovered => write!(f, "not_covered"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub duration_ms: u64,
    /// First failing test reported by the runner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killing_test: Option<String>,
    /// Captured runner output or error text, truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Outcome {
    pub fn new(kind: OutcomeKind, duration_ms: u64) -> Self {
        Self {
            kind,
            duration_ms,
            killing_test: None,
            diagnostic: None,
        }
    }

    /// Outcome for a mutant that was never handed to the runner.
    pub fn not_executed(kind: OutcomeKind, reason: impl Into<String>) -> Self {
        Self {
            diagnostic: Some(reason.into()),
            ..Self::new(kind, 0)
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn with_killing_test(mut self, test: Option<String>) -> Self {
        self.killing_test = test;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantResult {
    pub mutant: MutantRecord,
    pub outcome: Outcome,
}

impl MutantResult {
    pub fn new(mutant: MutantRecord, outcome: Outcome) -> Self {
        Self { mutant, outcome }
    }

    pub fn kind(&self) -> OutcomeKind {
        self.outcome.kind
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<MutantResult>,
    pub score: MutationScore,
    /// Set when the run was cancelled before every mutant finished
    pub partial: bool,
    /// Operator faults met during generation
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// RFC 3339
    pub started_at: String,
    /// RFC 3339
    pub finished_at: String,
}

impl RunReport {
    /// Order results by file and position and compute the score.
    pub fn new(
        mut results: Vec<MutantResult>,
        diagnostics: Vec<Diagnostic>,
        partial: bool,
        policy: &ScoringPolicy,
    ) -> Self {
        results.sort_by(|a, b| {
            (&a.mutant.file, a.mutant.line, &a.mutant.id).cmp(&(&b.mutant.file, b.mutant.line, &b.mutant.id))
        });
        let score = MutationScore::from_results(&results, policy);
        let now = Utc::now().to_rfc3339();
        Self {
            results,
            score,
            partial,
            diagnostics,
            started_at: now.clone(),
            finished_at: now,
        }
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at.to_rfc3339();
        self
    }

    pub fn with_kind(&self, kind: OutcomeKind) -> impl Iterator<Item = &MutantResult> {
        self.results.iter().filter(move |r| r.kind() == kind)
    }

    /// Results grouped by outcome, escaped first; empty groups are left out.
    pub fn categorized(&self) -> Vec<(OutcomeKind, Vec<&MutantResult>)> {
        OutcomeKind::REPORT_ORDER
            .iter()
            .map(|&kind| (kind, self.with_kind(kind).collect::<Vec<_>>()))
            .filter(|(_, results)| !results.is_empty())
            .collect()
    }

    pub fn escaped(&self) -> Vec<&MutantResult> {
        self.with_kind(OutcomeKind::Escaped).collect()
    }
}
