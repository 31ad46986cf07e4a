//! Line coverage index.
//!
//! Coverage is collected by an external tool and handed to the engine as JSON:
//!
//! ```json
//! {
//!   "src/Calculator.php": {
//!     "12": ["CalculatorTest::testAdd", "CalculatorTest::testSum"],
//!     "13": ["CalculatorTest::testAdd"]
//!   }
//! }
//! ```
//!
//! Files map line numbers to the tests that execute them. The index is
//! read-only once built and shared between workers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Identifier of one test, in whatever form the test runner understands.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("failed to read coverage data from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed coverage data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("line 0 is not a valid line in {file}")]
    ZeroLine { file: String },
}

type LineMap = BTreeMap<usize, BTreeSet<TestId>>;

/// `(file, line) -> tests`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageIndex {
    files: BTreeMap<String, LineMap>,
}

impl CoverageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, CoverageError> {
        let index: Self = serde_json::from_str(json)?;
        index.check_lines()?;
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self, CoverageError> {
        let json = std::fs::read_to_string(path).map_err(|source| CoverageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let index = Self::from_json(&json)?;
        tracing::debug!(
            files = index.files.len(),
            tests = index.all_tests().len(),
            "Loaded coverage index from {}",
            path.display()
        );
        Ok(index)
    }

    fn check_lines(&self) -> Result<(), CoverageError> {
        for (file, lines) in &self.files {
            if lines.contains_key(&0) {
                return Err(CoverageError::ZeroLine { file: file.clone() });
            }
        }
        Ok(())
    }

    /// Record that `test` executes `line` of `file`.
    pub fn insert(&mut self, file: &str, line: usize, test: TestId) {
        self.files
            .entry(file.to_string())
            .or_default()
            .entry(line)
            .or_default()
            .insert(test);
    }

    pub fn tests_for_line(&self, file: &str, line: usize) -> BTreeSet<TestId> {
        self.tests_for_lines(file, line, line)
    }

    /// Union of the tests covering any line in `start..=end`.
    pub fn tests_for_lines(&self, file: &str, start: usize, end: usize) -> BTreeSet<TestId> {
        let Some(lines) = self.files.get(file) else {
            return BTreeSet::new();
        };
        if end < start {
            return BTreeSet::new();
        }
        lines
            .range(start..=end)
            .flat_map(|(_, tests)| tests.iter().cloned())
            .collect()
    }

    /// Every test mentioned anywhere in the index.
    pub fn all_tests(&self) -> BTreeSet<TestId> {
        self.files
            .values()
            .flat_map(|lines| lines.values())
            .flat_map(|tests| tests.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
