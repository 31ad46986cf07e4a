//! Mutation score.
//!
//! Ratios are in `0.0..=1.0`. Thresholds are configured in percent.

use crate::config::ScoringConfig;
use crate::mutation::{MutantResult, OutcomeKind};
use serde::{Deserialize, Serialize};

/// Which outcomes count as detected, and which count at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub timed_out_detected: bool,
    pub errored_detected: bool,
    pub include_not_covered: bool,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringPolicy {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            timed_out_detected: config.timed_out_detected,
            errored_detected: config.errored_detected,
            include_not_covered: config.include_not_covered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationScore {
    pub total: usize,
    pub killed: usize,
    pub escaped: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub not_covered: usize,
    pub skipped: usize,
    /// Mutation Score Indicator
    pub msi: f64,
    /// MSI over mutants some test covers
    pub covered_msi: f64,
    /// Share of mutants some test covers
    pub mutation_code_coverage: f64,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl MutationScore {
    pub fn from_results(results: &[MutantResult], policy: &ScoringPolicy) -> Self {
        Self::from_kinds(results.iter().map(|r| r.kind()), policy)
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = OutcomeKind>, policy: &ScoringPolicy) -> Self {
        let mut score = Self {
            total: 0,
            killed: 0,
            escaped: 0,
            errored: 0,
            timed_out: 0,
            not_covered: 0,
            skipped: 0,
            msi: 0.0,
            covered_msi: 0.0,
            mutation_code_coverage: 0.0,
        };
        for kind in kinds {
            score.total += 1;
            match kind {
                OutcomeKind::Killed => score.killed += 1,
                OutcomeKind::Escaped => score.escaped += 1,
                OutcomeKind::Errored => score.errored += 1,
                OutcomeKind::TimedOut => score.timed_out += 1,
                OutcomeKind::NotCovered => score.not_covered += 1,
                OutcomeKind::Skipped => score.skipped += 1,
            }
        }

        let mut detected = score.killed;
        if policy.timed_out_detected {
            detected += score.timed_out;
        }
        if policy.errored_detected {
            detected += score.errored;
        }
        let covered = score.executed();
        let actionable = if policy.include_not_covered {
            covered + score.not_covered
        } else {
            covered
        };

        score.msi = ratio(detected, actionable);
        score.covered_msi = ratio(detected, covered);
        score.mutation_code_coverage = ratio(covered, covered + score.not_covered);
        score
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        match kind {
            OutcomeKind::Killed => self.killed,
            OutcomeKind::Escaped => self.escaped,
            OutcomeKind::Errored => self.errored,
            OutcomeKind::TimedOut => self.timed_out,
            OutcomeKind::NotCovered => self.not_covered,
            OutcomeKind::Skipped => self.skipped,
        }
    }

    /// Mutants the tests actually ran against.
    pub fn executed(&self) -> usize {
        self.killed + self.escaped + self.errored + self.timed_out
    }

    /// Check the configured minimums.
    pub fn check(&self, config: &ScoringConfig) -> Result<(), ThresholdError> {
        if self.total == 0 && config.ignore_msi_with_no_mutations {
            return Ok(());
        }
        if let Some(required) = config.min_msi {
            let actual = self.msi * 100.0;
            if actual < required {
                return Err(ThresholdError::Msi { required, actual });
            }
        }
        if let Some(required) = config.min_covered_msi {
            let actual = self.covered_msi * 100.0;
            if actual < required {
                return Err(ThresholdError::CoveredMsi { required, actual });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("MSI {actual:.2}% is below the required {required:.2}%")]
    Msi { required: f64, actual: f64 },

    #[error("covered MSI {actual:.2}% is below the required {required:.2}%")]
    CoveredMsi { required: f64, actual: f64 },
}
