//! Mutation testing engine.
//!
//! Takes parsed syntax trees, proposes small semantic changes (mutants), runs
//! the project's tests against each one in an isolated workspace and reports
//! which changes the tests failed to notice.

pub mod ast;
pub mod config;
pub mod coverage;
pub mod generator;
pub mod mutation;
pub mod mutator;

pub use ast::{Node, NodeKind, NodePath, SourceFile};
pub use config::Config;
pub use coverage::{CoverageIndex, TestId};
pub use generator::{Diagnostic, Generated, MutantGenerator};
pub use mutation::{
    Mutant, MutantId, MutantRecord, MutantResult, MutationScore, Outcome, OutcomeKind, RunReport, Scheduler,
};
pub use mutator::{Mutator, MutatorRegistry};
