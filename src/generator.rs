//! Lazy mutant generation.
//!
//! One pre-order walk over a file's tree. Every node is offered to every
//! registered operator; each replacement the operator yields becomes one
//! item. Nothing is collected up front, so the scheduler can pull mutants on
//! demand from arbitrarily large trees.

use crate::ast::{Node, NodePath, SourceFile};
use crate::coverage::{CoverageIndex, TestId};
use crate::mutation::{Mutant, MutantId};
use crate::mutator::{Mutator, MutatorError, MutatorRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// An operator fault, reported instead of a mutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub path: NodePath,
    pub operator: String,
    pub message: String,
}

/// One item of the generated stream.
#[derive(Debug, Clone)]
pub enum Generated {
    /// Ready to be scheduled
    Mutant(Mutant),
    /// No test covers the node and only covered code is being tested
    NotCovered(Mutant),
    /// The operator is ignored for the node's `Class::method`
    Skipped(Mutant),
    Fault(Diagnostic),
}

#[derive(Clone, Copy)]
pub struct MutantGenerator<'a> {
    file: &'a SourceFile,
    registry: &'a MutatorRegistry,
    coverage: Option<&'a CoverageIndex>,
    only_covered: bool,
}

impl<'a> MutantGenerator<'a> {
    pub fn new(file: &'a SourceFile, registry: &'a MutatorRegistry) -> Self {
        Self {
            file,
            registry,
            coverage: None,
            only_covered: false,
        }
    }

    pub fn with_coverage(mut self, coverage: Option<&'a CoverageIndex>, only_covered: bool) -> Self {
        self.coverage = coverage;
        self.only_covered = only_covered;
        self
    }

    /// The generated stream, in tree order then operator-name order.
    pub fn iter(&self) -> impl Iterator<Item = Generated> + Send + 'a {
        let generator = *self;
        generator.file.ast.walk().flat_map(move |(path, node)| {
            generator
                .registry
                .iter()
                .filter(move |mutator| mutator.can_mutate(node))
                .flat_map(move |mutator| generator.site(path.clone(), node, mutator))
        })
    }

    /// Tests covering any line of `node`.
    fn covering_tests(&self, node: &Node) -> BTreeSet<TestId> {
        let (Some(coverage), Some((start, end))) = (self.coverage, node.line_range()) else {
            return BTreeSet::new();
        };
        let file = self.file.path.to_string_lossy();
        coverage.tests_for_lines(&file, start, end)
    }

    /// Items for one operator applied to one node.
    fn site(
        self,
        path: NodePath,
        node: &'a Node,
        mutator: &'a dyn Mutator,
    ) -> impl Iterator<Item = Generated> + Send + 'a {
        let operator = mutator.name();
        let scope = node.attributes.qualified_scope();
        let ignored = self.registry.is_ignored(operator, scope.as_deref());
        let covering_tests = self.covering_tests(node);
        let uncovered = self.only_covered && self.coverage.is_some() && covering_tests.is_empty();
        let file = self.file.path.clone();
        let line = node.line();

        mutator
            .mutate(node)
            .enumerate()
            .map(move |(ordinal, replacement)| match replacement {
                Ok(replacement) => {
                    let mutant = Mutant {
                        id: MutantId::derive(&file, &path, operator, ordinal),
                        operator: operator.to_string(),
                        file: file.clone(),
                        path: path.clone(),
                        replacement,
                        line,
                        scope: scope.clone(),
                        covering_tests: covering_tests.clone(),
                    };
                    if ignored {
                        Generated::Skipped(mutant)
                    } else if uncovered {
                        Generated::NotCovered(mutant)
                    } else {
                        Generated::Mutant(mutant)
                    }
                }
                Err(err) => fault(&file, &path, operator, err),
            })
    }
}

fn fault(file: &std::path::Path, path: &NodePath, operator: &str, err: MutatorError) -> Generated {
    tracing::warn!(
        "{} failed on {} at {}: {}",
        operator,
        file.display(),
        path,
        err
    );
    Generated::Fault(Diagnostic {
        file: file.to_path_buf(),
        path: path.clone(),
        operator: operator.to_string(),
        message: err.to_string(),
    })
}
