//! Mutation operators.
//!
//! An operator matches one node shape and proposes replacement subtrees for
//! it. Operators never edit the node they are given; every replacement is a
//! detached copy. They hold no state between calls, so the generator can apply
//! them in any order.

pub mod arithmetic;
pub mod chain;
pub mod comparison;

use crate::ast::{Node, ShapeError};
use crate::config::{ConfigError, MutatorsConfig};
use std::collections::BTreeMap;

pub use arithmetic::ArithmeticSwap;
pub use chain::{BindingRemoval, ChainRemoval};
pub use comparison::{AssignmentEqual, EqualitySwap};

/// Lazily produced replacements for one node.
pub type Mutations<'a> = Box<dyn Iterator<Item = Result<Node, MutatorError>> + Send + 'a>;

#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    #[error("malformed node: {0}")]
    Shape(#[from] ShapeError),

    #[error("{mutator} cannot mutate a {kind} node")]
    Unsupported {
        mutator: &'static str,
        kind: &'static str,
    },
}

pub trait Mutator: Send + Sync {
    /// Stable name used in configuration and reports.
    fn name(&self) -> &'static str;

    /// Whether this operator produces at least one non-equivalent mutant for
    /// `node`.
    fn can_mutate(&self, node: &Node) -> bool;

    /// Replacement subtrees for `node`. Only called when `can_mutate` holds.
    fn mutate<'a>(&'a self, node: &'a Node) -> Mutations<'a>;
}

/// Single-item `Mutations`, for operators that fail before producing anything.
pub(crate) fn failed<'a>(err: MutatorError) -> Mutations<'a> {
    Box::new(std::iter::once(Err(err)))
}

/// Names of every operator this crate provides.
pub const ALL_MUTATORS: &[&str] = &[
    ArithmeticSwap::PLUS,
    ArithmeticSwap::MINUS,
    ArithmeticSwap::MULTIPLICATION,
    ArithmeticSwap::DIVISION,
    AssignmentEqual::NAME,
    EqualitySwap::EQUAL,
    EqualitySwap::NOT_EQUAL,
    ChainRemoval::NAME,
];

/// The set of active operators, ordered by name.
pub struct MutatorRegistry {
    mutators: Vec<Box<dyn Mutator>>,
    ignore: BTreeMap<String, Vec<String>>,
}

impl MutatorRegistry {
    pub fn new(mut mutators: Vec<Box<dyn Mutator>>) -> Self {
        mutators.sort_by_key(|m| m.name());
        mutators.dedup_by_key(|m| m.name());
        Self {
            mutators,
            ignore: BTreeMap::new(),
        }
    }

    /// Build the operators named in `config.enabled`.
    pub fn from_config(config: &MutatorsConfig) -> Result<Self, ConfigError> {
        if config.enabled.is_empty() {
            return Err(ConfigError::NoMutators);
        }

        let mut mutators: Vec<Box<dyn Mutator>> = Vec::with_capacity(config.enabled.len());
        for name in &config.enabled {
            let mutator: Box<dyn Mutator> = match name.as_str() {
                ArithmeticSwap::PLUS => Box::new(ArithmeticSwap::plus()),
                ArithmeticSwap::MINUS => Box::new(ArithmeticSwap::minus()),
                ArithmeticSwap::MULTIPLICATION => Box::new(ArithmeticSwap::multiplication()),
                ArithmeticSwap::DIVISION => Box::new(ArithmeticSwap::division()),
                AssignmentEqual::NAME => Box::new(AssignmentEqual),
                EqualitySwap::EQUAL => Box::new(EqualitySwap::equal()),
                EqualitySwap::NOT_EQUAL => Box::new(EqualitySwap::not_equal()),
                ChainRemoval::NAME => Box::new(ChainRemoval::from_config(&config.chain)),
                other => return Err(ConfigError::UnknownMutator(other.to_string())),
            };
            mutators.push(mutator);
        }

        for name in config.ignore.keys() {
            if !ALL_MUTATORS.contains(&name.as_str()) {
                return Err(ConfigError::UnknownMutator(name.clone()));
            }
        }

        let mut registry = Self::new(mutators);
        registry.ignore = config.ignore.clone();
        Ok(registry)
    }

    pub fn with_ignore(mut self, mutator: &str, patterns: Vec<String>) -> Self {
        self.ignore.insert(mutator.to_string(), patterns);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Mutator> {
        self.mutators.iter().map(|m| m.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.mutators.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }

    /// Whether `mutator` is switched off for code in `scope`
    /// (`Class::method` or `Class`).
    pub fn is_ignored(&self, mutator: &str, scope: Option<&str>) -> bool {
        let (Some(patterns), Some(scope)) = (self.ignore.get(mutator), scope) else {
            return false;
        };
        patterns
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, scope))
    }
}
