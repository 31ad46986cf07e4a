//! Removal of calls from fluent method chains.
//!
//! For a statement such as
//!
//! ```text
//! $qb->where('u.id = :id')->setParameter('id', 1)->orderBy('u.name')->setMaxResults(5);
//! ```
//!
//! one mutant is produced per eligible call, with that call spliced out of the
//! chain (replaced by its own receiver). Calls are eligible when their method
//! name is in the configured allow-list; other links in the chain are walked
//! through but never counted or removed.
//!
//! Removing a filter call (`where`, `andWhere`, `orWhere`) whose first argument
//! is a string literal also removes the parameter bindings (`setParameter`)
//! for the `:name` placeholders that string introduced, so that the mutant does
//! not fail only because it binds a parameter nobody references.

use super::{failed, Mutations, Mutator, MutatorError};
use crate::ast::{Node, NodeKind, NodePath, ShapeError};
use crate::config::ChainConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// Decides from the enclosing class name whether a statement is in scope.
pub type ScopePredicate = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// What to do when several binders in one chain bind the same placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingRemoval {
    /// Remove only the outermost matching binder
    #[default]
    First,
    /// Remove every matching binder
    All,
}

/// Outcome of splicing one call out of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub statement: Node,
    /// Placeholder names introduced by the removed call's filter string.
    pub placeholders: Vec<String>,
}

pub struct ChainRemoval {
    methods: BTreeSet<String>,
    filter_methods: BTreeSet<String>,
    binder_methods: BTreeSet<String>,
    bindings: BindingRemoval,
    scope: ScopePredicate,
}

fn to_set<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r":(\w+)").expect("placeholder pattern is valid"))
}

/// Names of the `:name` placeholders in a query string, first occurrence order.
pub fn placeholder_names(query: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in placeholder_pattern().captures_iter(query) {
        let name = &capture[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

impl ChainRemoval {
    pub const NAME: &'static str = "ChainCallRemoval";

    /// Operator over the given allow-list with the default filter and binder
    /// methods, applying to statements anywhere.
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let defaults = ChainConfig::default();
        Self {
            methods: to_set(methods),
            filter_methods: to_set(defaults.filter_methods),
            binder_methods: to_set(defaults.binder_methods),
            bindings: BindingRemoval::default(),
            scope: Arc::new(|_: Option<&str>| true),
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        let scope_patterns = config.scope.clone();
        let scope: ScopePredicate = if scope_patterns.is_empty() {
            Arc::new(|_: Option<&str>| true)
        } else {
            Arc::new(move |class: Option<&str>| {
                class.is_some_and(|name| scope_patterns.iter().any(|p| name.contains(p.as_str())))
            })
        };

        Self {
            methods: to_set(config.methods.iter().cloned()),
            filter_methods: to_set(config.filter_methods.iter().cloned()),
            binder_methods: to_set(config.binder_methods.iter().cloned()),
            bindings: config.bindings,
            scope,
        }
    }

    pub fn with_scope<F>(mut self, scope: F) -> Self
    where
        F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.scope = Arc::new(scope);
        self
    }

    pub fn with_bindings(mut self, bindings: BindingRemoval) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_binder_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.binder_methods = to_set(methods);
        self
    }

    fn is_eligible(&self, node: &Node) -> bool {
        node.method_name()
            .is_some_and(|name| self.methods.contains(name))
    }

    /// Paths (relative to the statement) of the eligible calls, outermost
    /// first.
    pub fn eligible_calls(&self, statement: &Node) -> Vec<NodePath> {
        let mut calls = Vec::new();
        if !matches!(statement.kind, NodeKind::ExpressionStmt) {
            return calls;
        }
        let Some(mut cursor) = statement.children.first() else {
            return calls;
        };
        let mut path = NodePath::from(vec![0]);

        loop {
            if self.is_eligible(cursor) {
                calls.push(path.clone());
            }
            let Some(slot) = cursor.kind.receiver_slot() else {
                break;
            };
            let Some(next) = cursor.children.get(slot) else {
                break;
            };
            path = path.child(slot);
            cursor = next;
        }
        calls
    }

    /// Splice out the call at `path`, collecting the placeholders its filter
    /// string introduced.
    pub fn remove_call(&self, statement: &Node, path: &NodePath) -> Result<Removal, ShapeError> {
        let call = statement.at(path)?;
        let is_filter = call
            .method_name()
            .is_some_and(|name| self.filter_methods.contains(name));
        let placeholders = match call.first_string_arg() {
            Some(query) if is_filter => placeholder_names(query),
            _ => Vec::new(),
        };

        Ok(Removal {
            statement: statement.splice_receiver(path)?,
            placeholders,
        })
    }

    /// Outermost call in the chain that binds `name`.
    fn find_binder(&self, statement: &Node, name: &str) -> Option<NodePath> {
        let mut cursor = statement.children.first()?;
        let mut path = NodePath::from(vec![0]);

        loop {
            let binds = cursor
                .method_name()
                .is_some_and(|m| self.binder_methods.contains(m))
                && cursor.first_string_arg() == Some(name);
            if binds {
                return Some(path);
            }
            let slot = cursor.kind.receiver_slot()?;
            cursor = cursor.children.get(slot)?;
            path = path.child(slot);
        }
    }

    fn remove_bindings(&self, mut statement: Node, name: &str) -> Result<Node, ShapeError> {
        while let Some(path) = self.find_binder(&statement, name) {
            statement = statement.splice_receiver(&path)?;
            if self.bindings == BindingRemoval::First {
                break;
            }
        }
        Ok(statement)
    }

    /// The full mutant for the eligible call at `path`: the call and the
    /// bindings it orphaned are removed.
    pub fn remove_at(&self, statement: &Node, path: &NodePath) -> Result<Node, ShapeError> {
        let Removal {
            mut statement,
            placeholders,
        } = self.remove_call(statement, path)?;
        for name in &placeholders {
            statement = self.remove_bindings(statement, name)?;
        }
        Ok(statement)
    }
}

impl Mutator for ChainRemoval {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_mutate(&self, node: &Node) -> bool {
        matches!(node.kind, NodeKind::ExpressionStmt)
            && (self.scope)(node.attributes.enclosing_class.as_deref())
            && !self.eligible_calls(node).is_empty()
    }

    fn mutate<'a>(&'a self, node: &'a Node) -> Mutations<'a> {
        if !matches!(node.kind, NodeKind::ExpressionStmt) {
            return failed(MutatorError::Unsupported {
                mutator: Self::NAME,
                kind: node.kind.label(),
            });
        }
        let calls = self.eligible_calls(node);
        Box::new(
            calls
                .into_iter()
                .map(move |path| self.remove_at(node, &path).map_err(MutatorError::from)),
        )
    }
}
