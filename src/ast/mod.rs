//! Syntax tree model.
//!
//! Trees arrive already parsed (as JSON produced by an external parser) and are
//! treated as read-only for the whole run. Mutators clone the subtree they
//! rewrite; nothing in the engine edits a shared tree in place.
//!
//! Nodes do not hold parent pointers. A node is located by its [`NodePath`]
//! (child indices from the root); its parent is the node at the path's
//! parent.

pub mod printer;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub use printer::{PrintStyle, Printer};

/// Byte and line range of a node in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// 1-indexed line of `start`
    pub start_line: usize,
    /// 1-indexed line of the last character
    pub end_line: usize,
}

/// Auxiliary facts attached by [`SourceFile::annotate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Name of the innermost class declaration containing this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_class: Option<String>,
    /// Name of the innermost method declaration containing this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_function: Option<String>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.line.is_none() && self.enclosing_class.is_none() && self.enclosing_function.is_none()
    }

    /// `Class::method`, `Class`, or `None` outside any declaration.
    pub fn qualified_scope(&self) -> Option<String> {
        match (&self.enclosing_class, &self.enclosing_function) {
            (Some(class), Some(function)) => Some(format!("{}::{}", class, function)),
            (Some(class), None) => Some(class.clone()),
            (None, Some(function)) => Some(function.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Concat,
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    BooleanAnd,
    BooleanOr,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Concat => ".",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Identical => "===",
            Self::NotIdentical => "!==",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::BooleanAnd => "&&",
            Self::BooleanOr => "||",
        }
    }
}

/// Syntactic category of a node, with the data that belongs to the node
/// itself (names, literal values). Sub-expressions live in `Node::children`.
///
/// Child layout per kind:
/// - `method_call`: `[receiver, args...]`
/// - `function_call`, `static_call`: `[args...]`
/// - `property_fetch`: `[receiver]`
/// - `array_access`: `[receiver, index]`
/// - `binary_op`, `assign`, `compound_assign`: `[left, right]`
/// - `unary_minus`, `expression_stmt`: `[operand]`
/// - `if`: `[condition, then_block]` or `[condition, then_block, else_block]`
/// - `return`: `[]` or `[value]`
/// - `other`: any children, walked but never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Class { name: String },
    Method { name: String },
    Block,
    If,
    ExpressionStmt,
    Return,
    MethodCall { name: String },
    FunctionCall { name: String },
    StaticCall { class: String, name: String },
    PropertyFetch { name: String },
    StaticPropertyFetch { class: String, name: String },
    ArrayAccess,
    Variable { name: String },
    ConstFetch { name: String },
    ClassConstFetch { class: String, name: String },
    BinaryOp { op: BinaryOperator },
    Assign,
    CompoundAssign { op: BinaryOperator },
    UnaryMinus,
    Int { value: i64 },
    Float { value: f64 },
    Str { value: String },
    Bool { value: bool },
    Null,
    /// Any construct the parser emits without a dedicated kind (loops,
    /// closures, array literals, ...). Printed from the source text under
    /// its span.
    #[serde(other)]
    Other,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class { .. } => "class",
            Self::Method { .. } => "method",
            Self::Block => "block",
            Self::If => "if",
            Self::ExpressionStmt => "expression_stmt",
            Self::Return => "return",
            Self::MethodCall { .. } => "method_call",
            Self::FunctionCall { .. } => "function_call",
            Self::StaticCall { .. } => "static_call",
            Self::PropertyFetch { .. } => "property_fetch",
            Self::StaticPropertyFetch { .. } => "static_property_fetch",
            Self::ArrayAccess => "array_access",
            Self::Variable { .. } => "variable",
            Self::ConstFetch { .. } => "const_fetch",
            Self::ClassConstFetch { .. } => "class_const_fetch",
            Self::BinaryOp { .. } => "binary_op",
            Self::Assign => "assign",
            Self::CompoundAssign { .. } => "compound_assign",
            Self::UnaryMinus => "unary_minus",
            Self::Int { .. } => "int",
            Self::Float { .. } => "float",
            Self::Str { .. } => "str",
            Self::Bool { .. } => "bool",
            Self::Null => "null",
            Self::Other => "other",
        }
    }

    /// Index of the single designated receiver child, for kinds that have one.
    ///
    /// Fluent chains are walked along this edge.
    pub fn receiver_slot(&self) -> Option<usize> {
        match self {
            Self::MethodCall { .. } | Self::PropertyFetch { .. } | Self::ArrayAccess => Some(0),
            _ => None,
        }
    }

    /// Whether an expression of this kind can appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Self::Variable { .. }
                | Self::PropertyFetch { .. }
                | Self::StaticPropertyFetch { .. }
                | Self::ArrayAccess
        )
    }

    /// Exact child count for fixed-arity kinds.
    fn fixed_arity(&self) -> Option<usize> {
        match self {
            Self::BinaryOp { .. } | Self::Assign | Self::CompoundAssign { .. } | Self::ArrayAccess => {
                Some(2)
            }
            Self::UnaryMinus | Self::ExpressionStmt | Self::PropertyFetch { .. } => Some(1),
            Self::Variable { .. }
            | Self::ConstFetch { .. }
            | Self::ClassConstFetch { .. }
            | Self::StaticPropertyFetch { .. }
            | Self::Int { .. }
            | Self::Float { .. }
            | Self::Str { .. }
            | Self::Bool { .. }
            | Self::Null => Some(0),
            _ => None,
        }
    }
}

/// A node whose shape does not match what its kind promises.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("{kind} node expects {expected} children, found {found}")]
    Arity {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{kind} node has no child at index {index}")]
    MissingChild { kind: &'static str, index: usize },
    #[error("{kind} node has no receiver")]
    NoReceiver { kind: &'static str },
    #[error("path {0} does not exist in the tree")]
    MissingPath(NodePath),
    #[error("{kind} node has no source text to print from")]
    Unprintable { kind: &'static str },
}

/// Child indices leading from a root node to a descendant.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

}

impl From<Vec<usize>> for NodePath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl Node {
    pub fn new(kind: NodeKind, children: Vec<Node>) -> Self {
        Self {
            kind,
            children,
            span: None,
            attributes: Attributes::default(),
        }
    }

    pub fn leaf(kind: NodeKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    // =========================================================================
    // Constructors for the common shapes
    // =========================================================================

    pub fn module(statements: Vec<Node>) -> Self {
        Self::new(NodeKind::Module, statements)
    }

    pub fn class(name: &str, members: Vec<Node>) -> Self {
        Self::new(NodeKind::Class { name: name.to_string() }, members)
    }

    pub fn method(name: &str, body: Vec<Node>) -> Self {
        Self::new(NodeKind::Method { name: name.to_string() }, body)
    }

    pub fn block(statements: Vec<Node>) -> Self {
        Self::new(NodeKind::Block, statements)
    }

    pub fn if_stmt(condition: Node, then_block: Node) -> Self {
        Self::new(NodeKind::If, vec![condition, then_block])
    }

    pub fn expr_stmt(expr: Node) -> Self {
        Self::new(NodeKind::ExpressionStmt, vec![expr])
    }

    pub fn var(name: &str) -> Self {
        Self::leaf(NodeKind::Variable { name: name.to_string() })
    }

    pub fn int(value: i64) -> Self {
        Self::leaf(NodeKind::Int { value })
    }

    pub fn float(value: f64) -> Self {
        Self::leaf(NodeKind::Float { value })
    }

    pub fn string(value: &str) -> Self {
        Self::leaf(NodeKind::Str { value: value.to_string() })
    }

    pub fn const_fetch(name: &str) -> Self {
        Self::leaf(NodeKind::ConstFetch { name: name.to_string() })
    }

    pub fn class_const(class: &str, name: &str) -> Self {
        Self::leaf(NodeKind::ClassConstFetch {
            class: class.to_string(),
            name: name.to_string(),
        })
    }

    pub fn binary(op: BinaryOperator, left: Node, right: Node) -> Self {
        Self::new(NodeKind::BinaryOp { op }, vec![left, right])
    }

    pub fn assign(target: Node, value: Node) -> Self {
        Self::new(NodeKind::Assign, vec![target, value])
    }

    pub fn compound_assign(op: BinaryOperator, target: Node, value: Node) -> Self {
        Self::new(NodeKind::CompoundAssign { op }, vec![target, value])
    }

    pub fn unary_minus(operand: Node) -> Self {
        Self::new(NodeKind::UnaryMinus, vec![operand])
    }

    pub fn method_call(receiver: Node, name: &str, args: Vec<Node>) -> Self {
        let mut children = Vec::with_capacity(args.len() + 1);
        children.push(receiver);
        children.extend(args);
        Self::new(NodeKind::MethodCall { name: name.to_string() }, children)
    }

    pub fn function_call(name: &str, args: Vec<Node>) -> Self {
        Self::new(NodeKind::FunctionCall { name: name.to_string() }, args)
    }

    pub fn property(receiver: Node, name: &str) -> Self {
        Self::new(NodeKind::PropertyFetch { name: name.to_string() }, vec![receiver])
    }

    // =========================================================================
    // Structure queries
    // =========================================================================

    pub fn child(&self, index: usize) -> Result<&Node, ShapeError> {
        self.children.get(index).ok_or(ShapeError::MissingChild {
            kind: self.kind.label(),
            index,
        })
    }

    /// Fail if a fixed-arity node carries the wrong number of children.
    pub fn check_shape(&self) -> Result<(), ShapeError> {
        match self.kind.fixed_arity() {
            Some(expected) if expected != self.children.len() => Err(ShapeError::Arity {
                kind: self.kind.label(),
                expected,
                found: self.children.len(),
            }),
            _ => Ok(()),
        }
    }

    pub fn receiver(&self) -> Result<&Node, ShapeError> {
        let slot = self.kind.receiver_slot().ok_or(ShapeError::NoReceiver {
            kind: self.kind.label(),
        })?;
        self.child(slot)
    }

    /// Arguments of a call node; empty for anything else.
    pub fn call_args(&self) -> &[Node] {
        match self.kind {
            NodeKind::MethodCall { .. } => self.children.get(1..).unwrap_or(&[]),
            NodeKind::FunctionCall { .. } | NodeKind::StaticCall { .. } => &self.children,
            _ => &[],
        }
    }

    /// The first call argument, when it is a string literal.
    pub fn first_string_arg(&self) -> Option<&str> {
        match self.call_args().first().map(|arg| &arg.kind) {
            Some(NodeKind::Str { value }) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn method_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::MethodCall { name } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::MethodCall { .. } | NodeKind::FunctionCall { .. } | NodeKind::StaticCall { .. }
        )
    }

    /// Source line of the node, from its attributes or its span.
    pub fn line(&self) -> Option<usize> {
        self.attributes.line.or(self.span.map(|s| s.start_line))
    }

    /// Inclusive line range covered by the node.
    pub fn line_range(&self) -> Option<(usize, usize)> {
        match self.span {
            Some(span) => Some((span.start_line, span.end_line.max(span.start_line))),
            None => self.attributes.line.map(|line| (line, line)),
        }
    }

    pub fn at(&self, path: &NodePath) -> Result<&Node, ShapeError> {
        let mut cursor = self;
        for &index in path.indices() {
            cursor = cursor
                .children
                .get(index)
                .ok_or_else(|| ShapeError::MissingPath(path.clone()))?;
        }
        Ok(cursor)
    }

    /// Compare kinds and children only, ignoring spans and attributes.
    pub fn same_shape(&self, other: &Node) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            if a.kind != b.kind || a.children.len() != b.children.len() {
                return false;
            }
            pending.extend(a.children.iter().zip(b.children.iter()));
        }
        true
    }

    /// Pre-order traversal yielding every node with its path from `self`.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(NodePath::root(), self)],
        }
    }

    // =========================================================================
    // Editing (always on a copy)
    // =========================================================================

    /// Return a copy of this node with child `index` substituted.
    pub fn replace(&self, index: usize, replacement: Node) -> Result<Node, ShapeError> {
        let mut parent = self.clone();
        let slot = parent.children.get_mut(index).ok_or(ShapeError::MissingChild {
            kind: self.kind.label(),
            index,
        })?;
        *slot = replacement;
        Ok(parent)
    }

    /// Return a copy of this tree with the node at `path` substituted.
    ///
    /// The path is followed iteratively; only the copy is touched.
    pub fn with_replaced(&self, path: &NodePath, replacement: Node) -> Result<Node, ShapeError> {
        let mut root = self.clone();
        let mut cursor = &mut root;
        for &index in path.indices() {
            cursor = cursor
                .children
                .get_mut(index)
                .ok_or_else(|| ShapeError::MissingPath(path.clone()))?;
        }
        *cursor = replacement;
        Ok(root)
    }

    /// Return a copy of this tree where the node at `path` is replaced by its
    /// own receiver, shortening a fluent chain by one link.
    pub fn splice_receiver(&self, path: &NodePath) -> Result<Node, ShapeError> {
        let receiver = self.at(path)?.receiver()?.clone();
        self.with_replaced(path, receiver)
    }
}

/// Iterator returned by [`Node::walk`].
pub struct Walk<'a> {
    stack: Vec<(NodePath, &'a Node)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (NodePath, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, node) = self.stack.pop()?;
        for (index, child) in node.children.iter().enumerate().rev() {
            self.stack.push((path.child(index), child));
        }
        Some((path, node))
    }
}

/// A parsed source file: its location, text and tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    #[serde(default)]
    pub text: String,
    pub ast: Node,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>, ast: Node) -> Self {
        let mut file = Self {
            path: path.into(),
            text: text.into(),
            ast,
        };
        file.annotate();
        file
    }

    /// Load a parser-produced JSON document (`{"path": ..., "ast": ...}`).
    ///
    /// When the document carries no `text`, the source is read from `path`,
    /// resolved against the JSON file's directory if relative.
    pub fn load(json_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(json_path)
            .with_context(|| format!("Failed to read AST from {:?}", json_path))?;
        let mut file: SourceFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse AST from {:?}", json_path))?;

        if file.text.is_empty() {
            let source_path = if file.path.is_absolute() {
                file.path.clone()
            } else {
                json_path
                    .parent()
                    .map(|dir| dir.join(&file.path))
                    .unwrap_or_else(|| file.path.clone())
            };
            file.text = std::fs::read_to_string(&source_path)
                .with_context(|| format!("Failed to read source from {:?}", source_path))?;
        }

        file.annotate();
        Ok(file)
    }

    pub fn is_empty(&self) -> bool {
        self.ast.children.is_empty()
    }

    /// Fill in line numbers and enclosing declaration names.
    pub fn annotate(&mut self) {
        let mut stack: Vec<(&mut Node, Option<String>, Option<String>)> =
            vec![(&mut self.ast, None, None)];

        while let Some((node, class, function)) = stack.pop() {
            let Node {
                kind,
                children,
                span,
                attributes,
            } = node;

            if attributes.line.is_none() {
                attributes.line = span.as_ref().map(|s| s.start_line);
            }
            attributes.enclosing_class = class.clone();
            attributes.enclosing_function = function.clone();

            let (class, function) = match kind {
                NodeKind::Class { name } => (Some(name.clone()), None),
                NodeKind::Method { name } => (class, Some(name.clone())),
                _ => (class, function),
            };

            for child in children.iter_mut() {
                stack.push((child, class.clone(), function.clone()));
            }
        }
    }

    pub fn node_at(&self, path: &NodePath) -> Result<&Node, ShapeError> {
        self.ast.at(path)
    }

    /// Source text of the node at `path`, when it has a span.
    pub fn snippet(&self, path: &NodePath) -> Option<&str> {
        let span = self.node_at(path).ok()?.span?;
        self.text.get(span.start..span.end)
    }
}
