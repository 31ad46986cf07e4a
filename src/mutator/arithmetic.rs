//! Arithmetic operator swaps (`+` <-> `-`, `*` <-> `/`).

use super::{failed, Mutations, Mutator, MutatorError};
use crate::ast::{BinaryOperator, Node, NodeKind};

/// Operand patterns that make a swap produce an equivalent program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Equivalence {
    /// `x + 0` and `x - 0` behave the same
    RightZero,
    /// `x * 1`, `1 * x`, `x * -1`, ... are rejected on either side
    EitherUnit,
    /// `x / 1` and `x * 1` behave the same
    RightUnit,
}

/// Replaces one arithmetic operator with its counterpart.
#[derive(Debug, Clone)]
pub struct ArithmeticSwap {
    name: &'static str,
    from: BinaryOperator,
    to: BinaryOperator,
    equivalence: Equivalence,
}

impl ArithmeticSwap {
    pub const PLUS: &'static str = "Plus";
    pub const MINUS: &'static str = "Minus";
    pub const MULTIPLICATION: &'static str = "Multiplication";
    pub const DIVISION: &'static str = "Division";

    pub fn plus() -> Self {
        Self {
            name: Self::PLUS,
            from: BinaryOperator::Plus,
            to: BinaryOperator::Minus,
            equivalence: Equivalence::RightZero,
        }
    }

    pub fn minus() -> Self {
        Self {
            name: Self::MINUS,
            from: BinaryOperator::Minus,
            to: BinaryOperator::Plus,
            equivalence: Equivalence::RightZero,
        }
    }

    pub fn multiplication() -> Self {
        Self {
            name: Self::MULTIPLICATION,
            from: BinaryOperator::Mul,
            to: BinaryOperator::Div,
            equivalence: Equivalence::EitherUnit,
        }
    }

    pub fn division() -> Self {
        Self {
            name: Self::DIVISION,
            from: BinaryOperator::Div,
            to: BinaryOperator::Mul,
            equivalence: Equivalence::RightUnit,
        }
    }

    fn is_equivalent(&self, left: &Node, right: &Node) -> bool {
        match self.equivalence {
            Equivalence::RightZero => literal_value(right) == Some(0.0),
            Equivalence::EitherUnit => is_unit(left) || is_unit(right),
            Equivalence::RightUnit => is_unit(right),
        }
    }
}

/// Numeric value of an integer or float literal, including a negated one.
fn literal_value(node: &Node) -> Option<f64> {
    match &node.kind {
        NodeKind::Int { value } => Some(*value as f64),
        NodeKind::Float { value } => Some(*value),
        NodeKind::UnaryMinus => node.children.first().and_then(literal_value).map(|v| -v),
        _ => None,
    }
}

/// `1`, `-1`, `1.0` or `-1.0`.
fn is_unit(node: &Node) -> bool {
    literal_value(node).is_some_and(|v| v.abs() == 1.0)
}

impl Mutator for ArithmeticSwap {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_mutate(&self, node: &Node) -> bool {
        match (&node.kind, node.children.as_slice()) {
            (NodeKind::BinaryOp { op }, [left, right]) if *op == self.from => {
                !self.is_equivalent(left, right)
            }
            _ => false,
        }
    }

    fn mutate<'a>(&'a self, node: &'a Node) -> Mutations<'a> {
        if !matches!(node.kind, NodeKind::BinaryOp { op } if op == self.from) {
            return failed(MutatorError::Unsupported {
                mutator: self.name,
                kind: node.kind.label(),
            });
        }
        if let Err(e) = node.check_shape() {
            return failed(e.into());
        }

        let to = self.to;
        Box::new(std::iter::once_with(move || {
            let mut mutated = node.clone();
            mutated.kind = NodeKind::BinaryOp { op: to };
            Ok(mutated)
        }))
    }
}
