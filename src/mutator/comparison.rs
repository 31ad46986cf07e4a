//! Comparison mutations.

use super::{failed, Mutations, Mutator, MutatorError};
use crate::ast::{BinaryOperator, Node, NodeKind};

/// Turns `a == b` into the assignment `a = b`.
///
/// Only applies when the left operand can be assigned to. Literals, constants,
/// class constants and call results are rejected since the mutant would not
/// even parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentEqual;

impl AssignmentEqual {
    pub const NAME: &'static str = "AssignmentEqual";
}

impl Mutator for AssignmentEqual {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_mutate(&self, node: &Node) -> bool {
        match (&node.kind, node.children.as_slice()) {
            (NodeKind::BinaryOp { op: BinaryOperator::Equal }, [left, _]) => {
                left.kind.is_assignable()
            }
            _ => false,
        }
    }

    fn mutate<'a>(&'a self, node: &'a Node) -> Mutations<'a> {
        match (&node.kind, node.children.as_slice()) {
            (NodeKind::BinaryOp { op: BinaryOperator::Equal }, [left, right]) => {
                Box::new(std::iter::once_with(move || {
                    let mut assign = Node::assign(left.clone(), right.clone());
                    assign.span = node.span;
                    assign.attributes = node.attributes.clone();
                    Ok(assign)
                }))
            }
            (NodeKind::BinaryOp { op: BinaryOperator::Equal }, _) => {
                failed(node.check_shape().err().map_or(
                    MutatorError::Unsupported {
                        mutator: Self::NAME,
                        kind: node.kind.label(),
                    },
                    MutatorError::from,
                ))
            }
            _ => failed(MutatorError::Unsupported {
                mutator: Self::NAME,
                kind: node.kind.label(),
            }),
        }
    }
}

/// Negates an equality check (`==` <-> `!=`).
#[derive(Debug, Clone)]
pub struct EqualitySwap {
    name: &'static str,
    from: BinaryOperator,
    to: BinaryOperator,
}

impl EqualitySwap {
    pub const EQUAL: &'static str = "Equal";
    pub const NOT_EQUAL: &'static str = "NotEqual";

    pub fn equal() -> Self {
        Self {
            name: Self::EQUAL,
            from: BinaryOperator::Equal,
            to: BinaryOperator::NotEqual,
        }
    }

    pub fn not_equal() -> Self {
        Self {
            name: Self::NOT_EQUAL,
            from: BinaryOperator::NotEqual,
            to: BinaryOperator::Equal,
        }
    }
}

impl Mutator for EqualitySwap {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_mutate(&self, node: &Node) -> bool {
        matches!(node.kind, NodeKind::BinaryOp { op } if op == self.from) && node.children.len() == 2
    }

    fn mutate<'a>(&'a self, node: &'a Node) -> Mutations<'a> {
        if !self.can_mutate(node) {
            return failed(MutatorError::Unsupported {
                mutator: self.name,
                kind: node.kind.label(),
            });
        }
        let to = self.to;
        Box::new(std::iter::once_with(move || {
            let mut mutated = node.clone();
            mutated.kind = NodeKind::BinaryOp { op: to };
            Ok(mutated)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Printer;

    fn equals(left: Node, right: Node) -> Node {
        Node::binary(BinaryOperator::Equal, left, right)
    }

    fn printed(mutator: &dyn Mutator, node: &Node) -> Vec<String> {
        if !mutator.can_mutate(node) {
            return Vec::new();
        }
        mutator
            .mutate(node)
            .map(|m| Printer::default().print(&m.unwrap()).unwrap())
            .collect()
    }

    // =========================================================================
    // AssignmentEqual
    // =========================================================================

    #[test]
    fn test_assignment_equal_mutates_variable_comparison() {
        let node = Node::if_stmt(equals(Node::var("$a"), Node::var("$b")), Node::block(vec![]));
        let condition = &node.children[0];

        let mutants: Vec<Node> = AssignmentEqual
            .mutate(condition)
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(mutants.len(), 1);

        let mutated = node.replace(0, mutants[0].clone()).unwrap();
        assert_eq!(
            Printer::default().print(&mutated).unwrap(),
            "if ($a = $b) {}"
        );
    }

    #[test]
    fn test_assignment_equal_rejects_literal_left() {
        assert!(printed(&AssignmentEqual, &equals(Node::int(1), Node::var("$a"))).is_empty());
    }

    #[test]
    fn test_assignment_equal_rejects_class_constant() {
        let node = equals(Node::class_const("BaseClass", "CLASS_CONST"), Node::var("$a"));
        assert!(!AssignmentEqual.can_mutate(&node));
    }

    #[test]
    fn test_assignment_equal_rejects_builtin_constant() {
        let node = equals(Node::const_fetch("PHP_EOL"), Node::var("$a"));
        assert!(!AssignmentEqual.can_mutate(&node));
    }

    #[test]
    fn test_assignment_equal_rejects_call_result() {
        let call = Node::method_call(Node::var("$x"), "getFoo", vec![]);
        assert!(!AssignmentEqual.can_mutate(&equals(call, Node::int(1))));
        let call = Node::function_call("foo", vec![]);
        assert!(!AssignmentEqual.can_mutate(&equals(call, Node::int(1))));
    }

    #[test]
    fn test_assignment_equal_accepts_property_and_array_targets() {
        let prop = Node::property(Node::var("$this"), "count");
        assert_eq!(
            printed(&AssignmentEqual, &equals(prop, Node::int(1))),
            vec!["$this->count = 1"]
        );

        let index = Node::new(NodeKind::ArrayAccess, vec![Node::var("$a"), Node::int(0)]);
        assert!(AssignmentEqual.can_mutate(&equals(index, Node::int(1))));
    }

    #[test]
    fn test_assignment_equal_ignores_identity_comparison() {
        let node = Node::binary(BinaryOperator::Identical, Node::var("$a"), Node::var("$b"));
        assert!(!AssignmentEqual.can_mutate(&node));
    }

    #[test]
    fn test_assignment_equal_reports_malformed_node() {
        let node = Node::new(
            NodeKind::BinaryOp { op: BinaryOperator::Equal },
            vec![Node::var("$a")],
        );
        let results: Vec<_> = AssignmentEqual.mutate(&node).collect();
        assert!(matches!(results[0], Err(MutatorError::Shape(_))));
    }

    // =========================================================================
    // EqualitySwap
    // =========================================================================

    #[test]
    fn test_equality_swap_both_directions() {
        let eq = equals(Node::var("$a"), Node::int(1));
        assert_eq!(printed(&EqualitySwap::equal(), &eq), vec!["$a != 1"]);

        let ne = Node::binary(BinaryOperator::NotEqual, Node::var("$a"), Node::int(1));
        assert_eq!(printed(&EqualitySwap::not_equal(), &ne), vec!["$a == 1"]);
        assert!(!EqualitySwap::equal().can_mutate(&ne));
    }
}
