//! Renders nodes back to source text.
//!
//! Used to turn a mutant's replacement subtree into the text spliced into the
//! patched artifact, and to reprint whole trees that carry no spans.

use super::{Node, NodeKind, ShapeError};
use serde::{Deserialize, Serialize};

/// Surface syntax choices for the printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintStyle {
    /// Token between a receiver and a member (`->` or `.`)
    #[serde(default = "default_member_access")]
    pub member_access: String,

    /// Token between a class name and a static member
    #[serde(default = "default_static_access")]
    pub static_access: String,

    /// One level of indentation inside blocks
    #[serde(default = "default_indent")]
    pub indent: String,
}

fn default_member_access() -> String {
    "->".to_string()
}

fn default_static_access() -> String {
    "::".to_string()
}

fn default_indent() -> String {
    "    ".to_string()
}

impl Default for PrintStyle {
    fn default() -> Self {
        Self {
            member_access: default_member_access(),
            static_access: default_static_access(),
            indent: default_indent(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Printer {
    style: PrintStyle,
}

impl Printer {
    pub fn new(style: PrintStyle) -> Self {
        Self { style }
    }

    /// Print a tree that holds no `other` nodes.
    pub fn print(&self, node: &Node) -> Result<String, ShapeError> {
        let mut out = String::new();
        self.write_node(node, 0, None, &mut out)?;
        Ok(out)
    }

    /// Print a tree whose spans point into `source`. Nodes without a
    /// dedicated kind are copied from there verbatim.
    pub fn print_with_source(&self, node: &Node, source: &str) -> Result<String, ShapeError> {
        let mut out = String::new();
        self.write_node(node, 0, Some(source), &mut out)?;
        Ok(out)
    }

    fn write_node(
        &self,
        node: &Node,
        depth: usize,
        source: Option<&str>,
        out: &mut String,
    ) -> Result<(), ShapeError> {
        node.check_shape()?;
        match &node.kind {
            NodeKind::Module => {
                for (i, stmt) in node.children.iter().enumerate() {
                    if i > 0 {
                        out.push('\n');
                    }
                    self.write_node(stmt, depth, source, out)?;
                }
            }
            NodeKind::Class { name } => {
                out.push_str(&format!("class {} ", name));
                self.write_body(&node.children, depth, source, out)?;
            }
            NodeKind::Method { name } => {
                out.push_str(&format!("public function {}() ", name));
                self.write_body(&node.children, depth, source, out)?;
            }
            NodeKind::Block => self.write_body(&node.children, depth, source, out)?,
            NodeKind::If => {
                out.push_str("if (");
                self.write_node(node.child(0)?, depth, source, out)?;
                out.push_str(") ");
                self.write_node(node.child(1)?, depth, source, out)?;
                if let Some(else_block) = node.children.get(2) {
                    out.push_str(" else ");
                    self.write_node(else_block, depth, source, out)?;
                }
            }
            NodeKind::ExpressionStmt => {
                self.write_node(node.child(0)?, depth, source, out)?;
                out.push(';');
            }
            NodeKind::Return => {
                out.push_str("return");
                if let Some(value) = node.children.first() {
                    out.push(' ');
                    self.write_node(value, depth, source, out)?;
                }
                out.push(';');
            }
            NodeKind::MethodCall { name } => {
                self.write_node(node.receiver()?, depth, source, out)?;
                out.push_str(&self.style.member_access);
                out.push_str(name);
                self.write_args(node.call_args(), depth, source, out)?;
            }
            NodeKind::FunctionCall { name } => {
                out.push_str(name);
                self.write_args(node.call_args(), depth, source, out)?;
            }
            NodeKind::StaticCall { class, name } => {
                out.push_str(class);
                out.push_str(&self.style.static_access);
                out.push_str(name);
                self.write_args(node.call_args(), depth, source, out)?;
            }
            NodeKind::PropertyFetch { name } => {
                self.write_node(node.receiver()?, depth, source, out)?;
                out.push_str(&self.style.member_access);
                out.push_str(name);
            }
            NodeKind::StaticPropertyFetch { class, name }
            | NodeKind::ClassConstFetch { class, name } => {
                out.push_str(class);
                out.push_str(&self.style.static_access);
                out.push_str(name);
            }
            NodeKind::ArrayAccess => {
                self.write_node(node.child(0)?, depth, source, out)?;
                out.push('[');
                self.write_node(node.child(1)?, depth, source, out)?;
                out.push(']');
            }
            NodeKind::Variable { name } | NodeKind::ConstFetch { name } => out.push_str(name),
            NodeKind::BinaryOp { op } => {
                self.write_operand(node.child(0)?, depth, source, out)?;
                out.push_str(&format!(" {} ", op.symbol()));
                self.write_operand(node.child(1)?, depth, source, out)?;
            }
            NodeKind::Assign => {
                self.write_node(node.child(0)?, depth, source, out)?;
                out.push_str(" = ");
                self.write_node(node.child(1)?, depth, source, out)?;
            }
            NodeKind::CompoundAssign { op } => {
                self.write_node(node.child(0)?, depth, source, out)?;
                out.push_str(&format!(" {}= ", op.symbol()));
                self.write_node(node.child(1)?, depth, source, out)?;
            }
            NodeKind::UnaryMinus => {
                out.push('-');
                self.write_operand(node.child(0)?, depth, source, out)?;
            }
            NodeKind::Int { value } => out.push_str(&value.to_string()),
            NodeKind::Float { value } => out.push_str(&format!("{:?}", value)),
            NodeKind::Str { value } => {
                out.push('"');
                for c in value.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        // no interpolation in the printed literal
                        '$' => out.push_str("\\$"),
                        '\n' => out.push_str("\\n"),
                        _ => out.push(c),
                    }
                }
                out.push('"');
            }
            NodeKind::Bool { value } => out.push_str(if *value { "true" } else { "false" }),
            NodeKind::Null => out.push_str("null"),
            NodeKind::Other => {
                let text = node
                    .span
                    .zip(source)
                    .and_then(|(span, source)| source.get(span.start..span.end))
                    .ok_or(ShapeError::Unprintable {
                        kind: node.kind.label(),
                    })?;
                out.push_str(text);
            }
        }
        Ok(())
    }

    /// Operands that are themselves operator expressions get parentheses.
    fn write_operand(
        &self,
        node: &Node,
        depth: usize,
        source: Option<&str>,
        out: &mut String,
    ) -> Result<(), ShapeError> {
        let needs_parens = matches!(
            node.kind,
            NodeKind::BinaryOp { .. } | NodeKind::Assign | NodeKind::CompoundAssign { .. }
        );
        if needs_parens {
            out.push('(');
        }
        self.write_node(node, depth, source, out)?;
        if needs_parens {
            out.push(')');
        }
        Ok(())
    }

    fn write_args(
        &self,
        args: &[Node],
        depth: usize,
        source: Option<&str>,
        out: &mut String,
    ) -> Result<(), ShapeError> {
        out.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.write_node(arg, depth, source, out)?;
        }
        out.push(')');
        Ok(())
    }

    fn write_body(
        &self,
        statements: &[Node],
        depth: usize,
        source: Option<&str>,
        out: &mut String,
    ) -> Result<(), ShapeError> {
        if statements.is_empty() {
            out.push_str("{}");
            return Ok(());
        }
        out.push_str("{\n");
        for stmt in statements {
            out.push_str(&self.style.indent.repeat(depth + 1));
            self.write_node(stmt, depth + 1, source, out)?;
            out.push('\n');
        }
        out.push_str(&self.style.indent.repeat(depth));
        out.push('}');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, Span};

    #[test]
    fn test_print_if_with_empty_block() {
        let node = Node::if_stmt(
            Node::binary(BinaryOperator::Equal, Node::var("$a"), Node::var("$b")),
            Node::block(vec![]),
        );
        assert_eq!(Printer::default().print(&node).unwrap(), "if ($a == $b) {}");
    }

    #[test]
    fn test_print_assignment_of_product() {
        let node = Node::expr_stmt(Node::assign(
            Node::var("$a"),
            Node::binary(BinaryOperator::Mul, Node::int(10), Node::int(3)),
        ));
        assert_eq!(Printer::default().print(&node).unwrap(), "$a = 10 * 3;");
    }

    #[test]
    fn test_print_nested_operators_get_parens() {
        let node = Node::binary(
            BinaryOperator::Mul,
            Node::binary(BinaryOperator::Plus, Node::var("$a"), Node::int(1)),
            Node::unary_minus(Node::float(1.0)),
        );
        assert_eq!(Printer::default().print(&node).unwrap(), "($a + 1) * -1.0");
    }

    #[test]
    fn test_print_chain_with_dot_style() {
        let printer = Printer::new(PrintStyle {
            member_access: ".".to_string(),
            ..PrintStyle::default()
        });
        let node = Node::method_call(
            Node::method_call(Node::var("qb"), "where", vec![Node::string(":id = 1")]),
            "setParameter",
            vec![Node::string("id"), Node::int(1)],
        );
        assert_eq!(
            printer.print(&node).unwrap(),
            r#"qb.where(":id = 1").setParameter("id", 1)"#
        );
    }

    #[test]
    fn test_print_class_body_indents() {
        let node = Node::class(
            "Foo",
            vec![Node::method(
                "bar",
                vec![Node::expr_stmt(Node::function_call("baz", vec![]))],
            )],
        );
        assert_eq!(
            Printer::default().print(&node).unwrap(),
            "class Foo {\n    public function bar() {\n        baz();\n    }\n}"
        );
    }

    #[test]
    fn test_print_escapes_strings() {
        let node = Node::string("say \"hi\"");
        assert_eq!(Printer::default().print(&node).unwrap(), r#""say \"hi\"""#);
    }

    #[test]
    fn test_print_escapes_interpolation() {
        let node = Node::string("name = $name or {$other}");
        assert_eq!(
            Printer::default().print(&node).unwrap(),
            r#""name = \$name or {\$other}""#
        );
    }

    #[test]
    fn test_print_other_from_source() {
        let source = "$qb->where(fn($x) => $x)->getQuery()";
        let closure = Node::leaf(NodeKind::Other).with_span(Span {
            start: 11,
            end: 23,
            start_line: 1,
            end_line: 1,
        });
        let node = Node::method_call(Node::var("$qb"), "where", vec![closure]);

        assert_eq!(
            Printer::default().print_with_source(&node, source).unwrap(),
            "$qb->where(fn($x) => $x)"
        );
        assert_eq!(
            Printer::default().print(&node).unwrap_err(),
            ShapeError::Unprintable { kind: "other" }
        );
    }

    #[test]
    fn test_print_malformed_node_errors() {
        let node = Node::new(NodeKind::Assign, vec![Node::var("$a")]);
        assert!(Printer::default().print(&node).is_err());
    }
}
