//! Reprints syntax trees as canonical query text.
//!
//! Keywords come out upper-case, literals verbatim as they appeared in the
//! source. Operands of synthetic trees are parenthesised where operator
//! precedence would otherwise change their meaning, so printing and parsing
//! a printed tree again yields the same tree.

use crate::ast::{Node, NodeKind};
use std::fmt::{self, Display, Formatter, Write};

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_node(f, self)
    }
}

fn precedence(kind: &NodeKind) -> u8 {
    match kind {
        NodeKind::Or => 1,
        NodeKind::And => 2,
        NodeKind::Not => 3,
        k if k.is_condition() => 4,
        NodeKind::Add | NodeKind::Subtract => 5,
        NodeKind::Multiply | NodeKind::Divide => 6,
        NodeKind::Negative => 7,
        _ => 8,
    }
}

/// Write `node`, parenthesised when it binds looser than `min`.
fn write_operand(f: &mut Formatter<'_>, node: &Node, min: u8) -> fmt::Result {
    if precedence(&node.kind) < min {
        f.write_char('(')?;
        write_node(f, node)?;
        f.write_char(')')
    } else {
        write_node(f, node)
    }
}

fn write_list(f: &mut Formatter<'_>, nodes: &[Node], separator: &str) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write_node(f, node)?;
    }
    Ok(())
}

fn write_call(f: &mut Formatter<'_>, name: &str, args: &[Node]) -> fmt::Result {
    write!(f, "{}(", name)?;
    write_list(f, args, ", ")?;
    f.write_char(')')
}

fn write_binary(f: &mut Formatter<'_>, node: &Node, operator: &str) -> fmt::Result {
    let own = precedence(&node.kind);
    let [left, right] = node.children.as_slice() else {
        return write_list(f, &node.children, operator);
    };
    write_operand(f, left, own)?;
    f.write_str(operator)?;
    write_operand(f, right, own + 1)
}

fn write_nary(f: &mut Formatter<'_>, node: &Node, operator: &str) -> fmt::Result {
    let own = precedence(&node.kind);
    for (i, operand) in node.children.iter().enumerate() {
        if i > 0 {
            f.write_str(operator)?;
        }
        write_operand(f, operand, own)?;
    }
    Ok(())
}

fn write_node(f: &mut Formatter<'_>, node: &Node) -> fmt::Result {
    let children = &node.children;
    match &node.kind {
        NodeKind::SelectStatement
        | NodeKind::UpdateStatement
        | NodeKind::DeleteStatement
        | NodeKind::FromItem => write_list(f, children, " "),
        NodeKind::AccessRule { kinds } => {
            f.write_str("GRANT ")?;
            for kind in kinds {
                write!(f, "{} ", kind)?;
            }
            f.write_str("ACCESS TO ")?;
            write_list(f, children, " ")
        }
        NodeKind::Subselect => {
            f.write_char('(')?;
            write_list(f, children, " ")?;
            f.write_char(')')
        }

        NodeKind::SelectClause { distinct } => {
            f.write_str(if *distinct { "SELECT DISTINCT " } else { "SELECT " })?;
            write_list(f, children, ", ")
        }
        NodeKind::FromClause => {
            f.write_str("FROM ")?;
            write_list(f, children, ", ")
        }
        NodeKind::InnerJoin { fetch } | NodeKind::OuterJoin { fetch } => {
            f.write_str(match node.kind {
                NodeKind::OuterJoin { .. } => "LEFT OUTER JOIN ",
                _ => "INNER JOIN ",
            })?;
            if *fetch {
                f.write_str("FETCH ")?;
            }
            write_list(f, children, " ")
        }
        NodeKind::WhereClause => {
            f.write_str("WHERE ")?;
            write_list(f, children, " ")
        }
        NodeKind::GroupByClause => {
            f.write_str("GROUP BY ")?;
            write_list(f, children, ", ")
        }
        NodeKind::HavingClause => {
            f.write_str("HAVING ")?;
            write_list(f, children, " ")
        }
        NodeKind::OrderByClause => {
            f.write_str("ORDER BY ")?;
            write_list(f, children, ", ")
        }
        NodeKind::OrderByItem { descending } => {
            write_list(f, children, " ")?;
            if *descending {
                f.write_str(" DESC")?;
            }
            Ok(())
        }
        NodeKind::UpdateClause => {
            f.write_str("UPDATE ")?;
            write_list(f, children, " ")
        }
        NodeKind::DeleteClause => {
            f.write_str("DELETE FROM ")?;
            write_list(f, children, " ")
        }
        NodeKind::SetClause => {
            f.write_str("SET ")?;
            write_list(f, children, ", ")
        }
        NodeKind::Assignment => write_list(f, children, " = "),

        NodeKind::Constructor(type_name) => {
            f.write_str("NEW ")?;
            write_call(f, type_name, children)
        }
        NodeKind::Aggregate { function, distinct } => {
            write!(f, "{}(", function.as_str())?;
            if *distinct {
                f.write_str("DISTINCT ")?;
            }
            write_list(f, children, ", ")?;
            f.write_char(')')
        }

        NodeKind::Or => write_nary(f, node, " OR "),
        NodeKind::And => write_nary(f, node, " AND "),
        NodeKind::Not => write_not(f, node),
        NodeKind::Brackets => {
            f.write_char('(')?;
            write_list(f, children, " ")?;
            f.write_char(')')
        }

        NodeKind::Equals => write_binary(f, node, " = "),
        NodeKind::NotEquals => write_binary(f, node, " <> "),
        NodeKind::LessThan => write_binary(f, node, " < "),
        NodeKind::LessOrEqual => write_binary(f, node, " <= "),
        NodeKind::GreaterThan => write_binary(f, node, " > "),
        NodeKind::GreaterOrEqual => write_binary(f, node, " >= "),
        NodeKind::Between
        | NodeKind::In
        | NodeKind::Like
        | NodeKind::IsNull
        | NodeKind::IsEmpty
        | NodeKind::MemberOf => write_predicate(f, node, false),
        NodeKind::Exists => {
            f.write_str("EXISTS ")?;
            write_list(f, children, " ")
        }

        NodeKind::Add => write_binary(f, node, " + "),
        NodeKind::Subtract => write_binary(f, node, " - "),
        NodeKind::Multiply => write_binary(f, node, " * "),
        NodeKind::Divide => write_binary(f, node, " / "),
        NodeKind::Negative => {
            f.write_char('-')?;
            match children.first() {
                Some(operand) => write_operand(f, operand, precedence(&node.kind)),
                None => Ok(()),
            }
        }
        NodeKind::Mod => write_call(f, "MOD", children),
        NodeKind::Abs => write_call(f, "ABS", children),
        NodeKind::Sqrt => write_call(f, "SQRT", children),
        NodeKind::Size => write_call(f, "SIZE", children),

        NodeKind::Concat => write_call(f, "CONCAT", children),
        NodeKind::Substring => write_call(f, "SUBSTRING", children),
        NodeKind::Trim { spec } => {
            f.write_str("TRIM(")?;
            if let Some(spec) = spec {
                write!(f, "{} ", spec.as_str())?;
            }
            if let [character, _] = children.as_slice() {
                write_node(f, character)?;
                f.write_char(' ')?;
            }
            if spec.is_some() || children.len() == 2 {
                f.write_str("FROM ")?;
            }
            if let Some(text) = children.last() {
                write_node(f, text)?;
            }
            f.write_char(')')
        }
        NodeKind::Upper => write_call(f, "UPPER", children),
        NodeKind::Lower => write_call(f, "LOWER", children),
        NodeKind::Length => write_call(f, "LENGTH", children),
        NodeKind::Locate => write_call(f, "LOCATE", children),

        NodeKind::CurrentDate => f.write_str("CURRENT_DATE"),
        NodeKind::CurrentTime => f.write_str("CURRENT_TIME"),
        NodeKind::CurrentTimestamp => f.write_str("CURRENT_TIMESTAMP"),
        NodeKind::CurrentPrincipal => f.write_str("CURRENT_PRINCIPAL"),
        NodeKind::CurrentRoles => f.write_str("CURRENT_ROLES"),
        NodeKind::CurrentTenant => f.write_str("CURRENT_TENANT"),

        NodeKind::AbstractSchemaName(name)
        | NodeKind::Identifier(name)
        | NodeKind::PathSegment(name) => f.write_str(name),
        NodeKind::Path => write_list(f, children, "."),
        NodeKind::NamedParameter(name) => write!(f, ":{}", name),
        NodeKind::PositionalParameter(index) => write!(f, "?{}", index),
        NodeKind::StringLiteral(raw)
        | NodeKind::IntegerLiteral(raw)
        | NodeKind::DecimalLiteral(raw) => f.write_str(raw),
        NodeKind::BooleanLiteral(value) => f.write_str(if *value { "TRUE" } else { "FALSE" }),
        NodeKind::Null => f.write_str("NULL"),
    }
}

/// `NOT x`, folded into the predicate where JPQL has a negated form.
fn write_not(f: &mut Formatter<'_>, node: &Node) -> fmt::Result {
    let Some(operand) = node.children.first() else {
        return f.write_str("NOT");
    };
    match operand.kind {
        NodeKind::Between
        | NodeKind::In
        | NodeKind::Like
        | NodeKind::IsNull
        | NodeKind::IsEmpty
        | NodeKind::MemberOf => write_predicate(f, operand, true),
        _ => {
            f.write_str("NOT ")?;
            write_operand(f, operand, precedence(&node.kind))
        }
    }
}

fn write_predicate(f: &mut Formatter<'_>, node: &Node, negated: bool) -> fmt::Result {
    let own = precedence(&node.kind) + 1;
    let children = &node.children;
    let Some(value) = children.first() else {
        return Ok(());
    };
    write_operand(f, value, own)?;
    let not = if negated { "NOT " } else { "" };

    match node.kind {
        NodeKind::Between => {
            write!(f, " {}BETWEEN ", not)?;
            if let [_, lower, upper] = children.as_slice() {
                write_operand(f, lower, own)?;
                f.write_str(" AND ")?;
                write_operand(f, upper, own)?;
            }
            Ok(())
        }
        NodeKind::In => {
            write!(f, " {}IN ", not)?;
            match &children[1..] {
                [subselect] if subselect.kind == NodeKind::Subselect => write_node(f, subselect),
                items => {
                    f.write_char('(')?;
                    write_list(f, items, ", ")?;
                    f.write_char(')')
                }
            }
        }
        NodeKind::Like => {
            write!(f, " {}LIKE ", not)?;
            if let Some(pattern) = children.get(1) {
                write_operand(f, pattern, own)?;
            }
            if let Some(escape) = children.get(2) {
                f.write_str(" ESCAPE ")?;
                write_node(f, escape)?;
            }
            Ok(())
        }
        NodeKind::IsNull => write!(f, " IS {}NULL", not),
        NodeKind::IsEmpty => write!(f, " IS {}EMPTY", not),
        NodeKind::MemberOf => {
            write!(f, " {}MEMBER OF ", not)?;
            match children.get(1) {
                Some(collection) => write_node(f, collection),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}
