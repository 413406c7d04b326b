//! # Bound Expression IR
//!
//! Expressions after binding: every node carries its resolved logical
//! type and a unique name. The unique name is the key used by the
//! factorized schema to place expressions into groups and by the mapper
//! to recover vector positions.

use crate::types::{ExtendDirection, LogicalType, TableId};
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;

/// One hop of an `EXISTS { ... }` pattern, pre-resolved against the
/// catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsHop {
    pub rel_table: TableId,
    pub direction: ExtendDirection,
    /// Restrict the hop target to this node table
    pub dst_table: Option<TableId>,
}

/// A bound expression tree node
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub ty: LogicalType,
    /// Unique within one bound statement
    pub name: String,
}

/// Expression kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Literal(Value),
    /// `$name`; the value is supplied per execution
    Parameter { name: String },
    /// A node pattern variable; its vector holds internal ids
    NodeVariable { table_id: TableId },
    /// A rel pattern variable; its vector holds internal ids
    RelVariable { table_id: TableId },
    /// An alias introduced by UNWIND or a projection
    Alias { child: Box<Expression> },
    /// `variable.property` resolved to a table column
    Property {
        variable: String,
        table_id: TableId,
        property_idx: usize,
        is_primary_key: bool,
    },
    ScalarFunction {
        function: String,
        args: Vec<Expression>,
    },
    Aggregate {
        function: String,
        distinct: bool,
        child: Option<Box<Expression>>,
    },
    Case {
        branches: Vec<(Expression, Expression)>,
        else_expr: Option<Box<Expression>>,
    },
    Cast { child: Box<Expression> },
    /// `EXISTS { (var)-[...]->() }` over the bound variable
    ExistsSubquery {
        start_variable: String,
        hops: Vec<ExistsHop>,
    },
}

impl Expression {
    pub fn new(kind: ExpressionKind, ty: LogicalType, name: impl Into<String>) -> Self {
        Expression {
            kind,
            ty,
            name: name.into(),
        }
    }

    pub fn literal(v: Value) -> Self {
        let ty = v.data_type();
        let name = v.to_string();
        Expression::new(ExpressionKind::Literal(v), ty, name)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, ExpressionKind::Aggregate { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExpressionKind::Literal(_))
    }

    /// Direct children, in argument order
    pub fn children(&self) -> Vec<&Expression> {
        match &self.kind {
            ExpressionKind::ScalarFunction { args, .. } => args.iter().collect(),
            ExpressionKind::Aggregate { child, .. } => {
                child.iter().map(AsRef::as_ref).collect()
            }
            ExpressionKind::Alias { child } | ExpressionKind::Cast { child } => {
                vec![child.as_ref()]
            }
            ExpressionKind::Case {
                branches,
                else_expr,
            } => {
                let mut out: Vec<&Expression> = Vec::new();
                for (when, then) in branches {
                    out.push(when);
                    out.push(then);
                }
                if let Some(e) = else_expr {
                    out.push(e);
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Whether any node of this tree is an aggregate application
    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Names of the pattern variables this expression reads: the variable
    /// itself for node/rel bindings, the owning variable for properties,
    /// and the start variable of an exists pattern.
    pub fn dependent_variables(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_dependent_variables(&mut out);
        out
    }

    fn collect_dependent_variables(&self, out: &mut HashSet<String>) {
        match &self.kind {
            ExpressionKind::NodeVariable { .. } | ExpressionKind::RelVariable { .. } => {
                out.insert(self.name.clone());
            }
            ExpressionKind::Alias { child } => {
                // An alias is its own binding once projected; before that
                // it reads through to its child.
                out.insert(self.name.clone());
                child.collect_dependent_variables(out);
            }
            ExpressionKind::Property { variable, .. } => {
                out.insert(variable.clone());
            }
            ExpressionKind::ExistsSubquery { start_variable, .. } => {
                out.insert(start_variable.clone());
            }
            _ => {
                for child in self.children() {
                    child.collect_dependent_variables(out);
                }
            }
        }
    }

    /// Names of all subexpressions, including this one
    pub fn subexpression_names(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut HashSet<String>) {
        out.insert(self.name.clone());
        for child in self.children() {
            child.collect_names(out);
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_var(name: &str, table: TableId) -> Expression {
        Expression::new(
            ExpressionKind::NodeVariable { table_id: table },
            LogicalType::Node(table),
            name,
        )
    }

    fn property(variable: &str, prop: &str, idx: usize) -> Expression {
        Expression::new(
            ExpressionKind::Property {
                variable: variable.to_string(),
                table_id: 0,
                property_idx: idx,
                is_primary_key: idx == 0,
            },
            LogicalType::Int64,
            format!("{variable}.{prop}"),
        )
    }

    #[test]
    fn test_dependent_variables() {
        let a_id = property("a", "ID", 0);
        let b_id = property("b", "ID", 0);
        let cmp = Expression::new(
            ExpressionKind::ScalarFunction {
                function: "=".to_string(),
                args: vec![a_id, b_id],
            },
            LogicalType::Bool,
            "a.ID = b.ID",
        );
        let deps = cmp.dependent_variables();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains("a"));
        assert!(deps.contains("b"));
    }

    #[test]
    fn test_node_variable_depends_on_itself() {
        let v = node_var("a", 3);
        assert!(v.dependent_variables().contains("a"));
    }

    #[test]
    fn test_contains_aggregate() {
        let agg = Expression::new(
            ExpressionKind::Aggregate {
                function: "COUNT_STAR".to_string(),
                distinct: false,
                child: None,
            },
            LogicalType::Int64,
            "COUNT(*)",
        );
        let wrapped = Expression::new(
            ExpressionKind::ScalarFunction {
                function: "+".to_string(),
                args: vec![agg, Expression::literal(Value::Int64(1))],
            },
            LogicalType::Int64,
            "COUNT(*) + 1",
        );
        assert!(wrapped.contains_aggregate());
        assert!(!Expression::literal(Value::Int64(1)).contains_aggregate());
    }

    #[test]
    fn test_subexpression_names() {
        let e = Expression::new(
            ExpressionKind::ScalarFunction {
                function: "+".to_string(),
                args: vec![
                    Expression::literal(Value::Int64(1)),
                    Expression::literal(Value::Int64(2)),
                ],
            },
            LogicalType::Int64,
            "1 + 2",
        );
        let names = e.subexpression_names();
        assert!(names.contains("1 + 2"));
        assert!(names.contains("1"));
        assert!(names.contains("2"));
    }
}
