//! AST construction helpers
//!
//! Free functions and a small query builder so that embedders and tests
//! can assemble parsed statements without a parser.

use super::{
    NodePattern, ParsedExpression, ParsedQuery, PatternChain, ProjectionItem, RecursiveKind,
    RelPattern, UpdateClause,
};
use crate::types::{ExtendDirection, LogicalType};
use crate::value::Value;

pub fn lit(v: Value) -> ParsedExpression {
    ParsedExpression::Literal(v)
}

pub fn lit_i64(v: i64) -> ParsedExpression {
    ParsedExpression::Literal(Value::Int64(v))
}

pub fn lit_str(s: impl Into<String>) -> ParsedExpression {
    ParsedExpression::Literal(Value::String(s.into()))
}

pub fn param(name: impl Into<String>) -> ParsedExpression {
    ParsedExpression::Parameter(name.into())
}

pub fn var(name: impl Into<String>) -> ParsedExpression {
    ParsedExpression::Variable(name.into())
}

pub fn prop(variable: impl Into<String>, property: impl Into<String>) -> ParsedExpression {
    ParsedExpression::Property(variable.into(), property.into())
}

pub fn fcall(
    name: impl Into<String>,
    args: impl IntoIterator<Item = ParsedExpression>,
) -> ParsedExpression {
    ParsedExpression::FunctionCall {
        name: name.into(),
        args: args.into_iter().collect(),
        distinct: false,
    }
}

pub fn cast(expr: ParsedExpression, target: LogicalType) -> ParsedExpression {
    ParsedExpression::Cast {
        expr: Box::new(expr),
        target,
    }
}

pub fn count_star() -> ParsedExpression {
    fcall("count", [ParsedExpression::Star])
}

pub fn eq(a: ParsedExpression, b: ParsedExpression) -> ParsedExpression {
    fcall("=", [a, b])
}

pub fn gt(a: ParsedExpression, b: ParsedExpression) -> ParsedExpression {
    fcall(">", [a, b])
}

pub fn lt(a: ParsedExpression, b: ParsedExpression) -> ParsedExpression {
    fcall("<", [a, b])
}

pub fn and(a: ParsedExpression, b: ParsedExpression) -> ParsedExpression {
    fcall("AND", [a, b])
}

pub fn add(a: ParsedExpression, b: ParsedExpression) -> ParsedExpression {
    fcall("+", [a, b])
}

/// `(variable:label)`
pub fn node(variable: impl Into<String>, label: impl Into<String>) -> NodePattern {
    NodePattern {
        variable: variable.into(),
        label: Some(label.into()),
    }
}

/// `(variable)` with the label left for the binder to infer
pub fn node_any(variable: impl Into<String>) -> NodePattern {
    NodePattern {
        variable: variable.into(),
        label: None,
    }
}

/// `-[:label]->`
pub fn rel_to(label: impl Into<String>) -> RelPattern {
    RelPattern {
        variable: None,
        label: Some(label.into()),
        direction: ExtendDirection::Forward,
        recursive: None,
    }
}

/// `<-[:label]-`
pub fn rel_from(label: impl Into<String>) -> RelPattern {
    RelPattern {
        variable: None,
        label: Some(label.into()),
        direction: ExtendDirection::Backward,
        recursive: None,
    }
}

/// `-[:label*lower..upper]->`
pub fn rel_var_len(label: impl Into<String>, lower: u64, upper: u64) -> RelPattern {
    RelPattern {
        variable: None,
        label: Some(label.into()),
        direction: ExtendDirection::Forward,
        recursive: Some((RecursiveKind::VariableLength, lower, upper)),
    }
}

/// `-[:label* SHORTEST lower..upper]->`
pub fn rel_shortest(label: impl Into<String>, lower: u64, upper: u64) -> RelPattern {
    RelPattern {
        variable: None,
        label: Some(label.into()),
        direction: ExtendDirection::Forward,
        recursive: Some((RecursiveKind::Shortest, lower, upper)),
    }
}

/// Start a query from a single-node pattern
pub fn match_(start: NodePattern) -> QueryBuilder {
    QueryBuilder {
        query: ParsedQuery {
            patterns: vec![PatternChain {
                start,
                hops: Vec::new(),
            }],
            ..ParsedQuery::default()
        },
    }
}

/// Start a query with no pattern (e.g. `RETURN 1 + 1` or `UNWIND`)
pub fn query() -> QueryBuilder {
    QueryBuilder {
        query: ParsedQuery::default(),
    }
}

/// Fluent construction of a [`ParsedQuery`]
pub struct QueryBuilder {
    query: ParsedQuery,
}

impl QueryBuilder {
    /// Append a hop to the last pattern chain
    pub fn hop(mut self, rel: RelPattern, to: NodePattern) -> Self {
        if let Some(chain) = self.query.patterns.last_mut() {
            chain.hops.push((rel, to));
        }
        self
    }

    /// Add an additional disconnected pattern chain
    pub fn also_match(mut self, start: NodePattern) -> Self {
        self.query.patterns.push(PatternChain {
            start,
            hops: Vec::new(),
        });
        self
    }

    pub fn where_(mut self, predicate: ParsedExpression) -> Self {
        self.query.where_clause = Some(predicate);
        self
    }

    pub fn unwind(mut self, list: ParsedExpression, alias: impl Into<String>) -> Self {
        self.query.unwind = Some((list, alias.into()));
        self
    }

    pub fn ret(mut self, exprs: impl IntoIterator<Item = ParsedExpression>) -> Self {
        self.query.projections = exprs
            .into_iter()
            .map(|expr| ProjectionItem { expr, alias: None })
            .collect();
        self
    }

    pub fn ret_as(
        mut self,
        items: impl IntoIterator<Item = (ParsedExpression, &'static str)>,
    ) -> Self {
        self.query.projections = items
            .into_iter()
            .map(|(expr, alias)| ProjectionItem {
                expr,
                alias: Some(alias.to_string()),
            })
            .collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    pub fn order_by(mut self, expr: ParsedExpression, ascending: bool) -> Self {
        self.query.order_by.push((expr, ascending));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.query.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.query.limit = Some(n);
        self
    }

    pub fn create_node(
        mut self,
        variable: impl Into<String>,
        label: impl Into<String>,
        properties: Vec<(String, ParsedExpression)>,
    ) -> Self {
        self.query.updates.push(UpdateClause::CreateNode {
            variable: variable.into(),
            label: label.into(),
            properties,
        });
        self
    }

    pub fn delete(mut self, variable: impl Into<String>) -> Self {
        self.query.updates.push(UpdateClause::Delete {
            variable: variable.into(),
        });
        self
    }

    pub fn set(
        mut self,
        variable: impl Into<String>,
        property: impl Into<String>,
        value: ParsedExpression,
    ) -> Self {
        self.query.updates.push(UpdateClause::Set {
            variable: variable.into(),
            property: property.into(),
            value,
        });
        self
    }

    pub fn build(self) -> ParsedQuery {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_hop_chain() {
        let q = match_(node("a", "person"))
            .hop(rel_to("knows"), node_any("b"))
            .hop(rel_to("knows"), node_any("c"))
            .ret([prop("a", "fName"), prop("c", "fName")])
            .build();
        assert_eq!(q.patterns[0].hops.len(), 2);
        assert_eq!(q.projections.len(), 2);
    }

    #[test]
    fn test_modifiers() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "ID")])
            .order_by(prop("p", "ID"), true)
            .skip(3)
            .limit(4)
            .build();
        assert_eq!(q.order_by.len(), 1);
        assert_eq!(q.skip, Some(3));
        assert_eq!(q.limit, Some(4));
    }

    #[test]
    fn test_count_star_shape() {
        match count_star() {
            ParsedExpression::FunctionCall { name, args, .. } => {
                assert_eq!(name, "count");
                assert_eq!(args, vec![ParsedExpression::Star]);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }
}
