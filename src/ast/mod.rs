//! # Parsed Statement AST
//!
//! The input surface of the engine. The text parser lives outside this
//! crate; embedders (and this crate's tests) construct these types
//! directly or through the helpers in [`builders`].
//!
//! Everything here is unresolved: names are strings, types are unknown,
//! and nothing has touched the catalog yet. The binder turns a
//! `ParsedStatement` into a bound statement or fails with a `Binder`
//! error.

pub mod builders;

use crate::types::{ExtendDirection, LogicalType};
use crate::value::Value;

/// An unresolved expression
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedExpression {
    Literal(Value),
    /// `$name`, bound to a value at execute time
    Parameter(String),
    Variable(String),
    /// `variable.property`
    Property(String, String),
    /// Scalar or aggregate function application; resolution decides which
    FunctionCall {
        name: String,
        args: Vec<ParsedExpression>,
        distinct: bool,
    },
    Case {
        branches: Vec<(ParsedExpression, ParsedExpression)>,
        else_expr: Option<Box<ParsedExpression>>,
    },
    Cast {
        expr: Box<ParsedExpression>,
        target: LogicalType,
    },
    /// `EXISTS { MATCH ... }`
    Exists(Box<ParsedQuery>),
    /// `*` inside `count(*)`
    Star,
}

/// `(variable:label)`
#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: String,
    pub label: Option<String>,
}

/// How a variable-length relationship is traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursiveKind {
    /// `*lower..upper`
    VariableLength,
    /// `*SHORTEST lower..upper`
    Shortest,
    /// `*ALL SHORTEST lower..upper`
    AllShortest,
}

/// `-[variable:label]->` or `<-[...]-`, possibly variable-length
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub variable: Option<String>,
    pub label: Option<String>,
    pub direction: ExtendDirection,
    /// `(kind, lower, upper)` for variable-length patterns
    pub recursive: Option<(RecursiveKind, u64, u64)>,
}

/// One linear `MATCH` chain: a start node and a sequence of hops
#[derive(Debug, Clone, PartialEq)]
pub struct PatternChain {
    pub start: NodePattern,
    pub hops: Vec<(RelPattern, NodePattern)>,
}

/// One `RETURN` item
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: ParsedExpression,
    pub alias: Option<String>,
}

/// Updating clauses of a query
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateClause {
    /// `CREATE (v:label {prop: expr, ...})`
    CreateNode {
        variable: String,
        label: String,
        properties: Vec<(String, ParsedExpression)>,
    },
    /// `DELETE v`
    Delete { variable: String },
    /// `SET v.prop = expr`
    Set {
        variable: String,
        property: String,
        value: ParsedExpression,
    },
}

/// A parsed query: MATCH patterns, WHERE, UNWIND, RETURN, modifiers and
/// updating clauses
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedQuery {
    pub patterns: Vec<PatternChain>,
    pub where_clause: Option<ParsedExpression>,
    /// `UNWIND expr AS alias`
    pub unwind: Option<(ParsedExpression, String)>,
    pub distinct: bool,
    pub projections: Vec<ProjectionItem>,
    /// `(expr, ascending)`
    pub order_by: Vec<(ParsedExpression, bool)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub updates: Vec<UpdateClause>,
}

/// File formats understood by the copy surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Parquet,
}

/// Options on `COPY ... FROM`
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOptions {
    /// First line of a CSV file is a header
    pub header: bool,
    pub delimiter: u8,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            header: true,
            delimiter: b',',
        }
    }
}

/// Schema-changing operations on an existing table
#[derive(Debug, Clone, PartialEq)]
pub enum AlterOp {
    AddProperty { name: String, ty: LogicalType },
    DropProperty { name: String },
    RenameProperty { old: String, new: String },
    RenameTable { new: String },
}

/// A parsed statement, the unit handed to `Database::query`
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStatement {
    Query(ParsedQuery),
    CreateNodeTable {
        name: String,
        properties: Vec<(String, LogicalType)>,
        primary_key: String,
    },
    CreateRelTable {
        name: String,
        src: String,
        dst: String,
        properties: Vec<(String, LogicalType)>,
    },
    DropTable {
        name: String,
    },
    Alter {
        table: String,
        op: AlterOp,
    },
    CreateSequence {
        name: String,
    },
    DropSequence {
        name: String,
    },
    CopyFrom {
        table: String,
        path: String,
        format: FileFormat,
        options: CopyOptions,
    },
    CopyTo {
        query: ParsedQuery,
        path: String,
        format: FileFormat,
    },
    Attach {
        path: String,
        alias: String,
    },
    Detach {
        name: String,
    },
    UseDatabase {
        name: String,
    },
    /// `CALL option=value` standing configuration
    StandingCall {
        option: String,
        value: Value,
    },
    /// `CALL fn(args) RETURN ...` over a table function
    TableCall {
        function: String,
        args: Vec<ParsedExpression>,
    },
}

impl ParsedStatement {
    /// Statements that can only ever read
    pub fn is_query(&self) -> bool {
        matches!(self, ParsedStatement::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;

    #[test]
    fn test_default_query_is_empty() {
        let q = ParsedQuery::default();
        assert!(q.patterns.is_empty());
        assert!(q.projections.is_empty());
        assert!(q.where_clause.is_none());
    }

    #[test]
    fn test_builder_round_trip() {
        let q = match_(node("p", "person"))
            .where_(gt(prop("p", "age"), lit_i64(21)))
            .ret([prop("p", "name")])
            .build();
        assert_eq!(q.patterns.len(), 1);
        assert_eq!(q.patterns[0].start.variable, "p");
        assert!(q.where_clause.is_some());
        assert_eq!(q.projections.len(), 1);
    }
}
