//! Logical operators
//!
//! A logical plan is a tree of `LogicalOperator`s, each a tagged kind
//! plus children and a computed factorized schema. Two schema views
//! exist: the factorized one used inside a pipeline, and the flat one
//! used where a pipeline breaker materializes. `groups_to_flatten`
//! reports which child groups an operator needs flat before it can run;
//! the planner turns those into explicit `Flatten` operators.

use super::schema::{flatten_all, flatten_all_but_one, GroupPos, Schema};
use crate::ast::RecursiveKind;
use crate::binder::{BoundCopyFrom, BoundDatabaseOp, BoundDdl, StandingOption};
use crate::expression::Expression;
use crate::types::{ExtendDirection, LogicalType, TableId};
use crate::value::Value;
use std::collections::BTreeSet;

/// Join semantics of a hash join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    /// Emit every probe tuple plus a boolean match flag
    Mark,
}

/// Canonical sideways-information-passing decision for a hash join.
///
/// `ProbeToBuild` masks the probe side's leaf scan with the build keys;
/// `ProhibitProbeToBuild` records that the optimizer declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidewaysInfoPassing {
    #[default]
    None,
    ProbeToBuild,
    ProhibitProbeToBuild,
}

/// Accumulate kinds; mark-joins express their flag as a mark column, not
/// a separate kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateType {
    Regular,
    /// Left-outer semantics: an empty input still yields one null tuple
    Optional,
}

/// Logical operator kinds
#[derive(Debug, Clone)]
pub enum LogicalOperatorKind {
    /// Emits one empty tuple; source for pattern-less queries
    DummyScan,
    /// Emits nothing; plans proven empty
    EmptyResult { expressions: Vec<Expression> },
    ScanNode {
        table: TableId,
        variable: Expression,
        properties: Vec<Expression>,
    },
    Extend {
        rel_table: TableId,
        direction: ExtendDirection,
        bound: Expression,
        nbr: Expression,
        rel_variable: Option<Expression>,
        /// Rel properties emitted alongside the neighbor ids
        properties: Vec<Expression>,
        /// Neighbor node properties, filled by property scan
        nbr_properties: Vec<Expression>,
    },
    RecursiveExtend {
        rel_table: TableId,
        direction: ExtendDirection,
        bound: Expression,
        nbr: Expression,
        kind: RecursiveKind,
        lower: u64,
        upper: u64,
        nbr_properties: Vec<Expression>,
    },
    Filter { predicate: Expression },
    Projection { expressions: Vec<Expression> },
    Flatten { group: GroupPos },
    Limit { skip: u64, limit: Option<u64> },
    OrderBy {
        keys: Vec<(Expression, bool)>,
        payloads: Vec<Expression>,
    },
    /// children: [probe, build]
    HashJoin {
        join_keys: Vec<(Expression, Expression)>,
        join_type: JoinType,
        mark: Option<Expression>,
        sip: SidewaysInfoPassing,
    },
    /// children: [probe, build]
    CrossProduct,
    Aggregate {
        keys: Vec<Expression>,
        aggregates: Vec<Expression>,
    },
    Distinct { keys: Vec<Expression> },
    Accumulate {
        accumulate_type: AccumulateType,
        mark: Option<Expression>,
    },
    Union,
    Unwind { list: Expression, alias: Expression },
    TableCall {
        function: String,
        args: Vec<Value>,
        columns: Vec<Expression>,
    },
    CreateNode {
        table: TableId,
        values: Vec<Expression>,
    },
    DeleteNode { variable: Expression },
    SetProperty {
        target: Expression,
        value: Expression,
    },
    CopyFrom(BoundCopyFrom),
    CopyTo {
        path: String,
        format: crate::ast::FileFormat,
    },
    Ddl(BoundDdl),
    DatabaseOp(BoundDatabaseOp),
    StandingCall(StandingOption),
    MultiplicityReducer,
}

/// A logical operator: kind + children + computed schema
#[derive(Debug, Clone)]
pub struct LogicalOperator {
    pub kind: LogicalOperatorKind,
    pub children: Vec<LogicalOperator>,
    pub schema: Schema,
}

impl LogicalOperator {
    pub fn new(kind: LogicalOperatorKind, children: Vec<LogicalOperator>) -> Self {
        LogicalOperator {
            kind,
            children,
            schema: Schema::new(),
        }
    }

    pub fn child(&self, i: usize) -> &LogicalOperator {
        &self.children[i]
    }

    /// Groups of the first child that must be flat before this operator
    /// can run. The planner inserts `Flatten`s for each.
    pub fn groups_to_flatten(&self) -> Vec<GroupPos> {
        let Some(child) = self.children.first() else {
            return Vec::new();
        };
        let schema = &child.schema;
        match &self.kind {
            LogicalOperatorKind::Filter { predicate } => {
                flatten_all_but_one(&schema.dependent_groups(predicate), schema)
            }
            LogicalOperatorKind::Projection { expressions } => {
                let mut out = BTreeSet::new();
                for expr in expressions {
                    out.extend(flatten_all_but_one(&schema.dependent_groups(expr), schema));
                }
                out.into_iter().collect()
            }
            LogicalOperatorKind::Limit { .. } => {
                flatten_all_but_one(&schema.groups_in_scope(), schema)
            }
            LogicalOperatorKind::OrderBy { .. } | LogicalOperatorKind::CopyTo { .. } => {
                flatten_all(&schema.groups_in_scope(), schema)
            }
            LogicalOperatorKind::Aggregate { keys, aggregates } => {
                let mut out = BTreeSet::new();
                for key in keys {
                    out.extend(flatten_all(&schema.dependent_groups(key), schema));
                }
                for agg in aggregates {
                    out.extend(flatten_all_but_one(&schema.dependent_groups(agg), schema));
                }
                out.into_iter().collect()
            }
            LogicalOperatorKind::Distinct { keys } => {
                let mut out = BTreeSet::new();
                for key in keys {
                    out.extend(flatten_all(&schema.dependent_groups(key), schema));
                }
                out.into_iter().collect()
            }
            LogicalOperatorKind::Unwind { list, .. } => {
                flatten_all(&schema.dependent_groups(list), schema)
            }
            LogicalOperatorKind::Extend { bound, .. } => {
                flatten_all(&schema.dependent_groups(bound), schema)
            }
            LogicalOperatorKind::RecursiveExtend { bound, .. } => {
                flatten_all(&schema.dependent_groups(bound), schema)
            }
            LogicalOperatorKind::HashJoin { join_keys, .. } => {
                let mut deps = BTreeSet::new();
                for (probe_key, _) in join_keys {
                    deps.extend(schema.dependent_groups(probe_key));
                }
                flatten_all(&deps, schema)
            }
            // Updates run once per logical tuple, so the whole stream
            // flattens in front of them.
            LogicalOperatorKind::CreateNode { .. }
            | LogicalOperatorKind::DeleteNode { .. }
            | LogicalOperatorKind::SetProperty { .. } => {
                flatten_all(&schema.groups_in_scope(), schema)
            }
            // The accumulate boundary reads rows, which tolerates one
            // unflat axis.
            LogicalOperatorKind::Accumulate { .. } => {
                flatten_all_but_one(&schema.groups_in_scope(), schema)
            }
            _ => Vec::new(),
        }
    }

    /// Compute this operator's schema from its children's, in the
    /// in-pipeline (factorized) view.
    pub fn compute_factorized_schema(&mut self) {
        match &self.kind {
            LogicalOperatorKind::DummyScan => {
                let mut schema = Schema::new();
                let g = schema.create_group();
                schema.set_group_as_single_state(g);
                self.schema = schema;
            }
            LogicalOperatorKind::EmptyResult { expressions } => {
                let mut schema = Schema::new();
                let g = schema.create_group();
                schema.set_group_as_single_state(g);
                for e in expressions.clone() {
                    schema.insert_to_group_and_scope(e, g);
                }
                self.schema = schema;
            }
            LogicalOperatorKind::ScanNode {
                variable,
                properties,
                ..
            } => {
                let variable = variable.clone();
                let properties = properties.clone();
                let mut schema = Schema::new();
                let g = schema.create_group();
                schema.insert_to_group_and_scope(variable, g);
                for p in properties {
                    schema.insert_to_group_and_scope(p, g);
                }
                self.schema = schema;
            }
            LogicalOperatorKind::Extend {
                nbr,
                rel_variable,
                properties,
                nbr_properties,
                ..
            } => {
                let nbr = nbr.clone();
                let rel_variable = rel_variable.clone();
                let properties = properties.clone();
                let nbr_properties = nbr_properties.clone();
                let mut schema = self.children[0].schema.clone();
                let g = schema.create_group();
                schema.insert_to_group_and_scope(nbr, g);
                if let Some(rv) = rel_variable {
                    schema.insert_to_group_and_scope(rv, g);
                }
                for p in properties {
                    schema.insert_to_group_and_scope(p, g);
                }
                for p in nbr_properties {
                    schema.insert_to_group_and_scope(p, g);
                }
                self.schema = schema;
            }
            LogicalOperatorKind::RecursiveExtend {
                nbr,
                nbr_properties,
                ..
            } => {
                let nbr = nbr.clone();
                let nbr_properties = nbr_properties.clone();
                let mut schema = self.children[0].schema.clone();
                let g = schema.create_group();
                schema.insert_to_group_and_scope(nbr, g);
                for p in nbr_properties {
                    schema.insert_to_group_and_scope(p, g);
                }
                self.schema = schema;
            }
            LogicalOperatorKind::Filter { .. }
            | LogicalOperatorKind::Limit { .. }
            | LogicalOperatorKind::MultiplicityReducer
            | LogicalOperatorKind::CreateNode { .. }
            | LogicalOperatorKind::DeleteNode { .. }
            | LogicalOperatorKind::SetProperty { .. } => {
                self.schema = self.children[0].schema.clone();
            }
            LogicalOperatorKind::Flatten { group } => {
                let group = *group;
                let mut schema = self.children[0].schema.clone();
                schema.flatten_group(group);
                self.schema = schema;
            }
            LogicalOperatorKind::Projection { expressions } => {
                let expressions = expressions.clone();
                let mut schema = self.children[0].schema.clone();
                for expr in &expressions {
                    if schema.group_pos(&expr.name).is_some() {
                        continue;
                    }
                    let deps = schema.dependent_groups(expr);
                    let target = deps
                        .iter()
                        .copied()
                        .find(|g| !schema.groups[*g].is_flat())
                        .or_else(|| deps.iter().next().copied());
                    match target {
                        Some(g) => schema.insert_to_group(expr.clone(), g),
                        None => {
                            let g = schema.create_group();
                            schema.set_group_as_single_state(g);
                            schema.insert_to_group(expr.clone(), g);
                        }
                    }
                }
                schema.set_scope(expressions.iter().map(|e| e.name.clone()).collect());
                self.schema = schema;
            }
            LogicalOperatorKind::Unwind { alias, .. } => {
                let alias = alias.clone();
                let mut schema = self.children[0].schema.clone();
                let g = schema.create_group();
                schema.insert_to_group_and_scope(alias, g);
                self.schema = schema;
            }
            LogicalOperatorKind::HashJoin {
                join_keys, mark, ..
            } => {
                let join_keys = join_keys.clone();
                let mark = mark.clone();
                let mut schema = self.children[0].schema.clone();
                let build_schema = &self.children[1].schema;
                let probe_keys: Vec<String> =
                    join_keys.iter().map(|(_, b)| b.name.clone()).collect();
                let payload: Vec<Expression> = build_schema
                    .expressions_in_scope()
                    .into_iter()
                    .filter(|e| !probe_keys.contains(&e.name) && !schema.is_in_scope(&e.name))
                    .cloned()
                    .collect();
                if let Some(mark) = mark {
                    let g = schema.create_group();
                    schema.insert_to_group_and_scope(mark, g);
                    schema.flatten_group(g);
                } else if !payload.is_empty() {
                    let g = schema.create_group();
                    for e in payload {
                        schema.insert_to_group_and_scope(e, g);
                    }
                }
                self.schema = schema;
            }
            LogicalOperatorKind::CrossProduct => {
                let mut schema = self.children[0].schema.clone();
                let build_schema = &self.children[1].schema;
                let g = schema.create_group();
                for e in build_schema
                    .expressions_in_scope()
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
                {
                    schema.insert_to_group_and_scope(e, g);
                }
                self.schema = schema;
            }
            LogicalOperatorKind::Aggregate { keys, aggregates } => {
                let outputs: Vec<Expression> =
                    keys.iter().chain(aggregates.iter()).cloned().collect();
                self.schema = single_group_schema(outputs);
            }
            LogicalOperatorKind::Distinct { keys } => {
                self.schema = single_group_schema(keys.clone());
            }
            LogicalOperatorKind::OrderBy { payloads, .. } => {
                self.schema = single_group_schema(payloads.clone());
            }
            LogicalOperatorKind::Accumulate { mark, .. } => {
                let mut outputs: Vec<Expression> = self.children[0]
                    .schema
                    .expressions_in_scope()
                    .into_iter()
                    .cloned()
                    .collect();
                if let Some(m) = mark {
                    outputs.push(m.clone());
                }
                self.schema = single_group_schema(outputs);
            }
            LogicalOperatorKind::Union => {
                let outputs: Vec<Expression> = self.children[0]
                    .schema
                    .expressions_in_scope()
                    .into_iter()
                    .cloned()
                    .collect();
                self.schema = single_group_schema(outputs);
            }
            LogicalOperatorKind::TableCall { columns, .. } => {
                self.schema = single_group_schema(columns.clone());
            }
            LogicalOperatorKind::CopyFrom(_)
            | LogicalOperatorKind::CopyTo { .. }
            | LogicalOperatorKind::Ddl(_)
            | LogicalOperatorKind::DatabaseOp(_)
            | LogicalOperatorKind::StandingCall(_) => {
                let mut schema = Schema::new();
                let g = schema.create_group();
                schema.set_group_as_single_state(g);
                schema.insert_to_group_and_scope(result_column(), g);
                self.schema = schema;
            }
        }
    }

    /// The pipeline-breaking boundary view: everything in scope collapses
    /// into one group, the layout a materialized table scan re-exposes.
    pub fn compute_flat_schema(&mut self) {
        self.compute_factorized_schema();
        let outputs: Vec<Expression> = self
            .schema
            .expressions_in_scope()
            .into_iter()
            .cloned()
            .collect();
        self.schema = single_group_schema(outputs);
    }

    /// Operator name for plan printouts
    pub fn name(&self) -> &'static str {
        match &self.kind {
            LogicalOperatorKind::DummyScan => "DUMMY_SCAN",
            LogicalOperatorKind::EmptyResult { .. } => "EMPTY_RESULT",
            LogicalOperatorKind::ScanNode { .. } => "SCAN_NODE",
            LogicalOperatorKind::Extend { .. } => "EXTEND",
            LogicalOperatorKind::RecursiveExtend { .. } => "RECURSIVE_EXTEND",
            LogicalOperatorKind::Filter { .. } => "FILTER",
            LogicalOperatorKind::Projection { .. } => "PROJECTION",
            LogicalOperatorKind::Flatten { .. } => "FLATTEN",
            LogicalOperatorKind::Limit { .. } => "LIMIT",
            LogicalOperatorKind::OrderBy { .. } => "ORDER_BY",
            LogicalOperatorKind::HashJoin { .. } => "HASH_JOIN",
            LogicalOperatorKind::CrossProduct => "CROSS_PRODUCT",
            LogicalOperatorKind::Aggregate { .. } => "AGGREGATE",
            LogicalOperatorKind::Distinct { .. } => "DISTINCT",
            LogicalOperatorKind::Accumulate { .. } => "ACCUMULATE",
            LogicalOperatorKind::Union => "UNION",
            LogicalOperatorKind::Unwind { .. } => "UNWIND",
            LogicalOperatorKind::TableCall { .. } => "TABLE_CALL",
            LogicalOperatorKind::CreateNode { .. } => "CREATE_NODE",
            LogicalOperatorKind::DeleteNode { .. } => "DELETE_NODE",
            LogicalOperatorKind::SetProperty { .. } => "SET_PROPERTY",
            LogicalOperatorKind::CopyFrom(_) => "COPY_FROM",
            LogicalOperatorKind::CopyTo { .. } => "COPY_TO",
            LogicalOperatorKind::Ddl(_) => "DDL",
            LogicalOperatorKind::DatabaseOp(_) => "DATABASE_OP",
            LogicalOperatorKind::StandingCall(_) => "STANDING_CALL",
            LogicalOperatorKind::MultiplicityReducer => "MULTIPLICITY_REDUCER",
        }
    }

    /// Short parameter string for plan printouts
    pub fn params(&self) -> String {
        match &self.kind {
            LogicalOperatorKind::ScanNode { variable, .. } => variable.name.clone(),
            LogicalOperatorKind::Extend {
                bound,
                nbr,
                direction,
                ..
            } => format!("{}->{} [{}]", bound.name, nbr.name, direction),
            LogicalOperatorKind::RecursiveExtend {
                bound,
                nbr,
                lower,
                upper,
                ..
            } => format!("{}-[*{}..{}]->{}", bound.name, lower, upper, nbr.name),
            LogicalOperatorKind::Filter { predicate } => predicate.name.clone(),
            LogicalOperatorKind::Projection { expressions } => expressions
                .iter()
                .map(|e| e.name.clone())
                .collect::<Vec<_>>()
                .join(", "),
            LogicalOperatorKind::Flatten { group } => format!("group {group}"),
            LogicalOperatorKind::Limit { skip, limit } => match limit {
                Some(l) => format!("skip {skip} limit {l}"),
                None => format!("skip {skip}"),
            },
            LogicalOperatorKind::OrderBy { keys, .. } => keys
                .iter()
                .map(|(e, asc)| format!("{} {}", e.name, if *asc { "ASC" } else { "DESC" }))
                .collect::<Vec<_>>()
                .join(", "),
            LogicalOperatorKind::HashJoin { join_keys, .. } => join_keys
                .iter()
                .map(|(p, b)| format!("{}={}", p.name, b.name))
                .collect::<Vec<_>>()
                .join(", "),
            LogicalOperatorKind::Aggregate { keys, aggregates } => format!(
                "keys: [{}] aggs: [{}]",
                keys.iter().map(|e| e.name.clone()).collect::<Vec<_>>().join(", "),
                aggregates
                    .iter()
                    .map(|e| e.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LogicalOperatorKind::Unwind { list, alias } => {
                format!("{} AS {}", list.name, alias.name)
            }
            LogicalOperatorKind::TableCall { function, .. } => function.clone(),
            _ => String::new(),
        }
    }

    /// Indented plan printout
    pub fn pretty_print(&self, indent: usize) -> String {
        let prefix = "  ".repeat(indent);
        let params = self.params();
        let mut out = if params.is_empty() {
            format!("{}{}", prefix, self.name())
        } else {
            format!("{}{}[{}]", prefix, self.name(), params)
        };
        for child in &self.children {
            out.push('\n');
            out.push_str(&child.pretty_print(indent + 1));
        }
        out
    }

    /// JSON plan printout for `QuerySummary`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "params": self.params(),
            "children": self.children.iter().map(LogicalOperator::to_json).collect::<Vec<_>>(),
        })
    }
}

fn single_group_schema(outputs: Vec<Expression>) -> Schema {
    let mut schema = Schema::new();
    let g = schema.create_group();
    for e in outputs {
        schema.insert_to_group_and_scope(e, g);
    }
    schema
}

/// The single string column DDL-like statements produce
pub fn result_column() -> Expression {
    Expression::new(
        crate::expression::ExpressionKind::Literal(Value::Null(LogicalType::String)),
        LogicalType::String,
        "result",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionKind;

    fn node_var(name: &str) -> Expression {
        Expression::new(
            ExpressionKind::NodeVariable { table_id: 0 },
            LogicalType::Node(0),
            name,
        )
    }

    fn scan(var_name: &str) -> LogicalOperator {
        let mut op = LogicalOperator::new(
            LogicalOperatorKind::ScanNode {
                table: 0,
                variable: node_var(var_name),
                properties: vec![],
            },
            vec![],
        );
        op.compute_factorized_schema();
        op
    }

    #[test]
    fn test_scan_schema_single_unflat_group() {
        let op = scan("a");
        assert_eq!(op.schema.groups.len(), 1);
        assert!(!op.schema.groups[0].is_flat());
        assert!(op.schema.is_in_scope("a"));
    }

    #[test]
    fn test_extend_requires_flat_bound() {
        let child = scan("a");
        let extend = LogicalOperator::new(
            LogicalOperatorKind::Extend {
                rel_table: 1,
                direction: ExtendDirection::Forward,
                bound: node_var("a"),
                nbr: node_var("b"),
                rel_variable: None,
                properties: vec![],
                nbr_properties: vec![],
            },
            vec![child],
        );
        // The bound group is unflat, so it must be flattened first.
        assert_eq!(extend.groups_to_flatten(), vec![0]);
    }

    #[test]
    fn test_extend_after_flatten_has_two_groups() {
        let child = scan("a");
        let mut flatten =
            LogicalOperator::new(LogicalOperatorKind::Flatten { group: 0 }, vec![child]);
        flatten.compute_factorized_schema();
        let mut extend = LogicalOperator::new(
            LogicalOperatorKind::Extend {
                rel_table: 1,
                direction: ExtendDirection::Forward,
                bound: node_var("a"),
                nbr: node_var("b"),
                rel_variable: None,
                properties: vec![],
                nbr_properties: vec![],
            },
            vec![flatten],
        );
        assert!(extend.groups_to_flatten().is_empty());
        extend.compute_factorized_schema();
        assert_eq!(extend.schema.groups.len(), 2);
        assert!(extend.schema.groups[0].is_flat());
        assert!(!extend.schema.groups[1].is_flat());
    }

    #[test]
    fn test_scope_union_preserved_by_filter() {
        let child = scan("a");
        let scope_before: Vec<String> = child
            .schema
            .expressions_in_scope()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        let mut filter = LogicalOperator::new(
            LogicalOperatorKind::Filter {
                predicate: Expression::new(
                    ExpressionKind::Literal(Value::Bool(true)),
                    LogicalType::Bool,
                    "True",
                ),
            },
            vec![child],
        );
        filter.compute_factorized_schema();
        let scope_after: Vec<String> = filter
            .schema
            .expressions_in_scope()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(scope_before, scope_after);
    }

    #[test]
    fn test_projection_drops_scope() {
        let child = scan("a");
        let mut projection = LogicalOperator::new(
            LogicalOperatorKind::Projection {
                expressions: vec![node_var("a")],
            },
            vec![child],
        );
        projection.compute_factorized_schema();
        assert!(projection.schema.is_in_scope("a"));
        assert_eq!(projection.schema.expressions_in_scope().len(), 1);
    }

    #[test]
    fn test_flat_schema_is_single_group() {
        let child = scan("a");
        let mut acc = LogicalOperator::new(
            LogicalOperatorKind::Accumulate {
                accumulate_type: AccumulateType::Regular,
                mark: None,
            },
            vec![child],
        );
        acc.compute_flat_schema();
        assert_eq!(acc.schema.groups.len(), 1);
        assert!(acc.schema.is_in_scope("a"));
    }

    #[test]
    fn test_pretty_print_nesting() {
        let child = scan("a");
        let mut filter = LogicalOperator::new(
            LogicalOperatorKind::Filter {
                predicate: Expression::literal(Value::Bool(true)),
            },
            vec![child],
        );
        filter.compute_factorized_schema();
        let printed = filter.pretty_print(0);
        assert!(printed.contains("FILTER"));
        assert!(printed.contains("SCAN_NODE"));
        assert!(printed.lines().nth(1).expect("child line").starts_with("  "));
    }
}
