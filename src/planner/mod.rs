//! # Query Planner
//!
//! Lowers a bound statement into a logical plan. Construction is
//! bottom-up: every append asks the new operator which child groups it
//! needs flat, inserts `Flatten` operators for them, recomputes the
//! factorized schema, and updates the running cardinality estimate.
//!
//! Join enumeration (in [`join_order`]) runs a bushy dynamic program over
//! node/rel subsets, emitting forward and backward extends plus binary
//! hash joins, and picks by estimated cost (the sum of child
//! cardinalities).

pub mod cardinality;
pub mod join_order;
pub mod operator;
pub mod schema;

pub use cardinality::{CardinalityEstimator, FixedStatistics, StatisticsProvider};
pub use operator::{
    AccumulateType, JoinType, LogicalOperator, LogicalOperatorKind, SidewaysInfoPassing,
};
pub use schema::{flatten_all, flatten_all_but_one, GroupPos, Schema};

use crate::binder::{
    BoundQuery, BoundStatement, BoundStatementKind, BoundUpdate,
};
use crate::error::{QuiverError, QuiverResult};
use crate::expression::{Expression, ExpressionKind};
use crate::types::LogicalType;
use std::collections::HashMap;
use tracing::debug;

/// A logical plan with its running cost estimates.
///
/// `cardinality` counts logical tuples (unflat group sizes multiplied
/// through); `cost` accumulates the cardinalities of every operator
/// appended, which is what join enumeration minimizes.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub root: LogicalOperator,
    pub cardinality: f64,
    pub cost: f64,
}

/// Append a unary operator: attach the child, insert required flattens,
/// recompute the schema.
pub(crate) fn append_unary(
    kind: LogicalOperatorKind,
    child: LogicalPlan,
    cardinality: f64,
) -> LogicalPlan {
    let cost = child.cost + cardinality;
    let mut op = LogicalOperator::new(kind, vec![child.root]);
    insert_flattens(&mut op, 0);
    op.compute_factorized_schema();
    LogicalPlan {
        root: op,
        cardinality,
        cost,
    }
}

/// Append a binary operator (hash join, cross product). The build side is
/// reduced to at most one unflat group so its collector can read rows.
pub(crate) fn append_binary(
    kind: LogicalOperatorKind,
    probe: LogicalPlan,
    build: LogicalPlan,
    cardinality: f64,
) -> LogicalPlan {
    let cost = probe.cost + build.cost + cardinality;
    let mut build_root = build.root;
    let scope = build_root.schema.groups_in_scope();
    for g in flatten_all_but_one(&scope, &build_root.schema) {
        let mut f = LogicalOperator::new(LogicalOperatorKind::Flatten { group: g }, vec![build_root]);
        f.compute_factorized_schema();
        build_root = f;
    }
    let mut op = LogicalOperator::new(kind, vec![probe.root, build_root]);
    insert_flattens(&mut op, 0);
    op.compute_factorized_schema();
    LogicalPlan {
        root: op,
        cardinality,
        cost,
    }
}

/// Wrap child `i` in the flattens the operator demands
fn insert_flattens(op: &mut LogicalOperator, child_idx: usize) {
    let groups = op.groups_to_flatten();
    if groups.is_empty() {
        return;
    }
    let mut child = op.children.remove(child_idx);
    for g in groups {
        let mut f = LogicalOperator::new(LogicalOperatorKind::Flatten { group: g }, vec![child]);
        f.compute_factorized_schema();
        child = f;
    }
    op.children.insert(child_idx, child);
}

/// The planner
pub struct Planner<'a> {
    estimator: CardinalityEstimator<'a>,
}

impl<'a> Planner<'a> {
    pub fn new(stats: &'a dyn StatisticsProvider) -> Self {
        Planner {
            estimator: CardinalityEstimator::new(stats),
        }
    }

    pub fn plan(&self, statement: &BoundStatement) -> QuiverResult<LogicalPlan> {
        let plan = match &statement.kind {
            BoundStatementKind::Query(q) => self.plan_query(q)?,
            BoundStatementKind::Ddl(ddl) => {
                leaf_plan(LogicalOperatorKind::Ddl(ddl.clone()))
            }
            BoundStatementKind::DatabaseOp(op) => {
                leaf_plan(LogicalOperatorKind::DatabaseOp(op.clone()))
            }
            BoundStatementKind::StandingCall(option) => {
                leaf_plan(LogicalOperatorKind::StandingCall(*option))
            }
            BoundStatementKind::CopyFrom(copy) => {
                leaf_plan(LogicalOperatorKind::CopyFrom(copy.clone()))
            }
            BoundStatementKind::CopyTo(copy) => {
                let inner = self.plan_query(&copy.query)?;
                append_unary(
                    LogicalOperatorKind::CopyTo {
                        path: copy.path.clone(),
                        format: copy.format,
                    },
                    inner.clone(),
                    inner.cardinality,
                )
            }
            BoundStatementKind::TableCall(call) => {
                let columns: Vec<Expression> = call
                    .columns
                    .iter()
                    .map(|(name, ty)| {
                        Expression::new(
                            ExpressionKind::Literal(crate::value::Value::Null(ty.clone())),
                            ty.clone(),
                            name.clone(),
                        )
                    })
                    .collect();
                leaf_plan(LogicalOperatorKind::TableCall {
                    function: call.function.clone(),
                    args: call.args.clone(),
                    columns,
                })
            }
        };
        debug!(cost = plan.cost, cardinality = plan.cardinality, "planned statement");
        Ok(plan)
    }

    fn plan_query(&self, q: &BoundQuery) -> QuiverResult<LogicalPlan> {
        let properties = collect_property_map(q);

        let mut plan = if q.pattern.nodes.is_empty() {
            leaf_plan(LogicalOperatorKind::DummyScan)
        } else {
            join_order::enumerate(&q.pattern, &properties, &self.estimator)?
        };

        if let Some(predicate) = &q.predicate {
            let card = self
                .estimator
                .filter_cardinality(plan.cardinality, predicate);
            plan = append_unary(
                LogicalOperatorKind::Filter {
                    predicate: predicate.clone(),
                },
                plan,
                card,
            );
        }

        if let Some((list, alias)) = &q.unwind {
            let card = plan.cardinality * 8.0;
            plan = append_unary(
                LogicalOperatorKind::Unwind {
                    list: list.clone(),
                    alias: alias.clone(),
                },
                plan,
                card,
            );
        }

        for update in &q.updates {
            plan = self.append_update(update, plan);
        }
        if q.projections.is_empty() {
            // Update-only query: nothing to return.
            return Ok(plan);
        }

        let has_aggregate = q.projections.iter().any(Expression::contains_aggregate);
        if has_aggregate {
            plan = self.append_aggregate(q, plan)?;
        }

        // Order-by keys must be materialized with the projections; extra
        // keys are dropped again after the sort.
        let mut pre_sort: Vec<Expression> = q.projections.clone();
        let mut extra_keys = false;
        for (key, _) in &q.order_by {
            if !pre_sort.iter().any(|e| e.name == key.name) {
                pre_sort.push(key.clone());
                extra_keys = true;
            }
        }
        plan = append_unary(
            LogicalOperatorKind::Projection {
                expressions: pre_sort.clone(),
            },
            plan.clone(),
            plan.cardinality,
        );

        if q.distinct {
            let card = (plan.cardinality / 2.0).max(1.0);
            plan = append_unary(
                LogicalOperatorKind::Distinct {
                    keys: pre_sort.clone(),
                },
                plan,
                card,
            );
        }

        if !q.order_by.is_empty() {
            plan = append_unary(
                LogicalOperatorKind::OrderBy {
                    keys: q.order_by.clone(),
                    payloads: pre_sort.clone(),
                },
                plan.clone(),
                plan.cardinality,
            );
        }

        if q.skip.is_some() || q.limit.is_some() {
            let skip = q.skip.unwrap_or(0);
            let card = match q.limit {
                Some(l) => plan.cardinality.min(l as f64),
                None => (plan.cardinality - skip as f64).max(1.0),
            };
            plan = append_unary(LogicalOperatorKind::MultiplicityReducer, plan, card);
            plan = append_unary(
                LogicalOperatorKind::Limit {
                    skip,
                    limit: q.limit,
                },
                plan,
                card,
            );
        }

        if extra_keys {
            plan = append_unary(
                LogicalOperatorKind::Projection {
                    expressions: q.projections.clone(),
                },
                plan.clone(),
                plan.cardinality,
            );
        }
        Ok(plan)
    }

    /// Lower RETURN with aggregates into (accumulate?) + aggregate.
    fn append_aggregate(&self, q: &BoundQuery, plan: LogicalPlan) -> QuiverResult<LogicalPlan> {
        let mut keys: Vec<Expression> = Vec::new();
        let mut aggregates: Vec<Expression> = Vec::new();
        for projection in &q.projections {
            collect_aggregates(projection, &mut aggregates);
            if !projection.contains_aggregate() {
                keys.push(strip_alias(projection).clone());
            }
        }
        for (key, _) in &q.order_by {
            collect_aggregates(key, &mut aggregates);
        }
        if aggregates.is_empty() {
            return Err(QuiverError::internal("aggregate planning without aggregates"));
        }

        // Keys and aggregate inputs must be materialized vectors before
        // hashing; a projection computes whatever the scans did not.
        let mut inputs: Vec<Expression> = keys.clone();
        for agg in &aggregates {
            if let ExpressionKind::Aggregate {
                child: Some(c), ..
            } = &agg.kind
            {
                if !inputs.iter().any(|e| e.name == c.name) {
                    inputs.push((**c).clone());
                }
            }
        }
        let mut plan = plan;
        if !inputs.is_empty() {
            plan = append_unary(
                LogicalOperatorKind::Projection {
                    expressions: inputs,
                },
                plan.clone(),
                plan.cardinality,
            );
        }

        // Hashing wants factorization broken up front when more than one
        // unflat group feeds it; a single accumulate is cheaper than
        // flattening group by group.
        let unflat_in_scope = plan
            .root
            .schema
            .unflat_among(&plan.root.schema.groups_in_scope())
            .len();
        if unflat_in_scope > 1 {
            let card = plan.cardinality;
            plan = append_unary(
                LogicalOperatorKind::Accumulate {
                    accumulate_type: AccumulateType::Regular,
                    mark: None,
                },
                plan,
                card,
            );
        }

        let card = if keys.is_empty() {
            1.0
        } else {
            (plan.cardinality / 10.0).max(1.0)
        };
        Ok(append_unary(
            LogicalOperatorKind::Aggregate { keys, aggregates },
            plan,
            card,
        ))
    }

    fn append_update(&self, update: &BoundUpdate, plan: LogicalPlan) -> LogicalPlan {
        let card = plan.cardinality;
        match update {
            BoundUpdate::CreateNode { table_id, values } => append_unary(
                LogicalOperatorKind::CreateNode {
                    table: *table_id,
                    values: values.clone(),
                },
                plan,
                card,
            ),
            BoundUpdate::Delete { variable } => append_unary(
                LogicalOperatorKind::DeleteNode {
                    variable: variable.clone(),
                },
                plan,
                card,
            ),
            BoundUpdate::Set { target, value } => append_unary(
                LogicalOperatorKind::SetProperty {
                    target: target.clone(),
                    value: value.clone(),
                },
                plan,
                card,
            ),
        }
    }
}

fn leaf_plan(kind: LogicalOperatorKind) -> LogicalPlan {
    let mut op = LogicalOperator::new(kind, vec![]);
    op.compute_factorized_schema();
    LogicalPlan {
        root: op,
        cardinality: 1.0,
        cost: 1.0,
    }
}

/// Property expressions used anywhere in the query, grouped by pattern
/// variable, so scans and extends can emit them.
fn collect_property_map(q: &BoundQuery) -> HashMap<String, Vec<Expression>> {
    let mut out: HashMap<String, Vec<Expression>> = HashMap::new();
    let mut visit = |expr: &Expression| collect_properties(expr, &mut out);
    for p in &q.projections {
        visit(p);
    }
    if let Some(p) = &q.predicate {
        visit(p);
    }
    if let Some((list, _)) = &q.unwind {
        visit(list);
    }
    for (key, _) in &q.order_by {
        visit(key);
    }
    for update in &q.updates {
        match update {
            BoundUpdate::CreateNode { values, .. } => {
                for v in values {
                    collect_properties(v, &mut out);
                }
            }
            BoundUpdate::Delete { variable } => collect_properties(variable, &mut out),
            BoundUpdate::Set { target, value } => {
                collect_properties(target, &mut out);
                collect_properties(value, &mut out);
            }
        }
    }
    out
}

fn collect_properties(expr: &Expression, out: &mut HashMap<String, Vec<Expression>>) {
    if let ExpressionKind::Property { variable, .. } = &expr.kind {
        let entry = out.entry(variable.clone()).or_default();
        if !entry.iter().any(|e| e.name == expr.name) {
            entry.push(expr.clone());
        }
    }
    for child in expr.children() {
        collect_properties(child, out);
    }
}

fn collect_aggregates(expr: &Expression, out: &mut Vec<Expression>) {
    if expr.is_aggregate() {
        if !out.iter().any(|e| e.name == expr.name) {
            out.push(expr.clone());
        }
        return;
    }
    for child in expr.children() {
        collect_aggregates(child, out);
    }
}

/// Aliases project through to their child for grouping purposes
fn strip_alias(expr: &Expression) -> &Expression {
    match &expr.kind {
        ExpressionKind::Alias { child } => child,
        _ => expr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::ParsedStatement;
    use crate::binder::Binder;
    use crate::catalog::{Catalog, PropertyDef};
    use crate::function::FunctionRegistry;
    use crate::value::Value;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .create_node_table(
                "person",
                vec![
                    PropertyDef {
                        name: "ID".to_string(),
                        ty: LogicalType::Int64,
                        primary_key: true,
                    },
                    PropertyDef {
                        name: "fName".to_string(),
                        ty: LogicalType::String,
                        primary_key: false,
                    },
                ],
            )
            .expect("person");
        catalog
            .create_rel_table("knows", "person", "person", vec![])
            .expect("knows");
        catalog
    }

    fn plan(statement: &ParsedStatement) -> QuiverResult<LogicalPlan> {
        let catalog = catalog();
        let functions = FunctionRegistry::with_builtins();
        let params = std::collections::HashMap::new();
        let bound = Binder::new(&catalog, &functions, &params).bind(statement)?;
        let stats = FixedStatistics {
            node_count: 100,
            avg_degree: 2.0,
        };
        Planner::new(&stats).plan(&bound)
    }

    fn operator_names(op: &LogicalOperator, out: &mut Vec<&'static str>) {
        out.push(op.name());
        for c in &op.children {
            operator_names(c, out);
        }
    }

    #[test]
    fn test_single_scan_plan() {
        let q = match_(node("p", "person")).ret([prop("p", "fName")]).build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        let mut names = Vec::new();
        operator_names(&plan.root, &mut names);
        assert_eq!(names.last(), Some(&"SCAN_NODE"));
        assert!(names.contains(&"PROJECTION"));
    }

    #[test]
    fn test_extend_gets_flatten() {
        let q = match_(node("a", "person"))
            .hop(rel_to("knows"), node_any("b"))
            .ret([prop("b", "fName")])
            .build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        let mut names = Vec::new();
        operator_names(&plan.root, &mut names);
        assert!(names.contains(&"EXTEND"));
        assert!(
            names.contains(&"FLATTEN"),
            "extend requires its bound side flat: {names:?}"
        );
    }

    #[test]
    fn test_aggregate_plan_shape() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "fName"), count_star()])
            .build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        let mut names = Vec::new();
        operator_names(&plan.root, &mut names);
        assert!(names.contains(&"AGGREGATE"));
    }

    #[test]
    fn test_order_by_skip_limit_shape() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "ID")])
            .order_by(prop("p", "ID"), true)
            .skip(3)
            .limit(4)
            .build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        let mut names = Vec::new();
        operator_names(&plan.root, &mut names);
        let order_pos = names.iter().position(|n| *n == "ORDER_BY").expect("order");
        let limit_pos = names.iter().position(|n| *n == "LIMIT").expect("limit");
        assert!(
            limit_pos < order_pos,
            "limit sits above order-by in the tree: {names:?}"
        );
        assert!(names.contains(&"MULTIPLICITY_REDUCER"));
    }

    #[test]
    fn test_order_by_extra_key_projected_away() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "fName")])
            .order_by(prop("p", "ID"), true)
            .build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        // Root must project only the RETURN items.
        match &plan.root.kind {
            LogicalOperatorKind::Projection { expressions } => {
                assert_eq!(expressions.len(), 1);
                assert_eq!(expressions[0].name, "p.fName");
            }
            other => panic!("expected projection root, got {other:?}"),
        }
    }

    #[test]
    fn test_distinct_lowered() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "fName")])
            .distinct()
            .build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        let mut names = Vec::new();
        operator_names(&plan.root, &mut names);
        assert!(names.contains(&"DISTINCT"));
    }

    #[test]
    fn test_ddl_plan_is_leaf() {
        let plan = plan(&ParsedStatement::StandingCall {
            option: "threads".to_string(),
            value: Value::Int64(2),
        })
        .expect("plan");
        assert!(plan.root.children.is_empty());
    }

    #[test]
    fn test_create_without_match_uses_dummy_scan() {
        let q = query()
            .create_node(
                "p",
                "person",
                vec![
                    ("ID".to_string(), lit_i64(7)),
                    ("fName".to_string(), lit_str("Grace")),
                ],
            )
            .build();
        let plan = plan(&ParsedStatement::Query(q)).expect("plan");
        let mut names = Vec::new();
        operator_names(&plan.root, &mut names);
        assert!(names.contains(&"CREATE_NODE"));
        assert!(names.contains(&"DUMMY_SCAN"));
    }
}
