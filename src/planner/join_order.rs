//! Join-order enumeration
//!
//! A bushy dynamic program over subsets of the bound pattern's nodes and
//! rels. Base entries scan single nodes; transitions extend a subplan
//! across an uncovered rel (forward or backward), close a cycle with an
//! extend-plus-id-filter, or hash-join two overlapping subplans on their
//! shared node variables. The cheapest plan per (node set, rel set) entry
//! survives; cost is the sum of child cardinalities.
//!
//! Disconnected pattern components are planned independently and combined
//! with cross products.

use super::cardinality::CardinalityEstimator;
use super::operator::{JoinType, LogicalOperatorKind, SidewaysInfoPassing};
use super::{append_binary, append_unary, LogicalPlan};
use crate::binder::{BoundGraphPattern, BoundRel};
use crate::error::{QuiverError, QuiverResult};
use crate::expression::{Expression, ExpressionKind};
use crate::planner::operator::LogicalOperator;
use crate::types::LogicalType;
use std::collections::HashMap;

/// Patterns beyond this many nodes or rels exceed the DP's subset masks
const MAX_PATTERN_SIZE: usize = 16;

/// Rounds of the improvement loop; patterns converge far earlier
const MAX_ROUNDS: usize = 64;

type Mask = u32;
type Key = (Mask, Mask);

/// Per-variable property expressions the plan must emit
pub type PropertyMap = HashMap<String, Vec<Expression>>;

pub fn enumerate(
    pattern: &BoundGraphPattern,
    properties: &PropertyMap,
    estimator: &CardinalityEstimator<'_>,
) -> QuiverResult<LogicalPlan> {
    if pattern.nodes.len() > MAX_PATTERN_SIZE || pattern.rels.len() > MAX_PATTERN_SIZE {
        return Err(QuiverError::planner(format!(
            "Pattern with {} nodes and {} rels exceeds the join enumerator's limit.",
            pattern.nodes.len(),
            pattern.rels.len()
        )));
    }

    let components = connected_components(pattern);
    let mut component_plans = Vec::with_capacity(components.len());
    for (node_mask, rel_mask) in components {
        component_plans.push(enumerate_component(
            pattern, properties, estimator, node_mask, rel_mask,
        )?);
    }

    // Disconnected components cross-product together, cheapest first so
    // the big side streams on the probe.
    component_plans.sort_by(|a, b| {
        a.cardinality
            .partial_cmp(&b.cardinality)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut iter = component_plans.into_iter();
    let mut plan = iter
        .next()
        .ok_or_else(|| QuiverError::planner("Empty pattern reached the join enumerator."))?;
    for build in iter {
        let card = plan.cardinality * build.cardinality;
        // The smaller side was planned first; keep the running plan as
        // probe so cross products stay left-deep.
        plan = append_binary(LogicalOperatorKind::CrossProduct, plan, build, card);
    }
    Ok(plan)
}

fn enumerate_component(
    pattern: &BoundGraphPattern,
    properties: &PropertyMap,
    estimator: &CardinalityEstimator<'_>,
    component_nodes: Mask,
    component_rels: Mask,
) -> QuiverResult<LogicalPlan> {
    let mut table: HashMap<Key, LogicalPlan> = HashMap::new();
    for (idx, node) in pattern.nodes.iter().enumerate() {
        if component_nodes & (1 << idx) == 0 {
            continue;
        }
        let cardinality = estimator.scan_cardinality(node.table_id);
        let mut scan = LogicalOperator::new(
            LogicalOperatorKind::ScanNode {
                table: node.table_id,
                variable: node.variable.clone(),
                properties: properties
                    .get(&node.variable.name)
                    .cloned()
                    .unwrap_or_default(),
            },
            vec![],
        );
        scan.compute_factorized_schema();
        scan.schema.groups[0].estimated_size = cardinality;
        table.insert(
            (1 << idx, 0),
            LogicalPlan {
                root: scan,
                cardinality,
                cost: cardinality,
            },
        );
    }

    for _ in 0..MAX_ROUNDS {
        let mut changed = false;
        let snapshot: Vec<(Key, LogicalPlan)> =
            table.iter().map(|(k, v)| (*k, v.clone())).collect();

        // Extensions across uncovered rels.
        for ((nodes, rels), plan) in &snapshot {
            for (rel_idx, rel) in pattern.rels.iter().enumerate() {
                if component_rels & (1 << rel_idx) == 0 || rels & (1 << rel_idx) != 0 {
                    continue;
                }
                let from_in = nodes & (1 << rel.from_node) != 0;
                let to_in = nodes & (1 << rel.to_node) != 0;
                let candidate = if from_in && !to_in {
                    Some(extend_plan(
                        pattern, properties, estimator, plan, rel, rel_idx, false,
                    ))
                } else if to_in && !from_in {
                    Some(extend_plan(
                        pattern, properties, estimator, plan, rel, rel_idx, true,
                    ))
                } else if from_in && to_in {
                    Some(close_cycle_plan(pattern, estimator, plan, rel))
                } else {
                    None
                };
                if let Some(new_plan) = candidate {
                    let new_nodes = nodes | (1 << rel.from_node) | (1 << rel.to_node);
                    let new_key = (new_nodes, rels | (1 << rel_idx));
                    changed |= keep_best(&mut table, new_key, new_plan);
                }
            }
        }

        // Binary hash joins over overlapping subplans with disjoint rels.
        for (i, ((n1, r1), p1)) in snapshot.iter().enumerate() {
            for ((n2, r2), p2) in snapshot.iter().skip(i + 1) {
                if r1 & r2 != 0 || n1 & n2 == 0 {
                    continue;
                }
                // Covering nothing new is pointless.
                if n2 & !n1 == 0 && n1 & !n2 == 0 {
                    continue;
                }
                let shared: Vec<usize> = (0..pattern.nodes.len())
                    .filter(|idx| (n1 & n2) & (1 << idx) != 0)
                    .collect();
                let (probe, build) = if p1.cardinality >= p2.cardinality {
                    (p1, p2)
                } else {
                    (p2, p1)
                };
                let keys: Vec<(Expression, Expression)> = shared
                    .iter()
                    .map(|&idx| {
                        let v = pattern.nodes[idx].variable.clone();
                        (v.clone(), v)
                    })
                    .collect();
                let distinct =
                    estimator.stats().distinct_pk(pattern.nodes[shared[0]].table_id) as f64;
                let card =
                    estimator.join_cardinality(probe.cardinality, build.cardinality, distinct);
                // A much smaller build side pays for masking the probe's
                // leaf scan with its keys.
                let sip = if probe.cardinality > 5.0 * build.cardinality {
                    SidewaysInfoPassing::ProbeToBuild
                } else {
                    SidewaysInfoPassing::ProhibitProbeToBuild
                };
                let joined = append_binary(
                    LogicalOperatorKind::HashJoin {
                        join_keys: keys,
                        join_type: JoinType::Inner,
                        mark: None,
                        sip,
                    },
                    probe.clone(),
                    build.clone(),
                    card,
                );
                changed |= keep_best(&mut table, (n1 | n2, r1 | r2), joined);
            }
        }

        if !changed {
            break;
        }
    }

    table
        .remove(&(component_nodes, component_rels))
        .ok_or_else(|| {
            QuiverError::planner("Join enumeration failed to cover the pattern.")
        })
}

fn keep_best(table: &mut HashMap<Key, LogicalPlan>, key: Key, plan: LogicalPlan) -> bool {
    match table.get(&key) {
        Some(existing) if existing.cost <= plan.cost => false,
        _ => {
            table.insert(key, plan);
            true
        }
    }
}

/// Extend `plan` across `rel`; `reversed` traverses from the rel's
/// `to_node` side.
fn extend_plan(
    pattern: &BoundGraphPattern,
    properties: &PropertyMap,
    estimator: &CardinalityEstimator<'_>,
    plan: &LogicalPlan,
    rel: &BoundRel,
    _rel_idx: usize,
    reversed: bool,
) -> LogicalPlan {
    let (bound_idx, nbr_idx, direction) = if reversed {
        (rel.to_node, rel.from_node, rel.direction.reverse())
    } else {
        (rel.from_node, rel.to_node, rel.direction)
    };
    let bound = pattern.nodes[bound_idx].variable.clone();
    let nbr = pattern.nodes[nbr_idx].variable.clone();
    let nbr_properties = properties.get(&nbr.name).cloned().unwrap_or_default();
    let card = estimator.extend_cardinality(plan.cardinality, rel.rel_table, direction);

    let kind = match rel.recursive {
        Some((kind, lower, upper)) => LogicalOperatorKind::RecursiveExtend {
            rel_table: rel.rel_table,
            direction,
            bound,
            nbr,
            kind,
            lower,
            upper,
            nbr_properties,
        },
        None => LogicalOperatorKind::Extend {
            rel_table: rel.rel_table,
            direction,
            bound,
            nbr: nbr.clone(),
            rel_variable: rel.variable.clone(),
            properties: rel
                .variable
                .as_ref()
                .and_then(|v| properties.get(&v.name).cloned())
                .unwrap_or_default(),
            nbr_properties,
        },
    };
    let mut extended = append_unary(kind, plan.clone(), card);
    // Tag the neighbor group with its expected fan-out.
    if let Some(last) = extended.root.schema.groups.len().checked_sub(1) {
        extended.root.schema.groups[last].estimated_size = estimator
            .stats()
            .avg_degree(rel.rel_table, direction)
            .max(1.0);
    }
    extended
}

/// Both endpoints already bound: extend to a shadow variable and filter
/// it against the existing binding by internal id.
fn close_cycle_plan(
    pattern: &BoundGraphPattern,
    estimator: &CardinalityEstimator<'_>,
    plan: &LogicalPlan,
    rel: &BoundRel,
) -> LogicalPlan {
    let bound = pattern.nodes[rel.from_node].variable.clone();
    let target = pattern.nodes[rel.to_node].variable.clone();
    let shadow = Expression::new(
        ExpressionKind::NodeVariable {
            table_id: pattern.nodes[rel.to_node].table_id,
        },
        LogicalType::Node(pattern.nodes[rel.to_node].table_id),
        format!("{}@{}", target.name, rel.rel_table),
    );

    let card = estimator.extend_cardinality(plan.cardinality, rel.rel_table, rel.direction);
    let extended = append_unary(
        LogicalOperatorKind::Extend {
            rel_table: rel.rel_table,
            direction: rel.direction,
            bound,
            nbr: shadow.clone(),
            rel_variable: rel.variable.clone(),
            properties: vec![],
            nbr_properties: vec![],
        },
        plan.clone(),
        card,
    );

    let predicate = Expression::new(
        ExpressionKind::ScalarFunction {
            function: "=".to_string(),
            args: vec![shadow.clone(), target.clone()],
        },
        LogicalType::Bool,
        format!("{} = {}", shadow.name, target.name),
    );
    let filtered_card = (card
        / estimator.stats().distinct_pk(pattern.nodes[rel.to_node].table_id).max(1) as f64)
        .max(1.0);
    append_unary(
        LogicalOperatorKind::Filter { predicate },
        extended,
        filtered_card,
    )
}

/// Connected components of the pattern as (node mask, rel mask) pairs
fn connected_components(pattern: &BoundGraphPattern) -> Vec<(Mask, Mask)> {
    let n = pattern.nodes.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        if parent[x] != x {
            let root = find(parent, parent[x]);
            parent[x] = root;
        }
        parent[x]
    }
    for rel in &pattern.rels {
        let a = find(&mut parent, rel.from_node);
        let b = find(&mut parent, rel.to_node);
        parent[a] = b;
    }
    let mut components: HashMap<usize, (Mask, Mask)> = HashMap::new();
    for idx in 0..n {
        let root = find(&mut parent, idx);
        components.entry(root).or_insert((0, 0)).0 |= 1 << idx;
    }
    for (rel_idx, rel) in pattern.rels.iter().enumerate() {
        let root = find(&mut parent, rel.from_node);
        if let Some(entry) = components.get_mut(&root) {
            entry.1 |= 1 << rel_idx;
        }
    }
    let mut out: Vec<(Mask, Mask)> = components.into_values().collect();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BoundNode;
    use crate::planner::cardinality::FixedStatistics;
    use crate::types::ExtendDirection;

    fn node_var(name: &str, table: u64) -> Expression {
        Expression::new(
            ExpressionKind::NodeVariable { table_id: table },
            LogicalType::Node(table),
            name,
        )
    }

    fn chain_pattern(len: usize) -> BoundGraphPattern {
        let mut pattern = BoundGraphPattern::default();
        for i in 0..len {
            pattern.nodes.push(BoundNode {
                variable: node_var(&format!("n{i}"), 0),
                table_id: 0,
            });
        }
        for i in 0..len - 1 {
            pattern.rels.push(BoundRel {
                rel_table: 1,
                from_node: i,
                to_node: i + 1,
                direction: ExtendDirection::Forward,
                variable: None,
                recursive: None,
            });
        }
        pattern
    }

    fn count_kind(op: &LogicalOperator, name: &str) -> usize {
        let mut count = usize::from(op.name() == name);
        for c in &op.children {
            count += count_kind(c, name);
        }
        count
    }

    #[test]
    fn test_two_hop_covers_all_rels() {
        let pattern = chain_pattern(3);
        let stats = FixedStatistics {
            node_count: 100,
            avg_degree: 2.0,
        };
        let est = CardinalityEstimator::new(&stats);
        let plan = enumerate(&pattern, &PropertyMap::new(), &est).expect("enumerate");
        let extends = count_kind(&plan.root, "EXTEND") + count_kind(&plan.root, "HASH_JOIN");
        assert!(extends >= 2, "both rels must be realized");
        assert!(plan.cardinality > 0.0);
    }

    #[test]
    fn test_disconnected_components_cross_product() {
        let mut pattern = chain_pattern(2);
        pattern.nodes.push(BoundNode {
            variable: node_var("m", 2),
            table_id: 2,
        });
        let stats = FixedStatistics {
            node_count: 10,
            avg_degree: 1.5,
        };
        let est = CardinalityEstimator::new(&stats);
        let plan = enumerate(&pattern, &PropertyMap::new(), &est).expect("enumerate");
        assert_eq!(count_kind(&plan.root, "CROSS_PRODUCT"), 1);
    }

    #[test]
    fn test_cycle_closes_with_filter() {
        let mut pattern = chain_pattern(3);
        // Close the triangle: n2 -> n0.
        pattern.rels.push(BoundRel {
            rel_table: 1,
            from_node: 2,
            to_node: 0,
            direction: ExtendDirection::Forward,
            variable: None,
            recursive: None,
        });
        let stats = FixedStatistics {
            node_count: 50,
            avg_degree: 3.0,
        };
        let est = CardinalityEstimator::new(&stats);
        let plan = enumerate(&pattern, &PropertyMap::new(), &est).expect("enumerate");
        assert!(count_kind(&plan.root, "FILTER") >= 1, "cycle needs an id filter");
    }

    #[test]
    fn test_oversized_pattern_rejected() {
        let pattern = chain_pattern(MAX_PATTERN_SIZE + 1);
        let stats = FixedStatistics {
            node_count: 10,
            avg_degree: 1.0,
        };
        let est = CardinalityEstimator::new(&stats);
        let err = enumerate(&pattern, &PropertyMap::new(), &est).expect_err("too big");
        assert!(matches!(err, QuiverError::Planner(_)));
    }
}
