//! Cardinality estimation
//!
//! Per-append cost updates driven by table statistics: scans start from
//! table counts, filters apply predicate selectivity, joins divide by key
//! distinctness, and flattening an unflat group moves its expected size
//! into the plan cardinality.

use crate::expression::{Expression, ExpressionKind};
use crate::types::{ExtendDirection, TableId};

/// Statistics the estimator reads from storage
pub trait StatisticsProvider {
    fn node_count(&self, table: TableId) -> u64;
    fn rel_count(&self, table: TableId) -> u64;

    /// Average out-degree (forward) or in-degree (backward)
    fn avg_degree(&self, rel_table: TableId, direction: ExtendDirection) -> f64;

    /// Distinct primary keys; equals the row count under PK uniqueness
    fn distinct_pk(&self, table: TableId) -> u64 {
        self.node_count(table)
    }
}

/// Fixed statistics for tests and for planning before storage exists
#[derive(Debug, Clone, Default)]
pub struct FixedStatistics {
    pub node_count: u64,
    pub avg_degree: f64,
}

impl StatisticsProvider for FixedStatistics {
    fn node_count(&self, _table: TableId) -> u64 {
        self.node_count
    }

    fn rel_count(&self, _table: TableId) -> u64 {
        (self.node_count as f64 * self.avg_degree) as u64
    }

    fn avg_degree(&self, _rel_table: TableId, _direction: ExtendDirection) -> f64 {
        self.avg_degree
    }
}

/// The estimator: thin policy over a statistics provider
pub struct CardinalityEstimator<'a> {
    stats: &'a dyn StatisticsProvider,
}

impl<'a> CardinalityEstimator<'a> {
    pub fn new(stats: &'a dyn StatisticsProvider) -> Self {
        CardinalityEstimator { stats }
    }

    pub fn scan_cardinality(&self, table: TableId) -> f64 {
        (self.stats.node_count(table).max(1)) as f64
    }

    pub fn extend_cardinality(
        &self,
        input: f64,
        rel_table: TableId,
        direction: ExtendDirection,
    ) -> f64 {
        (input * self.stats.avg_degree(rel_table, direction).max(0.1)).max(1.0)
    }

    /// `|probe| x |build| / distinct(key)`
    pub fn join_cardinality(&self, probe: f64, build: f64, distinct_keys: f64) -> f64 {
        (probe * build / distinct_keys.max(1.0)).max(1.0)
    }

    pub fn filter_cardinality(&self, input: f64, predicate: &Expression) -> f64 {
        (input * self.selectivity(predicate)).max(1.0)
    }

    /// Heuristic selectivity from the predicate's shape; an equality on a
    /// primary key pins one row.
    pub fn selectivity(&self, predicate: &Expression) -> f64 {
        match &predicate.kind {
            ExpressionKind::ScalarFunction { function, args } => match function.as_str() {
                "=" => {
                    let pk = args.iter().find_map(|a| match &a.kind {
                        ExpressionKind::Property {
                            table_id,
                            is_primary_key: true,
                            ..
                        } => Some(*table_id),
                        _ => None,
                    });
                    match pk {
                        Some(table) => 1.0 / self.stats.distinct_pk(table).max(1) as f64,
                        None => 0.1,
                    }
                }
                "<" | "<=" | ">" | ">=" => 0.33,
                "<>" => 0.9,
                "AND" => args
                    .iter()
                    .map(|a| self.selectivity(a))
                    .product::<f64>(),
                "OR" => args
                    .iter()
                    .map(|a| self.selectivity(a))
                    .fold(0.0, |acc, s| (acc + s).min(1.0)),
                _ => 0.5,
            },
            ExpressionKind::Literal(v) => {
                if v.as_bool() == Some(false) {
                    0.0
                } else {
                    1.0
                }
            }
            _ => 0.5,
        }
    }

    pub fn flatten_cardinality(&self, input: f64, group_estimated_size: f64) -> f64 {
        (input * group_estimated_size.max(1.0)).max(1.0)
    }

    pub fn stats(&self) -> &dyn StatisticsProvider {
        self.stats
    }
}
