//! Factorized schema
//!
//! Describes how the expressions of a logical operator's output are
//! co-arranged into groups. Each group is flat (effective size 1) or
//! unflat (up to one vector of elements); the tuple stream's cardinality
//! is the product of the groups' effective sizes times a scalar
//! multiplicity. Flatten resolvers compute which groups an operator must
//! flatten before it can run.

use crate::expression::Expression;
use std::collections::{BTreeSet, HashMap};

/// Index of a group within a schema
pub type GroupPos = usize;

/// One factorization group
#[derive(Debug, Clone)]
pub struct FactorGroup {
    pub flat: bool,
    /// Holds constants only; always flat-equivalent
    pub single_state: bool,
    /// Resident expressions, in insertion order
    pub expressions: Vec<Expression>,
    /// Expected number of elements per outer tuple, for cardinality
    pub estimated_size: f64,
}

impl FactorGroup {
    fn new() -> Self {
        FactorGroup {
            flat: false,
            single_state: false,
            expressions: Vec::new(),
            estimated_size: 1.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.flat || self.single_state
    }
}

/// The factorized schema of one logical operator
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub groups: Vec<FactorGroup>,
    expr_to_group: HashMap<String, GroupPos>,
    /// Names visible to downstream operators, in projection order
    in_scope: Vec<String>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn create_group(&mut self) -> GroupPos {
        self.groups.push(FactorGroup::new());
        self.groups.len() - 1
    }

    pub fn insert_to_group_and_scope(&mut self, expr: Expression, group: GroupPos) {
        if !self.in_scope.contains(&expr.name) {
            self.in_scope.push(expr.name.clone());
        }
        self.insert_to_group(expr, group);
    }

    /// Register an expression without making it visible downstream
    pub fn insert_to_group(&mut self, expr: Expression, group: GroupPos) {
        self.expr_to_group.insert(expr.name.clone(), group);
        if !self.groups[group]
            .expressions
            .iter()
            .any(|e| e.name == expr.name)
        {
            self.groups[group].expressions.push(expr);
        }
    }

    pub fn set_group_as_single_state(&mut self, group: GroupPos) {
        self.groups[group].single_state = true;
        self.groups[group].flat = true;
        self.groups[group].estimated_size = 1.0;
    }

    pub fn flatten_group(&mut self, group: GroupPos) {
        self.groups[group].flat = true;
    }

    pub fn group_pos(&self, name: &str) -> Option<GroupPos> {
        self.expr_to_group.get(name).copied()
    }

    pub fn is_in_scope(&self, name: &str) -> bool {
        self.in_scope.iter().any(|n| n == name)
    }

    /// Expressions visible downstream, in projection order
    pub fn expressions_in_scope(&self) -> Vec<&Expression> {
        self.in_scope
            .iter()
            .filter_map(|name| self.find_expression(name))
            .collect()
    }

    pub fn find_expression(&self, name: &str) -> Option<&Expression> {
        let group = self.group_pos(name)?;
        self.groups[group].expressions.iter().find(|e| e.name == name)
    }

    /// Restrict the scope to exactly the given names, keeping order
    pub fn set_scope(&mut self, names: Vec<String>) {
        self.in_scope = names;
    }

    /// Groups an expression reads from: the groups of all registered
    /// subexpressions plus the groups of the pattern variables it touches.
    pub fn dependent_groups(&self, expr: &Expression) -> BTreeSet<GroupPos> {
        let mut out = BTreeSet::new();
        for name in expr.subexpression_names() {
            if let Some(g) = self.group_pos(&name) {
                out.insert(g);
            }
        }
        for var in expr.dependent_variables() {
            if let Some(g) = self.group_pos(&var) {
                out.insert(g);
            }
        }
        out
    }

    /// Group positions of all in-scope expressions
    pub fn groups_in_scope(&self) -> BTreeSet<GroupPos> {
        self.in_scope
            .iter()
            .filter_map(|name| self.group_pos(name))
            .collect()
    }

    /// Positions of unflat groups among the given set
    pub fn unflat_among(&self, groups: &BTreeSet<GroupPos>) -> Vec<GroupPos> {
        groups
            .iter()
            .copied()
            .filter(|g| !self.groups[*g].is_flat())
            .collect()
    }

    /// Expected cardinality contribution of the given groups
    pub fn estimated_cardinality(&self, groups: &BTreeSet<GroupPos>) -> f64 {
        groups
            .iter()
            .map(|g| {
                let group = &self.groups[*g];
                if group.is_flat() {
                    1.0
                } else {
                    group.estimated_size
                }
            })
            .product()
    }
}

/// Flatten every unflat group except the first. Operators that preserve
/// one unflat axis (filter, projection, limit/skip) resolve through this.
pub fn flatten_all_but_one(groups: &BTreeSet<GroupPos>, schema: &Schema) -> Vec<GroupPos> {
    let unflat = schema.unflat_among(groups);
    unflat.into_iter().skip(1).collect()
}

/// Flatten every unflat group. Materialization boundaries (aggregate,
/// order-by, unwind sources, copy-to, hash-join build) resolve through
/// this.
pub fn flatten_all(groups: &BTreeSet<GroupPos>, schema: &Schema) -> Vec<GroupPos> {
    schema.unflat_among(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionKind;
    use crate::types::LogicalType;
    use crate::value::Value;

    fn var(name: &str) -> Expression {
        Expression::new(
            ExpressionKind::NodeVariable { table_id: 0 },
            LogicalType::Node(0),
            name,
        )
    }

    fn prop_of(variable: &str, name: &str) -> Expression {
        Expression::new(
            ExpressionKind::Property {
                variable: variable.to_string(),
                table_id: 0,
                property_idx: 0,
                is_primary_key: false,
            },
            LogicalType::Int64,
            name,
        )
    }

    #[test]
    fn test_insert_and_scope() {
        let mut schema = Schema::new();
        let g = schema.create_group();
        schema.insert_to_group_and_scope(var("a"), g);
        assert!(schema.is_in_scope("a"));
        assert_eq!(schema.group_pos("a"), Some(g));
        assert_eq!(schema.expressions_in_scope().len(), 1);
    }

    #[test]
    fn test_single_state_is_flat() {
        let mut schema = Schema::new();
        let g = schema.create_group();
        schema.set_group_as_single_state(g);
        assert!(schema.groups[g].is_flat());
    }

    #[test]
    fn test_dependent_groups_via_variables() {
        let mut schema = Schema::new();
        let g0 = schema.create_group();
        schema.insert_to_group_and_scope(var("a"), g0);
        let g1 = schema.create_group();
        schema.insert_to_group_and_scope(var("b"), g1);

        // a.ID = b.ID depends on both variables' groups even though the
        // property expressions themselves are not registered.
        let cmp = Expression::new(
            ExpressionKind::ScalarFunction {
                function: "=".to_string(),
                args: vec![prop_of("a", "a.ID"), prop_of("b", "b.ID")],
            },
            LogicalType::Bool,
            "a.ID = b.ID",
        );
        let deps = schema.dependent_groups(&cmp);
        assert_eq!(deps, BTreeSet::from([g0, g1]));
    }

    #[test]
    fn test_flatten_all_but_one_keeps_first() {
        let mut schema = Schema::new();
        let g0 = schema.create_group();
        let g1 = schema.create_group();
        let g2 = schema.create_group();
        schema.flatten_group(g1);
        let all = BTreeSet::from([g0, g1, g2]);
        assert_eq!(flatten_all_but_one(&all, &schema), vec![g2]);
        assert_eq!(flatten_all(&all, &schema), vec![g0, g2]);
    }

    #[test]
    fn test_after_flattening_one_unflat_remains() {
        let mut schema = Schema::new();
        let g0 = schema.create_group();
        let g1 = schema.create_group();
        let g2 = schema.create_group();
        let all = BTreeSet::from([g0, g1, g2]);
        for g in flatten_all_but_one(&all, &schema) {
            schema.flatten_group(g);
        }
        assert_eq!(schema.unflat_among(&all).len(), 1);
    }

    #[test]
    fn test_estimated_cardinality_product() {
        let mut schema = Schema::new();
        let g0 = schema.create_group();
        let g1 = schema.create_group();
        schema.groups[g0].estimated_size = 100.0;
        schema.groups[g1].estimated_size = 3.0;
        let all = BTreeSet::from([g0, g1]);
        assert!((schema.estimated_cardinality(&all) - 300.0).abs() < f64::EPSILON);
        schema.flatten_group(g1);
        assert!((schema.estimated_cardinality(&all) - 100.0).abs() < f64::EPSILON);
    }
}
