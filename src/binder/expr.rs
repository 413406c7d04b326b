//! Expression binding
//!
//! Turns parsed expressions into typed bound expressions: scope lookups
//! for variables, catalog lookups for properties, overload resolution for
//! functions, and legality checks for casts.

use super::Binder;
use crate::ast::ParsedExpression;
use crate::error::{QuiverError, QuiverResult};
use crate::expression::{ExistsHop, Expression, ExpressionKind};
use crate::types::{ExtendDirection, LogicalType};

/// Function names rendered infix in unique names
const INFIX: &[&str] = &[
    "+", "-", "*", "/", "%", "=", "<>", "<", "<=", ">", ">=", "AND", "OR",
];

impl Binder<'_> {
    pub(super) fn bind_expression(
        &mut self,
        parsed: &ParsedExpression,
    ) -> QuiverResult<Expression> {
        match parsed {
            ParsedExpression::Literal(v) => Ok(Expression::literal(v.clone())),
            ParsedExpression::Parameter(name) => {
                let value = self.parameters.get(name).ok_or_else(|| {
                    QuiverError::binder(format!("Parameter ${name} has no bound value."))
                })?;
                Ok(Expression::new(
                    ExpressionKind::Parameter { name: name.clone() },
                    value.data_type(),
                    format!("${name}"),
                ))
            }
            ParsedExpression::Variable(name) => self.scope().get(name).cloned().ok_or_else(|| {
                QuiverError::binder(format!("Variable {name} is not in scope."))
            }),
            ParsedExpression::Property(variable, property) => {
                self.bind_property(variable, property)
            }
            ParsedExpression::FunctionCall {
                name,
                args,
                distinct,
            } => self.bind_function(name, args, *distinct),
            ParsedExpression::Case {
                branches,
                else_expr,
            } => self.bind_case(branches, else_expr.as_deref()),
            ParsedExpression::Cast { expr, target } => self.bind_cast(expr, target),
            ParsedExpression::Exists(query) => self.bind_exists(query),
            ParsedExpression::Star => Err(QuiverError::binder(
                "* is only allowed inside count(*).",
            )),
        }
    }

    fn bind_property(&mut self, variable: &str, property: &str) -> QuiverResult<Expression> {
        let var = self
            .scope()
            .get(variable)
            .cloned()
            .ok_or_else(|| QuiverError::binder(format!("Variable {variable} is not in scope.")))?;
        match var.ty {
            LogicalType::Node(table_id) => {
                let entry = self.catalog.node_table_by_id(table_id)?;
                let idx = entry.property_idx(property).ok_or_else(|| {
                    QuiverError::binder(format!(
                        "{property} is not a property of node table {}.",
                        entry.name
                    ))
                })?;
                let prop = &entry.properties[idx];
                Ok(Expression::new(
                    ExpressionKind::Property {
                        variable: variable.to_string(),
                        table_id,
                        property_idx: idx,
                        is_primary_key: prop.primary_key,
                    },
                    prop.ty.clone(),
                    format!("{variable}.{property}"),
                ))
            }
            LogicalType::Rel(table_id) => {
                let entry = self.catalog.rel_table_by_id(table_id)?;
                let idx = entry.property_idx(property).ok_or_else(|| {
                    QuiverError::binder(format!(
                        "{property} is not a property of rel table {}.",
                        entry.name
                    ))
                })?;
                let prop = &entry.properties[idx];
                Ok(Expression::new(
                    ExpressionKind::Property {
                        variable: variable.to_string(),
                        table_id,
                        property_idx: idx,
                        is_primary_key: false,
                    },
                    prop.ty.clone(),
                    format!("{variable}.{property}"),
                ))
            }
            other => Err(QuiverError::binder(format!(
                "{variable} of type {other} has no properties."
            ))),
        }
    }

    fn bind_function(
        &mut self,
        name: &str,
        args: &[ParsedExpression],
        distinct: bool,
    ) -> QuiverResult<Expression> {
        let upper = name.to_uppercase();
        let is_count_star =
            upper == "COUNT" && args.len() == 1 && matches!(args[0], ParsedExpression::Star);
        if is_count_star || self.functions.is_aggregate(&upper) {
            return self.bind_aggregate(&upper, args, distinct, is_count_star);
        }
        if distinct {
            return Err(QuiverError::binder(format!(
                "DISTINCT is only allowed on aggregate functions, not {name}."
            )));
        }
        let mut bound_args = Vec::with_capacity(args.len());
        for arg in args {
            bound_args.push(self.bind_expression(arg)?);
        }
        let arg_types: Vec<LogicalType> = bound_args.iter().map(|a| a.ty.clone()).collect();
        let (_, ret) = self.functions.resolve_scalar(name, &arg_types)?;
        let display = if INFIX.contains(&upper.as_str()) && bound_args.len() == 2 {
            format!("{} {} {}", bound_args[0].name, upper, bound_args[1].name)
        } else if INFIX.contains(&upper.as_str()) && bound_args.len() == 1 {
            format!("{} {}", upper, bound_args[0].name)
        } else {
            format!(
                "{}({})",
                upper,
                bound_args
                    .iter()
                    .map(|a| a.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        Ok(Expression::new(
            ExpressionKind::ScalarFunction {
                function: upper,
                args: bound_args,
            },
            ret,
            display,
        ))
    }

    fn bind_aggregate(
        &mut self,
        name: &str,
        args: &[ParsedExpression],
        distinct: bool,
        is_count_star: bool,
    ) -> QuiverResult<Expression> {
        if is_count_star {
            let descriptor = self.functions.aggregate("COUNT_STAR")?;
            let ty = descriptor.return_type(None)?;
            return Ok(Expression::new(
                ExpressionKind::Aggregate {
                    function: "COUNT_STAR".to_string(),
                    distinct: false,
                    child: None,
                },
                ty,
                "COUNT(*)",
            ));
        }
        if args.len() != 1 {
            return Err(QuiverError::binder(format!(
                "{name} expects exactly one argument."
            )));
        }
        let child = self.bind_expression(&args[0])?;
        let descriptor = self.functions.aggregate(name)?;
        let ty = descriptor.return_type(Some(&child.ty))?;
        let display = if distinct {
            format!("{}(DISTINCT {})", name, child.name)
        } else {
            format!("{}({})", name, child.name)
        };
        Ok(Expression::new(
            ExpressionKind::Aggregate {
                function: name.to_string(),
                distinct,
                child: Some(Box::new(child)),
            },
            ty,
            display,
        ))
    }

    fn bind_case(
        &mut self,
        branches: &[(ParsedExpression, ParsedExpression)],
        else_expr: Option<&ParsedExpression>,
    ) -> QuiverResult<Expression> {
        if branches.is_empty() {
            return Err(QuiverError::binder("CASE requires at least one WHEN."));
        }
        let mut bound_branches = Vec::with_capacity(branches.len());
        let mut result_ty = LogicalType::Any;
        for (when, then) in branches {
            let when = self.bind_expression(when)?;
            if when.ty != LogicalType::Bool && when.ty != LogicalType::Any {
                return Err(QuiverError::binder(format!(
                    "CASE WHEN expects a boolean, got {}",
                    when.ty
                )));
            }
            let then = self.bind_expression(then)?;
            result_ty = LogicalType::promote(&result_ty, &then.ty).ok_or_else(|| {
                QuiverError::binder("CASE branches must share a common type.")
            })?;
            bound_branches.push((when, then));
        }
        let bound_else = match else_expr {
            Some(e) => {
                let e = self.bind_expression(e)?;
                result_ty = LogicalType::promote(&result_ty, &e.ty).ok_or_else(|| {
                    QuiverError::binder("CASE branches must share a common type.")
                })?;
                Some(Box::new(e))
            }
            None => None,
        };
        let name = format!(
            "CASE WHEN {} THEN {} ...",
            bound_branches[0].0.name, bound_branches[0].1.name
        );
        Ok(Expression::new(
            ExpressionKind::Case {
                branches: bound_branches,
                else_expr: bound_else,
            },
            result_ty,
            name,
        ))
    }

    fn bind_cast(
        &mut self,
        expr: &ParsedExpression,
        target: &LogicalType,
    ) -> QuiverResult<Expression> {
        let child = self.bind_expression(expr)?;
        if child.ty == *target {
            return Ok(child);
        }
        if child.ty != LogicalType::Any && !can_explicit_cast(&child.ty, target) {
            return Err(QuiverError::binder(format!(
                "Illegal cast from {} to {target}.",
                child.ty
            )));
        }
        let name = format!("CAST({} AS {target})", child.name);
        Ok(Expression::new(
            ExpressionKind::Cast {
                child: Box::new(child),
            },
            target.clone(),
            name,
        ))
    }

    fn bind_exists(&mut self, query: &crate::ast::ParsedQuery) -> QuiverResult<Expression> {
        let chain = match query.patterns.as_slice() {
            [chain] => chain,
            _ => {
                return Err(QuiverError::binder(
                    "EXISTS expects exactly one pattern chain.",
                ))
            }
        };
        let start = self
            .scope()
            .get(&chain.start.variable)
            .cloned()
            .ok_or_else(|| {
                QuiverError::binder(format!(
                    "EXISTS pattern must start at a bound variable; {} is not in scope.",
                    chain.start.variable
                ))
            })?;
        let LogicalType::Node(mut current_table) = start.ty else {
            return Err(QuiverError::binder(
                "EXISTS pattern must start at a node variable.",
            ));
        };

        self.push_scope();
        let mut hops = Vec::with_capacity(chain.hops.len());
        let result = (|| -> QuiverResult<()> {
            for (rel, next) in &chain.hops {
                let label = rel.label.as_ref().ok_or_else(|| {
                    QuiverError::binder("Relationship patterns must carry a label.")
                })?;
                let entry = self.catalog.rel_table(label)?;
                let (expect_from, expect_to) = match rel.direction {
                    ExtendDirection::Forward => (entry.src_table, entry.dst_table),
                    ExtendDirection::Backward => (entry.dst_table, entry.src_table),
                };
                if current_table != expect_from {
                    return Err(QuiverError::binder(format!(
                        "Rel table {label} cannot extend this EXISTS pattern."
                    )));
                }
                let dst_table = match &next.label {
                    Some(l) => {
                        let id = self.catalog.node_table(l)?.id;
                        if id != expect_to {
                            return Err(QuiverError::binder(format!(
                                "EXISTS endpoint (:{l}) does not match rel table {label}."
                            )));
                        }
                        Some(id)
                    }
                    None => None,
                };
                hops.push(ExistsHop {
                    rel_table: entry.id,
                    direction: rel.direction,
                    dst_table,
                });
                current_table = expect_to;
            }
            Ok(())
        })();
        self.pop_scope();
        result?;

        let name = format!("EXISTS {{ ({})-[*{}]->() }}", start.name, hops.len());
        Ok(Expression::new(
            ExpressionKind::ExistsSubquery {
                start_variable: start.name,
                hops,
            },
            LogicalType::Bool,
            name,
        ))
    }
}

/// Explicit casts allowed beyond the implicit lattice
fn can_explicit_cast(from: &LogicalType, to: &LogicalType) -> bool {
    if to.accepts(from) {
        return true;
    }
    match (from, to) {
        // Everything renders to a string.
        (_, LogicalType::String) => true,
        // Strings parse into these.
        (LogicalType::String, t) if t.is_numeric() => true,
        (
            LogicalType::String,
            LogicalType::Bool | LogicalType::Date | LogicalType::Timestamp | LogicalType::Uuid,
        ) => true,
        // Numeric narrowing is explicit-only.
        (f, t) if f.is_numeric() && t.is_numeric() => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::catalog::{Catalog, PropertyDef};
    use crate::function::FunctionRegistry;
    use crate::value::Value;
    use std::collections::HashMap;

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

    fn bind_in_query(expr: ParsedExpression) -> QuiverResult<Expression> {
        let catalog = catalog();
        let functions = FunctionRegistry::with_builtins();
        let params = HashMap::new();
        let mut binder = Binder::new(&catalog, &functions, &params);
        let q = match_(node("p", "person")).ret([expr]).build();
        let bound = binder.bind(&crate::ast::ParsedStatement::Query(q))?;
        match bound.kind {
            super::super::BoundStatementKind::Query(q) => {
                Ok(q.projections.into_iter().next().expect("one projection"))
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_infix_naming() {
        let e = bind_in_query(add(prop("p", "ID"), lit_i64(1))).expect("bind");
        assert_eq!(e.name, "p.ID + 1");
        assert_eq!(e.ty, LogicalType::Int64);
    }

    #[test]
    fn test_property_primary_key_flag() {
        let e = bind_in_query(prop("p", "ID")).expect("bind");
        match e.kind {
            ExpressionKind::Property {
                is_primary_key, ..
            } => assert!(is_primary_key),
            _ => panic!("expected property"),
        }
    }

    #[test]
    fn test_count_star() {
        let e = bind_in_query(count_star()).expect("bind");
        assert_eq!(e.name, "COUNT(*)");
        assert_eq!(e.ty, LogicalType::Int64);
        assert!(e.is_aggregate());
    }

    #[test]
    fn test_aggregate_distinct_naming() {
        let e = bind_in_query(ParsedExpression::FunctionCall {
            name: "count".to_string(),
            args: vec![prop("p", "fName")],
            distinct: true,
        })
        .expect("bind");
        assert_eq!(e.name, "COUNT(DISTINCT p.fName)");
    }

    #[test]
    fn test_distinct_on_scalar_rejected() {
        let err = bind_in_query(ParsedExpression::FunctionCall {
            name: "lower".to_string(),
            args: vec![prop("p", "fName")],
            distinct: true,
        })
        .expect_err("distinct scalar");
        assert!(err.to_string().contains("DISTINCT"));
    }

    #[test]
    fn test_illegal_cast_rejected() {
        let err = bind_in_query(cast(
            fcall("list_creation", [lit_i64(1)]),
            LogicalType::Bool,
        ))
        .expect_err("illegal cast");
        assert!(err.to_string().contains("Illegal cast"));
    }

    #[test]
    fn test_string_to_int_cast_allowed() {
        let e = bind_in_query(cast(lit_str("42"), LogicalType::Int64)).expect("bind");
        assert_eq!(e.ty, LogicalType::Int64);
        assert!(matches!(e.kind, ExpressionKind::Cast { .. }));
    }

    #[test]
    fn test_exists_binds_hops() {
        let inner = match_(node_any("p"))
            .hop(rel_to("knows"), node_any("x"))
            .build();
        let e = bind_in_query(ParsedExpression::Exists(Box::new(inner))).expect("bind");
        assert_eq!(e.ty, LogicalType::Bool);
        match e.kind {
            ExpressionKind::ExistsSubquery {
                start_variable,
                hops,
            } => {
                assert_eq!(start_variable, "p");
                assert_eq!(hops.len(), 1);
            }
            _ => panic!("expected exists"),
        }
    }

    #[test]
    fn test_star_outside_count_rejected() {
        let err = bind_in_query(ParsedExpression::Star).expect_err("bare star");
        assert!(err.to_string().contains("count(*)"));
    }

    #[test]
    fn test_parameter_display_name() {
        let catalog = catalog();
        let functions = FunctionRegistry::with_builtins();
        let mut params = HashMap::new();
        params.insert("q".to_string(), Value::string("alice"));
        let mut binder = Binder::new(&catalog, &functions, &params);
        let e = binder
            .bind_expression(&param("q"))
            .expect("bind");
        assert_eq!(e.name, "$q");
        assert_eq!(e.ty, LogicalType::String);
    }
}
