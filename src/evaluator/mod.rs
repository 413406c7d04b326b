//! # Expression Evaluators
//!
//! Runtime form of bound expressions. The mapper compiles each
//! expression against a result-set layout: registered expressions become
//! references to vector slots, everything else becomes a computing
//! evaluator that owns its output values.
//!
//! An evaluator's output is either broadcastable (length 1) or aligned
//! with the selected positions of one governing chunk; mixing two
//! governing chunks is an invariant violation the planner's flattening
//! rules prevent.

use crate::error::{QuiverError, QuiverResult};
use crate::execution::context::ExecutionContext;
use crate::expression::{ExistsHop, Expression, ExpressionKind};
use crate::function::{FunctionRegistry, ScalarOverload};
use crate::types::LogicalType;
use crate::value::Value;
use crate::vector::{DataPos, ResultSet};
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;

/// Maps expression names to their vector slots in the result set
pub type ExpressionLayout = HashMap<String, DataPos>;

#[derive(Clone)]
enum EvaluatorKind {
    Literal(Value),
    Parameter { name: String, value: Value },
    Reference { pos: DataPos },
    Function {
        overload: ScalarOverload,
        children: Vec<ExpressionEvaluator>,
    },
    Case {
        branches: Vec<(ExpressionEvaluator, ExpressionEvaluator)>,
        else_expr: Option<Box<ExpressionEvaluator>>,
    },
    Cast { child: Box<ExpressionEvaluator> },
    Exists {
        start: Box<ExpressionEvaluator>,
        hops: Vec<ExistsHop>,
    },
}

/// A compiled expression
#[derive(Clone)]
pub struct ExpressionEvaluator {
    kind: EvaluatorKind,
    out_ty: LogicalType,
    out: Vec<Value>,
    governing: Option<usize>,
}

impl ExpressionEvaluator {
    /// Compile `expr` against the layout. Expressions present in the
    /// layout read their slot; others compute.
    pub fn compile(
        expr: &Expression,
        layout: &ExpressionLayout,
        functions: &FunctionRegistry,
    ) -> QuiverResult<Self> {
        if let Some(pos) = layout.get(&expr.name) {
            return Ok(ExpressionEvaluator {
                kind: EvaluatorKind::Reference { pos: *pos },
                out_ty: expr.ty.clone(),
                out: Vec::new(),
                governing: None,
            });
        }
        let kind = match &expr.kind {
            ExpressionKind::Literal(v) => EvaluatorKind::Literal(v.clone()),
            ExpressionKind::Parameter { name } => EvaluatorKind::Parameter {
                name: name.clone(),
                value: Value::Null(expr.ty.clone()),
            },
            ExpressionKind::Alias { child } | ExpressionKind::Cast { child } => {
                let compiled = Box::new(Self::compile(child, layout, functions)?);
                if matches!(expr.kind, ExpressionKind::Cast { .. }) {
                    EvaluatorKind::Cast { child: compiled }
                } else {
                    return Ok(ExpressionEvaluator {
                        out_ty: expr.ty.clone(),
                        ..*compiled
                    });
                }
            }
            ExpressionKind::ScalarFunction { function, args } => {
                let mut children = Vec::with_capacity(args.len());
                for arg in args {
                    children.push(Self::compile(arg, layout, functions)?);
                }
                let arg_types: Vec<LogicalType> =
                    args.iter().map(|a| a.ty.clone()).collect();
                let (overload, _) = functions.resolve_scalar(function, &arg_types)?;
                EvaluatorKind::Function {
                    overload: overload.clone(),
                    children,
                }
            }
            ExpressionKind::Case {
                branches,
                else_expr,
            } => {
                let mut compiled = Vec::with_capacity(branches.len());
                for (when, then) in branches {
                    compiled.push((
                        Self::compile(when, layout, functions)?,
                        Self::compile(then, layout, functions)?,
                    ));
                }
                let compiled_else = else_expr
                    .as_ref()
                    .map(|e| Self::compile(e, layout, functions).map(Box::new))
                    .transpose()?;
                EvaluatorKind::Case {
                    branches: compiled,
                    else_expr: compiled_else,
                }
            }
            ExpressionKind::ExistsSubquery {
                start_variable,
                hops,
            } => {
                let pos = layout.get(start_variable).ok_or_else(|| {
                    QuiverError::internal(format!(
                        "EXISTS start variable {start_variable} is not in the layout"
                    ))
                })?;
                EvaluatorKind::Exists {
                    start: Box::new(ExpressionEvaluator {
                        kind: EvaluatorKind::Reference { pos: *pos },
                        out_ty: LogicalType::InternalId,
                        out: Vec::new(),
                        governing: None,
                    }),
                    hops: hops.clone(),
                }
            }
            ExpressionKind::NodeVariable { .. }
            | ExpressionKind::RelVariable { .. }
            | ExpressionKind::Property { .. }
            | ExpressionKind::Aggregate { .. } => {
                return Err(QuiverError::internal(format!(
                    "expression {} must be produced upstream but is missing from the layout",
                    expr.name
                )))
            }
        };
        Ok(ExpressionEvaluator {
            kind,
            out_ty: expr.ty.clone(),
            out: Vec::new(),
            governing: None,
        })
    }

    /// Resolve parameters; called once per execution before first use
    pub fn init(&mut self, ctx: &ExecutionContext) -> QuiverResult<()> {
        match &mut self.kind {
            EvaluatorKind::Parameter { name, value } => {
                *value = ctx.parameters.get(name).cloned().ok_or_else(|| {
                    QuiverError::binder(format!("Parameter ${name} has no bound value."))
                })?;
            }
            EvaluatorKind::Function { children, .. } => {
                for c in children {
                    c.init(ctx)?;
                }
            }
            EvaluatorKind::Case {
                branches,
                else_expr,
            } => {
                for (w, t) in branches {
                    w.init(ctx)?;
                    t.init(ctx)?;
                }
                if let Some(e) = else_expr {
                    e.init(ctx)?;
                }
            }
            EvaluatorKind::Cast { child } => child.init(ctx)?,
            EvaluatorKind::Exists { start, .. } => start.init(ctx)?,
            _ => {}
        }
        Ok(())
    }

    /// Values produced by the last `evaluate`; length 1 broadcasts
    pub fn values(&self) -> &[Value] {
        &self.out
    }

    /// Chunk whose selection governs the output alignment, if any
    pub fn governing_chunk(&self) -> Option<usize> {
        self.governing
    }

    pub fn output_type(&self) -> &LogicalType {
        &self.out_ty
    }

    pub fn evaluate(&mut self, rs: &ResultSet, ctx: &ExecutionContext) -> QuiverResult<()> {
        match &mut self.kind {
            EvaluatorKind::Literal(v) => {
                self.out = vec![v.clone()];
                self.governing = None;
            }
            EvaluatorKind::Parameter { value, .. } => {
                self.out = vec![value.clone()];
                self.governing = None;
            }
            EvaluatorKind::Reference { pos } => {
                let state = rs.state(pos.chunk);
                if state.is_flat() {
                    self.out = vec![rs.value(*pos, state.current_pos()).clone()];
                    self.governing = None;
                } else {
                    let vector = rs.vector(*pos);
                    self.out = state
                        .selected_positions()
                        .map(|p| vector.value(p).clone())
                        .collect();
                    self.governing = Some(pos.chunk);
                }
            }
            EvaluatorKind::Function { overload, children } => {
                let mut governing = None;
                for child in children.iter_mut() {
                    child.evaluate(rs, ctx)?;
                    governing = merge_governing(governing, child.governing)?;
                }
                let len = children.iter().map(|c| c.out.len()).max().unwrap_or(1);
                let mut out = Vec::with_capacity(len);
                let mut row_args: Vec<Value> = Vec::with_capacity(children.len());
                for row in 0..len {
                    row_args.clear();
                    for child in children.iter() {
                        row_args.push(broadcast(&child.out, row).clone());
                    }
                    if !overload.null_aware && row_args.iter().any(Value::is_null) {
                        out.push(Value::Null(self.out_ty.clone()));
                    } else {
                        out.push((overload.kernel)(&row_args)?);
                    }
                }
                self.out = out;
                self.governing = governing;
            }
            EvaluatorKind::Case {
                branches,
                else_expr,
            } => {
                let mut governing = None;
                for (when, then) in branches.iter_mut() {
                    when.evaluate(rs, ctx)?;
                    then.evaluate(rs, ctx)?;
                    governing = merge_governing(governing, when.governing)?;
                    governing = merge_governing(governing, then.governing)?;
                }
                if let Some(e) = else_expr.as_mut() {
                    e.evaluate(rs, ctx)?;
                    governing = merge_governing(governing, e.governing)?;
                }
                let len = branches
                    .iter()
                    .flat_map(|(w, t)| [w.out.len(), t.out.len()])
                    .chain(else_expr.iter().map(|e| e.out.len()))
                    .max()
                    .unwrap_or(1);
                let mut out = Vec::with_capacity(len);
                for row in 0..len {
                    let mut chosen = None;
                    for (when, then) in branches.iter() {
                        if broadcast(&when.out, row).as_bool() == Some(true) {
                            chosen = Some(broadcast(&then.out, row).clone());
                            break;
                        }
                    }
                    let value = chosen.unwrap_or_else(|| match else_expr {
                        Some(e) => broadcast(&e.out, row).clone(),
                        None => Value::Null(self.out_ty.clone()),
                    });
                    out.push(value);
                }
                self.out = out;
                self.governing = governing;
            }
            EvaluatorKind::Cast { child } => {
                child.evaluate(rs, ctx)?;
                let mut out = Vec::with_capacity(child.out.len());
                for v in &child.out {
                    out.push(cast_value(v, &self.out_ty)?);
                }
                self.out = out;
                self.governing = child.governing;
            }
            EvaluatorKind::Exists { start, hops } => {
                start.evaluate(rs, ctx)?;
                let mut out = Vec::with_capacity(start.out.len());
                for v in &start.out {
                    match v.as_internal_id() {
                        Some(id) => out.push(Value::Bool(exists_path(id.offset, hops, ctx)?)),
                        None => out.push(Value::Null(LogicalType::Bool)),
                    }
                }
                self.out = out;
                self.governing = start.governing;
            }
        }
        Ok(())
    }
}

fn broadcast(values: &[Value], row: usize) -> &Value {
    if values.len() == 1 {
        &values[0]
    } else {
        &values[row]
    }
}

fn merge_governing(a: Option<usize>, b: Option<usize>) -> QuiverResult<Option<usize>> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(QuiverError::internal(
            "expression reads two unflat groups; a flatten is missing",
        )),
        (Some(x), _) => Ok(Some(x)),
        (None, y) => Ok(y),
    }
}

/// Does a path following exactly `hops` exist from this node offset?
fn exists_path(offset: u64, hops: &[ExistsHop], ctx: &ExecutionContext) -> QuiverResult<bool> {
    let mut frontier = vec![offset];
    for hop in hops {
        let rel = ctx.storage.rel_table(hop.rel_table)?;
        let rel = rel.read();
        let mut next = Vec::new();
        for &node in &frontier {
            for &(nbr, _) in rel.adjacency(node, hop.direction) {
                if !next.contains(&nbr) {
                    next.push(nbr);
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Runtime cast between logical types
pub fn cast_value(v: &Value, target: &LogicalType) -> QuiverResult<Value> {
    if v.is_null() {
        return Ok(Value::Null(target.clone()));
    }
    if v.data_type() == *target {
        return Ok(v.clone());
    }
    let fail = || {
        QuiverError::runtime(format!(
            "Cast failed: {} to {target}",
            v.data_type()
        ))
    };
    match target {
        LogicalType::String => Ok(Value::string(v.to_string())),
        t if t.is_integer() => {
            let raw = if let Some(i) = v.as_int128() {
                i
            } else if let Some(f) = v.as_f64() {
                f.trunc() as i128
            } else if let Some(s) = v.as_str() {
                s.trim().parse::<i128>().map_err(|_| fail())?
            } else {
                return Err(fail());
            };
            Value::from_int128(raw, t).ok_or_else(|| {
                QuiverError::runtime(format!("Cast overflow: {raw} does not fit in {t}"))
            })
        }
        LogicalType::Float | LogicalType::Double => {
            let raw = if let Some(f) = v.as_f64() {
                f
            } else if let Some(s) = v.as_str() {
                s.trim().parse::<f64>().map_err(|_| fail())?
            } else {
                return Err(fail());
            };
            if *target == LogicalType::Float {
                Ok(Value::Float(raw as f32))
            } else {
                Ok(Value::Double(raw))
            }
        }
        LogicalType::Bool => match v.as_str() {
            Some(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            None => Err(fail()),
        },
        LogicalType::Date => match v {
            Value::Timestamp(t) => Ok(Value::Date(t.date_naive())),
            _ => match v.as_str() {
                Some(s) => Ok(Value::Date(
                    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| fail())?,
                )),
                None => Err(fail()),
            },
        },
        LogicalType::Timestamp => match v {
            Value::Date(d) => {
                let dt = d.and_hms_opt(0, 0, 0).ok_or_else(fail)?;
                Ok(Value::Timestamp(Utc.from_utc_datetime(&dt)))
            }
            _ => match v.as_str() {
                Some(s) => {
                    let dt = chrono::NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                        .map_err(|_| fail())?;
                    Ok(Value::Timestamp(Utc.from_utc_datetime(&dt)))
                }
                None => Err(fail()),
            },
        },
        LogicalType::Uuid => match v.as_str() {
            Some(s) => Ok(Value::Uuid(s.trim().parse().map_err(|_| fail())?)),
            None => Err(fail()),
        },
        _ => Err(fail()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_string_to_int() {
        assert_eq!(
            cast_value(&Value::string(" 42 "), &LogicalType::Int64).expect("cast"),
            Value::Int64(42)
        );
        assert!(cast_value(&Value::string("nope"), &LogicalType::Int64).is_err());
    }

    #[test]
    fn test_cast_overflow() {
        let err = cast_value(&Value::Int64(300), &LogicalType::Int8).expect_err("overflow");
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_cast_to_string() {
        assert_eq!(
            cast_value(&Value::Int64(7), &LogicalType::String).expect("cast"),
            Value::string("7")
        );
    }

    #[test]
    fn test_cast_null_stays_null() {
        let out = cast_value(&Value::Null(LogicalType::Int64), &LogicalType::String)
            .expect("cast");
        assert!(out.is_null());
        assert_eq!(out.data_type(), LogicalType::String);
    }

    #[test]
    fn test_cast_date_string() {
        let d = cast_value(&Value::string("2024-02-29"), &LogicalType::Date).expect("cast");
        assert!(matches!(d, Value::Date(_)));
        assert!(cast_value(&Value::string("2023-02-29"), &LogicalType::Date).is_err());
    }

    #[test]
    fn test_merge_governing_conflict() {
        assert!(merge_governing(Some(0), Some(1)).is_err());
        assert_eq!(merge_governing(Some(2), Some(2)).expect("same"), Some(2));
        assert_eq!(merge_governing(None, Some(3)).expect("one"), Some(3));
    }
}
