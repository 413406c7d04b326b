//! Aggregate function descriptors
//!
//! Each aggregate is a pluggable descriptor with the update / combine /
//! finalize split the aggregate operator drives: workers update private
//! states, sink finalize combines them and extracts the result value.

use crate::error::{QuiverError, QuiverResult};
use crate::types::LogicalType;
use crate::value::Value;
use std::collections::HashMap;

/// The built-in aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    /// `count(*)`: counts tuples, never sees a value
    CountStar,
    /// `count(expr)`: counts non-null values
    Count,
    Sum,
    Min,
    Max,
    Avg,
    /// `collect(expr)`: gathers non-null values into a list
    Collect,
}

/// Descriptor resolved by the binder for an aggregate call
#[derive(Debug, Clone)]
pub struct AggregateDescriptor {
    pub name: String,
    pub kind: AggregateKind,
}

impl AggregateDescriptor {
    /// Result type given the argument type (`None` for `count(*)`)
    pub fn return_type(&self, arg: Option<&LogicalType>) -> QuiverResult<LogicalType> {
        match self.kind {
            AggregateKind::CountStar | AggregateKind::Count => Ok(LogicalType::Int64),
            AggregateKind::Avg => Ok(LogicalType::Double),
            AggregateKind::Sum | AggregateKind::Min | AggregateKind::Max => {
                let arg = arg.ok_or_else(|| {
                    QuiverError::binder(format!("{} requires an argument", self.name))
                })?;
                if self.kind == AggregateKind::Sum && !arg.is_numeric() {
                    return Err(QuiverError::binder(format!(
                        "SUM is not defined on type {arg}"
                    )));
                }
                Ok(arg.clone())
            }
            AggregateKind::Collect => {
                let arg = arg.ok_or_else(|| {
                    QuiverError::binder(format!("{} requires an argument", self.name))
                })?;
                Ok(LogicalType::List(Box::new(arg.clone())))
            }
        }
    }

    pub fn init_state(&self) -> AggregateState {
        match self.kind {
            AggregateKind::CountStar | AggregateKind::Count => AggregateState::Count(0),
            AggregateKind::Sum => AggregateState::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
                seen: false,
            },
            AggregateKind::Min | AggregateKind::Max => AggregateState::MinMax(None),
            AggregateKind::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
            AggregateKind::Collect => AggregateState::Collect(Vec::new()),
        }
    }
}

/// Running state of one aggregate inside one hash-table entry
#[derive(Debug, Clone)]
pub enum AggregateState {
    Count(i64),
    Sum {
        int: i128,
        float: f64,
        is_float: bool,
        seen: bool,
    },
    MinMax(Option<Value>),
    Avg {
        sum: f64,
        count: i64,
    },
    Collect(Vec<Value>),
}

impl AggregateState {
    /// Fold one input into the state. `value` is `None` for `count(*)`;
    /// null values are skipped by every aggregate. `multiplicity` repeats
    /// the input without re-evaluating it.
    pub fn update(
        &mut self,
        kind: AggregateKind,
        value: Option<&Value>,
        multiplicity: u64,
    ) -> QuiverResult<()> {
        if multiplicity == 0 {
            return Ok(());
        }
        match (self, kind) {
            (AggregateState::Count(n), AggregateKind::CountStar) => {
                *n += multiplicity as i64;
            }
            (AggregateState::Count(n), AggregateKind::Count) => {
                if value.is_some_and(|v| !v.is_null()) {
                    *n += multiplicity as i64;
                }
            }
            (
                AggregateState::Sum {
                    int,
                    float,
                    is_float,
                    seen,
                },
                AggregateKind::Sum,
            ) => {
                let Some(v) = value.filter(|v| !v.is_null()) else {
                    return Ok(());
                };
                *seen = true;
                if let Some(x) = v.as_int128() {
                    let add = x
                        .checked_mul(i128::from(multiplicity))
                        .ok_or_else(|| QuiverError::runtime("SUM overflow"))?;
                    *int = int
                        .checked_add(add)
                        .ok_or_else(|| QuiverError::runtime("SUM overflow"))?;
                } else if let Some(x) = v.as_f64() {
                    *is_float = true;
                    *float += x * multiplicity as f64;
                } else {
                    return Err(QuiverError::runtime("SUM over non-numeric value"));
                }
            }
            (AggregateState::MinMax(best), AggregateKind::Min) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    if best.as_ref().map_or(true, |b| v.total_cmp(b).is_lt()) {
                        *best = Some(v.clone());
                    }
                }
            }
            (AggregateState::MinMax(best), AggregateKind::Max) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    if best.as_ref().map_or(true, |b| v.total_cmp(b).is_gt()) {
                        *best = Some(v.clone());
                    }
                }
            }
            (AggregateState::Avg { sum, count }, AggregateKind::Avg) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    let x = v
                        .as_f64()
                        .ok_or_else(|| QuiverError::runtime("AVG over non-numeric value"))?;
                    *sum += x * multiplicity as f64;
                    *count += multiplicity as i64;
                }
            }
            (AggregateState::Collect(items), AggregateKind::Collect) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    for _ in 0..multiplicity {
                        items.push(v.clone());
                    }
                }
            }
            _ => {
                return Err(QuiverError::internal(
                    "aggregate state does not match its descriptor",
                ))
            }
        }
        Ok(())
    }

    /// Merge a partial state from another worker
    pub fn combine(&mut self, other: &AggregateState, kind: AggregateKind) -> QuiverResult<()> {
        match (self, other) {
            (AggregateState::Count(a), AggregateState::Count(b)) => *a += b,
            (
                AggregateState::Sum {
                    int,
                    float,
                    is_float,
                    seen,
                },
                AggregateState::Sum {
                    int: oi,
                    float: of,
                    is_float: off,
                    seen: os,
                },
            ) => {
                *int = int
                    .checked_add(*oi)
                    .ok_or_else(|| QuiverError::runtime("SUM overflow"))?;
                *float += of;
                *is_float |= off;
                *seen |= os;
            }
            (AggregateState::MinMax(a), AggregateState::MinMax(Some(b))) => {
                let keep_other = match (&a, kind) {
                    (None, _) => true,
                    (Some(cur), AggregateKind::Min) => b.total_cmp(cur).is_lt(),
                    (Some(cur), AggregateKind::Max) => b.total_cmp(cur).is_gt(),
                    _ => false,
                };
                if keep_other {
                    *a = Some(b.clone());
                }
            }
            (AggregateState::MinMax(_), AggregateState::MinMax(None)) => {}
            (
                AggregateState::Avg { sum, count },
                AggregateState::Avg {
                    sum: os,
                    count: oc,
                },
            ) => {
                *sum += os;
                *count += oc;
            }
            (AggregateState::Collect(a), AggregateState::Collect(b)) => {
                a.extend(b.iter().cloned());
            }
            _ => {
                return Err(QuiverError::internal(
                    "cannot combine mismatched aggregate states",
                ))
            }
        }
        Ok(())
    }

    /// Extract the final value, typed as `out_ty`
    pub fn finalize(&self, out_ty: &LogicalType) -> QuiverResult<Value> {
        Ok(match self {
            AggregateState::Count(n) => Value::Int64(*n),
            AggregateState::Sum {
                int,
                float,
                is_float,
                seen,
            } => {
                if !seen {
                    Value::Null(out_ty.clone())
                } else if *is_float {
                    let total = *float + *int as f64;
                    if *out_ty == LogicalType::Float {
                        Value::Float(total as f32)
                    } else {
                        Value::Double(total)
                    }
                } else {
                    Value::from_int128(*int, out_ty)
                        .ok_or_else(|| QuiverError::runtime("SUM overflow"))?
                }
            }
            AggregateState::MinMax(best) => best
                .clone()
                .unwrap_or_else(|| Value::Null(out_ty.clone())),
            AggregateState::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null(LogicalType::Double)
                } else {
                    Value::Double(sum / *count as f64)
                }
            }
            AggregateState::Collect(items) => {
                let elem = match out_ty {
                    LogicalType::List(e) => (**e).clone(),
                    _ => LogicalType::Any,
                };
                Value::List(elem, items.clone())
            }
        })
    }
}

pub(super) fn register_builtins(registry: &mut HashMap<String, AggregateDescriptor>) {
    for (name, kind) in [
        ("COUNT_STAR", AggregateKind::CountStar),
        ("COUNT", AggregateKind::Count),
        ("SUM", AggregateKind::Sum),
        ("MIN", AggregateKind::Min),
        ("MAX", AggregateKind::Max),
        ("AVG", AggregateKind::Avg),
        ("COLLECT", AggregateKind::Collect),
    ] {
        registry.insert(
            name.to_string(),
            AggregateDescriptor {
                name: name.to_string(),
                kind,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: AggregateKind) -> AggregateDescriptor {
        AggregateDescriptor {
            name: format!("{kind:?}"),
            kind,
        }
    }

    #[test]
    fn test_count_star_counts_multiplicity() {
        let d = descriptor(AggregateKind::CountStar);
        let mut state = d.init_state();
        state.update(d.kind, None, 1).expect("update");
        state.update(d.kind, None, 3).expect("update");
        assert_eq!(
            state.finalize(&LogicalType::Int64).expect("finalize"),
            Value::Int64(4)
        );
    }

    #[test]
    fn test_count_skips_nulls() {
        let d = descriptor(AggregateKind::Count);
        let mut state = d.init_state();
        state
            .update(d.kind, Some(&Value::Int64(1)), 1)
            .expect("update");
        state
            .update(d.kind, Some(&Value::Null(LogicalType::Int64)), 1)
            .expect("update");
        assert_eq!(
            state.finalize(&LogicalType::Int64).expect("finalize"),
            Value::Int64(1)
        );
    }

    #[test]
    fn test_sum_and_combine() {
        let d = descriptor(AggregateKind::Sum);
        let mut a = d.init_state();
        a.update(d.kind, Some(&Value::Int64(100)), 1).expect("update");
        let mut b = d.init_state();
        b.update(d.kind, Some(&Value::Int64(200)), 1).expect("update");
        a.combine(&b, d.kind).expect("combine");
        assert_eq!(
            a.finalize(&LogicalType::Int64).expect("finalize"),
            Value::Int64(300)
        );
    }

    #[test]
    fn test_sum_empty_is_null() {
        let d = descriptor(AggregateKind::Sum);
        let state = d.init_state();
        assert!(state.finalize(&LogicalType::Int64).expect("finalize").is_null());
    }

    #[test]
    fn test_min_max() {
        let min = descriptor(AggregateKind::Min);
        let max = descriptor(AggregateKind::Max);
        let mut lo = min.init_state();
        let mut hi = max.init_state();
        for v in [3i64, 1, 2] {
            lo.update(min.kind, Some(&Value::Int64(v)), 1).expect("update");
            hi.update(max.kind, Some(&Value::Int64(v)), 1).expect("update");
        }
        assert_eq!(
            lo.finalize(&LogicalType::Int64).expect("finalize"),
            Value::Int64(1)
        );
        assert_eq!(
            hi.finalize(&LogicalType::Int64).expect("finalize"),
            Value::Int64(3)
        );
    }

    #[test]
    fn test_avg() {
        let d = descriptor(AggregateKind::Avg);
        let mut state = d.init_state();
        state.update(d.kind, Some(&Value::Int64(1)), 1).expect("update");
        state.update(d.kind, Some(&Value::Int64(2)), 1).expect("update");
        assert_eq!(
            state.finalize(&LogicalType::Double).expect("finalize"),
            Value::Double(1.5)
        );
    }

    #[test]
    fn test_sum_overflow() {
        let d = descriptor(AggregateKind::Sum);
        let mut state = d.init_state();
        state
            .update(d.kind, Some(&Value::Int64(i64::MAX)), 1)
            .expect("update");
        state
            .update(d.kind, Some(&Value::Int64(i64::MAX)), 1)
            .expect("update");
        // i128 accumulator holds it, but narrowing back to INT64 fails.
        assert!(state.finalize(&LogicalType::Int64).is_err());
    }

    #[test]
    fn test_return_types() {
        assert_eq!(
            descriptor(AggregateKind::Count)
                .return_type(Some(&LogicalType::String))
                .expect("count"),
            LogicalType::Int64
        );
        assert_eq!(
            descriptor(AggregateKind::Avg)
                .return_type(Some(&LogicalType::Int64))
                .expect("avg"),
            LogicalType::Double
        );
        assert!(descriptor(AggregateKind::Sum)
            .return_type(Some(&LogicalType::String))
            .is_err());
        assert_eq!(
            descriptor(AggregateKind::Collect)
                .return_type(Some(&LogicalType::Int64))
                .expect("collect"),
            LogicalType::List(Box::new(LogicalType::Int64))
        );
    }
}
