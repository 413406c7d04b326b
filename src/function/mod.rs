//! # Function Registry
//!
//! Scalar, aggregate and table functions. A function set is a collection
//! of overload descriptors; resolution scores each overload by
//! implicit-cast cost, the minimum-cost overload wins, and a tie is an
//! ambiguity error from the binder.
//!
//! Scalar kernels are plain functions over values; the evaluator applies
//! them over the selected positions of a chunk and handles null
//! propagation unless the overload opts into seeing nulls itself.

pub mod aggregate;

pub use aggregate::{AggregateDescriptor, AggregateState};

use crate::catalog::Catalog;
use crate::error::{QuiverError, QuiverResult};
use crate::types::LogicalType;
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;

/// A vectorless scalar kernel: one output value per input row
pub type ScalarKernel = fn(&[Value]) -> QuiverResult<Value>;

/// How an overload's return type is derived from its arguments
#[derive(Debug, Clone)]
pub enum ReturnType {
    Fixed(LogicalType),
    /// Same type as the given argument
    SameAs(usize),
    /// Numeric promotion over all arguments
    Promoted,
    /// List of the first argument's type
    ListOf(usize),
}

/// One scalar overload
#[derive(Clone)]
pub struct ScalarOverload {
    /// Parameter types; `Any` is a wildcard
    pub params: Vec<LogicalType>,
    /// The last parameter may repeat (e.g. list creation, coalesce)
    pub variadic: bool,
    pub return_type: ReturnType,
    /// Kernel receives nulls instead of the evaluator short-circuiting
    pub null_aware: bool,
    pub kernel: ScalarKernel,
}

impl std::fmt::Debug for ScalarOverload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarOverload")
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .finish()
    }
}

impl ScalarOverload {
    /// Total implicit-cast cost of applying this overload to `args`,
    /// or `None` when the signature does not fit
    fn score(&self, args: &[LogicalType]) -> Option<u32> {
        if self.variadic {
            if args.len() < self.params.len().saturating_sub(1) {
                return None;
            }
        } else if args.len() != self.params.len() {
            return None;
        }
        let mut cost = 0u32;
        for (i, arg) in args.iter().enumerate() {
            let param = if i < self.params.len() {
                &self.params[i]
            } else {
                self.params.last()?
            };
            cost += param.cast_cost(arg)?;
        }
        Some(cost)
    }

    /// Concrete return type for the given argument types
    pub fn resolve_return(&self, args: &[LogicalType]) -> LogicalType {
        match &self.return_type {
            ReturnType::Fixed(t) => t.clone(),
            ReturnType::SameAs(i) => args.get(*i).cloned().unwrap_or(LogicalType::Any),
            ReturnType::Promoted => {
                let mut ty = args.first().cloned().unwrap_or(LogicalType::Any);
                for arg in &args[1.min(args.len())..] {
                    if let Some(p) = LogicalType::promote(&ty, arg) {
                        ty = p;
                    }
                }
                ty
            }
            ReturnType::ListOf(i) => LogicalType::List(Box::new(
                args.get(*i).cloned().unwrap_or(LogicalType::Any),
            )),
        }
    }
}

/// Input handed to a table function
pub struct TableFnInput<'a> {
    pub args: Vec<Value>,
    pub catalog: &'a Catalog,
    /// Standing options of the session (`threads`, `timeout`)
    pub settings: HashMap<String, Value>,
}

/// A table-producing function used by `CALL fn(...)`
#[derive(Clone)]
pub struct TableFunction {
    pub name: String,
    /// Output columns given the call arguments
    pub columns: fn(&[Value]) -> QuiverResult<Vec<(String, LogicalType)>>,
    pub exec: fn(&TableFnInput<'_>) -> QuiverResult<Vec<Vec<Value>>>,
}

/// Registry of all callable functions
#[derive(Clone)]
pub struct FunctionRegistry {
    scalars: HashMap<String, Vec<ScalarOverload>>,
    aggregates: HashMap<String, AggregateDescriptor>,
    tables: HashMap<String, TableFunction>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry {
            scalars: HashMap::new(),
            aggregates: HashMap::new(),
            tables: HashMap::new(),
        };
        registry.register_builtin_scalars();
        aggregate::register_builtins(&mut registry.aggregates);
        registry.register_builtin_tables();
        registry
    }

    pub fn add_scalar(&mut self, name: &str, overload: ScalarOverload) {
        self.scalars
            .entry(name.to_uppercase())
            .or_default()
            .push(overload);
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains_key(&name.to_uppercase())
    }

    pub fn aggregate(&self, name: &str) -> QuiverResult<&AggregateDescriptor> {
        self.aggregates.get(&name.to_uppercase()).ok_or_else(|| {
            QuiverError::catalog(format!("Aggregate function {name} does not exist."))
        })
    }

    pub fn table_function(&self, name: &str) -> QuiverResult<&TableFunction> {
        self.tables.get(&name.to_uppercase()).ok_or_else(|| {
            QuiverError::catalog(format!("Table function {name} does not exist."))
        })
    }

    /// Resolve a scalar call: minimum total cast cost wins, a tie is
    /// ambiguous, no candidate is a catalog miss.
    pub fn resolve_scalar(
        &self,
        name: &str,
        args: &[LogicalType],
    ) -> QuiverResult<(&ScalarOverload, LogicalType)> {
        let overloads = self.scalars.get(&name.to_uppercase()).ok_or_else(|| {
            QuiverError::catalog(format!("Function {name} does not exist."))
        })?;
        let mut best: Option<(&ScalarOverload, u32)> = None;
        let mut tied = false;
        for overload in overloads {
            if let Some(cost) = overload.score(args) {
                match best {
                    None => best = Some((overload, cost)),
                    Some((_, best_cost)) if cost < best_cost => {
                        best = Some((overload, cost));
                        tied = false;
                    }
                    Some((_, best_cost)) if cost == best_cost => tied = true,
                    Some(_) => {}
                }
            }
        }
        let (overload, _) = best.ok_or_else(|| {
            QuiverError::binder(format!(
                "Cannot match a function overload for {name}({}).",
                args.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        if tied {
            return Err(QuiverError::binder(format!(
                "Ambiguous function call {name}: more than one overload matches at equal cost."
            )));
        }
        let ret = overload.resolve_return(args);
        Ok((overload, ret))
    }

    fn register_builtin_scalars(&mut self) {
        use LogicalType::*;

        let numeric_binary = |kernel: ScalarKernel| ScalarOverload {
            params: vec![Any, Any],
            variadic: false,
            return_type: ReturnType::Promoted,
            null_aware: false,
            kernel,
        };
        self.add_scalar("+", numeric_binary(kernels::add));
        self.add_scalar("-", numeric_binary(kernels::sub));
        self.add_scalar("*", numeric_binary(kernels::mul));
        self.add_scalar("/", numeric_binary(kernels::div));
        self.add_scalar("%", numeric_binary(kernels::rem));

        let comparison = |kernel: ScalarKernel| ScalarOverload {
            params: vec![Any, Any],
            variadic: false,
            return_type: ReturnType::Fixed(Bool),
            null_aware: false,
            kernel,
        };
        self.add_scalar("=", comparison(kernels::eq));
        self.add_scalar("<>", comparison(kernels::neq));
        self.add_scalar("<", comparison(kernels::lt));
        self.add_scalar("<=", comparison(kernels::le));
        self.add_scalar(">", comparison(kernels::gt));
        self.add_scalar(">=", comparison(kernels::ge));

        self.add_scalar(
            "AND",
            ScalarOverload {
                params: vec![Bool, Bool],
                variadic: false,
                return_type: ReturnType::Fixed(Bool),
                null_aware: true,
                kernel: kernels::and,
            },
        );
        self.add_scalar(
            "OR",
            ScalarOverload {
                params: vec![Bool, Bool],
                variadic: false,
                return_type: ReturnType::Fixed(Bool),
                null_aware: true,
                kernel: kernels::or,
            },
        );
        self.add_scalar(
            "NOT",
            ScalarOverload {
                params: vec![Bool],
                variadic: false,
                return_type: ReturnType::Fixed(Bool),
                null_aware: false,
                kernel: kernels::not,
            },
        );

        let null_check = |kernel: ScalarKernel| ScalarOverload {
            params: vec![Any],
            variadic: false,
            return_type: ReturnType::Fixed(Bool),
            null_aware: true,
            kernel,
        };
        self.add_scalar("IS_NULL", null_check(kernels::is_null));
        self.add_scalar("IS_NOT_NULL", null_check(kernels::is_not_null));
        self.add_scalar(
            "COALESCE",
            ScalarOverload {
                params: vec![Any],
                variadic: true,
                return_type: ReturnType::SameAs(0),
                null_aware: true,
                kernel: kernels::coalesce,
            },
        );

        let string_unary = |kernel: ScalarKernel| ScalarOverload {
            params: vec![String],
            variadic: false,
            return_type: ReturnType::Fixed(String),
            null_aware: false,
            kernel,
        };
        self.add_scalar("LOWER", string_unary(kernels::lower));
        self.add_scalar("UPPER", string_unary(kernels::upper));
        self.add_scalar(
            "CONCAT",
            ScalarOverload {
                params: vec![String],
                variadic: true,
                return_type: ReturnType::Fixed(String),
                null_aware: false,
                kernel: kernels::concat,
            },
        );
        let string_predicate = |kernel: ScalarKernel| ScalarOverload {
            params: vec![String, String],
            variadic: false,
            return_type: ReturnType::Fixed(Bool),
            null_aware: false,
            kernel,
        };
        self.add_scalar("CONTAINS", string_predicate(kernels::contains));
        self.add_scalar("STARTS_WITH", string_predicate(kernels::starts_with));
        self.add_scalar("ENDS_WITH", string_predicate(kernels::ends_with));
        self.add_scalar("REGEXP_MATCHES", string_predicate(kernels::regexp_matches));
        self.add_scalar(
            "SUBSTRING",
            ScalarOverload {
                params: vec![String, Int64, Int64],
                variadic: false,
                return_type: ReturnType::Fixed(String),
                null_aware: false,
                kernel: kernels::substring,
            },
        );
        self.add_scalar(
            "SIZE",
            ScalarOverload {
                params: vec![String],
                variadic: false,
                return_type: ReturnType::Fixed(Int64),
                null_aware: false,
                kernel: kernels::string_size,
            },
        );
        self.add_scalar(
            "SIZE",
            ScalarOverload {
                params: vec![List(Box::new(Any))],
                variadic: false,
                return_type: ReturnType::Fixed(Int64),
                null_aware: false,
                kernel: kernels::list_size,
            },
        );

        self.add_scalar(
            "ABS",
            ScalarOverload {
                params: vec![Any],
                variadic: false,
                return_type: ReturnType::SameAs(0),
                null_aware: false,
                kernel: kernels::abs,
            },
        );

        self.add_scalar(
            "LIST_CREATION",
            ScalarOverload {
                params: vec![Any],
                variadic: true,
                return_type: ReturnType::ListOf(0),
                null_aware: true,
                kernel: kernels::list_creation,
            },
        );
        self.add_scalar(
            "LIST_EXTRACT",
            ScalarOverload {
                params: vec![List(Box::new(Any)), Int64],
                variadic: false,
                return_type: ReturnType::Fixed(Any),
                null_aware: false,
                kernel: kernels::list_extract,
            },
        );
    }

    fn register_builtin_tables(&mut self) {
        self.tables.insert(
            "SHOW_TABLES".to_string(),
            TableFunction {
                name: "SHOW_TABLES".to_string(),
                columns: |_| {
                    Ok(vec![
                        ("name".to_string(), LogicalType::String),
                        ("type".to_string(), LogicalType::String),
                    ])
                },
                exec: |input| {
                    let mut rows = Vec::new();
                    for t in input.catalog.node_tables() {
                        rows.push(vec![Value::string(&t.name), Value::string("NODE")]);
                    }
                    for t in input.catalog.rel_tables() {
                        rows.push(vec![Value::string(&t.name), Value::string("REL")]);
                    }
                    Ok(rows)
                },
            },
        );
        self.tables.insert(
            "TABLE_INFO".to_string(),
            TableFunction {
                name: "TABLE_INFO".to_string(),
                columns: |_| {
                    Ok(vec![
                        ("property".to_string(), LogicalType::String),
                        ("type".to_string(), LogicalType::String),
                        ("primary_key".to_string(), LogicalType::Bool),
                    ])
                },
                exec: |input| {
                    let name = input
                        .args
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| QuiverError::binder("TABLE_INFO expects a table name"))?;
                    let entry = input.catalog.node_table(name)?;
                    Ok(entry
                        .properties
                        .iter()
                        .map(|p| {
                            vec![
                                Value::string(&p.name),
                                Value::string(p.ty.to_string()),
                                Value::Bool(p.primary_key),
                            ]
                        })
                        .collect())
                },
            },
        );
        self.tables.insert(
            "CURRENT_SETTING".to_string(),
            TableFunction {
                name: "CURRENT_SETTING".to_string(),
                columns: |args| {
                    let name = args
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or("setting")
                        .to_string();
                    Ok(vec![(name, LogicalType::String)])
                },
                exec: |input| {
                    let name = input
                        .args
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            QuiverError::binder("CURRENT_SETTING expects a setting name")
                        })?;
                    let value = input
                        .settings
                        .get(name)
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    Ok(vec![vec![Value::string(value)]])
                },
            },
        );
    }
}

/// Built-in scalar kernels
mod kernels {
    use super::*;
    use std::cmp::Ordering;

    fn numeric_pair(args: &[Value]) -> QuiverResult<(&Value, &Value)> {
        if args.len() != 2 {
            return Err(QuiverError::internal("binary kernel got wrong arity"));
        }
        Ok((&args[0], &args[1]))
    }

    /// Checked integer arithmetic with float fallback; result narrowed to
    /// the promoted operand type
    fn arith(
        args: &[Value],
        int_op: fn(i128, i128) -> Option<i128>,
        float_op: fn(f64, f64) -> f64,
        name: &str,
    ) -> QuiverResult<Value> {
        let (a, b) = numeric_pair(args)?;
        let out_ty = LogicalType::promote(&a.data_type(), &b.data_type()).ok_or_else(|| {
            QuiverError::runtime(format!(
                "cannot apply {name} to {} and {}",
                a.data_type(),
                b.data_type()
            ))
        })?;
        if out_ty.is_integer() {
            let (x, y) = match (a.as_int128(), b.as_int128()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(QuiverError::runtime(format!("non-numeric operand to {name}"))),
            };
            let raw = int_op(x, y)
                .ok_or_else(|| QuiverError::runtime(format!("{name} overflow: {x} {name} {y}")))?;
            Value::from_int128(raw, &out_ty).ok_or_else(|| {
                QuiverError::runtime(format!("{name} overflow: result does not fit in {out_ty}"))
            })
        } else {
            let (x, y) = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(QuiverError::runtime(format!("non-numeric operand to {name}"))),
            };
            let out = float_op(x, y);
            if out_ty == LogicalType::Float {
                Ok(Value::Float(out as f32))
            } else {
                Ok(Value::Double(out))
            }
        }
    }

    pub fn add(args: &[Value]) -> QuiverResult<Value> {
        arith(args, i128::checked_add, |x, y| x + y, "+")
    }

    pub fn sub(args: &[Value]) -> QuiverResult<Value> {
        arith(args, i128::checked_sub, |x, y| x - y, "-")
    }

    pub fn mul(args: &[Value]) -> QuiverResult<Value> {
        arith(args, i128::checked_mul, |x, y| x * y, "*")
    }

    pub fn div(args: &[Value]) -> QuiverResult<Value> {
        let (_, b) = numeric_pair(args)?;
        if b.as_int128() == Some(0) {
            return Err(QuiverError::runtime("division by zero"));
        }
        arith(args, i128::checked_div, |x, y| x / y, "/")
    }

    pub fn rem(args: &[Value]) -> QuiverResult<Value> {
        let (_, b) = numeric_pair(args)?;
        if b.as_int128() == Some(0) {
            return Err(QuiverError::runtime("modulo by zero"));
        }
        arith(args, i128::checked_rem, |x, y| x % y, "%")
    }

    fn compare(args: &[Value], accept: fn(Ordering) -> bool) -> QuiverResult<Value> {
        let (a, b) = numeric_pair(args)?;
        Ok(Value::Bool(accept(a.total_cmp(b))))
    }

    pub fn eq(args: &[Value]) -> QuiverResult<Value> {
        compare(args, |o| o == Ordering::Equal)
    }

    pub fn neq(args: &[Value]) -> QuiverResult<Value> {
        compare(args, |o| o != Ordering::Equal)
    }

    pub fn lt(args: &[Value]) -> QuiverResult<Value> {
        compare(args, |o| o == Ordering::Less)
    }

    pub fn le(args: &[Value]) -> QuiverResult<Value> {
        compare(args, |o| o != Ordering::Greater)
    }

    pub fn gt(args: &[Value]) -> QuiverResult<Value> {
        compare(args, |o| o == Ordering::Greater)
    }

    pub fn ge(args: &[Value]) -> QuiverResult<Value> {
        compare(args, |o| o != Ordering::Less)
    }

    /// Three-valued AND: false dominates null
    pub fn and(args: &[Value]) -> QuiverResult<Value> {
        let (a, b) = (&args[0], &args[1]);
        Ok(match (a.as_bool(), b.as_bool()) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Null(LogicalType::Bool),
        })
    }

    /// Three-valued OR: true dominates null
    pub fn or(args: &[Value]) -> QuiverResult<Value> {
        let (a, b) = (&args[0], &args[1]);
        Ok(match (a.as_bool(), b.as_bool()) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Null(LogicalType::Bool),
        })
    }

    pub fn not(args: &[Value]) -> QuiverResult<Value> {
        args[0]
            .as_bool()
            .map(|b| Value::Bool(!b))
            .ok_or_else(|| QuiverError::runtime("NOT expects a boolean"))
    }

    pub fn is_null(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::Bool(args[0].is_null()))
    }

    pub fn is_not_null(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::Bool(!args[0].is_null()))
    }

    pub fn coalesce(args: &[Value]) -> QuiverResult<Value> {
        for arg in args {
            if !arg.is_null() {
                return Ok(arg.clone());
            }
        }
        Ok(args
            .first()
            .cloned()
            .unwrap_or(Value::Null(LogicalType::Any)))
    }

    fn str_arg<'a>(args: &'a [Value], i: usize, name: &str) -> QuiverResult<&'a str> {
        args.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| QuiverError::runtime(format!("{name} expects a string argument")))
    }

    pub fn lower(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::string(str_arg(args, 0, "LOWER")?.to_lowercase()))
    }

    pub fn upper(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::string(str_arg(args, 0, "UPPER")?.to_uppercase()))
    }

    pub fn concat(args: &[Value]) -> QuiverResult<Value> {
        let mut out = String::new();
        for (i, _) in args.iter().enumerate() {
            out.push_str(str_arg(args, i, "CONCAT")?);
        }
        Ok(Value::string(out))
    }

    pub fn contains(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::Bool(
            str_arg(args, 0, "CONTAINS")?.contains(str_arg(args, 1, "CONTAINS")?),
        ))
    }

    pub fn starts_with(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::Bool(
            str_arg(args, 0, "STARTS_WITH")?.starts_with(str_arg(args, 1, "STARTS_WITH")?),
        ))
    }

    pub fn ends_with(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::Bool(
            str_arg(args, 0, "ENDS_WITH")?.ends_with(str_arg(args, 1, "ENDS_WITH")?),
        ))
    }

    pub fn regexp_matches(args: &[Value]) -> QuiverResult<Value> {
        let pattern = str_arg(args, 1, "REGEXP_MATCHES")?;
        let re = Regex::new(pattern)
            .map_err(|e| QuiverError::runtime(format!("invalid regex '{pattern}': {e}")))?;
        Ok(Value::Bool(re.is_match(str_arg(args, 0, "REGEXP_MATCHES")?)))
    }

    /// 1-based start, character semantics
    pub fn substring(args: &[Value]) -> QuiverResult<Value> {
        let s = str_arg(args, 0, "SUBSTRING")?;
        let start = args[1]
            .as_int128()
            .ok_or_else(|| QuiverError::runtime("SUBSTRING expects integer start"))?;
        let len = args[2]
            .as_int128()
            .ok_or_else(|| QuiverError::runtime("SUBSTRING expects integer length"))?;
        let start = (start.max(1) - 1) as usize;
        let len = len.max(0) as usize;
        Ok(Value::string(
            s.chars().skip(start).take(len).collect::<String>(),
        ))
    }

    pub fn string_size(args: &[Value]) -> QuiverResult<Value> {
        Ok(Value::Int64(str_arg(args, 0, "SIZE")?.chars().count() as i64))
    }

    pub fn list_size(args: &[Value]) -> QuiverResult<Value> {
        match &args[0] {
            Value::List(_, items) => Ok(Value::Int64(items.len() as i64)),
            _ => Err(QuiverError::runtime("SIZE expects a list")),
        }
    }

    pub fn abs(args: &[Value]) -> QuiverResult<Value> {
        let v = &args[0];
        if let Some(x) = v.as_int128() {
            let raw = x
                .checked_abs()
                .ok_or_else(|| QuiverError::runtime("ABS overflow"))?;
            return Value::from_int128(raw, &v.data_type())
                .ok_or_else(|| QuiverError::runtime("ABS overflow"));
        }
        match v {
            Value::Float(x) => Ok(Value::Float(x.abs())),
            Value::Double(x) => Ok(Value::Double(x.abs())),
            _ => Err(QuiverError::runtime("ABS expects a numeric argument")),
        }
    }

    pub fn list_creation(args: &[Value]) -> QuiverResult<Value> {
        let elem_ty = args
            .iter()
            .find(|v| !v.is_null())
            .map_or(LogicalType::Any, Value::data_type);
        Ok(Value::List(elem_ty, args.to_vec()))
    }

    /// 1-based extraction, null when out of range
    pub fn list_extract(args: &[Value]) -> QuiverResult<Value> {
        let idx = args[1]
            .as_int128()
            .ok_or_else(|| QuiverError::runtime("LIST_EXTRACT expects integer index"))?;
        match &args[0] {
            Value::List(elem_ty, items) => {
                if idx >= 1 && (idx as usize) <= items.len() {
                    Ok(items[(idx - 1) as usize].clone())
                } else {
                    Ok(Value::Null(elem_ty.clone()))
                }
            }
            _ => Err(QuiverError::runtime("LIST_EXTRACT expects a list")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_prefers_exact_match() {
        let registry = FunctionRegistry::with_builtins();
        // SIZE has a STRING overload and a LIST overload; each argument
        // type picks its own.
        let (_, ret) = registry
            .resolve_scalar("size", &[LogicalType::String])
            .expect("string overload");
        assert_eq!(ret, LogicalType::Int64);
        let (_, ret) = registry
            .resolve_scalar("size", &[LogicalType::List(Box::new(LogicalType::Int64))])
            .expect("list overload");
        assert_eq!(ret, LogicalType::Int64);
    }

    #[test]
    fn test_unknown_function_is_catalog_error() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry
            .resolve_scalar("frobnicate", &[])
            .expect_err("unknown");
        assert!(matches!(err, QuiverError::Catalog(_)));
    }

    #[test]
    fn test_arity_mismatch_is_binder_error() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry
            .resolve_scalar("lower", &[LogicalType::String, LogicalType::String])
            .expect_err("arity");
        assert!(matches!(err, QuiverError::Binder(_)));
    }

    #[test]
    fn test_promoted_return_type() {
        let registry = FunctionRegistry::with_builtins();
        let (_, ret) = registry
            .resolve_scalar("+", &[LogicalType::Int32, LogicalType::Int64])
            .expect("resolve");
        assert_eq!(ret, LogicalType::Int64);
    }

    #[test]
    fn test_add_overflow_raises() {
        let registry = FunctionRegistry::with_builtins();
        let (overload, _) = registry
            .resolve_scalar("+", &[LogicalType::Int64, LogicalType::Int64])
            .expect("resolve");
        let err = (overload.kernel)(&[Value::Int64(i64::MAX), Value::Int64(1)])
            .expect_err("overflow");
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_division_by_zero() {
        let registry = FunctionRegistry::with_builtins();
        let (overload, _) = registry
            .resolve_scalar("/", &[LogicalType::Int64, LogicalType::Int64])
            .expect("resolve");
        let err = (overload.kernel)(&[Value::Int64(1), Value::Int64(0)]).expect_err("div0");
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_three_valued_logic() {
        let registry = FunctionRegistry::with_builtins();
        let (and, _) = registry
            .resolve_scalar("and", &[LogicalType::Bool, LogicalType::Bool])
            .expect("resolve");
        let null = Value::Null(LogicalType::Bool);
        assert_eq!(
            (and.kernel)(&[Value::Bool(false), null.clone()]).expect("and"),
            Value::Bool(false)
        );
        assert!((and.kernel)(&[Value::Bool(true), null].to_vec())
            .expect("and")
            .is_null());
    }

    #[test]
    fn test_table_function_show_tables() {
        let registry = FunctionRegistry::with_builtins();
        let mut catalog = Catalog::new();
        catalog
            .create_node_table(
                "person",
                vec![crate::catalog::PropertyDef {
                    name: "ID".to_string(),
                    ty: LogicalType::Int64,
                    primary_key: true,
                }],
            )
            .expect("create");
        let f = registry.table_function("show_tables").expect("lookup");
        let rows = (f.exec)(&TableFnInput {
            args: vec![],
            catalog: &catalog,
            settings: HashMap::new(),
        })
        .expect("exec");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::string("person"));
    }
}
