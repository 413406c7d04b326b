//! # Binder
//!
//! Resolves a parsed statement against the catalog into a bound
//! statement: names become typed expressions, table references become
//! table ids, and every statement gets a result descriptor (column names
//! and types) plus a read-only flag derived by walking the bound tree.
//!
//! Scoping: the binder keeps a stack of frames mapping names to bound
//! expressions. Pattern variables, the UNWIND alias and projection
//! aliases live in the current frame; an EXISTS subpattern pushes a
//! frame. A name may not be rebound to a different type inside one scope.

mod expr;

use crate::ast::{
    AlterOp, CopyOptions, FileFormat, ParsedQuery, ParsedStatement, PatternChain, RecursiveKind,
    UpdateClause,
};
use crate::catalog::{Catalog, PropertyDef};
use crate::error::{QuiverError, QuiverResult};
use crate::expression::{Expression, ExpressionKind};
use crate::function::FunctionRegistry;
use crate::types::{ExtendDirection, LogicalType, TableId};
use crate::value::Value;
use std::collections::HashMap;
use tracing::debug;

/// A node variable of the bound pattern
#[derive(Debug, Clone)]
pub struct BoundNode {
    /// `NodeVariable` expression named after the pattern variable
    pub variable: Expression,
    pub table_id: TableId,
}

/// A rel of the bound pattern, normalized to a traversal from `from_node`
#[derive(Debug, Clone)]
pub struct BoundRel {
    pub rel_table: TableId,
    /// Index into `BoundGraphPattern::nodes`
    pub from_node: usize,
    pub to_node: usize,
    pub direction: ExtendDirection,
    pub variable: Option<Expression>,
    pub recursive: Option<(RecursiveKind, u64, u64)>,
}

/// The bound MATCH pattern of one query
#[derive(Debug, Clone, Default)]
pub struct BoundGraphPattern {
    pub nodes: Vec<BoundNode>,
    pub rels: Vec<BoundRel>,
}

impl BoundGraphPattern {
    pub fn node_idx(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.variable.name == name)
    }
}

/// Bound updating clauses
#[derive(Debug, Clone)]
pub enum BoundUpdate {
    CreateNode {
        table_id: TableId,
        /// One bound expression per table property, in catalog order
        values: Vec<Expression>,
    },
    Delete {
        variable: Expression,
    },
    Set {
        target: Expression,
        value: Expression,
    },
}

/// A bound query
#[derive(Debug, Clone, Default)]
pub struct BoundQuery {
    pub pattern: BoundGraphPattern,
    pub predicate: Option<Expression>,
    /// `(list expression, alias variable)`
    pub unwind: Option<(Expression, Expression)>,
    pub distinct: bool,
    pub projections: Vec<Expression>,
    pub order_by: Vec<(Expression, bool)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub updates: Vec<BoundUpdate>,
}

/// Bound DDL statements
#[derive(Debug, Clone)]
pub enum BoundDdl {
    CreateNodeTable {
        name: String,
        properties: Vec<PropertyDef>,
    },
    CreateRelTable {
        name: String,
        src: String,
        dst: String,
        properties: Vec<PropertyDef>,
    },
    DropTable { name: String },
    Alter { table: String, op: AlterOp },
    CreateSequence { name: String },
    DropSequence { name: String },
}

/// Bound attach / detach / use
#[derive(Debug, Clone)]
pub enum BoundDatabaseOp {
    Attach { path: String, alias: String },
    Detach { name: String },
    Use { name: String },
}

/// Standing session options settable through `CALL option=value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandingOption {
    Threads(usize),
    TimeoutMs(u64),
}

/// Bound `COPY table FROM path`
#[derive(Debug, Clone)]
pub struct BoundCopyFrom {
    pub table_id: TableId,
    pub is_rel_table: bool,
    pub path: String,
    pub format: FileFormat,
    pub options: CopyOptions,
    /// Column types expected from the file, in table property order (for
    /// rel tables: src pk, dst pk, then properties)
    pub column_types: Vec<LogicalType>,
    pub preserving_order: bool,
}

/// Bound `COPY (query) TO path`
#[derive(Debug, Clone)]
pub struct BoundCopyTo {
    pub query: BoundQuery,
    pub path: String,
    pub format: FileFormat,
}

/// Bound `CALL fn(args)`
#[derive(Debug, Clone)]
pub struct BoundTableCall {
    pub function: String,
    pub args: Vec<Value>,
    pub columns: Vec<(String, LogicalType)>,
}

/// Statement payloads after binding
#[derive(Debug, Clone)]
pub enum BoundStatementKind {
    Query(BoundQuery),
    Ddl(BoundDdl),
    DatabaseOp(BoundDatabaseOp),
    StandingCall(StandingOption),
    CopyFrom(BoundCopyFrom),
    CopyTo(BoundCopyTo),
    TableCall(BoundTableCall),
}

/// A bound statement with its result descriptor
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub kind: BoundStatementKind,
    /// Result column names and types
    pub columns: Vec<(String, LogicalType)>,
    pub read_only: bool,
}

/// The binder. One per statement; scopes are cheap.
pub struct Binder<'a> {
    catalog: &'a Catalog,
    functions: &'a FunctionRegistry,
    parameters: &'a HashMap<String, Value>,
    scopes: Vec<HashMap<String, Expression>>,
}

impl<'a> Binder<'a> {
    pub fn new(
        catalog: &'a Catalog,
        functions: &'a FunctionRegistry,
        parameters: &'a HashMap<String, Value>,
    ) -> Self {
        Binder {
            catalog,
            functions,
            parameters,
            scopes: vec![HashMap::new()],
        }
    }

    pub fn bind(&mut self, statement: &ParsedStatement) -> QuiverResult<BoundStatement> {
        debug!("binding statement");
        match statement {
            ParsedStatement::Query(q) => {
                let bound = self.bind_query(q)?;
                let columns = bound
                    .projections
                    .iter()
                    .map(|e| (e.name.clone(), e.ty.clone()))
                    .collect();
                let read_only = bound.updates.is_empty();
                Ok(BoundStatement {
                    kind: BoundStatementKind::Query(bound),
                    columns,
                    read_only,
                })
            }
            ParsedStatement::CreateNodeTable {
                name,
                properties,
                primary_key,
            } => {
                let mut defs = Vec::with_capacity(properties.len());
                let mut saw_pk = false;
                for (prop_name, ty) in properties {
                    let primary = prop_name == primary_key;
                    saw_pk |= primary;
                    defs.push(PropertyDef {
                        name: prop_name.clone(),
                        ty: self.resolve_type(ty),
                        primary_key: primary,
                    });
                }
                if !saw_pk {
                    return Err(QuiverError::binder(format!(
                        "Primary key {primary_key} is not a property of table {name}."
                    )));
                }
                Ok(Self::ddl_statement(BoundDdl::CreateNodeTable {
                    name: name.clone(),
                    properties: defs,
                }))
            }
            ParsedStatement::CreateRelTable {
                name,
                src,
                dst,
                properties,
            } => {
                // Endpoints must exist at bind time.
                self.catalog.node_table(src)?;
                self.catalog.node_table(dst)?;
                let defs = properties
                    .iter()
                    .map(|(n, t)| PropertyDef {
                        name: n.clone(),
                        ty: self.resolve_type(t),
                        primary_key: false,
                    })
                    .collect();
                Ok(Self::ddl_statement(BoundDdl::CreateRelTable {
                    name: name.clone(),
                    src: src.clone(),
                    dst: dst.clone(),
                    properties: defs,
                }))
            }
            ParsedStatement::DropTable { name } => {
                if !self.catalog.has_table(name) {
                    return Err(QuiverError::catalog(format!(
                        "Table {name} does not exist."
                    )));
                }
                Ok(Self::ddl_statement(BoundDdl::DropTable { name: name.clone() }))
            }
            ParsedStatement::Alter { table, op } => {
                if !self.catalog.has_table(table) {
                    return Err(QuiverError::catalog(format!(
                        "Table {table} does not exist."
                    )));
                }
                Ok(Self::ddl_statement(BoundDdl::Alter {
                    table: table.clone(),
                    op: op.clone(),
                }))
            }
            ParsedStatement::CreateSequence { name } => {
                Ok(Self::ddl_statement(BoundDdl::CreateSequence { name: name.clone() }))
            }
            ParsedStatement::DropSequence { name } => {
                Ok(Self::ddl_statement(BoundDdl::DropSequence { name: name.clone() }))
            }
            ParsedStatement::CopyFrom {
                table,
                path,
                format,
                options,
            } => self.bind_copy_from(table, path, *format, options.clone()),
            ParsedStatement::CopyTo {
                query,
                path,
                format,
            } => {
                let bound = self.bind_query(query)?;
                Ok(BoundStatement {
                    kind: BoundStatementKind::CopyTo(BoundCopyTo {
                        query: bound,
                        path: path.clone(),
                        format: *format,
                    }),
                    columns: single_result_column(),
                    read_only: true,
                })
            }
            ParsedStatement::Attach { path, alias } => Ok(BoundStatement {
                kind: BoundStatementKind::DatabaseOp(BoundDatabaseOp::Attach {
                    path: path.clone(),
                    alias: alias.clone(),
                }),
                columns: single_result_column(),
                read_only: false,
            }),
            ParsedStatement::Detach { name } => Ok(BoundStatement {
                kind: BoundStatementKind::DatabaseOp(BoundDatabaseOp::Detach {
                    name: name.clone(),
                }),
                columns: single_result_column(),
                read_only: false,
            }),
            ParsedStatement::UseDatabase { name } => Ok(BoundStatement {
                kind: BoundStatementKind::DatabaseOp(BoundDatabaseOp::Use { name: name.clone() }),
                columns: single_result_column(),
                read_only: false,
            }),
            ParsedStatement::StandingCall { option, value } => {
                let option = self.bind_standing_option(option, value)?;
                Ok(BoundStatement {
                    kind: BoundStatementKind::StandingCall(option),
                    columns: single_result_column(),
                    read_only: true,
                })
            }
            ParsedStatement::TableCall { function, args } => {
                let f = self.functions.table_function(function)?;
                let mut bound_args = Vec::with_capacity(args.len());
                for arg in args {
                    bound_args.push(self.bind_constant(arg)?);
                }
                let columns = (f.columns)(&bound_args)?;
                Ok(BoundStatement {
                    kind: BoundStatementKind::TableCall(BoundTableCall {
                        function: f.name.clone(),
                        args: bound_args,
                        columns: columns.clone(),
                    }),
                    columns,
                    read_only: true,
                })
            }
        }
    }

    fn ddl_statement(ddl: BoundDdl) -> BoundStatement {
        BoundStatement {
            kind: BoundStatementKind::Ddl(ddl),
            columns: single_result_column(),
            read_only: false,
        }
    }

    /// Resolve a catalog type alias written where a type is expected
    fn resolve_type(&self, ty: &LogicalType) -> LogicalType {
        ty.clone()
    }

    fn bind_standing_option(&self, option: &str, value: &Value) -> QuiverResult<StandingOption> {
        let as_int = value.as_int128().ok_or_else(|| {
            QuiverError::binder(format!("CALL {option} expects an integer value"))
        })?;
        match option.to_lowercase().as_str() {
            "threads" => {
                if as_int < 1 {
                    return Err(QuiverError::binder("CALL threads expects a value >= 1"));
                }
                Ok(StandingOption::Threads(as_int as usize))
            }
            "timeout" => Ok(StandingOption::TimeoutMs(as_int.max(0) as u64)),
            _ => Err(QuiverError::binder(format!(
                "Unknown standing option {option}."
            ))),
        }
    }

    /// Literals and parameters only; anything else is not constant
    fn bind_constant(&self, expr: &crate::ast::ParsedExpression) -> QuiverResult<Value> {
        match expr {
            crate::ast::ParsedExpression::Literal(v) => Ok(v.clone()),
            crate::ast::ParsedExpression::Parameter(name) => self
                .parameters
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    QuiverError::binder(format!("Parameter ${name} has no bound value."))
                }),
            _ => Err(QuiverError::binder(
                "Call arguments must be literals or parameters.",
            )),
        }
    }

    fn bind_copy_from(
        &mut self,
        table: &str,
        path: &str,
        format: FileFormat,
        options: CopyOptions,
    ) -> QuiverResult<BoundStatement> {
        if let Ok(entry) = self.catalog.node_table(table) {
            let column_types = entry.properties.iter().map(|p| p.ty.clone()).collect();
            return Ok(BoundStatement {
                kind: BoundStatementKind::CopyFrom(BoundCopyFrom {
                    table_id: entry.id,
                    is_rel_table: false,
                    path: path.to_string(),
                    format,
                    options,
                    column_types,
                    // Node rows carry their own primary key, so parallel
                    // unordered ingest is sound.
                    preserving_order: false,
                }),
                columns: single_result_column(),
                read_only: false,
            });
        }
        let entry = self.catalog.rel_table(table)?;
        let src_pk = {
            let src = self.catalog.node_table_by_id(entry.src_table)?;
            src.properties[src.primary_key_idx()].ty.clone()
        };
        let dst_pk = {
            let dst = self.catalog.node_table_by_id(entry.dst_table)?;
            dst.properties[dst.primary_key_idx()].ty.clone()
        };
        let mut column_types = vec![src_pk, dst_pk];
        column_types.extend(entry.properties.iter().map(|p| p.ty.clone()));
        Ok(BoundStatement {
            kind: BoundStatementKind::CopyFrom(BoundCopyFrom {
                table_id: entry.id,
                is_rel_table: true,
                path: path.to_string(),
                format,
                options,
                column_types,
                preserving_order: true,
            }),
            columns: single_result_column(),
            read_only: false,
        })
    }

    fn bind_query(&mut self, query: &ParsedQuery) -> QuiverResult<BoundQuery> {
        let mut pattern = BoundGraphPattern::default();
        for chain in &query.patterns {
            self.bind_pattern_chain(chain, &mut pattern)?;
        }

        let unwind = match &query.unwind {
            Some((list, alias)) => {
                let list = self.bind_expression(list)?;
                let elem_ty = match &list.ty {
                    LogicalType::List(e) => (**e).clone(),
                    LogicalType::Any => LogicalType::Any,
                    other => {
                        return Err(QuiverError::binder(format!(
                            "UNWIND expects a list, got {other}"
                        )))
                    }
                };
                let alias_expr = Expression::new(
                    ExpressionKind::Alias {
                        child: Box::new(list.clone()),
                    },
                    elem_ty,
                    alias.clone(),
                );
                self.insert_to_scope(alias_expr.clone())?;
                Some((list, alias_expr))
            }
            None => None,
        };

        let predicate = query
            .where_clause
            .as_ref()
            .map(|p| self.bind_expression(p))
            .transpose()?;
        if let Some(p) = &predicate {
            if p.ty != LogicalType::Bool && p.ty != LogicalType::Any {
                return Err(QuiverError::binder(format!(
                    "WHERE expects a boolean predicate, got {}",
                    p.ty
                )));
            }
        }

        let mut projections = Vec::with_capacity(query.projections.len());
        for item in &query.projections {
            let mut bound = self.bind_expression(&item.expr)?;
            if let Some(alias) = &item.alias {
                bound = Expression::new(
                    ExpressionKind::Alias {
                        child: Box::new(bound.clone()),
                    },
                    bound.ty.clone(),
                    alias.clone(),
                );
            }
            projections.push(bound);
        }

        let mut order_by = Vec::with_capacity(query.order_by.len());
        for (expr, ascending) in &query.order_by {
            order_by.push((self.bind_expression(expr)?, *ascending));
        }

        let updates = self.bind_updates(&query.updates, &pattern)?;
        if projections.is_empty() && updates.is_empty() {
            return Err(QuiverError::binder(
                "Query has neither RETURN items nor updating clauses.",
            ));
        }

        let mut bound = BoundQuery {
            pattern,
            predicate,
            unwind,
            distinct: query.distinct,
            projections,
            order_by,
            skip: query.skip,
            limit: query.limit,
            updates,
        };
        resolve_any_types(&mut bound);
        Ok(bound)
    }

    fn bind_pattern_chain(
        &mut self,
        chain: &PatternChain,
        pattern: &mut BoundGraphPattern,
    ) -> QuiverResult<usize> {
        let mut prev = self.bind_node_pattern(&chain.start, pattern)?;
        for (rel, next_node) in &chain.hops {
            let rel_label = rel.label.as_ref().ok_or_else(|| {
                QuiverError::binder("Relationship patterns must carry a label.")
            })?;
            let rel_entry = self.catalog.rel_table(rel_label)?.clone();

            // The catalog's src/dst orientation must match the arrow.
            let (expect_from, expect_to) = match rel.direction {
                ExtendDirection::Forward => (rel_entry.src_table, rel_entry.dst_table),
                ExtendDirection::Backward => (rel_entry.dst_table, rel_entry.src_table),
            };
            let from_table = pattern.nodes[prev].table_id;
            if from_table != expect_from {
                return Err(QuiverError::binder(format!(
                    "Rel table {} cannot connect node table {} in direction {}.",
                    rel_entry.name,
                    self.catalog.node_table_by_id(from_table)?.name,
                    rel.direction,
                )));
            }

            let next = self.bind_node_pattern_with_table(next_node, expect_to, pattern)?;

            let variable = match &rel.variable {
                Some(name) => {
                    let expr = Expression::new(
                        ExpressionKind::RelVariable {
                            table_id: rel_entry.id,
                        },
                        LogicalType::Rel(rel_entry.id),
                        name.clone(),
                    );
                    self.insert_to_scope(expr.clone())?;
                    Some(expr)
                }
                None => None,
            };

            pattern.rels.push(BoundRel {
                rel_table: rel_entry.id,
                from_node: prev,
                to_node: next,
                direction: rel.direction,
                variable,
                recursive: rel.recursive,
            });
            prev = next;
        }
        Ok(prev)
    }

    fn bind_node_pattern(
        &mut self,
        node: &crate::ast::NodePattern,
        pattern: &mut BoundGraphPattern,
    ) -> QuiverResult<usize> {
        let table_id = match &node.label {
            Some(label) => self.catalog.node_table(label)?.id,
            None => {
                let tables = self.catalog.node_tables();
                match tables.as_slice() {
                    [only] => only.id,
                    [] => {
                        return Err(QuiverError::binder(
                            "No node tables exist; cannot bind an unlabeled pattern.",
                        ))
                    }
                    _ => {
                        return Err(QuiverError::binder(format!(
                            "Cannot infer the label of ({}); more than one node table exists.",
                            node.variable
                        )))
                    }
                }
            }
        };
        self.bind_node_with_table(&node.variable, table_id, pattern)
    }

    fn bind_node_pattern_with_table(
        &mut self,
        node: &crate::ast::NodePattern,
        inferred: TableId,
        pattern: &mut BoundGraphPattern,
    ) -> QuiverResult<usize> {
        let table_id = match &node.label {
            Some(label) => {
                let id = self.catalog.node_table(label)?.id;
                if id != inferred {
                    return Err(QuiverError::binder(format!(
                        "Pattern endpoint ({}:{}) does not match the rel table's schema.",
                        node.variable, label
                    )));
                }
                id
            }
            None => inferred,
        };
        self.bind_node_with_table(&node.variable, table_id, pattern)
    }

    fn bind_node_with_table(
        &mut self,
        variable: &str,
        table_id: TableId,
        pattern: &mut BoundGraphPattern,
    ) -> QuiverResult<usize> {
        if let Some(idx) = pattern.node_idx(variable) {
            // The same variable appearing again must keep its table.
            if pattern.nodes[idx].table_id != table_id {
                return Err(QuiverError::binder(format!(
                    "Variable {variable} is bound to two different node tables."
                )));
            }
            return Ok(idx);
        }
        let expr = Expression::new(
            ExpressionKind::NodeVariable { table_id },
            LogicalType::Node(table_id),
            variable,
        );
        self.insert_to_scope(expr.clone())?;
        pattern.nodes.push(BoundNode {
            variable: expr,
            table_id,
        });
        Ok(pattern.nodes.len() - 1)
    }

    fn bind_updates(
        &mut self,
        updates: &[UpdateClause],
        pattern: &BoundGraphPattern,
    ) -> QuiverResult<Vec<BoundUpdate>> {
        let mut bound = Vec::with_capacity(updates.len());
        for update in updates {
            match update {
                UpdateClause::CreateNode {
                    variable: _,
                    label,
                    properties,
                } => {
                    let entry = self.catalog.node_table(label)?.clone();
                    let mut values = Vec::with_capacity(entry.properties.len());
                    for prop in &entry.properties {
                        let provided = properties.iter().find(|(n, _)| n == &prop.name);
                        let expr = match provided {
                            Some((_, parsed)) => {
                                let e = self.bind_expression(parsed)?;
                                if !prop.ty.accepts(&e.ty) {
                                    return Err(QuiverError::binder(format!(
                                        "Cannot assign {} to property {} of type {}.",
                                        e.ty, prop.name, prop.ty
                                    )));
                                }
                                e
                            }
                            None => {
                                if prop.primary_key {
                                    return Err(QuiverError::binder(format!(
                                        "CREATE must provide primary key {}.",
                                        prop.name
                                    )));
                                }
                                Expression::literal(Value::Null(prop.ty.clone()))
                            }
                        };
                        values.push(expr);
                    }
                    bound.push(BoundUpdate::CreateNode {
                        table_id: entry.id,
                        values,
                    });
                }
                UpdateClause::Delete { variable } => {
                    let idx = pattern.node_idx(variable).ok_or_else(|| {
                        QuiverError::binder(format!("Variable {variable} is not in scope."))
                    })?;
                    bound.push(BoundUpdate::Delete {
                        variable: pattern.nodes[idx].variable.clone(),
                    });
                }
                UpdateClause::Set {
                    variable,
                    property,
                    value,
                } => {
                    let target = self.bind_expression(&crate::ast::ParsedExpression::Property(
                        variable.clone(),
                        property.clone(),
                    ))?;
                    let value = self.bind_expression(value)?;
                    if !target.ty.accepts(&value.ty) {
                        return Err(QuiverError::binder(format!(
                            "Cannot assign {} to {} of type {}.",
                            value.ty, target.name, target.ty
                        )));
                    }
                    bound.push(BoundUpdate::Set { target, value });
                }
            }
        }
        Ok(bound)
    }

    fn scope(&self) -> &HashMap<String, Expression> {
        self.scopes.last().expect("at least one scope frame")
    }

    fn insert_to_scope(&mut self, expr: Expression) -> QuiverResult<()> {
        let frame = self.scopes.last_mut().expect("at least one scope frame");
        if let Some(existing) = frame.get(&expr.name) {
            if existing.ty != expr.ty {
                return Err(QuiverError::binder(format!(
                    "Variable {} cannot be bound to both {} and {} in the same scope.",
                    expr.name, existing.ty, expr.ty
                )));
            }
            return Ok(());
        }
        frame.insert(expr.name.clone(), expr);
        Ok(())
    }

    fn push_scope(&mut self) {
        let frame = self.scope().clone();
        self.scopes.push(frame);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }
}

fn single_result_column() -> Vec<(String, LogicalType)> {
    vec![("result".to_string(), LogicalType::String)]
}

/// Deferred `ANY` resolution: expressions still typed `ANY` after binding
/// are defaulted to `STRING`.
fn resolve_any_types(query: &mut BoundQuery) {
    fn solve(expr: &mut Expression) {
        if expr.ty == LogicalType::Any {
            expr.ty = LogicalType::String;
        }
        match &mut expr.kind {
            ExpressionKind::ScalarFunction { args, .. } => {
                for arg in args {
                    solve(arg);
                }
            }
            ExpressionKind::Aggregate { child, .. } => {
                if let Some(c) = child {
                    solve(c);
                }
            }
            ExpressionKind::Alias { child } | ExpressionKind::Cast { child } => solve(child),
            ExpressionKind::Case {
                branches,
                else_expr,
            } => {
                for (w, t) in branches {
                    solve(w);
                    solve(t);
                }
                if let Some(e) = else_expr {
                    solve(e);
                }
            }
            _ => {}
        }
    }
    for p in &mut query.projections {
        solve(p);
    }
    if let Some(p) = &mut query.predicate {
        solve(p);
    }
    for (e, _) in &mut query.order_by {
        solve(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::ParsedStatement;

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
                    PropertyDef {
                        name: "age".to_string(),
                        ty: LogicalType::Int64,
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

    fn bind(statement: &ParsedStatement) -> QuiverResult<BoundStatement> {
        let catalog = catalog();
        let functions = FunctionRegistry::with_builtins();
        let params = HashMap::new();
        Binder::new(&catalog, &functions, &params).bind(statement)
    }

    #[test]
    fn test_bind_single_node_query() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "fName")])
            .build();
        let bound = bind(&ParsedStatement::Query(q)).expect("bind");
        assert!(bound.read_only);
        assert_eq!(bound.columns, vec![("p.fName".to_string(), LogicalType::String)]);
        match bound.kind {
            BoundStatementKind::Query(q) => {
                assert_eq!(q.pattern.nodes.len(), 1);
                assert_eq!(q.pattern.rels.len(), 0);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_bind_two_hop_pattern() {
        let q = match_(node("a", "person"))
            .hop(rel_to("knows"), node_any("b"))
            .hop(rel_to("knows"), node_any("c"))
            .ret([prop("a", "fName"), prop("c", "fName")])
            .build();
        let bound = bind(&ParsedStatement::Query(q)).expect("bind");
        match bound.kind {
            BoundStatementKind::Query(q) => {
                assert_eq!(q.pattern.nodes.len(), 3);
                assert_eq!(q.pattern.rels.len(), 2);
                assert_eq!(q.pattern.rels[0].from_node, 0);
                assert_eq!(q.pattern.rels[0].to_node, 1);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_unknown_variable_fails() {
        let q = match_(node("p", "person")).ret([prop("q", "fName")]).build();
        let err = bind(&ParsedStatement::Query(q)).expect_err("unknown var");
        assert!(matches!(err, QuiverError::Binder(_)));
        assert!(err.to_string().contains('q'));
    }

    #[test]
    fn test_unknown_property_fails() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "salary")])
            .build();
        let err = bind(&ParsedStatement::Query(q)).expect_err("unknown property");
        assert!(matches!(err, QuiverError::Binder(_)));
    }

    #[test]
    fn test_unknown_parameter_fails() {
        let q = match_(node("p", "person"))
            .where_(eq(prop("p", "fName"), param("name")))
            .ret([prop("p", "ID")])
            .build();
        let err = bind(&ParsedStatement::Query(q)).expect_err("unbound param");
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_parameter_takes_value_type() {
        let catalog = catalog();
        let functions = FunctionRegistry::with_builtins();
        let mut params = HashMap::new();
        params.insert("name".to_string(), Value::string("Alice"));
        let q = match_(node("p", "person"))
            .where_(eq(prop("p", "fName"), param("name")))
            .ret([prop("p", "ID")])
            .build();
        let bound = Binder::new(&catalog, &functions, &params)
            .bind(&ParsedStatement::Query(q))
            .expect("bind");
        assert!(bound.read_only);
    }

    #[test]
    fn test_non_boolean_where_fails() {
        let q = match_(node("p", "person"))
            .where_(prop("p", "age"))
            .ret([prop("p", "ID")])
            .build();
        let err = bind(&ParsedStatement::Query(q)).expect_err("non-bool where");
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_wrong_direction_rejected() {
        // knows connects person->person, so any direction binds; use a
        // second node table to provoke a mismatch.
        let mut catalog = catalog();
        catalog
            .create_node_table(
                "city",
                vec![PropertyDef {
                    name: "name".to_string(),
                    ty: LogicalType::String,
                    primary_key: true,
                }],
            )
            .expect("city");
        catalog
            .create_rel_table("livesIn", "person", "city", vec![])
            .expect("livesIn");
        let functions = FunctionRegistry::with_builtins();
        let params = HashMap::new();
        let q = match_(node("c", "city"))
            .hop(rel_to("livesIn"), node_any("p"))
            .ret([var("p")])
            .build();
        let err = Binder::new(&catalog, &functions, &params)
            .bind(&ParsedStatement::Query(q))
            .expect_err("direction mismatch");
        assert!(matches!(err, QuiverError::Binder(_)));
    }

    #[test]
    fn test_read_write_analysis() {
        let q = match_(node("p", "person"))
            .set("p", "age", lit_i64(30))
            .ret([prop("p", "ID")])
            .build();
        let bound = bind(&ParsedStatement::Query(q)).expect("bind");
        assert!(!bound.read_only);
    }

    #[test]
    fn test_ddl_result_descriptor() {
        let bound = bind(&ParsedStatement::DropTable {
            name: "knows".to_string(),
        })
        .expect("bind");
        assert!(!bound.read_only);
        assert_eq!(bound.columns[0].1, LogicalType::String);
    }

    #[test]
    fn test_copy_from_node_is_unordered() {
        let bound = bind(&ParsedStatement::CopyFrom {
            table: "person".to_string(),
            path: "people.csv".to_string(),
            format: FileFormat::Csv,
            options: CopyOptions::default(),
        })
        .expect("bind");
        match bound.kind {
            BoundStatementKind::CopyFrom(copy) => {
                assert!(!copy.preserving_order);
                assert_eq!(copy.column_types.len(), 3);
            }
            _ => panic!("expected copy"),
        }
    }

    #[test]
    fn test_copy_from_rel_preserves_order() {
        let bound = bind(&ParsedStatement::CopyFrom {
            table: "knows".to_string(),
            path: "knows.csv".to_string(),
            format: FileFormat::Csv,
            options: CopyOptions::default(),
        })
        .expect("bind");
        match bound.kind {
            BoundStatementKind::CopyFrom(copy) => {
                assert!(copy.preserving_order);
                // src pk + dst pk
                assert_eq!(copy.column_types.len(), 2);
            }
            _ => panic!("expected copy"),
        }
    }

    #[test]
    fn test_standing_call() {
        let bound = bind(&ParsedStatement::StandingCall {
            option: "threads".to_string(),
            value: Value::Int64(4),
        })
        .expect("bind");
        match bound.kind {
            BoundStatementKind::StandingCall(StandingOption::Threads(4)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(bind(&ParsedStatement::StandingCall {
            option: "frobnicate".to_string(),
            value: Value::Int64(4),
        })
        .is_err());
    }
}
