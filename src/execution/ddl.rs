//! DDL, database operations and standing calls
//!
//! These are childless sinks running single-threaded: they mutate the
//! catalog/storage (DDL), the session's attached-database map
//! (attach/detach/use), or the session settings (`CALL option=value`),
//! each under the corresponding coarse lock, and produce a single-row
//! string result.

use super::context::ExecutionContext;
use super::factorized_table::FactorizedTable;
use crate::ast::AlterOp;
use crate::binder::{BoundDatabaseOp, BoundDdl, StandingOption};
use crate::catalog::Catalog;
use crate::error::{QuiverError, QuiverResult};
use crate::storage::{StorageManager, WalRecord};
use crate::types::LogicalType;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One attached database: its catalog and storage
#[derive(Clone)]
pub struct AttachedDatabase {
    pub catalog: Arc<RwLock<Catalog>>,
    pub storage: Arc<StorageManager>,
}

/// Session-level state shared by the embedder surface and the operators
/// that mutate it
pub struct SessionState {
    pub databases: RwLock<HashMap<String, AttachedDatabase>>,
    pub current: RwLock<String>,
    pub settings: RwLock<HashMap<String, Value>>,
    pub data_dir: PathBuf,
    pub wal_immediate_sync: bool,
}

impl SessionState {
    pub fn current_database(&self) -> QuiverResult<AttachedDatabase> {
        let current = self.current.read().clone();
        self.databases
            .read()
            .get(&current)
            .cloned()
            .ok_or_else(|| QuiverError::internal(format!("current database {current} is gone")))
    }

    pub fn settings_snapshot(&self) -> HashMap<String, Value> {
        self.settings.read().clone()
    }
}

fn result_table() -> Arc<FactorizedTable> {
    FactorizedTable::new(vec![LogicalType::String])
}

/// DDL sink: mutates catalog and storage, logs to the WAL
#[derive(Clone)]
pub struct DdlSink {
    pub ddl: BoundDdl,
    pub result: Arc<FactorizedTable>,
    done: Arc<AtomicBool>,
}

impl DdlSink {
    pub fn new(ddl: BoundDdl) -> Self {
        DdlSink {
            ddl,
            result: result_table(),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn execute(&mut self, ctx: &ExecutionContext) -> QuiverResult<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let message = {
            let mut catalog = ctx.catalog.write();
            match &self.ddl {
                BoundDdl::CreateNodeTable { name, properties } => {
                    let id = catalog.create_node_table(name, properties.clone())?;
                    ctx.storage
                        .create_node_table(catalog.node_table_by_id(id)?);
                    format!("Table {name} has been created.")
                }
                BoundDdl::CreateRelTable {
                    name,
                    src,
                    dst,
                    properties,
                } => {
                    let id = catalog.create_rel_table(name, src, dst, properties.clone())?;
                    ctx.storage.create_rel_table(catalog.rel_table_by_id(id)?);
                    format!("Table {name} has been created.")
                }
                BoundDdl::DropTable { name } => {
                    let id = catalog.drop_table(name)?;
                    ctx.storage.drop_table(id);
                    format!("Table {name} has been dropped.")
                }
                BoundDdl::Alter { table, op } => match op {
                    AlterOp::AddProperty { name, ty } => {
                        catalog.add_property(table, name, ty.clone())?;
                        format!("Property {name} has been added to table {table}.")
                    }
                    AlterOp::DropProperty { name } => {
                        catalog.drop_property(table, name)?;
                        format!("Property {name} has been dropped from table {table}.")
                    }
                    AlterOp::RenameProperty { old, new } => {
                        catalog.rename_property(table, old, new)?;
                        format!("Property {old} has been renamed to {new}.")
                    }
                    AlterOp::RenameTable { new } => {
                        catalog.rename_table(table, new)?;
                        format!("Table {table} has been renamed to {new}.")
                    }
                },
                BoundDdl::CreateSequence { name } => {
                    catalog.create_sequence(name)?;
                    format!("Sequence {name} has been created.")
                }
                BoundDdl::DropSequence { name } => {
                    catalog.drop_sequence(name)?;
                    format!("Sequence {name} has been dropped.")
                }
            }
        };
        ctx.storage.log(&WalRecord::Ddl {
            message: message.clone(),
        })?;
        self.result.push_row(vec![Value::string(message)]);
        Ok(())
    }
}

/// Attach / detach / use; runs under the session's database-map lock
#[derive(Clone)]
pub struct DatabaseOpSink {
    pub op: BoundDatabaseOp,
    pub session: Arc<SessionState>,
    pub result: Arc<FactorizedTable>,
    done: Arc<AtomicBool>,
}

impl DatabaseOpSink {
    pub fn new(op: BoundDatabaseOp, session: Arc<SessionState>) -> Self {
        DatabaseOpSink {
            op,
            session,
            result: result_table(),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn execute(&mut self, _ctx: &ExecutionContext) -> QuiverResult<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let message = match &self.op {
            BoundDatabaseOp::Attach { path, alias } => {
                let mut databases = self.session.databases.write();
                if databases.contains_key(alias) {
                    return Err(QuiverError::binder(format!(
                        "Database {alias} is already attached."
                    )));
                }
                let storage = Arc::new(StorageManager::new(
                    PathBuf::from(path),
                    self.session.wal_immediate_sync,
                )?);
                databases.insert(
                    alias.clone(),
                    AttachedDatabase {
                        catalog: Arc::new(RwLock::new(Catalog::new())),
                        storage,
                    },
                );
                format!("Attached database {alias}.")
            }
            BoundDatabaseOp::Detach { name } => {
                let mut databases = self.session.databases.write();
                if *self.session.current.read() == *name {
                    return Err(QuiverError::binder(format!(
                        "Cannot detach the database in use: {name}."
                    )));
                }
                if databases.remove(name).is_none() {
                    return Err(QuiverError::binder(format!(
                        "Database {name} is not attached."
                    )));
                }
                format!("Detached database {name}.")
            }
            BoundDatabaseOp::Use { name } => {
                if !self.session.databases.read().contains_key(name) {
                    return Err(QuiverError::binder(format!(
                        "Database {name} is not attached."
                    )));
                }
                *self.session.current.write() = name.clone();
                format!("Using database {name}.")
            }
        };
        self.result.push_row(vec![Value::string(message)]);
        Ok(())
    }
}

/// `CALL threads=N` / `CALL timeout=ms`
#[derive(Clone)]
pub struct StandingCallSink {
    pub option: StandingOption,
    pub session: Arc<SessionState>,
    pub result: Arc<FactorizedTable>,
    done: Arc<AtomicBool>,
}

impl StandingCallSink {
    pub fn new(option: StandingOption, session: Arc<SessionState>) -> Self {
        StandingCallSink {
            option,
            session,
            result: result_table(),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn execute(&mut self, _ctx: &ExecutionContext) -> QuiverResult<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut settings = self.session.settings.write();
        let message = match self.option {
            StandingOption::Threads(n) => {
                settings.insert("threads".to_string(), Value::Int64(n as i64));
                format!("threads set to {n}.")
            }
            StandingOption::TimeoutMs(ms) => {
                settings.insert("timeout".to_string(), Value::Int64(ms as i64));
                format!("timeout set to {ms}ms.")
            }
        };
        self.result.push_row(vec![Value::string(message)]);
        Ok(())
    }
}

/// DML operators: create / delete / set run in-pipeline per tuple
#[derive(Clone)]
pub struct CreateNode {
    pub table: crate::types::TableId,
    pub values: Vec<crate::evaluator::ExpressionEvaluator>,
    pub child: Box<super::PhysicalOperator>,
}

impl CreateNode {
    pub fn next(
        &mut self,
        rs: &mut crate::vector::ResultSet,
        ctx: &ExecutionContext,
    ) -> QuiverResult<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let mut row = Vec::with_capacity(self.values.len());
        for evaluator in &mut self.values {
            evaluator.evaluate(rs, ctx)?;
            if evaluator.governing_chunk().is_some() {
                return Err(QuiverError::internal("CREATE values must be flat"));
            }
            row.push(
                evaluator
                    .values()
                    .first()
                    .cloned()
                    .unwrap_or(Value::Null(LogicalType::Any)),
            );
        }
        let table = ctx.storage.node_table(self.table)?;
        table.write().insert(row)?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct DeleteNode {
    pub variable: crate::vector::DataPos,
    pub child: Box<super::PhysicalOperator>,
}

impl DeleteNode {
    pub fn next(
        &mut self,
        rs: &mut crate::vector::ResultSet,
        ctx: &ExecutionContext,
    ) -> QuiverResult<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let state = rs.state(self.variable.chunk);
        for pos in state.positions() {
            if let Some(id) = rs.value(self.variable, pos).as_internal_id() {
                let table = ctx.storage.node_table(id.table_id)?;
                table.write().delete(id.offset)?;
            }
        }
        Ok(true)
    }
}

#[derive(Clone)]
pub struct SetProperty {
    pub variable: crate::vector::DataPos,
    pub column: usize,
    pub value: crate::evaluator::ExpressionEvaluator,
    pub child: Box<super::PhysicalOperator>,
}

impl SetProperty {
    pub fn next(
        &mut self,
        rs: &mut crate::vector::ResultSet,
        ctx: &ExecutionContext,
    ) -> QuiverResult<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let state = rs.state(self.variable.chunk);
        if !state.is_flat() {
            return Err(QuiverError::internal("SET requires its node group flat"));
        }
        let pos = state.current_pos();
        let Some(id) = rs.value(self.variable, pos).as_internal_id() else {
            return Ok(true);
        };
        self.value.evaluate(rs, ctx)?;
        let value = self
            .value
            .values()
            .first()
            .cloned()
            .unwrap_or(Value::Null(LogicalType::Any));
        let table = ctx.storage.node_table(id.table_id)?;
        table.write().set_value(id.offset, self.column, value)?;
        Ok(true)
    }
}
