//! # Database
//!
//! The embedder surface: owns the attached-database map, the worker
//! pool, and the standing session options. `prepare()` runs bind → plan
//! synchronously; `execute()` maps the logical plan to a fresh physical
//! plan, schedules its pipelines, and surfaces a [`QueryResult`].
//!
//! A prepared statement keeps its bound and logical form; re-executing
//! with new parameter values of the same types skips rebinding.

use crate::ast::ParsedStatement;
use crate::binder::{Binder, BoundStatement, BoundStatementKind};
use crate::config::Config;
use crate::error::{QuiverError, QuiverResult};
use crate::execution::ddl::{AttachedDatabase, SessionState};
use crate::execution::{ExecutionContext, InterruptHandle};
use crate::function::FunctionRegistry;
use crate::mapper::PlanMapper;
use crate::planner::{LogicalPlan, Planner};
use crate::result::{QueryResult, QuerySummary};
use crate::scheduler::TaskScheduler;
use crate::storage::StorageManager;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// A bound and planned statement, ready to execute
#[derive(Debug)]
pub struct PreparedStatement {
    pub(crate) bound: BoundStatement,
    pub(crate) plan: LogicalPlan,
    compiling_time_ms: f64,
}

impl PreparedStatement {
    /// Result column names and types
    pub fn columns(&self) -> &[(String, crate::types::LogicalType)] {
        &self.bound.columns
    }

    pub fn is_read_only(&self) -> bool {
        self.bound.read_only
    }
}

/// An embedded property-graph database
pub struct Database {
    config: Config,
    functions: Arc<FunctionRegistry>,
    session: Arc<SessionState>,
    scheduler: TaskScheduler,
    /// Interrupt handle of the running query, if any
    active: Mutex<Option<InterruptHandle>>,
}

impl Database {
    /// Open (or create) a database at the configured data directory
    pub fn new(config: Config) -> QuiverResult<Self> {
        config.init_tracing();
        let storage = Arc::new(StorageManager::new(
            config.storage.data_dir.clone(),
            config.storage.wal_immediate_sync,
        )?);
        let mut databases = HashMap::new();
        databases.insert(
            "main".to_string(),
            AttachedDatabase {
                catalog: Arc::new(RwLock::new(crate::catalog::Catalog::new())),
                storage,
            },
        );
        let session = Arc::new(SessionState {
            databases: RwLock::new(databases),
            current: RwLock::new("main".to_string()),
            settings: RwLock::new(HashMap::new()),
            data_dir: config.storage.data_dir.clone(),
            wal_immediate_sync: config.storage.wal_immediate_sync,
        });
        let scheduler = TaskScheduler::new(config.worker_threads());
        info!(
            threads = scheduler.num_threads(),
            "database opened"
        );
        Ok(Database {
            config,
            functions: Arc::new(FunctionRegistry::with_builtins()),
            session,
            scheduler,
            active: Mutex::new(None),
        })
    }

    /// A throwaway database under the system temp directory
    pub fn in_memory() -> QuiverResult<Self> {
        let mut config = Config::default();
        config.storage.data_dir =
            std::env::temp_dir().join(format!("quiver-{}", uuid::Uuid::new_v4()));
        config.storage.wal_immediate_sync = false;
        Database::new(config)
    }

    /// Bind and plan a statement; binder/planner errors surface here
    pub fn prepare(
        &self,
        statement: &ParsedStatement,
        parameters: &HashMap<String, Value>,
    ) -> QuiverResult<PreparedStatement> {
        let started = Instant::now();
        let db = self.session.current_database()?;
        let bound = {
            let catalog = db.catalog.read();
            Binder::new(&catalog, &self.functions, parameters).bind(statement)?
        };
        let plan = Planner::new(db.storage.as_ref()).plan(&bound)?;
        Ok(PreparedStatement {
            bound,
            plan,
            compiling_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Execute a prepared statement with (possibly new) parameter values
    pub fn execute(
        &self,
        prepared: &PreparedStatement,
        parameters: HashMap<String, Value>,
    ) -> QuiverResult<QueryResult> {
        let started = Instant::now();
        let db = self.session.current_database()?;
        let mapper = PlanMapper::new(
            Arc::clone(&db.catalog),
            Arc::clone(&self.functions),
            Arc::clone(&self.session),
            self.config.execution.morsel_size,
        );
        let physical = mapper.map_plan(&prepared.plan, &prepared.bound)?;

        let settings = self.session.settings_snapshot();
        let num_threads = settings
            .get("threads")
            .and_then(Value::as_int128)
            .map_or_else(|| self.config.worker_threads(), |n| n.max(1) as usize);
        let timeout_ms = settings
            .get("timeout")
            .and_then(Value::as_int128)
            .map_or(self.config.execution.timeout_ms, |n| n.max(0) as u64);
        let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

        let transaction = db.storage.begin_transaction()?;
        let mut ctx = ExecutionContext::new(
            Arc::clone(&db.storage),
            Arc::clone(&db.catalog),
            Arc::clone(&self.functions),
            transaction,
            num_threads,
            timeout,
            self.config.execution.max_recursive_depth,
        );
        ctx.parameters = parameters;
        ctx.settings = settings;
        let ctx = Arc::new(ctx);
        *self.active.lock() = Some(ctx.interrupt_handle());

        let outcome = self.scheduler.execute_plan(&physical, &ctx);
        *self.active.lock() = None;
        match outcome {
            Ok(()) => {
                db.storage.commit(transaction)?;
                let summary = QuerySummary {
                    compiling_time_ms: prepared.compiling_time_ms,
                    execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    plan_text: prepared.plan.root.pretty_print(0),
                    plan_json: prepared.plan.root.to_json(),
                };
                Ok(QueryResult::new(
                    physical.result_columns.clone(),
                    physical.result_table.all_rows(),
                    summary,
                ))
            }
            Err(error) => {
                // A failed statement aborts its transaction; copy stays
                // all-or-nothing through its staging.
                let _ = db.storage.rollback(transaction);
                Err(error)
            }
        }
    }

    /// Prepare and execute in one step.
    ///
    /// Failing DDL and database operations surface as a single-row error
    /// result rather than an `Err`, matching their single-row success
    /// results.
    pub fn query(&self, statement: &ParsedStatement) -> QuiverResult<QueryResult> {
        self.query_with_params(statement, HashMap::new())
    }

    pub fn query_with_params(
        &self,
        statement: &ParsedStatement,
        parameters: HashMap<String, Value>,
    ) -> QuiverResult<QueryResult> {
        let prepared = self.prepare(statement, &parameters)?;
        let is_admin = matches!(
            prepared.bound.kind,
            BoundStatementKind::Ddl(_) | BoundStatementKind::DatabaseOp(_)
        );
        match self.execute(&prepared, parameters) {
            Ok(result) => Ok(result),
            Err(QuiverError::Interrupted) => Err(QuiverError::Interrupted),
            Err(error) if is_admin => Ok(QueryResult::new(
                prepared.bound.columns.clone(),
                vec![vec![Value::string(error.to_string())]],
                QuerySummary {
                    compiling_time_ms: prepared.compiling_time_ms,
                    execution_time_ms: 0.0,
                    plan_text: prepared.plan.root.pretty_print(0),
                    plan_json: prepared.plan.root.to_json(),
                },
            )),
            Err(error) => Err(error),
        }
    }

    /// Cancel the running query, if any; it fails with `Interrupted`
    pub fn interrupt(&self) {
        if let Some(handle) = self.active.lock().as_ref() {
            handle.interrupt();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The session's standing options, as set through `CALL`
    pub fn settings(&self) -> HashMap<String, Value> {
        self.session.settings_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::types::LogicalType;

    fn db_with_person() -> Database {
        let db = Database::in_memory().expect("db");
        let result = db
            .query(&ParsedStatement::CreateNodeTable {
                name: "person".to_string(),
                properties: vec![
                    ("ID".to_string(), LogicalType::Int64),
                    ("fName".to_string(), LogicalType::String),
                ],
                primary_key: "ID".to_string(),
            })
            .expect("create");
        assert!(result.rows()[0][0].to_string().contains("created"));
        db
    }

    #[test]
    fn test_create_insert_scan() {
        let db = db_with_person();
        db.query(&ParsedStatement::Query(
            query()
                .create_node(
                    "p",
                    "person",
                    vec![
                        ("ID".to_string(), lit_i64(1)),
                        ("fName".to_string(), lit_str("Alice")),
                    ],
                )
                .build(),
        ))
        .expect("insert");

        let result = db
            .query(&ParsedStatement::Query(
                match_(node("p", "person")).ret([prop("p", "fName")]).build(),
            ))
            .expect("scan");
        assert_eq!(result.num_rows(), 1);
        assert_eq!(result.rows()[0][0], Value::string("Alice"));
    }

    #[test]
    fn test_failed_ddl_is_single_row_result() {
        let db = db_with_person();
        let result = db
            .query(&ParsedStatement::CreateNodeTable {
                name: "person".to_string(),
                properties: vec![("ID".to_string(), LogicalType::Int64)],
                primary_key: "ID".to_string(),
            })
            .expect("error-as-result");
        assert_eq!(result.num_rows(), 1);
        assert!(result.rows()[0][0].to_string().contains("already exists"));
    }

    #[test]
    fn test_standing_call_updates_settings() {
        let db = db_with_person();
        db.query(&ParsedStatement::StandingCall {
            option: "threads".to_string(),
            value: Value::Int64(1),
        })
        .expect("call");
        assert_eq!(db.settings().get("threads"), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_binder_error_from_prepare() {
        let db = db_with_person();
        let err = db
            .query(&ParsedStatement::Query(
                match_(node("p", "person")).ret([prop("p", "salary")]).build(),
            ))
            .expect_err("unknown property");
        assert!(matches!(err, QuiverError::Binder(_)));
    }
}
