//! # Quiver
//!
//! An embeddable property-graph database that compiles a Cypher-like
//! statement into a vectorized, pipelined execution plan over a columnar
//! store.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Parsed Statement (AST)
//!     ↓
//! [Binder]              → bound statement (typed, catalog-resolved)
//!     ↓
//! [Planner]             → logical plan with factorized schemas
//!     ↓
//! [Plan Mapper]         → physical operators + vector layout
//!     ↓
//! [Task Scheduler]      → sink-rooted pipelines over worker morsels
//!     ↓
//! QueryResult
//! ```
//!
//! The factorized schema is the hinge: every logical operator computes
//! how its output columns group into flat/unflat chunks, the planner
//! inserts explicit flattens where operators need them, and the mapper
//! reads vector positions straight off the schema.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quiver::{Database, ast::builders::*, ast::ParsedStatement};
//!
//! let db = Database::in_memory()?;
//! let q = match_(node("p", "person"))
//!     .where_(gt(prop("p", "age"), lit_i64(21)))
//!     .ret([prop("p", "name")])
//!     .build();
//! let result = db.query(&ParsedStatement::Query(q))?;
//! for row in &result {
//!     println!("{}", row[0]);
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `types`, `value` | Logical types and runtime values |
//! | `vector` | ValueVector / DataChunk / ResultSet |
//! | `ast` | Parsed-statement input surface + builders |
//! | `catalog` | Node/rel table schemas, sequences, type aliases |
//! | `function` | Scalar/aggregate/table function registry |
//! | `expression` | Bound expression IR |
//! | `binder` | AST → bound statement |
//! | `planner` | Bound statement → logical plan (factorization, join DP) |
//! | `mapper` | Logical plan → physical operators |
//! | `evaluator` | Compiled expression evaluators |
//! | `execution` | Physical operators and execution context |
//! | `scheduler` | Worker pool and pipeline tasks |
//! | `storage` | Columnar tables, PK index, WAL, transactions |
//! | `database` | Embedder surface: prepare / execute |

pub mod ast;
pub mod binder;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod expression;
pub mod function;
pub mod mapper;
pub mod planner;
pub mod result;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod value;
pub mod vector;

// Re-export the embedder-facing types
pub use config::Config;
pub use database::{Database, PreparedStatement};
pub use error::{QuiverError, QuiverResult};
pub use result::{QueryResult, QuerySummary};
pub use types::LogicalType;
pub use value::Value;
