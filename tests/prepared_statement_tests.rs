//! Prepared statements: parameter typing at prepare, value rebinding at
//! execute, and table-function calls.

use quiver::ast::builders::*;
use quiver::ast::ParsedStatement;
use quiver::{Database, LogicalType, QuiverError, Value};
use std::collections::HashMap;

fn setup_db() -> Database {
    let db = Database::in_memory().expect("open db");
    db.query(&ParsedStatement::CreateNodeTable {
        name: "person".to_string(),
        properties: vec![
            ("ID".to_string(), LogicalType::Int64),
            ("fName".to_string(), LogicalType::String),
        ],
        primary_key: "ID".to_string(),
    })
    .expect("create person");
    for (id, name) in [(1, "alice"), (2, "bob")] {
        db.query(&ParsedStatement::Query(
            query()
                .create_node(
                    "p",
                    "person",
                    vec![
                        ("ID".to_string(), lit_i64(id)),
                        ("fName".to_string(), lit_str(name)),
                    ],
                )
                .build(),
        ))
        .expect("insert");
    }
    db
}

fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[test]
fn test_prepared_parameter_reuse() {
    let db = setup_db();
    let statement = ParsedStatement::Query(
        match_(node("p", "person"))
            .where_(eq(prop("p", "fName"), param("q")))
            .ret([prop("p", "ID")])
            .build(),
    );

    let prepared = db
        .prepare(&statement, &params(&[("q", Value::string("alice"))]))
        .expect("prepare");

    let first = db
        .execute(&prepared, params(&[("q", Value::string("alice"))]))
        .expect("execute alice");
    assert_eq!(first.column(0), vec![Value::Int64(1)]);

    // Same prepared statement, new value: no rebinding.
    let second = db
        .execute(&prepared, params(&[("q", Value::string("bob"))]))
        .expect("execute bob");
    assert_eq!(second.column(0), vec![Value::Int64(2)]);

    // Identical to the non-prepared form.
    let direct = db
        .query_with_params(&statement, params(&[("q", Value::string("alice"))]))
        .expect("direct");
    assert_eq!(direct.rows(), first.rows());
}

#[test]
fn test_missing_parameter_fails_at_prepare() {
    let db = setup_db();
    let statement = ParsedStatement::Query(
        match_(node("p", "person"))
            .where_(eq(prop("p", "fName"), param("q")))
            .ret([prop("p", "ID")])
            .build(),
    );
    let err = db.prepare(&statement, &HashMap::new()).expect_err("missing");
    assert!(matches!(err, QuiverError::Binder(_)));
    assert!(err.to_string().contains("$q"));
}

#[test]
fn test_show_tables_call() {
    let db = setup_db();
    let result = db
        .query(&ParsedStatement::TableCall {
            function: "show_tables".to_string(),
            args: vec![],
        })
        .expect("call");
    assert_eq!(result.column_names(), vec!["name", "type"]);
    assert_eq!(result.rows()[0][0], Value::string("person"));
    assert_eq!(result.rows()[0][1], Value::string("NODE"));
}

#[test]
fn test_table_info_call_with_parameter() {
    let db = setup_db();
    let statement = ParsedStatement::TableCall {
        function: "table_info".to_string(),
        args: vec![param("t")],
    };
    let prepared = db
        .prepare(&statement, &params(&[("t", Value::string("person"))]))
        .expect("prepare");
    let result = db
        .execute(&prepared, params(&[("t", Value::string("person"))]))
        .expect("execute");
    assert_eq!(result.num_rows(), 2);
    assert_eq!(result.rows()[0][0], Value::string("ID"));
    assert_eq!(result.rows()[0][2], Value::Bool(true));
}

#[test]
fn test_current_setting_reflects_standing_call() {
    let db = setup_db();
    db.query(&ParsedStatement::StandingCall {
        option: "timeout".to_string(),
        value: Value::Int64(5000),
    })
    .expect("set timeout");
    let result = db
        .query(&ParsedStatement::TableCall {
            function: "current_setting".to_string(),
            args: vec![lit_str("timeout")],
        })
        .expect("read setting");
    assert_eq!(result.rows()[0][0], Value::string("5000"));
}

#[test]
fn test_prepared_columns_descriptor() {
    let db = setup_db();
    let statement = ParsedStatement::Query(
        match_(node("p", "person"))
            .ret_as([(prop("p", "fName"), "name")])
            .build(),
    );
    let prepared = db.prepare(&statement, &HashMap::new()).expect("prepare");
    assert!(prepared.is_read_only());
    assert_eq!(prepared.columns().len(), 1);
    assert_eq!(prepared.columns()[0].0, "name");
    assert_eq!(prepared.columns()[0].1, LogicalType::String);
}
