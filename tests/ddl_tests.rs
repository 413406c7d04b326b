//! DDL statements, database operations and session options end to end.

use quiver::ast::builders::*;
use quiver::ast::{AlterOp, ParsedStatement};
use quiver::{Database, LogicalType, QuiverError, Value};
use tempfile::TempDir;

fn create_person(db: &Database) {
    db.query(&ParsedStatement::CreateNodeTable {
        name: "person".to_string(),
        properties: vec![
            ("ID".to_string(), LogicalType::Int64),
            ("fName".to_string(), LogicalType::String),
        ],
        primary_key: "ID".to_string(),
    })
    .expect("create person");
}

#[test]
fn test_create_drop_table_messages() {
    let db = Database::in_memory().expect("open db");
    create_person(&db);

    let result = db
        .query(&ParsedStatement::DropTable {
            name: "person".to_string(),
        })
        .expect("drop");
    assert_eq!(result.column_names(), vec!["result"]);
    assert_eq!(
        result.rows()[0][0],
        Value::string("Table person has been dropped.")
    );

    // Binding against the dropped table now fails.
    let err = db
        .query(&ParsedStatement::Query(
            match_(node("p", "person")).ret([prop("p", "ID")]).build(),
        ))
        .expect_err("gone");
    assert!(matches!(err, QuiverError::Catalog(_)));
}

#[test]
fn test_alter_table_property_lifecycle() {
    let db = Database::in_memory().expect("open db");
    create_person(&db);

    db.query(&ParsedStatement::Alter {
        table: "person".to_string(),
        op: AlterOp::AddProperty {
            name: "age".to_string(),
            ty: LogicalType::Int64,
        },
    })
    .expect("add");
    db.query(&ParsedStatement::Alter {
        table: "person".to_string(),
        op: AlterOp::RenameProperty {
            old: "age".to_string(),
            new: "years".to_string(),
        },
    })
    .expect("rename");

    let info = db
        .query(&ParsedStatement::TableCall {
            function: "table_info".to_string(),
            args: vec![lit_str("person")],
        })
        .expect("info");
    let names: Vec<String> = info.iter().map(|r| r[0].to_string()).collect();
    assert!(names.contains(&"years".to_string()));
    assert!(!names.contains(&"age".to_string()));

    db.query(&ParsedStatement::Alter {
        table: "person".to_string(),
        op: AlterOp::DropProperty {
            name: "years".to_string(),
        },
    })
    .expect("drop property");
}

#[test]
fn test_sequences() {
    let db = Database::in_memory().expect("open db");
    db.query(&ParsedStatement::CreateSequence {
        name: "ids".to_string(),
    })
    .expect("create");
    let result = db
        .query(&ParsedStatement::DropSequence {
            name: "ids".to_string(),
        })
        .expect("drop");
    assert!(result.rows()[0][0].to_string().contains("dropped"));

    // Dropping again reports the error as a single-row result.
    let again = db
        .query(&ParsedStatement::DropSequence {
            name: "ids".to_string(),
        })
        .expect("error as result");
    assert!(again.rows()[0][0].to_string().contains("does not exist"));
}

#[test]
fn test_attach_use_detach() {
    let db = Database::in_memory().expect("open db");
    create_person(&db);
    let temp = TempDir::new().expect("tempdir");

    db.query(&ParsedStatement::Attach {
        path: temp.path().to_string_lossy().into_owned(),
        alias: "side".to_string(),
    })
    .expect("attach");

    db.query(&ParsedStatement::UseDatabase {
        name: "side".to_string(),
    })
    .expect("use");

    // The side database has its own catalog.
    let err = db
        .query(&ParsedStatement::Query(
            match_(node("p", "person")).ret([prop("p", "ID")]).build(),
        ))
        .expect_err("no person here");
    assert!(matches!(err, QuiverError::Catalog(_)));

    // Cannot detach the database in use.
    let result = db
        .query(&ParsedStatement::Detach {
            name: "side".to_string(),
        })
        .expect("error as result");
    assert!(result.rows()[0][0].to_string().contains("in use"));

    db.query(&ParsedStatement::UseDatabase {
        name: "main".to_string(),
    })
    .expect("back to main");
    db.query(&ParsedStatement::Detach {
        name: "side".to_string(),
    })
    .expect("detach");

    // And person is visible again.
    db.query(&ParsedStatement::Query(
        match_(node("p", "person")).ret([prop("p", "ID")]).build(),
    ))
    .expect("bind ok");
}

#[test]
fn test_threads_standing_call_bounds_workers() {
    let db = Database::in_memory().expect("open db");
    create_person(&db);
    db.query(&ParsedStatement::StandingCall {
        option: "threads".to_string(),
        value: Value::Int64(1),
    })
    .expect("threads=1");

    // Still executes correctly single-threaded.
    db.query(&ParsedStatement::Query(
        query()
            .create_node(
                "p",
                "person",
                vec![
                    ("ID".to_string(), lit_i64(1)),
                    ("fName".to_string(), lit_str("solo")),
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
    assert_eq!(result.column(0), vec![Value::string("solo")]);
}

#[test]
fn test_invalid_standing_call_rejected() {
    let db = Database::in_memory().expect("open db");
    let err = db
        .query(&ParsedStatement::StandingCall {
            option: "threads".to_string(),
            value: Value::Int64(0),
        })
        .expect_err("threads=0");
    assert!(matches!(err, QuiverError::Binder(_)));
}
