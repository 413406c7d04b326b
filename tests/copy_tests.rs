//! COPY FROM / COPY TO round trips and failure atomicity.

use quiver::ast::builders::*;
use quiver::ast::{CopyOptions, FileFormat, ParsedStatement};
use quiver::{Database, LogicalType, QuiverError, Value};
use std::fs;
use tempfile::TempDir;

fn setup_db() -> Database {
    let db = Database::in_memory().expect("open db");
    db.query(&ParsedStatement::CreateNodeTable {
        name: "person".to_string(),
        properties: vec![
            ("ID".to_string(), LogicalType::Int64),
            ("fName".to_string(), LogicalType::String),
            ("score".to_string(), LogicalType::Double),
        ],
        primary_key: "ID".to_string(),
    })
    .expect("create person");
    db
}

fn copy_from(db: &Database, table: &str, path: &std::path::Path, format: FileFormat) -> quiver::QuiverResult<quiver::QueryResult> {
    db.query(&ParsedStatement::CopyFrom {
        table: table.to_string(),
        path: path.to_string_lossy().into_owned(),
        format,
        options: CopyOptions::default(),
    })
}

fn scan_sorted(db: &Database, table: &str) -> Vec<Vec<Value>> {
    db.query(&ParsedStatement::Query(
        match_(node("p", table))
            .ret([prop("p", "ID"), prop("p", "fName"), prop("p", "score")])
            .order_by(prop("p", "ID"), true)
            .build(),
    ))
    .expect("scan")
    .into_rows()
}

#[test]
fn test_csv_copy_from() {
    let db = setup_db();
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("people.csv");
    fs::write(&path, "ID,fName,score\n1,Alice,9.5\n2,Bob,7.25\n").expect("write");

    let result = copy_from(&db, "person", &path, FileFormat::Csv).expect("copy");
    assert!(result.rows()[0][0].to_string().contains("2 tuples"));

    let rows = scan_sorted(&db, "person");
    assert_eq!(
        rows,
        vec![
            vec![Value::Int64(1), Value::string("Alice"), Value::Double(9.5)],
            vec![Value::Int64(2), Value::string("Bob"), Value::Double(7.25)],
        ]
    );
}

#[test]
fn test_duplicate_primary_key_aborts_whole_copy() {
    let db = setup_db();
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("dup.csv");
    fs::write(&path, "ID,fName,score\n1,Alice,1.0\n1,Imposter,2.0\n").expect("write");

    let err = copy_from(&db, "person", &path, FileFormat::Csv).expect_err("duplicate");
    assert!(matches!(err, QuiverError::Runtime(_)));
    assert!(err.to_string().contains("duplicated primary key"));

    // Nothing landed.
    let rows = scan_sorted(&db, "person");
    assert!(rows.is_empty());
}

#[test]
fn test_copy_conflict_with_existing_rows_aborts() {
    let db = setup_db();
    let temp = TempDir::new().expect("tempdir");
    let first = temp.path().join("first.csv");
    fs::write(&first, "ID,fName,score\n1,Alice,1.0\n").expect("write");
    copy_from(&db, "person", &first, FileFormat::Csv).expect("first copy");

    let second = temp.path().join("second.csv");
    fs::write(&second, "ID,fName,score\n2,Bob,2.0\n1,Alice,1.0\n").expect("write");
    let err = copy_from(&db, "person", &second, FileFormat::Csv).expect_err("conflict");
    assert!(err.to_string().contains("duplicated primary key"));

    // The second file contributed nothing at all.
    assert_eq!(scan_sorted(&db, "person").len(), 1);
}

#[test]
fn test_copy_round_trip_csv() {
    let db = setup_db();
    let temp = TempDir::new().expect("tempdir");
    let source = temp.path().join("people.csv");
    fs::write(&source, "ID,fName,score\n1,Alice,9.5\n2,Bob,7.25\n3,Carol,0.5\n")
        .expect("write");
    copy_from(&db, "person", &source, FileFormat::Csv).expect("copy in");

    // COPY (MATCH ...) TO file, then re-import into an identical schema.
    let exported = temp.path().join("exported.csv");
    db.query(&ParsedStatement::CopyTo {
        query: match_(node("p", "person"))
            .ret([prop("p", "ID"), prop("p", "fName"), prop("p", "score")])
            .build(),
        path: exported.to_string_lossy().into_owned(),
        format: FileFormat::Csv,
    })
    .expect("copy out");

    db.query(&ParsedStatement::CreateNodeTable {
        name: "person2".to_string(),
        properties: vec![
            ("ID".to_string(), LogicalType::Int64),
            ("fName".to_string(), LogicalType::String),
            ("score".to_string(), LogicalType::Double),
        ],
        primary_key: "ID".to_string(),
    })
    .expect("create person2");
    copy_from(&db, "person2", &exported, FileFormat::Csv).expect("copy back");

    assert_eq!(scan_sorted(&db, "person"), scan_sorted(&db, "person2"));
    assert_eq!(scan_sorted(&db, "person2").len(), 3);
}

#[test]
fn test_copy_round_trip_parquet() {
    let db = setup_db();
    let temp = TempDir::new().expect("tempdir");
    let source = temp.path().join("people.csv");
    fs::write(&source, "ID,fName,score\n1,Alice,9.5\n2,Bob,7.25\n").expect("write");
    copy_from(&db, "person", &source, FileFormat::Csv).expect("copy in");

    let exported = temp.path().join("exported.parquet");
    db.query(&ParsedStatement::CopyTo {
        query: match_(node("p", "person"))
            .ret([prop("p", "ID"), prop("p", "fName"), prop("p", "score")])
            .build(),
        path: exported.to_string_lossy().into_owned(),
        format: FileFormat::Parquet,
    })
    .expect("copy out");

    db.query(&ParsedStatement::CreateNodeTable {
        name: "person2".to_string(),
        properties: vec![
            ("ID".to_string(), LogicalType::Int64),
            ("fName".to_string(), LogicalType::String),
            ("score".to_string(), LogicalType::Double),
        ],
        primary_key: "ID".to_string(),
    })
    .expect("create person2");
    copy_from(&db, "person2", &exported, FileFormat::Parquet).expect("copy back");

    assert_eq!(scan_sorted(&db, "person"), scan_sorted(&db, "person2"));
}

#[test]
fn test_rel_copy_unmatched_key_fails() {
    let db = setup_db();
    db.query(&ParsedStatement::CreateRelTable {
        name: "knows".to_string(),
        src: "person".to_string(),
        dst: "person".to_string(),
        properties: vec![],
    })
    .expect("create knows");

    let temp = TempDir::new().expect("tempdir");
    let people = temp.path().join("people.csv");
    fs::write(&people, "ID,fName,score\n1,Alice,1.0\n").expect("write");
    copy_from(&db, "person", &people, FileFormat::Csv).expect("copy people");

    let knows = temp.path().join("knows.csv");
    fs::write(&knows, "from,to\n1,99\n").expect("write");
    let err = copy_from(&db, "knows", &knows, FileFormat::Csv).expect_err("bad key");
    assert!(matches!(err, QuiverError::Runtime(_)));
    assert!(err.to_string().contains("unmatched"));
}

#[test]
fn test_rel_copy_with_properties() {
    let db = setup_db();
    db.query(&ParsedStatement::CreateRelTable {
        name: "knows".to_string(),
        src: "person".to_string(),
        dst: "person".to_string(),
        properties: vec![("since".to_string(), LogicalType::Int64)],
    })
    .expect("create knows");

    let temp = TempDir::new().expect("tempdir");
    let people = temp.path().join("people.csv");
    fs::write(&people, "ID,fName,score\n1,Alice,1.0\n2,Bob,2.0\n").expect("write");
    copy_from(&db, "person", &people, FileFormat::Csv).expect("copy people");

    let knows = temp.path().join("knows.csv");
    fs::write(&knows, "from,to,since\n1,2,2019\n").expect("write");
    copy_from(&db, "knows", &knows, FileFormat::Csv).expect("copy knows");

    // Read the rel property back through a named rel variable.
    let rel = quiver::ast::RelPattern {
        variable: Some("e".to_string()),
        label: Some("knows".to_string()),
        direction: quiver::types::ExtendDirection::Forward,
        recursive: None,
    };
    let result = db
        .query(&ParsedStatement::Query(
            match_(node("a", "person"))
                .hop(rel, node_any("b"))
                .ret([prop("a", "fName"), prop("e", "since"), prop("b", "fName")])
                .build(),
        ))
        .expect("query");
    assert_eq!(
        result.rows(),
        &[vec![
            Value::string("Alice"),
            Value::Int64(2019),
            Value::string("Bob")
        ]]
    );
}
