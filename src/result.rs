//! Query results
//!
//! `QueryResult` carries the result descriptor, the materialized tuples
//! and a `QuerySummary` with compile/execute timings and the plan
//! printout in text and JSON.

use crate::types::LogicalType;
use crate::value::Value;

/// Timings and plan printout of one executed statement
#[derive(Debug, Clone)]
pub struct QuerySummary {
    pub compiling_time_ms: f64,
    pub execution_time_ms: f64,
    pub plan_text: String,
    pub plan_json: serde_json::Value,
}

/// A finished statement's result
#[derive(Debug)]
pub struct QueryResult {
    columns: Vec<(String, LogicalType)>,
    rows: Vec<Vec<Value>>,
    summary: QuerySummary,
}

impl QueryResult {
    pub fn new(
        columns: Vec<(String, LogicalType)>,
        rows: Vec<Vec<Value>>,
        summary: QuerySummary,
    ) -> Self {
        QueryResult {
            columns,
            rows,
            summary,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column_types(&self) -> Vec<&LogicalType> {
        self.columns.iter().map(|(_, t)| t).collect()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tuple iterator, in result order
    pub fn iter(&self) -> std::slice::Iter<'_, Vec<Value>> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn summary(&self) -> &QuerySummary {
        &self.summary
    }

    /// One column projected out as values, for terse assertions
    pub fn column(&self, idx: usize) -> Vec<Value> {
        self.rows.iter().map(|r| r[idx].clone()).collect()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Vec<Value>;
    type IntoIter = std::slice::Iter<'a, Vec<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> QueryResult {
        QueryResult::new(
            vec![
                ("name".to_string(), LogicalType::String),
                ("age".to_string(), LogicalType::Int64),
            ],
            vec![
                vec![Value::string("Alice"), Value::Int64(25)],
                vec![Value::string("Bob"), Value::Int64(40)],
            ],
            QuerySummary {
                compiling_time_ms: 0.5,
                execution_time_ms: 1.5,
                plan_text: "SCAN_NODE".to_string(),
                plan_json: serde_json::json!({"name": "SCAN_NODE"}),
            },
        )
    }

    #[test]
    fn test_descriptor() {
        let r = result();
        assert_eq!(r.column_names(), vec!["name", "age"]);
        assert_eq!(
            r.column_types(),
            vec![&LogicalType::String, &LogicalType::Int64]
        );
        assert_eq!(r.num_rows(), 2);
    }

    #[test]
    fn test_iteration() {
        let r = result();
        let names: Vec<String> = r.iter().map(|row| row[0].to_string()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert_eq!(r.column(1), vec![Value::Int64(25), Value::Int64(40)]);
    }

    #[test]
    fn test_summary() {
        let r = result();
        assert!(r.summary().plan_text.contains("SCAN_NODE"));
        assert_eq!(r.summary().plan_json["name"], "SCAN_NODE");
    }
}
