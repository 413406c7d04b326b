//! Arrow Conversion Utilities
//!
//! Bridges between engine values and Arrow `RecordBatch`es. COPY FROM
//! consumes record batches produced by the CSV/Parquet readers; COPY TO
//! feeds them to the writers.

use crate::error::{QuiverError, QuiverResult};
use crate::types::LogicalType;
use crate::value::Value;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

/// Arrow data type for a logical type, for the copy surface
pub fn to_arrow_type(ty: &LogicalType) -> QuiverResult<ArrowDataType> {
    Ok(match ty {
        LogicalType::Bool => ArrowDataType::Boolean,
        LogicalType::Int8 => ArrowDataType::Int8,
        LogicalType::Int16 => ArrowDataType::Int16,
        LogicalType::Int32 => ArrowDataType::Int32,
        LogicalType::Int64 => ArrowDataType::Int64,
        LogicalType::Float => ArrowDataType::Float32,
        LogicalType::Double => ArrowDataType::Float64,
        LogicalType::Date => ArrowDataType::Date32,
        LogicalType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        LogicalType::String | LogicalType::Uuid => ArrowDataType::Utf8,
        other => {
            return Err(QuiverError::runtime(format!(
                "type {other} is not supported by the copy surface"
            )))
        }
    })
}

/// Arrow schema for a list of (name, type) columns
pub fn to_arrow_schema(columns: &[(String, LogicalType)]) -> QuiverResult<ArrowSchema> {
    let fields: QuiverResult<Vec<Field>> = columns
        .iter()
        .map(|(name, ty)| Ok(Field::new(name, to_arrow_type(ty)?, true)))
        .collect();
    Ok(ArrowSchema::new(fields?))
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch")
}

/// Decode one cell of an arrow column into a value of the target type
fn cell_to_value(column: &ArrayRef, row: usize, ty: &LogicalType) -> QuiverResult<Value> {
    if column.is_null(row) {
        return Ok(Value::Null(ty.clone()));
    }
    let bad = || QuiverError::runtime(format!("unexpected arrow column for type {ty}"));
    Ok(match ty {
        LogicalType::Bool => Value::Bool(
            column
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Int8 => Value::Int8(
            column
                .as_any()
                .downcast_ref::<Int8Array>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Int16 => Value::Int16(
            column
                .as_any()
                .downcast_ref::<Int16Array>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Int32 => Value::Int32(
            column
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Int64 => Value::Int64(
            column
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Float => Value::Float(
            column
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Double => Value::Double(
            column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(bad)?
                .value(row),
        ),
        LogicalType::Date => {
            let days = column
                .as_any()
                .downcast_ref::<Date32Array>()
                .ok_or_else(bad)?
                .value(row);
            Value::Date(epoch_date() + chrono::Duration::days(i64::from(days)))
        }
        LogicalType::Timestamp => {
            let micros = column
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(bad)?
                .value(row);
            let ts: DateTime<Utc> = Utc
                .timestamp_micros(micros)
                .single()
                .ok_or_else(|| QuiverError::runtime("timestamp out of range"))?;
            Value::Timestamp(ts)
        }
        LogicalType::String => Value::String(
            column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(bad)?
                .value(row)
                .to_string(),
        ),
        LogicalType::Uuid => {
            let s = column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(bad)?
                .value(row);
            Value::Uuid(
                s.parse()
                    .map_err(|e| QuiverError::runtime(format!("invalid UUID '{s}': {e}")))?,
            )
        }
        other => {
            return Err(QuiverError::runtime(format!(
                "type {other} is not supported by the copy surface"
            )))
        }
    })
}

/// Convert a record batch into rows of engine values, one per batch row
pub fn record_batch_to_rows(
    batch: &RecordBatch,
    types: &[LogicalType],
) -> QuiverResult<Vec<Vec<Value>>> {
    if batch.num_columns() != types.len() {
        return Err(QuiverError::runtime(format!(
            "expected {} columns, file has {}",
            types.len(),
            batch.num_columns()
        )));
    }
    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut values = Vec::with_capacity(types.len());
        for (col, ty) in types.iter().enumerate() {
            values.push(cell_to_value(batch.column(col), row, ty)?);
        }
        rows.push(values);
    }
    Ok(rows)
}

/// Convert rows of engine values into a record batch with the given columns
pub fn rows_to_record_batch(
    rows: &[Vec<Value>],
    columns: &[(String, LogicalType)],
) -> QuiverResult<RecordBatch> {
    let schema = Arc::new(to_arrow_schema(columns)?);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (col, (_, ty)) in columns.iter().enumerate() {
        let array: ArrayRef = match ty {
            LogicalType::Bool => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_bool())
                    .collect::<BooleanArray>(),
            ),
            LogicalType::Int8 => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_int128().map(|v| v as i8))
                    .collect::<Int8Array>(),
            ),
            LogicalType::Int16 => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_int128().map(|v| v as i16))
                    .collect::<Int16Array>(),
            ),
            LogicalType::Int32 => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_int128().map(|v| v as i32))
                    .collect::<Int32Array>(),
            ),
            LogicalType::Int64 => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_int128().map(|v| v as i64))
                    .collect::<Int64Array>(),
            ),
            LogicalType::Float => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_f64().map(|v| v as f32))
                    .collect::<Float32Array>(),
            ),
            LogicalType::Double => Arc::new(
                rows.iter()
                    .map(|r| r[col].as_f64())
                    .collect::<Float64Array>(),
            ),
            LogicalType::Date => Arc::new(
                rows.iter()
                    .map(|r| match &r[col] {
                        Value::Date(d) => {
                            Some((*d - epoch_date()).num_days() as i32)
                        }
                        _ => None,
                    })
                    .collect::<Date32Array>(),
            ),
            LogicalType::Timestamp => Arc::new(
                rows.iter()
                    .map(|r| match &r[col] {
                        Value::Timestamp(t) => Some(t.timestamp_micros()),
                        _ => None,
                    })
                    .collect::<TimestampMicrosecondArray>(),
            ),
            LogicalType::String | LogicalType::Uuid => Arc::new(
                rows.iter()
                    .map(|r| {
                        if r[col].is_null() {
                            None
                        } else {
                            Some(r[col].to_string())
                        }
                    })
                    .collect::<StringArray>(),
            ),
            other => {
                return Err(QuiverError::runtime(format!(
                    "type {other} is not supported by the copy surface"
                )))
            }
        };
        arrays.push(array);
    }
    RecordBatch::try_new(schema, arrays).map_err(Into::into)
}
