//! Typed cell access over query result batches

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, LargeStringArray, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, TimeZone, Utc};

use crate::bins::calendar::parse_instant;
use crate::DataError;

/// Look up a result column by name
pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, DataError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DataError::MissingColumn(name.to_string()))
}

fn unexpected(name: &str, array: &ArrayRef) -> DataError {
    DataError::UnexpectedType {
        column: name.to_string(),
        data_type: array.data_type().to_string(),
    }
}

/// Read a numeric cell as `f64`
pub fn f64_value(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<f64>, DataError> {
    let array = column(batch, name)?;
    if row >= array.len() || array.is_null(row) {
        return Ok(None);
    }

    let any = array.as_any();
    if let Some(a) = any.downcast_ref::<Float64Array>() {
        Ok(Some(a.value(row)))
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        Ok(Some(a.value(row) as f64))
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        Ok(Some(a.value(row) as f64))
    } else if let Some(a) = any.downcast_ref::<Float32Array>() {
        Ok(Some(a.value(row) as f64))
    } else if let Some(a) = any.downcast_ref::<StringArray>() {
        Ok(a.value(row).trim().parse::<f64>().ok())
    } else {
        Err(unexpected(name, array))
    }
}

/// Read an integral cell; floats are truncated
pub fn i64_value(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<i64>, DataError> {
    let array = column(batch, name)?;
    if row >= array.len() || array.is_null(row) {
        return Ok(None);
    }

    let any = array.as_any();
    if let Some(a) = any.downcast_ref::<Int64Array>() {
        Ok(Some(a.value(row)))
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        Ok(Some(a.value(row) as i64))
    } else if let Some(a) = any.downcast_ref::<Float64Array>() {
        let v = a.value(row);
        Ok(v.is_finite().then(|| v as i64))
    } else if let Some(a) = any.downcast_ref::<StringArray>() {
        Ok(a.value(row).trim().parse::<i64>().ok())
    } else {
        Err(unexpected(name, array))
    }
}

/// Read a count cell; nulls count as zero
pub fn count_value(batch: &RecordBatch, name: &str, row: usize) -> Result<u64, DataError> {
    Ok(i64_value(batch, name, row)?.map(|v| v.max(0) as u64).unwrap_or(0))
}

/// Read any cell as display text
pub fn string_value(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<String>, DataError> {
    let array = column(batch, name)?;
    if row >= array.len() || array.is_null(row) {
        return Ok(None);
    }

    let any = array.as_any();
    if let Some(a) = any.downcast_ref::<StringArray>() {
        Ok(Some(a.value(row).to_string()))
    } else if let Some(a) = any.downcast_ref::<LargeStringArray>() {
        Ok(Some(a.value(row).to_string()))
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        Ok(Some(a.value(row).to_string()))
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        Ok(Some(a.value(row).to_string()))
    } else if let Some(a) = any.downcast_ref::<Float64Array>() {
        Ok(Some(a.value(row).to_string()))
    } else if let Some(a) = any.downcast_ref::<BooleanArray>() {
        Ok(Some(a.value(row).to_string()))
    } else {
        Err(unexpected(name, array))
    }
}

/// Read a temporal cell as a UTC instant
///
/// Timestamp arrays, dates, epoch-millisecond integers and ISO text are all
/// accepted. Text that does not parse yields `Ok(None)` so callers can skip
/// it instead of failing the whole result.
pub fn instant_value(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<DateTime<Utc>>, DataError> {
    let array = column(batch, name)?;
    if row >= array.len() || array.is_null(row) {
        return Ok(None);
    }

    let any = array.as_any();
    let instant = if let Some(a) = any.downcast_ref::<StringArray>() {
        parse_instant(a.value(row))
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        Utc.timestamp_millis_opt(a.value(row)).single()
    } else if let Some(a) = any.downcast_ref::<TimestampMillisecondArray>() {
        Utc.timestamp_millis_opt(a.value(row)).single()
    } else if let Some(a) = any.downcast_ref::<TimestampMicrosecondArray>() {
        Utc.timestamp_micros(a.value(row)).single()
    } else if let Some(a) = any.downcast_ref::<TimestampNanosecondArray>() {
        Some(Utc.timestamp_nanos(a.value(row)))
    } else if let Some(a) = any.downcast_ref::<TimestampSecondArray>() {
        Utc.timestamp_opt(a.value(row), 0).single()
    } else if let Some(a) = any.downcast_ref::<Date32Array>() {
        Utc.timestamp_opt(a.value(row) as i64 * 86_400, 0).single()
    } else {
        return Err(unexpected(name, array));
    };
    Ok(instant)
}
