//! SQLite query engine

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;
use tracing::{debug, trace};
use xf_core::filter::predicate::{format_instant, quote_identifier};
use xf_core::QueryEngine;

use crate::bins::calendar::{parse_instant, TimeUnit};
use crate::DataError;

/// A declared column of a table
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub declared_type: String,
}

/// Query engine backed by one SQLite connection
///
/// The connection gets the dialect helpers the planners rely on:
/// `epoch_ms(ts)`, `date_trunc(unit, ts)`, `floor(x)` and the
/// `quantile_cont(x, q)` aggregate. Instants are read from ISO-8601 text,
/// or from integers and reals holding epoch milliseconds; `date_trunc`
/// returns RFC 3339 text with millisecond precision.
#[derive(Clone)]
pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

impl SqliteEngine {
    /// Open a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::from_connection(conn, format!("sqlite:{}", path.display()))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, DataError> {
        Self::from_connection(Connection::open_in_memory()?, "sqlite::memory:".to_string())
    }

    fn from_connection(conn: Connection, name: String) -> Result<Self, DataError> {
        register_functions(&conn)?;
        debug!(engine = %name, "opened sqlite engine");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            name,
        })
    }

    /// Execute statements without collecting results
    pub fn execute_batch(&self, sql: &str) -> Result<(), DataError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Tables in the main schema, sorted by name
    pub fn tables(&self) -> Result<Vec<String>, DataError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Declared columns of `table`
    pub fn table_columns(&self, table: &str) -> Result<Vec<TableColumn>, DataError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(TableColumn {
                    name: row.get(1)?,
                    declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Run a query on the calling thread
    pub fn query_blocking(&self, sql: &str) -> Result<RecordBatch, DataError> {
        run_query(&self.conn.lock(), sql)
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    async fn query(&self, sql: &str) -> anyhow::Result<RecordBatch> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let batch = tokio::task::spawn_blocking(move || run_query(&conn.lock(), &sql))
            .await
            .map_err(DataError::from)??;
        Ok(batch)
    }

    fn engine_name(&self) -> &str {
        &self.name
    }
}

/// Execute `sql` and collect every row into one batch
///
/// Column types are inferred from the values: integers only give `Int64`,
/// any real gives `Float64`, any text or blob gives `Utf8`.
fn run_query(conn: &Connection, sql: &str) -> Result<RecordBatch, DataError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = names.len();

    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); width];
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for (idx, column) in columns.iter_mut().enumerate() {
            column.push(row.get::<_, Value>(idx)?);
        }
    }
    trace!(rows = columns.first().map(Vec::len).unwrap_or(0), "sqlite query finished");

    let mut fields = Vec::with_capacity(width);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(width);
    for (name, values) in names.iter().zip(columns) {
        let data_type = infer_type(&values);
        arrays.push(build_array(&data_type, values));
        fields.push(Field::new(name, data_type, true));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn infer_type(values: &[Value]) -> DataType {
    let mut saw_integer = false;
    let mut saw_real = false;
    for value in values {
        match value {
            Value::Null => {}
            Value::Integer(_) => saw_integer = true,
            Value::Real(_) => saw_real = true,
            Value::Text(_) | Value::Blob(_) => return DataType::Utf8,
        }
    }
    match (saw_integer, saw_real) {
        (_, true) => DataType::Float64,
        (true, false) => DataType::Int64,
        (false, false) => DataType::Utf8,
    }
}

fn build_array(data_type: &DataType, values: Vec<Value>) -> ArrayRef {
    match data_type {
        DataType::Int64 => Arc::new(Int64Array::from(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(i as f64),
                    Value::Real(f) => Some(f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        _ => Arc::new(StringArray::from(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::Integer(i) => Some(i.to_string()),
                    Value::Real(f) => Some(f.to_string()),
                    Value::Text(s) => Some(s),
                    Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
                })
                .collect::<Vec<_>>(),
        )),
    }
}

/// Instant held by a SQLite value
fn instant_from_value(value: ValueRef<'_>) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(ms) => chrono::Utc.timestamp_millis_opt(ms).single(),
        ValueRef::Real(ms) if ms.is_finite() => chrono::Utc.timestamp_millis_opt(ms.round() as i64).single(),
        ValueRef::Real(_) => None,
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_instant),
    }
}

fn number_from_value(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

fn function_flags() -> FunctionFlags {
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC
}

fn register_functions(conn: &Connection) -> Result<(), DataError> {
    conn.create_scalar_function("epoch_ms", 1, function_flags(), |ctx| {
        Ok(instant_from_value(ctx.get_raw(0)).map(|t| t.timestamp_millis()))
    })?;

    conn.create_scalar_function("date_trunc", 2, function_flags(), |ctx| {
        let unit: String = ctx.get(0)?;
        let unit: TimeUnit = unit
            .parse()
            .map_err(|e: DataError| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        Ok(instant_from_value(ctx.get_raw(1)).map(|t| format_instant(&unit.truncate(t))))
    })?;

    conn.create_scalar_function("floor", 1, function_flags(), |ctx| {
        Ok(number_from_value(ctx.get_raw(0)).map(f64::floor))
    })?;

    conn.create_aggregate_function("quantile_cont", 2, function_flags(), QuantileCont)?;
    Ok(())
}

/// Continuous quantile with linear interpolation between ranks
struct QuantileCont;

#[derive(Default)]
struct QuantileState {
    values: Vec<f64>,
    q: Option<f64>,
}

impl Aggregate<QuantileState, Option<f64>> for QuantileCont {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<QuantileState> {
        Ok(QuantileState::default())
    }

    fn step(&self, ctx: &mut Context<'_>, state: &mut QuantileState) -> rusqlite::Result<()> {
        if state.q.is_none() {
            state.q = Some(ctx.get::<f64>(1)?);
        }
        if let Some(v) = number_from_value(ctx.get_raw(0)).filter(|v| v.is_finite()) {
            state.values.push(v);
        }
        Ok(())
    }

    fn finalize(&self, _ctx: &mut Context<'_>, state: Option<QuantileState>) -> rusqlite::Result<Option<f64>> {
        let Some(mut state) = state else {
            return Ok(None);
        };
        let q = state.q.unwrap_or(0.5).clamp(0.0, 1.0);
        Ok(quantile_cont(&mut state.values, q))
    }
}

fn quantile_cont(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (values.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{f64_value, i64_value, string_value};

    fn engine() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch(
                "CREATE TABLE t (x REAL, ts TEXT, label TEXT);
                 INSERT INTO t VALUES (1, '2024-03-15T10:42:00Z', 'a');
                 INSERT INTO t VALUES (2, '2024-03-15 11:05:00', 'b');
                 INSERT INTO t VALUES (3, 'garbage', NULL);
                 INSERT INTO t VALUES (4, NULL, 'b');",
            )
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_quantile_aggregate() {
        let engine = engine();
        let batch = engine
            .query("SELECT quantile_cont(x, 0.25) AS q1, quantile_cont(x, 0.75) AS q3 FROM t")
            .await
            .unwrap();
        assert_eq!(f64_value(&batch, "q1", 0).unwrap(), Some(1.75));
        assert_eq!(f64_value(&batch, "q3", 0).unwrap(), Some(3.25));
    }

    #[tokio::test]
    async fn test_temporal_helpers() {
        let engine = engine();
        let batch = engine
            .query("SELECT date_trunc('hour', ts) AS h, epoch_ms(ts) AS ms FROM t ORDER BY x")
            .await
            .unwrap();
        assert_eq!(string_value(&batch, "h", 0).unwrap().as_deref(), Some("2024-03-15T10:00:00.000Z"));
        assert_eq!(string_value(&batch, "h", 1).unwrap().as_deref(), Some("2024-03-15T11:00:00.000Z"));
        assert_eq!(string_value(&batch, "h", 2).unwrap(), None);
        assert!(i64_value(&batch, "ms", 0).unwrap().is_some());
        assert_eq!(i64_value(&batch, "ms", 3).unwrap(), None);
    }

    #[tokio::test]
    async fn test_functions_are_deterministic_for_every_registration() {
        let engine = engine();
        engine
            .execute_batch(
                "CREATE INDEX t_ms ON t(epoch_ms(ts));
                 CREATE INDEX t_hour ON t(date_trunc('hour', ts));
                 CREATE INDEX t_floor ON t(floor(x));",
            )
            .unwrap();

        let batch = engine
            .query("SELECT epoch_ms('2024-03-02') AS a, epoch_ms('03/02/2024 12:00:00 AM') AS b, epoch_ms(1709337600000) AS c")
            .await
            .unwrap();
        for column in ["a", "b", "c"] {
            assert_eq!(i64_value(&batch, column, 0).unwrap(), Some(1_709_337_600_000), "{column}");
        }
    }

    #[tokio::test]
    async fn test_unknown_unit_is_an_error() {
        let engine = engine();
        assert!(engine.query("SELECT date_trunc('fortnight', ts) FROM t").await.is_err());
    }

    #[test]
    fn test_schema_introspection() {
        let engine = engine();
        assert_eq!(engine.tables().unwrap(), vec!["t".to_string()]);
        let columns = engine.table_columns("t").unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].declared_type, "REAL");
    }

    #[test]
    fn test_type_inference() {
        let engine = engine();
        let batch = engine.query_blocking("SELECT COUNT(*) AS n, MIN(x) AS lo, MIN(label) AS s FROM t").unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Float64);
        assert_eq!(batch.schema().field(2).data_type(), &DataType::Utf8);
    }
}
