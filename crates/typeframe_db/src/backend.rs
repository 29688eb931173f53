//! DuckDB connection handle.
//!
//! Synchronous, shared, explicitly passed around. Every public operation
//! takes the connection mutex for its whole duration, so one call (or one
//! [`DbConnection::transaction`]) is the unit of exclusive access.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug_span, info, warn};

use crate::error::{DbError, Result};
use crate::lock::{try_lock_exclusive, DbLockGuard, LockError};

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access (requires exclusive lock for file databases)
    ReadWrite,
    /// Read-only access (can coexist with other readers)
    ReadOnly,
}

/// Timestamp wrapper for database values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbTimestamp {
    inner: chrono::DateTime<chrono::Utc>,
}

impl DbTimestamp {
    /// Construct from Unix microseconds.
    pub fn from_unix_micros(micros: i64) -> Result<Self> {
        chrono::DateTime::from_timestamp_micros(micros)
            .map(|dt| Self { inner: dt })
            .ok_or_else(|| DbError::type_conversion("Invalid Unix microseconds"))
    }

    /// RFC3339 string representation.
    pub fn to_rfc3339(&self) -> String {
        self.inner.to_rfc3339()
    }

    /// Calendar date of this timestamp (UTC).
    pub fn date(&self) -> NaiveDate {
        self.inner.date_naive()
    }

    pub fn as_chrono(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.inner
    }
}

/// Value type for query parameters and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DbTimestamp),
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<NaiveDate> for DbValue {
    fn from(v: NaiveDate) -> Self {
        DbValue::Date(v)
    }
}

impl From<DbTimestamp> for DbValue {
    fn from(v: DbTimestamp) -> Self {
        DbValue::Timestamp(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::type_conversion(format!("Column index {} out of bounds", index)))
            .and_then(|v| T::from_db_value(v))
    }

    pub fn into_values(self) -> Vec<DbValue> {
        self.values
    }
}

/// Trait for converting from DbValue.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self>;
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Null => Err(DbError::type_conversion(
                "i64 field is NULL - use Option<i64> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected integer")),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            DbValue::Null => Err(DbError::type_conversion(
                "f64 field is NULL - use Option<f64> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected real")),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Null => Err(DbError::type_conversion(
                "String field is NULL - use Option<String> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected text")),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            DbValue::Null => Err(DbError::type_conversion(
                "bool field is NULL - use Option<bool> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected boolean")),
        }
    }
}

impl FromDbValue for NaiveDate {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Date(v) => Ok(*v),
            DbValue::Timestamp(v) => Ok(v.date()),
            DbValue::Text(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|e| DbError::type_conversion(format!("Invalid date '{}': {}", v, e))),
            DbValue::Null => Err(DbError::type_conversion(
                "NaiveDate field is NULL - use Option<NaiveDate> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected date")),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

/// Conflict resolution for [`DbConnection::upsert_rows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Overwrite the non-key columns of the existing row.
    Update,
    /// Keep the existing row untouched.
    Ignore,
}

struct ConnectionInner {
    conn: Mutex<duckdb::Connection>,
    access_mode: AccessMode,
    /// Held for its Drop: releases the file lock with the last handle.
    _lock_guard: Option<DbLockGuard>,
}

/// Shared DuckDB connection handle.
///
/// Clones share one underlying connection.
#[derive(Clone)]
pub struct DbConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"DuckDB")
            .field("access_mode", &self.inner.access_mode)
            .finish()
    }
}

impl DbConnection {
    fn from_parts(
        conn: duckdb::Connection,
        access_mode: AccessMode,
        lock_guard: Option<DbLockGuard>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                conn: Mutex::new(conn),
                access_mode,
                _lock_guard: lock_guard,
            }),
        }
    }

    /// Open a database from a URL.
    ///
    /// Supported forms: `duckdb:<path>` and `duckdb::memory:`.
    pub fn open_from_url(url: &str) -> Result<Self> {
        match url.strip_prefix("duckdb:") {
            Some(":memory:") => Self::open_duckdb_memory(),
            Some(path) => Self::open_duckdb(Path::new(path)),
            None => Err(DbError::NotAvailable(format!(
                "Unsupported database URL: {}",
                url
            ))),
        }
    }

    /// Open a DuckDB database file with an exclusive write lock.
    pub fn open_duckdb(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_guard = try_lock_exclusive(path).map_err(|e| match e {
            LockError::Locked(p) => DbError::Locked(p.display().to_string()),
            LockError::CreateFailed(io) | LockError::AcquireFailed(io) => DbError::Io(io),
        })?;

        let conn = duckdb::Connection::open(path)?;
        info!(
            "Opened DuckDB database with exclusive lock: {}",
            path.display()
        );
        Ok(Self::from_parts(conn, AccessMode::ReadWrite, Some(lock_guard)))
    }

    /// Open a DuckDB database in read-only mode (no lock required).
    pub fn open_duckdb_readonly(path: &Path) -> Result<Self> {
        use duckdb::{AccessMode as DuckAccessMode, Config};

        let config = Config::default().access_mode(DuckAccessMode::ReadOnly)?;
        let conn = duckdb::Connection::open_with_flags(path, config)?;
        info!("Opened DuckDB database (read-only): {}", path.display());
        Ok(Self::from_parts(conn, AccessMode::ReadOnly, None))
    }

    /// Open an in-memory DuckDB database.
    pub fn open_duckdb_memory() -> Result<Self> {
        let conn = duckdb::Connection::open_in_memory()?;
        info!("Opened in-memory DuckDB database");
        Ok(Self::from_parts(conn, AccessMode::ReadWrite, None))
    }

    pub fn access_mode(&self) -> AccessMode {
        self.inner.access_mode
    }

    pub fn is_writable(&self) -> bool {
        self.inner.access_mode == AccessMode::ReadWrite
    }

    /// True when both handles share the same underlying connection.
    pub fn same_connection(&self, other: &DbConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, duckdb::Connection>> {
        self.inner.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.inner.access_mode == AccessMode::ReadOnly {
            return Err(DbError::ReadOnly);
        }
        Ok(())
    }

    /// Execute a SQL statement (no results).
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        self.ensure_writable()?;
        let conn = self.lock()?;
        execute_on_conn(&conn, sql, params)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.ensure_writable()?;
        let conn = self.lock()?;
        execute_batch_on_conn(&conn, sql)
    }

    /// Bulk insert rows into a table. Column order must match row value order.
    pub fn bulk_insert_rows(&self, table: &str, columns: &[&str], rows: &[Vec<DbValue>]) -> Result<u64> {
        self.ensure_writable()?;
        let conn = self.lock()?;
        bulk_insert_rows_internal(&conn, table, columns, rows)
    }

    /// Insert rows, resolving key conflicts according to `on_conflict`.
    pub fn upsert_rows(
        &self,
        table: &str,
        columns: &[&str],
        key_columns: &[&str],
        rows: &[Vec<DbValue>],
        on_conflict: OnConflict,
    ) -> Result<u64> {
        self.ensure_writable()?;
        let conn = self.lock()?;
        upsert_rows_internal(&conn, table, columns, key_columns, rows, on_conflict)
    }

    /// Query and return all rows.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        let conn = self.lock()?;
        query_on_conn(&conn, sql, params)
    }

    /// Query and return the first row, if any.
    pub fn query_optional(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    /// Query and return exactly one row.
    pub fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow> {
        self.query_optional(sql, params)?
            .ok_or_else(|| DbError::query("Expected one row, got none"))
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromDbValue>(&self, sql: &str, params: &[DbValue]) -> Result<T> {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }

    /// Query and return the result column names alongside the rows.
    ///
    /// Column names are returned even when there are no rows.
    pub fn query_with_columns(&self, sql: &str, params: &[DbValue]) -> Result<(Vec<String>, Vec<DbRow>)> {
        let conn = self.lock()?;
        query_with_columns_on_conn(&conn, sql, params)
    }

    /// Run a query once and read its result in chunks of `chunk_size` rows.
    ///
    /// Fails up front if the query does not prepare or execute.
    pub fn query_chunks(&self, sql: &str, chunk_size: usize) -> Result<DbRowStream> {
        if chunk_size == 0 {
            return Err(DbError::invalid_input("chunk size must be at least 1"));
        }
        let conn = self.lock()?.try_clone()?;
        let sql = sql.to_string();
        let (tx, rx) = mpsc::sync_channel(1);
        let reader = thread::Builder::new()
            .name("typeframe-db-stream".to_string())
            .spawn(move || {
                if let Err(err) = stream_rows(&conn, &sql, chunk_size, &tx) {
                    let _ = tx.send(StreamMessage::Failed(err));
                }
            })?;

        let columns = match rx.recv() {
            Ok(StreamMessage::Columns(columns)) => columns,
            Ok(StreamMessage::Failed(err)) => {
                let _ = reader.join();
                return Err(err);
            }
            Ok(StreamMessage::Rows(_)) | Err(_) => {
                return Err(DbError::query("query stream ended before its columns"));
            }
        };
        Ok(DbRowStream {
            columns,
            receiver: Some(rx),
            reader: Some(reader),
        })
    }

    /// Whether a table with this name exists in the main schema.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            &[DbValue::from(table)],
        )?;
        Ok(count > 0)
    }

    /// Run `op` inside BEGIN/COMMIT, rolling back if it fails.
    ///
    /// The connection stays locked for the whole closure.
    pub fn transaction<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut DbTransaction<'_>) -> Result<T>,
    {
        self.ensure_writable()?;
        let conn = self.lock()?;
        conn.execute_batch("BEGIN")?;
        let mut tx = DbTransaction { conn: &conn };
        let result = op(&mut tx);

        match result {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => match conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback_err) => Err(DbError::Transaction(format!(
                    "Transaction failed: {}; rollback failed: {}",
                    err, rollback_err
                ))),
            },
        }
    }
}

/// Statement access inside [`DbConnection::transaction`].
pub struct DbTransaction<'a> {
    conn: &'a duckdb::Connection,
}

impl<'a> DbTransaction<'a> {
    pub fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64> {
        execute_on_conn(self.conn, sql, params)
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch_on_conn(self.conn, sql)
    }

    pub fn bulk_insert_rows(&mut self, table: &str, columns: &[&str], rows: &[Vec<DbValue>]) -> Result<u64> {
        bulk_insert_rows_internal(self.conn, table, columns, rows)
    }

    pub fn upsert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        key_columns: &[&str],
        rows: &[Vec<DbValue>],
        on_conflict: OnConflict,
    ) -> Result<u64> {
        upsert_rows_internal(self.conn, table, columns, key_columns, rows, on_conflict)
    }
}

fn execute_on_conn(conn: &duckdb::Connection, sql: &str, params: &[DbValue]) -> Result<u64> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();
    let rows = stmt.execute(param_refs.as_slice())?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(rows as u64)
}

fn execute_batch_on_conn(conn: &duckdb::Connection, sql: &str) -> Result<()> {
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec_batch",
        op = "BATCH",
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    conn.execute_batch(sql)?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(())
}

fn query_on_conn(conn: &duckdb::Connection, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
    query_with_columns_on_conn(conn, sql, params).map(|(_, rows)| rows)
}

fn query_with_columns_on_conn(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<(Vec<String>, Vec<DbRow>)> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.query",
        op = op,
        sql_hash = %sql_hash,
        rows = tracing::field::Empty,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let duckdb_params = to_duckdb_params(params);
    let param_refs: Vec<&dyn duckdb::ToSql> = duckdb_params
        .iter()
        .map(|v| v as &dyn duckdb::ToSql)
        .collect();

    let mut rows_iter = stmt.query(param_refs.as_slice())?;

    let Some(columns) = result_columns(&rows_iter) else {
        return Ok((Vec::new(), Vec::new()));
    };
    let mut result = Vec::new();
    while let Some(row) = rows_iter.next()? {
        result.push(read_row(row, columns.len())?);
    }

    span.record("rows", result.len() as u64);
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok((columns, result))
}

/// Column names of an executed statement.
///
/// Metadata is only available once the statement has run.
fn result_columns(rows: &duckdb::Rows<'_>) -> Option<Vec<String>> {
    let stmt = rows.as_ref()?;
    Some(
        (0..stmt.column_count())
            .map(|i| {
                stmt.column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{}", i))
            })
            .collect(),
    )
}

fn read_row(row: &duckdb::Row<'_>, width: usize) -> Result<DbRow> {
    let values = (0..width)
        .map(|i| duckdb_value_to_db_value(row, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(DbRow::new(values))
}

enum StreamMessage {
    Columns(Vec<String>),
    Rows(Vec<DbRow>),
    Failed(DbError),
}

/// Query result read `chunk_size` rows at a time.
///
/// The query runs once, on a cloned connection owned by a reader thread,
/// so every chunk comes from the same snapshot. The reader stays at most
/// one chunk ahead of the consumer. Dropping the stream stops the reader
/// and closes its connection.
pub struct DbRowStream {
    columns: Vec<String>,
    receiver: Option<Receiver<StreamMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DbRowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbRowStream")
            .field("columns", &self.columns)
            .field("open", &self.receiver.is_some())
            .finish()
    }
}

impl DbRowStream {
    /// Result column names, known before the first chunk.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn finish(&mut self) {
        // The reader notices the closed channel on its next send.
        self.receiver = None;
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("query stream reader panicked");
            }
        }
    }
}

impl Iterator for DbRowStream {
    type Item = Result<Vec<DbRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv() {
            Ok(StreamMessage::Rows(rows)) => Some(Ok(rows)),
            Ok(StreamMessage::Failed(err)) => {
                self.finish();
                Some(Err(err))
            }
            Ok(StreamMessage::Columns(_)) => {
                self.finish();
                Some(Err(DbError::query("query stream sent columns twice")))
            }
            Err(_) => {
                self.finish();
                None
            }
        }
    }
}

impl Drop for DbRowStream {
    fn drop(&mut self) {
        self.finish();
    }
}

fn stream_rows(
    conn: &duckdb::Connection,
    sql: &str,
    chunk_size: usize,
    tx: &SyncSender<StreamMessage>,
) -> Result<()> {
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.stream",
        op = sql_op_name(sql),
        sql_hash = %sql_hash,
        rows = tracing::field::Empty
    );
    let _guard = span.enter();

    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(&[] as &[&dyn duckdb::ToSql])?;
    let columns = result_columns(&rows).unwrap_or_default();
    let width = columns.len();
    if tx.send(StreamMessage::Columns(columns)).is_err() {
        return Ok(());
    }

    let mut sent = 0u64;
    let mut chunk = Vec::with_capacity(chunk_size);
    while let Some(row) = rows.next()? {
        chunk.push(read_row(row, width)?);
        if chunk.len() == chunk_size {
            sent += chunk.len() as u64;
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
            if tx.send(StreamMessage::Rows(full)).is_err() {
                return Ok(());
            }
        }
    }
    if !chunk.is_empty() {
        sent += chunk.len() as u64;
        let _ = tx.send(StreamMessage::Rows(chunk));
    }
    span.record("rows", sent);
    Ok(())
}

fn to_duckdb_params(params: &[DbValue]) -> Vec<duckdb::types::Value> {
    params.iter().map(to_duckdb_value).collect()
}

fn to_duckdb_value(value: &DbValue) -> duckdb::types::Value {
    use duckdb::types::{TimeUnit, Value};

    match value {
        DbValue::Null => Value::Null,
        DbValue::Integer(v) => Value::BigInt(*v),
        DbValue::Real(v) => Value::Double(*v),
        DbValue::Text(v) => Value::Text(v.clone()),
        DbValue::Blob(v) => Value::Blob(v.clone()),
        DbValue::Boolean(v) => Value::Boolean(*v),
        // ISO text; DuckDB casts it to the DATE target column.
        DbValue::Date(v) => Value::Text(v.format("%Y-%m-%d").to_string()),
        DbValue::Timestamp(v) => {
            Value::Timestamp(TimeUnit::Microsecond, v.as_chrono().timestamp_micros())
        }
    }
}

fn duckdb_value_to_db_value(row: &duckdb::Row, index: usize) -> Result<DbValue> {
    use duckdb::types::{TimeUnit, ValueRef};
    use rust_decimal::prelude::ToPrimitive;

    let value = match row.get_ref(index)? {
        ValueRef::Null => DbValue::Null,
        ValueRef::Boolean(v) => DbValue::Boolean(v),
        ValueRef::TinyInt(v) => DbValue::Integer(v as i64),
        ValueRef::SmallInt(v) => DbValue::Integer(v as i64),
        ValueRef::Int(v) => DbValue::Integer(v as i64),
        ValueRef::BigInt(v) => DbValue::Integer(v),
        ValueRef::HugeInt(v) => i64::try_from(v).map_or(DbValue::Real(v as f64), DbValue::Integer),
        ValueRef::UTinyInt(v) => DbValue::Integer(v as i64),
        ValueRef::USmallInt(v) => DbValue::Integer(v as i64),
        ValueRef::UInt(v) => DbValue::Integer(v as i64),
        ValueRef::UBigInt(v) => i64::try_from(v).map_or(DbValue::Real(v as f64), DbValue::Integer),
        ValueRef::Float(v) => DbValue::Real(v as f64),
        ValueRef::Double(v) => DbValue::Real(v),
        ValueRef::Decimal(v) => match v.to_f64() {
            Some(real) => DbValue::Real(real),
            None => DbValue::Text(v.to_string()),
        },
        ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => DbValue::Blob(v.to_vec()),
        ValueRef::Timestamp(unit, v) => {
            let micros = match unit {
                TimeUnit::Second => v.checked_mul(1_000_000),
                TimeUnit::Millisecond => v.checked_mul(1_000),
                TimeUnit::Microsecond => Some(v),
                TimeUnit::Nanosecond => Some(v / 1_000),
            }
            .ok_or_else(|| {
                DbError::type_conversion(format!("Timestamp at column {} is out of range", index))
            })?;
            match DbTimestamp::from_unix_micros(micros) {
                Ok(ts) => DbValue::Timestamp(ts),
                Err(_) => DbValue::Integer(micros),
            }
        }
        ValueRef::Date32(days) => {
            // 719163 = days from 0001-01-01 (CE) to 1970-01-01
            match NaiveDate::from_num_days_from_ce_opt(719_163 + days) {
                Some(date) => DbValue::Date(date),
                None => DbValue::Integer(days as i64),
            }
        }
        other => {
            tracing::warn!(
                "DuckDB type {:?} at column {} mapped to debug string",
                std::mem::discriminant(&other),
                index
            );
            DbValue::Text(format!("{:?}", other))
        }
    };
    Ok(value)
}

const DEFAULT_MAX_PARAMS: usize = 999;

fn check_row_shapes(columns: &[&str], rows: &[Vec<DbValue>]) -> Result<()> {
    if columns.is_empty() {
        return Err(DbError::invalid_input(
            "row writes require at least one column",
        ));
    }
    if columns.len() > DEFAULT_MAX_PARAMS {
        return Err(DbError::invalid_input(format!(
            "Too many columns ({}) for max params ({})",
            columns.len(),
            DEFAULT_MAX_PARAMS
        )));
    }
    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(DbError::invalid_input(format!(
                "Row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
    }
    Ok(())
}

fn bulk_insert_rows_internal(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    check_row_shapes(columns, rows)?;
    // Named columns rather than the appender: tables with a surrogate key
    // receive fewer values than they have columns.
    insert_rows_chunked(conn, table, columns, rows, "")
}

fn upsert_rows_internal(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[&str],
    key_columns: &[&str],
    rows: &[Vec<DbValue>],
    on_conflict: OnConflict,
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    check_row_shapes(columns, rows)?;
    if key_columns.is_empty() {
        return Err(DbError::invalid_input("upsert requires at least one key column"));
    }
    if let Some(missing) = key_columns.iter().find(|k| !columns.contains(k)) {
        return Err(DbError::invalid_input(format!(
            "Key column '{}' is not among the written columns",
            missing
        )));
    }

    let keys = key_columns
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| !key_columns.contains(c))
        .map(|c| {
            let quoted = quote_ident(c);
            format!("{quoted} = excluded.{quoted}")
        })
        .collect::<Vec<_>>();

    let conflict_clause = match on_conflict {
        OnConflict::Update if !updates.is_empty() => {
            format!(" ON CONFLICT ({}) DO UPDATE SET {}", keys, updates.join(", "))
        }
        // Nothing outside the key to overwrite.
        OnConflict::Update | OnConflict::Ignore => {
            format!(" ON CONFLICT ({}) DO NOTHING", keys)
        }
    };

    insert_rows_chunked(conn, table, columns, rows, &conflict_clause)
}

fn insert_rows_chunked(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
    suffix: &str,
) -> Result<u64> {
    let cols_len = columns.len();
    let rows_per_chunk = (DEFAULT_MAX_PARAMS / cols_len).max(1);

    let quoted_table = quote_ident_path(table);
    let quoted_cols = columns
        .iter()
        .map(|col| quote_ident(col))
        .collect::<Vec<_>>()
        .join(", ");
    let row_clause = format!("({})", vec!["?"; cols_len].join(", "));

    let mut total = 0;
    for chunk in rows.chunks(rows_per_chunk) {
        let values_clause = std::iter::repeat(row_clause.as_str())
            .take(chunk.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}{}",
            quoted_table, quoted_cols, values_clause, suffix
        );
        let params: Vec<DbValue> = chunk.iter().flat_map(|row| row.iter().cloned()).collect();
        total += execute_on_conn(conn, &sql, &params)?;
    }

    Ok(total)
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified identifier (`schema.table`).
pub fn quote_ident_path(path: &str) -> String {
    path.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}
