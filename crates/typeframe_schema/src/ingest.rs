//! Building schema-bound tables from sources.
//!
//! [`SchemaRegistry::new_table`] is the single entry point. Delimited files,
//! SQL results and row iterators are converted column by column with
//! [`build_column`], so date formats, boolean tokens and renames behave the
//! same for all of them. Literal batches are only renamed and reordered.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{new_empty_array, ArrayRef};
use arrow::compute::concat_batches;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::{debug, info};
use typeframe_db::{DbRow, DbRowStream};

use crate::coerce::build_column;
use crate::error::{CoercionError, Result};
use crate::registry::SchemaRegistry;
use crate::table::SchemaBoundTable;
use crate::value::Value;

/// Where a new table's rows come from.
pub enum Source {
    /// No rows; declared columns with their storage types.
    Empty,
    /// An in-memory batch, taken as-is apart from renaming.
    Literal(RecordBatch),
    Delimited(DelimitedSource),
    /// A query run on the record's persistence connection.
    SqlQuery(SqlSource),
    /// Caller rows, bound positionally to declaration order.
    Rows(Box<dyn Iterator<Item = Vec<Value>>>),
}

impl Source {
    /// Row iterator source.
    pub fn rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
        I::IntoIter: 'static,
    {
        Source::Rows(Box::new(rows.into_iter()))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Empty => f.write_str("Empty"),
            Source::Literal(batch) => write!(f, "Literal({} rows)", batch.num_rows()),
            Source::Delimited(source) => f.debug_tuple("Delimited").field(source).finish(),
            Source::SqlQuery(source) => f.debug_tuple("SqlQuery").field(source).finish(),
            Source::Rows(_) => f.write_str("Rows(..)"),
        }
    }
}

impl From<RecordBatch> for Source {
    fn from(batch: RecordBatch) -> Self {
        Source::Literal(batch)
    }
}

impl From<DelimitedSource> for Source {
    fn from(source: DelimitedSource) -> Self {
        Source::Delimited(source)
    }
}

impl From<SqlSource> for Source {
    fn from(source: SqlSource) -> Self {
        Source::SqlQuery(source)
    }
}

/// Reader options for a delimited text file.
#[derive(Debug, Clone, PartialEq)]
pub struct DelimitedSource {
    pub path: PathBuf,
    pub delimiter: u8,
    /// Without headers, file columns bind positionally to declaration order.
    pub has_headers: bool,
    pub quote: u8,
    pub chunk_size: Option<usize>,
}

impl DelimitedSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: b',',
            has_headers: true,
            quote: b'"',
            chunk_size: None,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn has_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }

    /// Yield tables of at most `rows` rows instead of one table.
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = Some(rows.max(1));
        self
    }
}

/// A query against the record's persistence connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSource {
    pub query: String,
    /// Rows per chunk. The query runs once and chunks are cut from its
    /// result in order.
    pub chunk_size: Option<usize>,
}

impl SqlSource {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chunk_size: None,
        }
    }

    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = Some(rows.max(1));
        self
    }
}

/// Result of [`SchemaRegistry::new_table`].
#[derive(Debug)]
pub enum Ingested {
    Table(SchemaBoundTable),
    Chunks(TableChunks),
}

impl Ingested {
    /// The single table, collecting chunks if needed.
    pub fn into_table(self) -> Result<SchemaBoundTable> {
        match self {
            Ingested::Table(table) => Ok(table),
            Ingested::Chunks(chunks) => chunks.collect_table(),
        }
    }

    /// The chunk iterator, if the source was chunked.
    pub fn into_chunks(self) -> Option<TableChunks> {
        match self {
            Ingested::Chunks(chunks) => Some(chunks),
            Ingested::Table(_) => None,
        }
    }
}

/// Lazy, forward-only sequence of tables, one per chunk.
///
/// Dropping it closes the file or releases the connection handle.
pub struct TableChunks {
    schema: Arc<SchemaRegistry>,
    cursor: ChunkCursor,
}

enum ChunkCursor {
    Delimited {
        reader: csv::Reader<File>,
        positions: Vec<usize>,
        chunk_size: usize,
        done: bool,
    },
    Sql {
        stream: DbRowStream,
        done: bool,
    },
}

impl fmt::Debug for TableChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.cursor {
            ChunkCursor::Delimited { .. } => "delimited",
            ChunkCursor::Sql { .. } => "sql",
        };
        f.debug_struct("TableChunks")
            .field("record", &self.schema.name())
            .field("source", &kind)
            .finish()
    }
}

impl TableChunks {
    fn collect_table(self) -> Result<SchemaBoundTable> {
        let schema = Arc::clone(&self.schema);
        let batches = self
            .map(|chunk| chunk.map(SchemaBoundTable::into_batch))
            .collect::<Result<Vec<_>>>()?;
        let batch = concat_batches(&schema.arrow_schema(), &batches)?;
        Ok(SchemaBoundTable::bound(batch, schema))
    }

    fn next_chunk(&mut self) -> Result<Option<SchemaBoundTable>> {
        match &mut self.cursor {
            ChunkCursor::Delimited {
                reader,
                positions,
                chunk_size,
                done,
            } => {
                if *done {
                    return Ok(None);
                }
                let mut rows = Vec::with_capacity(*chunk_size);
                let mut record = csv::StringRecord::new();
                while rows.len() < *chunk_size {
                    if !reader.read_record(&mut record)? {
                        *done = true;
                        break;
                    }
                    rows.push(record_values(&record, positions));
                }
                if rows.is_empty() {
                    return Ok(None);
                }
                build_table(&self.schema, rows).map(Some)
            }
            ChunkCursor::Sql { stream, done } => {
                if *done {
                    return Ok(None);
                }
                let rows = match stream.next() {
                    Some(rows) => rows?,
                    None => {
                        *done = true;
                        return Ok(None);
                    }
                };
                let rows = sql_rows(&self.schema, stream.columns(), rows)?;
                build_table(&self.schema, rows).map(Some)
            }
        }
    }
}

impl Iterator for TableChunks {
    type Item = Result<SchemaBoundTable>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(table)) => Some(Ok(table)),
            Ok(None) => None,
            Err(err) => {
                // A failed chunk ends the sequence.
                match &mut self.cursor {
                    ChunkCursor::Delimited { done, .. } | ChunkCursor::Sql { done, .. } => {
                        *done = true
                    }
                }
                Some(Err(err))
            }
        }
    }
}

impl SchemaRegistry {
    /// Build a table under this schema from `source`.
    pub fn new_table(self: &Arc<Self>, source: impl Into<Source>) -> Result<Ingested> {
        let source = source.into();
        debug!(record = %self.name(), source = ?source, "ingesting");
        match source {
            Source::Empty => Ok(Ingested::Table(self.empty_table()?)),
            Source::Literal(batch) => Ok(Ingested::Table(self.literal_table(&batch)?)),
            Source::Delimited(options) => self.delimited_table(&options),
            Source::SqlQuery(options) => self.sql_table(&options),
            Source::Rows(rows) => Ok(Ingested::Table(self.rows_table(rows)?)),
        }
    }

    fn empty_table(self: &Arc<Self>) -> Result<SchemaBoundTable> {
        let columns: Vec<ArrayRef> = self
            .columns()
            .iter()
            .map(|c| new_empty_array(&c.logical_type().arrow_type()))
            .collect();
        let batch = RecordBatch::try_new(self.arrow_schema(), columns)?;
        Ok(SchemaBoundTable::bound(batch, Arc::clone(self)))
    }

    fn literal_table(self: &Arc<Self>, batch: &RecordBatch) -> Result<SchemaBoundTable> {
        let mut fields = Vec::with_capacity(self.columns().len());
        let mut columns = Vec::with_capacity(self.columns().len());
        for spec in self.columns() {
            let array = batch.column_by_name(spec.source_name()).ok_or_else(|| {
                CoercionError::MissingColumn {
                    column: spec.source_name().to_string(),
                }
            })?;
            fields.push(Field::new(spec.name(), array.data_type().clone(), true));
            columns.push(Arc::clone(array));
        }
        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        let batch =
            RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;
        Ok(SchemaBoundTable::bound(batch, Arc::clone(self)))
    }

    fn delimited_table(self: &Arc<Self>, options: &DelimitedSource) -> Result<Ingested> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(options.has_headers)
            .quote(options.quote)
            .from_path(&options.path)?;

        let positions = if options.has_headers {
            let headers = reader.headers()?.clone();
            self.columns()
                .iter()
                .map(|spec| {
                    headers
                        .iter()
                        .position(|h| h.trim() == spec.source_name())
                        .ok_or_else(|| CoercionError::MissingColumn {
                            column: spec.source_name().to_string(),
                        })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            (0..self.columns().len()).collect()
        };

        if let Some(chunk_size) = options.chunk_size {
            info!(
                record = %self.name(),
                path = %options.path.display(),
                chunk_size,
                "streaming delimited file"
            );
            return Ok(Ingested::Chunks(TableChunks {
                schema: Arc::clone(self),
                cursor: ChunkCursor::Delimited {
                    reader,
                    positions,
                    chunk_size,
                    done: false,
                },
            }));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record_values(&record?, &positions));
        }
        info!(
            record = %self.name(),
            path = %options.path.display(),
            rows = rows.len(),
            "read delimited file"
        );
        build_table(self, rows).map(Ingested::Table)
    }

    fn sql_table(self: &Arc<Self>, options: &SqlSource) -> Result<Ingested> {
        let target = self.require_persistence()?;
        let query = options.query.trim().trim_end_matches(';').trim().to_string();

        if let Some(chunk_size) = options.chunk_size {
            let stream = target.connection.query_chunks(&query, chunk_size)?;
            info!(record = %self.name(), chunk_size, "streaming query result");
            return Ok(Ingested::Chunks(TableChunks {
                schema: Arc::clone(self),
                cursor: ChunkCursor::Sql {
                    stream,
                    done: false,
                },
            }));
        }

        let (columns, rows) = target.connection.query_with_columns(&query, &[])?;
        info!(record = %self.name(), rows = rows.len(), "read query result");
        let rows = sql_rows(self, &columns, rows)?;
        build_table(self, rows).map(Ingested::Table)
    }

    fn rows_table(self: &Arc<Self>, rows: Box<dyn Iterator<Item = Vec<Value>>>) -> Result<SchemaBoundTable> {
        let expected = self.columns().len();
        let mut collected = Vec::new();
        for (row, values) in rows.enumerate() {
            if values.len() != expected {
                return Err(CoercionError::Arity {
                    row,
                    expected,
                    actual: values.len(),
                }
                .into());
            }
            collected.push(values);
        }
        debug!(record = %self.name(), rows = collected.len(), "drained row iterator");
        build_table(self, collected)
    }
}

/// Declared-order values of one CSV record. Empty fields are null.
fn record_values(record: &csv::StringRecord, positions: &[usize]) -> Vec<Value> {
    positions
        .iter()
        .map(|&pos| match record.get(pos) {
            Some(field) if !field.is_empty() => Value::Text(field.to_string()),
            _ => Value::Null,
        })
        .collect()
}

/// Reorder query rows into declaration order by source name.
fn sql_rows(schema: &SchemaRegistry, columns: &[String], rows: Vec<DbRow>) -> Result<Vec<Vec<Value>>> {
    let positions = schema
        .columns()
        .iter()
        .map(|spec| {
            columns
                .iter()
                .position(|c| c == spec.source_name())
                .ok_or_else(|| CoercionError::MissingColumn {
                    column: spec.source_name().to_string(),
                })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut values: Vec<Option<Value>> =
                row.into_values().into_iter().map(|v| Some(Value::from(v))).collect();
            positions
                .iter()
                .map(|&pos| values.get_mut(pos).and_then(Option::take).unwrap_or(Value::Null))
                .collect()
        })
        .collect())
}

/// Transpose declared-order rows and convert each column.
fn build_table(schema: &Arc<SchemaRegistry>, rows: Vec<Vec<Value>>) -> Result<SchemaBoundTable> {
    let width = schema.columns().len();
    let mut by_column: Vec<Vec<Value>> = (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
    for row in rows {
        for (column, value) in by_column.iter_mut().zip(row) {
            column.push(value);
        }
    }

    let columns = schema
        .columns()
        .iter()
        .zip(&by_column)
        .map(|(spec, values)| build_column(spec, values))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = RecordBatch::try_new(schema.arrow_schema(), columns)?;
    Ok(SchemaBoundTable::bound(batch, Arc::clone(schema)))
}
