//! Schema-driven typed tables.
//!
//! Declare a record once, then build tables that conform to it:
//!
//! ```no_run
//! use typeframe_db::DbConnection;
//! use typeframe_schema::{ColumnSpec, DelimitedSource, SaveOptions, SchemaBuilder};
//!
//! # fn main() -> typeframe_schema::Result<()> {
//! let conn = DbConnection::open_duckdb_memory()?;
//! let people = SchemaBuilder::new("People")
//!     .column(ColumnSpec::string("name").unique())
//!     .column(ColumnSpec::integer("age"))
//!     .column(ColumnSpec::date("insertion_date").format("%d-%m-%Y"))
//!     .column(ColumnSpec::boolean("is_staff").tokens("yes", "no"))
//!     .persist("people", conn)
//!     .compile()?;
//!
//! let mut table = people
//!     .new_table(DelimitedSource::new("people.csv").delimiter(b';'))?
//!     .into_table()?;
//! table.save(&SaveOptions::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! Tables are Arrow record batches. Declared logical types map to Arrow
//! storage as string → Utf8, integer → Int64, float → Float64,
//! date → Date32, boolean → Boolean.

pub mod catalog;
pub mod coerce;
pub mod column;
pub mod declaration;
pub mod error;
pub mod ingest;
pub mod persist;
pub mod registry;
pub mod table;
pub mod validate;
pub mod value;

pub use catalog::{catalog, Catalog};
pub use column::{BoolTokens, ColumnSpec, LogicalType};
pub use declaration::{ColumnDeclaration, SchemaDeclaration, Token};
pub use error::{CoercionError, FrameError, Result, SchemaError};
pub use ingest::{DelimitedSource, Ingested, Source, SqlSource, TableChunks};
pub use persist::{IfExists, IfRowExists, SaveOptions, UnknownOption};
pub use registry::{Persistence, SchemaBuilder, SchemaRegistry, Target};
pub use table::{SchemaBoundTable, Validity};
pub use validate::ValidationError;
pub use value::Value;
