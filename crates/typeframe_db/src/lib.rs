//! DuckDB persistence layer for typeframe.
//!
//! A single synchronous [`DbConnection`] handle wraps the DuckDB connection.
//! Values cross the boundary as [`DbValue`]; callers never see DuckDB's own
//! value or Arrow types.
//!
//! File-backed writable databases take an exclusive process lock
//! (`<db>.lock`) for as long as any clone of the handle is alive.

pub mod backend;
pub mod error;
pub mod lock;

pub use backend::{
    quote_ident, quote_ident_path, AccessMode, DbConnection, DbRow, DbRowStream, DbTimestamp,
    DbTransaction, DbValue, FromDbValue, OnConflict,
};
pub use error::{DbError, Result};
pub use lock::{lock_path_for, try_lock_exclusive, DbLockGuard, LockError};
