//! Process-wide list of compiled, persisted record schemas.
//!
//! Every [`SchemaBuilder::compile`](crate::SchemaBuilder::compile) with a
//! persistence table appends here. Entries are weak: a registry dropped by
//! all of its users disappears from the listing.

use std::sync::{Arc, OnceLock, RwLock, Weak};

use tracing::info;
use typeframe_db::DbConnection;

use crate::error::Result;
use crate::registry::SchemaRegistry;

static CATALOG: OnceLock<Catalog> = OnceLock::new();

/// The process-wide catalog.
pub fn catalog() -> &'static Catalog {
    CATALOG.get_or_init(Catalog::default)
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: RwLock<Vec<Weak<SchemaRegistry>>>,
}

impl Catalog {
    pub(crate) fn register(&self, schema: &Arc<SchemaRegistry>) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|w| w.strong_count() > 0);
        entries.push(Arc::downgrade(schema));
    }

    /// Live persisted schemas, in compile order.
    pub fn schemas(&self) -> Vec<Arc<SchemaRegistry>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    /// `(record, table)` pairs of every live persisted schema.
    pub fn detected_tables(&self) -> Vec<(String, String)> {
        self.schemas()
            .iter()
            .filter_map(|s| {
                s.persisted_table()
                    .map(|t| (s.name().to_string(), t.to_string()))
            })
            .collect()
    }

    /// Create the backing table of every schema persisted on `conn`.
    ///
    /// Schemas bound to other connections are skipped. Returns the tables
    /// the definitions were run for.
    pub fn migrate(&self, conn: &DbConnection) -> Result<Vec<String>> {
        let mut migrated = Vec::new();
        for schema in self.schemas() {
            let Ok(target) = schema.require_persistence() else {
                continue;
            };
            if !target.connection.same_connection(conn) {
                continue;
            }
            conn.execute_batch(&schema.table_definition_for(target.table))?;
            info!(record = %schema.name(), table = %target.table, "migrated table");
            migrated.push(target.table.to_string());
        }
        Ok(migrated)
    }
}
