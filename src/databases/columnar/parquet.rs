//! Parquet export and import for the columnar adapter.
//!
//! Everything here is gated by `enable_columnar_export`; a disabled gate
//! fails with `InvalidValue` before any statement is built. Import
//! reports the number of ingested rows as the before/after count delta,
//! and export-then-import under a matching schema is the identity on the
//! row multiset.

use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::sql::generator::SqlGenerator;
use crate::traits::semantic::{ExportSource, QueryEnvelope};

use super::{run_envelope, ColumnarStore};

pub(super) fn export(
    store: &ColumnarStore,
    source: &ExportSource,
    path: &str,
) -> StorageResult<()> {
    store.require_export_enabled()?;
    let sql = match source {
        ExportSource::Table(table) => {
            let generator = SqlGenerator::new(table)?;
            generator.copy_table_to_parquet(path)
        }
        ExportSource::Query(query) => SqlGenerator::copy_query_to_parquet(query, path),
    };
    store
        .conn
        .lock()
        .execute_batch(&sql)
        .map_err(|err| {
            StorageError::io("parquet export failed")
                .with_database(path.to_owned())
                .with_source(err)
        })?;
    info!(path, "exported to parquet");
    Ok(())
}

pub(super) fn import(store: &ColumnarStore, table: &str, path: &str) -> StorageResult<u64> {
    store.require_export_enabled()?;
    let generator = SqlGenerator::new(table)?;
    let before = store.table_count(table)?;
    store
        .conn
        .lock()
        .execute_batch(&generator.import_from_parquet(path))
        .map_err(|err| {
            StorageError::io("parquet import failed")
                .with_table(table.to_owned())
                .with_database(path.to_owned())
                .with_source(err)
        })?;
    let after = store.table_count(table)?;
    let imported = after.saturating_sub(before);
    info!(table, path, imported, "imported from parquet");
    Ok(imported)
}

pub(super) fn query(store: &ColumnarStore, path: &str) -> QueryEnvelope {
    if let Err(err) = store.require_export_enabled() {
        return QueryEnvelope::failure(err);
    }
    run_envelope(&store.conn, &SqlGenerator::select_from_parquet(path), &[])
}
