//! Schema discovery for database tables and flat files.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::ast::TableDescriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::flatfile::FileFormat;
use crate::session::Session;

/// Tables in the session's database.
pub async fn list_tables(session: &dyn Session) -> BridgeResult<Vec<String>> {
    session.list_tables().await.map_err(|e| match e {
        BridgeError::Connection(_) => e,
        other => BridgeError::Connection(format!("failed to list tables: {}", other)),
    })
}

/// Column names and types of `table`, in catalog order.
pub async fn describe_table(session: &dyn Session, table: &str) -> BridgeResult<TableDescriptor> {
    if table.trim().is_empty() {
        return Err(BridgeError::Schema("table name is empty".to_string()));
    }

    let columns = session.describe_table(table).await.map_err(|e| {
        BridgeError::Schema(format!("failed to describe table '{}': {}", table, e))
    })?;
    if columns.is_empty() {
        return Err(BridgeError::Schema(format!(
            "table '{}' does not exist or has no columns",
            table
        )));
    }

    debug!(session = session.name(), table, columns = columns.len(), "described table");
    Ok(TableDescriptor::new(table, columns))
}

/// Describe several tables, failing on the first that cannot be described.
pub async fn describe_tables(
    session: &dyn Session,
    tables: &[String],
) -> BridgeResult<Vec<TableDescriptor>> {
    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        out.push(describe_table(session, table).await?);
    }
    Ok(out)
}

/// Column names of a flat file.
///
/// With a header the first record holds the names. Without one the first
/// record only fixes the column count and names are `col_0..col_{n-1}`.
/// Either way the stream is rewound to where it was on entry, so calling
/// this twice yields the same names and the first record is still readable.
pub fn infer_file_schema<R: Read + Seek>(
    reader: &mut R,
    format: &FileFormat,
) -> BridgeResult<Vec<String>> {
    let start = reader
        .stream_position()
        .map_err(|e| BridgeError::Schema(format!("file is not seekable: {}", e)))?;

    let first = {
        let mut csv_reader = format.reader_builder()?.from_reader(&mut *reader);
        let mut record = csv::StringRecord::new();
        let found = csv_reader
            .read_record(&mut record)
            .map_err(|e| BridgeError::Schema(format!("failed to read first record: {}", e)))?;
        found.then_some(record)
    };

    reader
        .seek(SeekFrom::Start(start))
        .map_err(|e| BridgeError::Schema(format!("failed to rewind file: {}", e)))?;

    let record = first.ok_or_else(|| BridgeError::Schema("file is empty".to_string()))?;

    let names: Vec<String> = if format.has_header {
        record.iter().map(|h| h.to_string()).collect()
    } else {
        (0..record.len()).map(|i| format!("col_{}", i)).collect()
    };

    let mut seen = HashSet::new();
    for name in &names {
        if name.is_empty() {
            return Err(BridgeError::Schema("header contains an empty column name".to_string()));
        }
        if !seen.insert(name.as_str()) {
            return Err(BridgeError::Schema(format!(
                "header contains duplicate column '{}'",
                name
            )));
        }
    }

    Ok(names)
}
