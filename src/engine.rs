//! Transfer engine.
//!
//! Executes read plans against a [`Session`] and moves rows between the
//! session and delimited flat files in fixed-size batches. Reads never run
//! ahead of the sink: the next batch is only pulled once the previous one has
//! been written or inserted.
//!
//! File access goes through blocking `std::io` readers and writers. The
//! blocking section is one batch of file work; the task yields to the runtime
//! between batches, so keep batch sizes moderate when many jobs share a
//! small runtime.

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::ast::{CreateTable, ReadPlan};
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_PREVIEW_LIMIT};
use crate::error::{BridgeError, BridgeResult};
use crate::flatfile::FileFormat;
use crate::inspector::infer_file_schema;
use crate::session::{Row, Session};

/// One previewed row: column name to value, in column order.
pub type PreviewRow = Map<String, Value>;

/// Called with the running record count after every batch.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Moves rows between sessions and flat files.
#[derive(Clone)]
pub struct TransferEngine {
    batch_size: usize,
    progress: Option<ProgressFn>,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
        }
    }
}

impl fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEngine")
            .field("batch_size", &self.batch_size)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows per batch. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn report(&self, records: u64) {
        if let Some(progress) = &self.progress {
            progress(records);
        }
    }

    /// Read at most `limit` rows (100 by default) of a plan as ordered maps.
    ///
    /// NULL cells become JSON `null`; everything else is a string.
    pub async fn stream_preview(
        &self,
        session: &dyn Session,
        plan: &ReadPlan,
        limit: Option<usize>,
    ) -> BridgeResult<Vec<PreviewRow>> {
        let cap = limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
        if cap == 0 {
            return Ok(vec![]);
        }
        let plan = plan.clone().with_limit(cap);

        let mut stream = session
            .query(&plan)
            .await
            .map_err(|e| e.into_transfer("preview query failed"))?;
        let columns = stream.columns().to_vec();

        let mut out = Vec::new();
        while out.len() < cap {
            let Some(batch) = stream
                .next_batch(cap - out.len())
                .await
                .map_err(|e| e.into_transfer("preview query failed"))?
            else {
                break;
            };
            out.extend(batch.into_iter().map(|row| preview_row(&columns, row)));
        }
        out.truncate(cap);
        Ok(out)
    }

    /// Stream a plan into `writer`: one header record, then one record per row.
    ///
    /// Returns the number of data records written. NULL cells are written as
    /// empty fields.
    pub async fn export_to_file<W: Write + Send>(
        &self,
        session: &dyn Session,
        plan: &ReadPlan,
        writer: W,
        format: &FileFormat,
    ) -> BridgeResult<u64> {
        let mut csv_writer = format.writer_builder()?.from_writer(writer);
        let mut stream = session
            .query(plan)
            .await
            .map_err(|e| e.into_transfer("export query failed"))?;

        csv_writer
            .write_record(stream.columns())
            .map_err(|e| BridgeError::from(e).into_transfer("failed to write header"))?;

        let mut written = 0u64;
        while let Some(batch) = stream
            .next_batch(self.batch_size)
            .await
            .map_err(|e| e.into_transfer("failed to read source rows"))?
        {
            for row in &batch {
                csv_writer
                    .write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))
                    .map_err(|e| BridgeError::from(e).into_transfer("failed to write record"))?;
            }
            csv_writer
                .flush()
                .map_err(|e| BridgeError::from(e).into_transfer("failed to flush export file"))?;
            written += batch.len() as u64;
            debug!(rows = batch.len(), total = written, "export batch written");
            self.report(written);
            tokio::task::yield_now().await;
        }

        csv_writer
            .flush()
            .map_err(|e| BridgeError::from(e).into_transfer("failed to flush export file"))?;
        info!(table = %plan.source, records = written, "export finished");
        Ok(written)
    }

    /// Load a flat file into `target_table`, creating the table when absent.
    ///
    /// Columns are the `selected` ones present in the file, or every file
    /// column if none match, always in file order. Rows are inserted in
    /// batches; batches inserted before a failure stay committed.
    pub async fn import_from_file<R: Read + Seek + Send>(
        &self,
        source: &mut R,
        session: &dyn Session,
        target_table: &str,
        selected: &[String],
        format: &FileFormat,
    ) -> BridgeResult<u64> {
        if target_table.trim().is_empty() {
            return Err(BridgeError::Transfer("target table name is empty".to_string()));
        }

        let names = infer_file_schema(source, format)?;
        let (columns, indices) = resolve_columns(&names, selected);

        let exists = session
            .table_exists(target_table)
            .await
            .map_err(|e| e.into_transfer("failed to check target table"))?;
        if !exists {
            info!(table = target_table, columns = columns.len(), "creating target table");
            session
                .create_table(&CreateTable::new(target_table, columns.clone()))
                .await
                .map_err(|e| e.into_transfer("failed to create target table"))?;
        }

        let mut reader = format.reader_builder()?.from_reader(&mut *source);
        let mut record = csv::StringRecord::new();
        let mut skip_header = format.has_header;
        let mut batch: Vec<Row> = Vec::with_capacity(self.batch_size);
        let mut inserted = 0u64;

        while reader
            .read_record(&mut record)
            .map_err(|e| BridgeError::from(e).into_transfer("failed to read source file"))?
        {
            if skip_header {
                skip_header = false;
                continue;
            }
            batch.push(
                indices
                    .iter()
                    .map(|&i| record.get(i).map(str::to_string))
                    .collect(),
            );
            if batch.len() >= self.batch_size {
                inserted += self.flush_batch(session, target_table, &columns, &mut batch).await?;
                self.report(inserted);
                tokio::task::yield_now().await;
            }
        }
        if !batch.is_empty() {
            inserted += self.flush_batch(session, target_table, &columns, &mut batch).await?;
            self.report(inserted);
        }

        info!(table = target_table, records = inserted, "import finished");
        Ok(inserted)
    }

    async fn flush_batch(
        &self,
        session: &dyn Session,
        table: &str,
        columns: &[String],
        batch: &mut Vec<Row>,
    ) -> BridgeResult<u64> {
        session
            .insert(table, columns, batch)
            .await
            .map_err(|e| e.into_transfer("insert rejected"))?;
        let n = batch.len() as u64;
        batch.clear();
        debug!(table, rows = n, "import batch inserted");
        Ok(n)
    }

    /// First rows of a flat file as ordered maps, using the same column
    /// selection as [`import_from_file`](Self::import_from_file).
    ///
    /// The stream is left where it was on entry.
    pub fn preview_file<R: Read + Seek>(
        &self,
        source: &mut R,
        format: &FileFormat,
        selected: &[String],
        limit: Option<usize>,
    ) -> BridgeResult<Vec<PreviewRow>> {
        let cap = limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
        let start = source.stream_position()?;
        let names = infer_file_schema(source, format)?;
        let (columns, indices) = resolve_columns(&names, selected);

        let mut out = Vec::new();
        {
            let mut reader = format.reader_builder()?.from_reader(&mut *source);
            let records = reader.records().skip(usize::from(format.has_header)).take(cap);
            for record in records {
                let record = record.map_err(|e| BridgeError::from(e).into_transfer("failed to read file"))?;
                let row: Row = indices.iter().map(|&i| record.get(i).map(str::to_string)).collect();
                out.push(preview_row(&columns, row));
            }
        }

        source.seek(SeekFrom::Start(start))?;
        Ok(out)
    }
}

/// Pick the import columns: the selected ones found in the file, in file
/// order, or all of them when the selection matches nothing.
fn resolve_columns(names: &[String], selected: &[String]) -> (Vec<String>, Vec<usize>) {
    let picked: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| selected.contains(*n))
        .map(|(i, _)| i)
        .collect();
    let indices = if picked.is_empty() {
        (0..names.len()).collect()
    } else {
        picked
    };
    let columns = indices.iter().map(|&i| names[i].clone()).collect();
    (columns, indices)
}

fn preview_row(columns: &[String], row: Row) -> PreviewRow {
    columns
        .iter()
        .cloned()
        .zip(row.into_iter().map(|cell| cell.map_or(Value::Null, Value::String)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::memory::MemorySession;
    use crate::planner::build_plan;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn people() -> MemorySession {
        MemorySession::new().with_table(
            "people",
            &[("id", "UInt32"), ("name", "String"), ("city", "String")],
            vec![
                vec!["1", "Alice", "Oslo"],
                vec!["2", "Bob", "Lima"],
                vec!["3", "Carol", "Pune"],
            ],
        )
    }

    fn plan(session: &MemorySession) -> ReadPlan {
        let desc = session.descriptor("people").unwrap();
        build_plan(&[desc], &ProjectionSpec::new(), None, None).unwrap()
    }

    #[tokio::test]
    async fn test_stream_preview_is_capped_and_ordered() {
        let session = people();
        let rows = TransferEngine::new()
            .stream_preview(&session, &plan(&session), Some(2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "name", "city"]);
        assert_eq!(rows[1]["name"], Value::String("Bob".into()));
    }

    #[tokio::test]
    async fn test_preview_nulls() {
        let session = people();
        session
            .insert("people", &["id".to_string()], &[vec![Some("4".into())]])
            .await
            .unwrap();
        let rows = TransferEngine::new()
            .stream_preview(&session, &plan(&session), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3]["name"], Value::Null);
    }

    #[tokio::test]
    async fn test_export_writes_header_and_rows() {
        let session = people();
        session
            .insert("people", &["id".to_string()], &[vec![Some("4".into())]])
            .await
            .unwrap();

        let mut out = Vec::new();
        let count = TransferEngine::new()
            .with_batch_size(3)
            .export_to_file(&session, &plan(&session), &mut out, &FileFormat::new("|", true))
            .await
            .unwrap();

        assert_eq!(count, 4);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id|name|city\n1|Alice|Oslo\n2|Bob|Lima\n3|Carol|Pune\n4||\n"
        );
    }

    #[tokio::test]
    async fn test_export_reports_progress() {
        let session = people();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = TransferEngine::new()
            .with_batch_size(2)
            .with_progress(move |n| sink.lock().unwrap().push(n));
        engine
            .export_to_file(&session, &plan(&session), std::io::sink(), &FileFormat::default())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_import_selected_columns_in_file_order() {
        let session = MemorySession::new();
        let mut file = Cursor::new(b"id,name,city\n1,Alice,Oslo\n2,Bob,Lima\n".to_vec());
        let selected = vec!["city".to_string(), "id".to_string(), "ghost".to_string()];

        let count = TransferEngine::new()
            .import_from_file(&mut file, &session, "dest", &selected, &FileFormat::default())
            .await
            .unwrap();

        assert_eq!(count, 2);
        let desc = session.descriptor("dest").unwrap();
        assert_eq!(desc.column_names(), vec!["id", "city"]);
        assert!(desc.columns.iter().all(|c| c.data_type == "String"));
        assert_eq!(
            session.rows("dest").unwrap(),
            vec![
                vec![Some("1".to_string()), Some("Oslo".to_string())],
                vec![Some("2".to_string()), Some("Lima".to_string())],
            ]
        );
    }

    #[tokio::test]
    async fn test_import_without_header_uses_positional_names() {
        let session = MemorySession::new();
        let mut file = Cursor::new(b"1\tAlice\n2\tBob\n".to_vec());
        let count = TransferEngine::new()
            .import_from_file(&mut file, &session, "t", &[], &FileFormat::new("tab", false))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(session.descriptor("t").unwrap().column_names(), vec!["col_0", "col_1"]);
        assert_eq!(session.rows("t").unwrap()[0][1].as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_import_into_existing_table_skips_create() {
        let session = MemorySession::new().with_table(
            "t",
            &[("id", "String"), ("name", "String"), ("extra", "String")],
            vec![],
        );
        let mut file = Cursor::new(b"id,name\n1,Alice\n".to_vec());
        TransferEngine::new()
            .import_from_file(&mut file, &session, "t", &[], &FileFormat::default())
            .await
            .unwrap();
        assert_eq!(session.descriptor("t").unwrap().columns.len(), 3);
        assert_eq!(
            session.rows("t").unwrap(),
            vec![vec![Some("1".to_string()), Some("Alice".to_string()), None]]
        );
    }

    #[tokio::test]
    async fn test_import_malformed_record_is_transfer_error() {
        let session = MemorySession::new();
        let mut file = Cursor::new(b"a,b\n1,2\n3\n".to_vec());
        let err = TransferEngine::new()
            .import_from_file(&mut file, &session, "t", &[], &FileFormat::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transfer");
    }

    #[test]
    fn test_preview_file_rewinds() {
        let mut file = Cursor::new(b"id,name\n1,Alice\n2,Bob\n3,Carol\n".to_vec());
        let rows = TransferEngine::new()
            .preview_file(&mut file, &FileFormat::default(), &["name".to_string()], Some(2))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[1]["name"], Value::String("Bob".into()));
        assert_eq!(file.position(), 0);
    }
}
