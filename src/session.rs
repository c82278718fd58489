//! Database session abstraction.
//!
//! A [`Session`] is the opaque handle the transfer engine talks to. It
//! receives structured plans and renders them in its own dialect at
//! execution time. Implement [`Session`] and [`Connector`] to add a new
//! database.

use async_trait::async_trait;

use crate::ast::{ColumnInfo, CreateTable, ReadPlan};
use crate::config::ConnectionConfig;
use crate::error::BridgeResult;

/// One row of text cells. `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// An open, forward-only result set read in batches.
#[async_trait]
pub trait RowStream: Send {
    /// Result-set column names, in order.
    fn columns(&self) -> &[String];

    /// Read up to `max_rows` rows. `Ok(None)` once the result set is exhausted.
    async fn next_batch(&mut self, max_rows: usize) -> BridgeResult<Option<Vec<Row>>>;
}

/// An open database session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Session name for logging.
    fn name(&self) -> &str;

    /// Tables in the current database.
    async fn list_tables(&self) -> BridgeResult<Vec<String>>;

    /// Column name/type pairs in catalog order.
    async fn describe_table(&self, table: &str) -> BridgeResult<Vec<ColumnInfo>>;

    async fn table_exists(&self, table: &str) -> BridgeResult<bool>;

    async fn create_table(&self, ddl: &CreateTable) -> BridgeResult<()>;

    /// Start executing a plan.
    async fn query(&self, plan: &ReadPlan) -> BridgeResult<Box<dyn RowStream>>;

    /// Bulk-insert rows, each holding one cell per entry of `columns`.
    async fn insert(&self, table: &str, columns: &[String], rows: &[Row]) -> BridgeResult<()>;
}

/// Opens sessions from connection parameters. Each job opens its own.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> BridgeResult<Box<dyn Session>>;
}
