//! Transfer requests.
//!
//! A request is either an export (database to file) or an import (file to
//! database), tagged by `direction`:
//!
//! ```json
//! {
//!   "direction": "export",
//!   "connection": { "host": "localhost", "port": 8123 },
//!   "tables": ["orders", "customers"],
//!   "columns": { "orders": ["id"], "customers": ["name"] },
//!   "join": { "join_type": "INNER", "conditions": ["orders.cust_id = customers.id"] },
//!   "format": { "delimiter": ",", "has_header": true }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::ast::{JoinSpec, ProjectionSpec};
use crate::config::ConnectionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::flatfile::FileFormat;

/// Which way rows move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Database to file.
    Export,
    /// File to database.
    Import,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Export => "export",
            Direction::Import => "import",
        })
    }
}

/// Read tables from the database into a flat file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Primary table first.
    pub tables: Vec<String>,
    #[serde(default)]
    pub columns: ProjectionSpec,
    #[serde(default)]
    pub join: Option<JoinSpec>,
    /// Defaults to `export_<job id>.csv` in the configured export directory.
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub format: FileFormat,
}

impl ExportRequest {
    pub fn new(connection: ConnectionConfig, tables: Vec<String>) -> Self {
        Self {
            connection,
            tables,
            columns: ProjectionSpec::new(),
            join: None,
            output_file: None,
            format: FileFormat::default(),
        }
    }

    pub fn select(mut self, table: impl Into<String>, columns: Vec<String>) -> Self {
        self.columns.insert(table.into(), columns);
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.join = Some(join);
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }
}

/// Load a flat file into a database table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub file_path: PathBuf,
    pub target_table: String,
    /// Columns to load; empty means every file column.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub format: FileFormat,
    /// Overrides the configured batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl ImportRequest {
    pub fn new(
        connection: ConnectionConfig,
        file_path: impl Into<PathBuf>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            file_path: file_path.into(),
            target_table: target_table.into(),
            columns: vec![],
            format: FileFormat::default(),
            batch_size: None,
        }
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// A transfer request, discriminated by direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum TransferRequest {
    Export(ExportRequest),
    Import(ImportRequest),
}

impl From<ExportRequest> for TransferRequest {
    fn from(request: ExportRequest) -> Self {
        TransferRequest::Export(request)
    }
}

impl From<ImportRequest> for TransferRequest {
    fn from(request: ImportRequest) -> Self {
        TransferRequest::Import(request)
    }
}

impl TransferRequest {
    pub fn direction(&self) -> Direction {
        match self {
            TransferRequest::Export(_) => Direction::Export,
            TransferRequest::Import(_) => Direction::Import,
        }
    }

    pub fn connection(&self) -> &ConnectionConfig {
        match self {
            TransferRequest::Export(r) => &r.connection,
            TransferRequest::Import(r) => &r.connection,
        }
    }

    /// Check the fields a job cannot run without.
    ///
    /// Table and column existence are checked later, against the catalog.
    pub fn validate(&self) -> BridgeResult<()> {
        self.connection().validate()?;
        match self {
            TransferRequest::Export(r) => {
                r.format.delimiter_byte()?;
                if r.tables.is_empty() {
                    return Err(BridgeError::Config("export needs at least one table".to_string()));
                }
                if r.tables.iter().any(|t| t.trim().is_empty()) {
                    return Err(BridgeError::Config("table name is empty".to_string()));
                }
                if r.tables.len() > 1 && r.join.is_none() {
                    return Err(BridgeError::Plan("join configuration required".to_string()));
                }
            }
            TransferRequest::Import(r) => {
                r.format.delimiter_byte()?;
                if r.target_table.trim().is_empty() {
                    return Err(BridgeError::Config("target table name is empty".to_string()));
                }
                if r.file_path.as_os_str().is_empty() {
                    return Err(BridgeError::Config("file path is empty".to_string()));
                }
                if r.batch_size == Some(0) {
                    return Err(BridgeError::Config("batch size must be at least 1".to_string()));
                }
            }
        }
        Ok(())
    }
}
