//! # flatbridge
//!
//! Moves tabular data between ClickHouse and delimited flat files, in either
//! direction, with per-table column selection and multi-table joins on the
//! database side.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use flatbridge::prelude::*;
//! use std::sync::Arc;
//!
//! let tracker = JobTracker::new(Arc::new(ClickHouseConnector), TransferSettings::default());
//!
//! let request = ExportRequest::new(ConnectionConfig::default(), vec!["orders".into(), "customers".into()])
//!     .select("orders", vec!["id".into()])
//!     .select("customers", vec!["name".into()])
//!     .join(JoinSpec::new(JoinType::Inner).on("orders.cust_id = customers.id"));
//!
//! let id = tracker.submit(request)?;
//! let job = tracker.wait(&id, std::time::Duration::from_millis(200)).await?;
//! println!("{} rows -> {:?}", job.records_processed, job.output_file);
//! ```
//!
//! ## Layers
//!
//! | Module      | Role                                              |
//! |-------------|---------------------------------------------------|
//! | `inspector` | Table and flat file schema discovery              |
//! | `planner`   | Column selection + joins into a [`ast::ReadPlan`] |
//! | `engine`    | Batched preview, export and import                |
//! | `jobs`      | Asynchronous job lifecycle                        |
//! | `session`   | Database session traits                           |

pub mod ast;
pub mod clickhouse;
pub mod config;
pub mod engine;
pub mod error;
pub mod flatfile;
pub mod inspector;
pub mod jobs;
pub mod memory;
pub mod parser;
pub mod planner;
pub mod request;
pub mod session;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::clickhouse::{ClickHouseConnector, ClickHouseSession};
    pub use crate::config::{BridgeConfig, ConnectionConfig, TransferSettings};
    pub use crate::engine::{PreviewRow, TransferEngine};
    pub use crate::error::*;
    pub use crate::flatfile::FileFormat;
    pub use crate::inspector::{describe_table, describe_tables, infer_file_schema, list_tables};
    pub use crate::jobs::{JobStatus, JobTracker, TransferJob};
    pub use crate::memory::MemorySession;
    pub use crate::parser::parse_predicate;
    pub use crate::planner::build_plan;
    pub use crate::request::{Direction, ExportRequest, ImportRequest, TransferRequest};
    pub use crate::session::{Connector, Row, RowStream, Session};
    pub use crate::transpiler::ToSql;
}
