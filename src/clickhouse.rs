//! ClickHouse session over the HTTP interface.
//!
//! Statements are POSTed as the request body. Results come back as
//! `TabSeparated`/`TabSeparatedWithNames` and are read chunk by chunk, so a
//! large export never sits in memory as a whole. Bulk inserts send the
//! `INSERT ... FORMAT TabSeparated` header followed by the rows in one body.

use async_trait::async_trait;
use std::time::Duration;

use tracing::debug;

use crate::ast::*;
use crate::config::ConnectionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::session::{Connector, Row, RowStream, Session};
use crate::transpiler::{escape_identifier, ToSql};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EXCEPTION_CODE_HEADER: &str = "x-clickhouse-exception-code";
/// Line that newer servers emit before an exception raised mid-stream.
const EXCEPTION_MARKER: &[u8] = b"__exception__";

/// A session bound to one ClickHouse server and database.
pub struct ClickHouseSession {
    client: reqwest::Client,
    config: ConnectionConfig,
    url: String,
}

impl ClickHouseSession {
    /// Open a session and probe it with `SELECT 1`.
    pub async fn connect(config: &ConnectionConfig) -> BridgeResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Connection(e.to_string()))?;

        let session = Self {
            client,
            url: config.base_url(),
            config: config.clone(),
        };

        let probe = session.fetch_text("SELECT 1").await;
        match probe {
            Ok(body) if body.trim() == "1" => {}
            Ok(body) => {
                return Err(BridgeError::Connection(format!(
                    "unexpected probe response from {}: {}",
                    session.url,
                    body.trim()
                )));
            }
            Err(e) => {
                return Err(BridgeError::Connection(format!(
                    "ClickHouse connection to {} failed: {}",
                    session.url, e
                )));
            }
        }

        debug!(url = %session.url, database = %config.database, "connected to ClickHouse");
        Ok(session)
    }

    async fn post(&self, body: String) -> BridgeResult<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Database", &self.config.database)
            .body(body);

        if let Some(token) = &self.config.jwt_token {
            request = request.bearer_auth(token);
        } else if let Some(password) = &self.config.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Connection(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() || response.headers().contains_key(EXCEPTION_CODE_HEADER) {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Database(format!("{}: {}", status, text.trim())));
        }
        Ok(response)
    }

    async fn fetch_text(&self, sql: &str) -> BridgeResult<String> {
        debug!(sql, "executing");
        self.post(sql.to_string())
            .await?
            .text()
            .await
            .map_err(|e| BridgeError::Database(format!("failed to read response: {}", e)))
    }

    /// Run a statement and split its `TabSeparated` output into rows.
    async fn fetch_rows(&self, sql: &str) -> BridgeResult<Vec<Row>> {
        let text = self.fetch_text(&format!("{} FORMAT TabSeparated", sql)).await?;
        Ok(text
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| parse_line(l.as_bytes()))
            .collect())
    }
}

#[async_trait]
impl Session for ClickHouseSession {
    fn name(&self) -> &str {
        "clickhouse"
    }

    async fn list_tables(&self) -> BridgeResult<Vec<String>> {
        let rows = self.fetch_rows("SHOW TABLES").await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.into_iter().next().flatten())
            .collect())
    }

    async fn describe_table(&self, table: &str) -> BridgeResult<Vec<ColumnInfo>> {
        let rows = self
            .fetch_rows(&format!("DESCRIBE TABLE {}", escape_identifier(table)))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let mut fields = r.into_iter();
                match (fields.next().flatten(), fields.next().flatten()) {
                    (Some(name), Some(data_type)) => Some(ColumnInfo::new(name, data_type)),
                    _ => None,
                }
            })
            .collect())
    }

    async fn table_exists(&self, table: &str) -> BridgeResult<bool> {
        let text = self
            .fetch_text(&format!("EXISTS TABLE {} FORMAT TabSeparated", escape_identifier(table)))
            .await?;
        Ok(text.trim() == "1")
    }

    async fn create_table(&self, ddl: &CreateTable) -> BridgeResult<()> {
        self.fetch_text(&ddl.to_sql()).await.map(|_| ())
    }

    async fn query(&self, plan: &ReadPlan) -> BridgeResult<Box<dyn RowStream>> {
        let sql = format!("{} FORMAT TabSeparatedWithNames", plan.to_sql());
        debug!(sql = %sql, "streaming query");
        let response = self.post(sql).await?;
        let stream = ClickHouseRowStream::open(response, plan.column_names()).await?;
        Ok(Box::new(stream))
    }

    async fn insert(&self, table: &str, columns: &[String], rows: &[Row]) -> BridgeResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        debug!(table, rows = rows.len(), "bulk insert");
        self.post(insert_body(table, columns, rows)).await.map(|_| ())
    }
}

/// Connector that opens [`ClickHouseSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouseConnector;

#[async_trait]
impl Connector for ClickHouseConnector {
    async fn connect(&self, config: &ConnectionConfig) -> BridgeResult<Box<dyn Session>> {
        Ok(Box::new(ClickHouseSession::connect(config).await?))
    }
}

struct ClickHouseRowStream {
    response: reqwest::Response,
    columns: Vec<String>,
    pending: Vec<u8>,
    cursor: usize,
    finished: bool,
}

impl ClickHouseRowStream {
    /// Wrap a `TabSeparatedWithNames` response and consume its header line.
    /// An empty body keeps `fallback_columns`.
    async fn open(response: reqwest::Response, fallback_columns: Vec<String>) -> BridgeResult<Self> {
        let mut stream = Self {
            response,
            columns: vec![],
            pending: vec![],
            cursor: 0,
            finished: false,
        };
        stream.columns = match stream.next_row().await? {
            Some(header) => header.into_iter().map(|c| c.unwrap_or_default()).collect(),
            None => fallback_columns,
        };
        Ok(stream)
    }

    /// Next data line as a row. A server exception written into the body
    /// after a `200 OK` fails the read instead of becoming a row.
    async fn next_row(&mut self) -> BridgeResult<Option<Row>> {
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };
        if line == EXCEPTION_MARKER {
            let mut message = None;
            while let Some(rest) = self.next_line().await? {
                if message.is_none() {
                    message = server_exception(&rest);
                }
            }
            return Err(BridgeError::Transfer(format!(
                "query failed mid-stream: {}",
                message.unwrap_or_else(|| "server reported an exception".to_string())
            )));
        }
        if let Some(message) = server_exception(&line) {
            return Err(BridgeError::Transfer(format!("query failed mid-stream: {}", message)));
        }
        Ok(Some(parse_line(&line)))
    }

    async fn next_line(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.pending[self.cursor..].iter().position(|&b| b == b'\n') {
                let line = self.pending[self.cursor..self.cursor + pos].to_vec();
                self.cursor += pos + 1;
                return Ok(Some(line));
            }

            if self.finished {
                if self.cursor < self.pending.len() {
                    let line = self.pending[self.cursor..].to_vec();
                    self.cursor = self.pending.len();
                    return Ok(Some(line));
                }
                return Ok(None);
            }

            self.pending.drain(..self.cursor);
            self.cursor = 0;
            match self.response.chunk().await {
                Ok(Some(chunk)) => self.pending.extend_from_slice(&chunk),
                Ok(None) => self.finished = true,
                Err(e) => {
                    return Err(BridgeError::Transfer(format!(
                        "failed to read query result: {}",
                        e
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl RowStream for ClickHouseRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> BridgeResult<Option<Vec<Row>>> {
        let mut batch = Vec::new();
        while batch.len() < max_rows.max(1) {
            match self.next_row().await? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Body of a bulk insert: the statement header, then one TSV line per row.
fn insert_body(table: &str, columns: &[String], rows: &[Row]) -> String {
    let mut body = InsertInto { table, columns }.to_sql();
    body.push('\n');
    for row in rows {
        let line: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                Some(v) => escape_tsv(v),
                None => "\\N".to_string(),
            })
            .collect();
        body.push_str(&line.join("\t"));
        body.push('\n');
    }
    body
}

/// The `Code: NNN. DB::Exception: ...` text of a line, if it carries one.
fn server_exception(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let start = text.find("Code: ")?;
    let message = text[start..].trim();
    message.contains("DB::Exception").then(|| message.to_string())
}

/// Split one TSV line into cells. `\N` is NULL.
fn parse_line(line: &[u8]) -> Row {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line.split(|&b| b == b'\t')
        .map(|field| {
            if field == b"\\N" {
                None
            } else {
                Some(unescape_tsv(&String::from_utf8_lossy(field)))
            }
        })
        .collect()
}

fn escape_tsv(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_tsv(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
