//! In-process session.
//!
//! `MemorySession` keeps tables in memory and executes read plans directly
//! against them, joins included. It is test support for code built on
//! [`Session`]: it records every bulk insert so batch behaviour can be
//! observed, and can be told to reject inserts.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ast::*;
use crate::config::ConnectionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::session::{Connector, Row, RowStream, Session};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

/// One recorded bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCall {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    inserts: Vec<InsertCall>,
    /// Reject every insert after this many have succeeded.
    fail_inserts_after: Option<usize>,
}

/// A shared in-memory database. Clones see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with `(name, type)` columns and text rows.
    pub fn with_table(self, name: &str, columns: &[(&str, &str)], rows: Vec<Vec<&str>>) -> Self {
        {
            let mut state = self.lock();
            state.tables.insert(
                name.to_string(),
                MemoryTable {
                    columns: columns.iter().map(|(n, t)| ColumnInfo::new(*n, *t)).collect(),
                    rows: rows
                        .into_iter()
                        .map(|r| r.into_iter().map(|c| Some(c.to_string())).collect())
                        .collect(),
                },
            );
        }
        self
    }

    /// Make every insert after the first `n` fail.
    pub fn fail_inserts_after(self, n: usize) -> Self {
        self.lock().fail_inserts_after = Some(n);
        self
    }

    /// Every bulk insert so far, in order.
    pub fn insert_calls(&self) -> Vec<InsertCall> {
        self.lock().inserts.clone()
    }

    /// Current rows of `table`.
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.lock().tables.get(table).map(|t| t.rows.clone())
    }

    pub fn descriptor(&self, table: &str) -> Option<TableDescriptor> {
        self.lock()
            .tables
            .get(table)
            .map(|t| TableDescriptor::new(table, t.columns.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Session for MemorySession {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_tables(&self) -> BridgeResult<Vec<String>> {
        Ok(self.lock().tables.keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> BridgeResult<Vec<ColumnInfo>> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| BridgeError::Database(format!("table {} doesn't exist", table)))
    }

    async fn table_exists(&self, table: &str) -> BridgeResult<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn create_table(&self, ddl: &CreateTable) -> BridgeResult<()> {
        let mut state = self.lock();
        state
            .tables
            .entry(ddl.table.clone())
            .or_insert_with(|| MemoryTable {
                columns: ddl.descriptor().columns,
                rows: vec![],
            });
        Ok(())
    }

    async fn query(&self, plan: &ReadPlan) -> BridgeResult<Box<dyn RowStream>> {
        let state = self.lock();
        let rows = execute_plan(&state, plan)?;
        Ok(Box::new(MemoryRowStream {
            columns: plan.column_names(),
            rows: rows.into(),
        }))
    }

    async fn insert(&self, table: &str, columns: &[String], rows: &[Row]) -> BridgeResult<()> {
        let mut state = self.lock();
        if let Some(limit) = state.fail_inserts_after {
            if state.inserts.len() >= limit {
                return Err(BridgeError::Database(format!("insert into {} rejected", table)));
            }
        }

        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| BridgeError::Database(format!("table {} doesn't exist", table)))?;
        let indices = columns
            .iter()
            .map(|c| {
                target
                    .index_of(c)
                    .ok_or_else(|| BridgeError::Database(format!("no column {} in {}", c, table)))
            })
            .collect::<BridgeResult<Vec<usize>>>()?;

        for row in rows {
            if row.len() != indices.len() {
                return Err(BridgeError::Database(format!(
                    "expected {} values, got {}",
                    indices.len(),
                    row.len()
                )));
            }
            let mut stored = vec![None; target.columns.len()];
            for (cell, &i) in row.iter().zip(&indices) {
                stored[i] = cell.clone();
            }
            target.rows.push(stored);
        }

        state.inserts.push(InsertCall {
            table: table.to_string(),
            columns: columns.to_vec(),
            rows: rows.len(),
        });
        Ok(())
    }
}

#[async_trait]
impl Connector for MemorySession {
    async fn connect(&self, _config: &ConnectionConfig) -> BridgeResult<Box<dyn Session>> {
        Ok(Box::new(self.clone()))
    }
}

struct MemoryRowStream {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

#[async_trait]
impl RowStream for MemoryRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> BridgeResult<Option<Vec<Row>>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        let n = max_rows.max(1).min(self.rows.len());
        Ok(Some(self.rows.drain(..n).collect()))
    }
}

/// Row indices into each plan table; `None` is the null side of an outer join.
type Combo = Vec<Option<usize>>;

struct JoinContext<'a> {
    names: Vec<&'a str>,
    tables: Vec<&'a MemoryTable>,
}

impl<'a> JoinContext<'a> {
    /// Find the table position and column index a reference points at.
    fn resolve(&self, column: &ColumnRef) -> BridgeResult<(usize, usize)> {
        let found = match &column.table {
            Some(t) => self
                .names
                .iter()
                .position(|n| n == t)
                .and_then(|pos| self.tables[pos].index_of(&column.column).map(|i| (pos, i))),
            None => self
                .tables
                .iter()
                .enumerate()
                .find_map(|(pos, table)| table.index_of(&column.column).map(|i| (pos, i))),
        };
        found.ok_or_else(|| BridgeError::Database(format!("unknown column {}", column)))
    }

    fn cell(&self, combo: &Combo, pos: usize, index: usize) -> Option<&'a str> {
        let table = self.tables[pos];
        combo
            .get(pos)
            .copied()
            .flatten()
            .and_then(|row| table.rows[row][index].as_deref())
    }

    fn eval(&self, predicate: &Predicate, combo: &Combo) -> BridgeResult<bool> {
        match predicate {
            Predicate::Compare { left, op, right } => {
                let l = self.operand(left, combo)?;
                let r = self.operand(right, combo)?;
                let (Some(l), Some(r)) = (l, r) else {
                    return Ok(false);
                };
                let ordering = compare_text(&l, &r);
                Ok(match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Lte => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Gte => ordering != Ordering::Less,
                })
            }
            Predicate::Logical { op, left, right } => {
                let l = self.eval(left, combo)?;
                Ok(match op {
                    LogicalOp::And => l && self.eval(right, combo)?,
                    LogicalOp::Or => l || self.eval(right, combo)?,
                })
            }
        }
    }

    fn operand(&self, operand: &Operand, combo: &Combo) -> BridgeResult<Option<String>> {
        Ok(match operand {
            Operand::Column(c) => {
                let (pos, index) = self.resolve(c)?;
                self.cell(combo, pos, index).map(str::to_string)
            }
            Operand::Int(n) => Some(n.to_string()),
            Operand::Float(f) => Some(f.to_string()),
            Operand::String(s) => Some(s.clone()),
        })
    }
}

/// Numeric comparison when both sides parse as numbers, text otherwise.
fn compare_text(l: &str, r: &str) -> Ordering {
    match (l.trim().parse::<f64>(), r.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => l.cmp(r),
    }
}

fn execute_plan(state: &MemoryState, plan: &ReadPlan) -> BridgeResult<Vec<Row>> {
    let names: Vec<&str> = plan.tables().collect();
    let tables = names
        .iter()
        .map(|name| {
            state
                .tables
                .get(*name)
                .ok_or_else(|| BridgeError::Database(format!("table {} doesn't exist", name)))
        })
        .collect::<BridgeResult<Vec<&MemoryTable>>>()?;
    let ctx = JoinContext { names, tables };

    let mut combos: Vec<Combo> = (0..ctx.tables[0].rows.len()).map(|i| vec![Some(i)]).collect();

    for (j, join) in plan.joins.iter().enumerate() {
        let right = ctx.tables[j + 1];
        let mut right_matched = vec![false; right.rows.len()];
        let mut next = Vec::new();

        for combo in &combos {
            let mut matched = false;
            for (ri, seen) in right_matched.iter_mut().enumerate() {
                let mut candidate = combo.clone();
                candidate.push(Some(ri));
                let keep = match &join.on {
                    Some(predicate) => ctx.eval(predicate, &candidate)?,
                    None => true,
                };
                if keep {
                    matched = true;
                    *seen = true;
                    next.push(candidate);
                }
            }
            if !matched && join.on.is_some() && matches!(join.kind, JoinType::Left | JoinType::Full)
            {
                let mut candidate = combo.clone();
                candidate.push(None);
                next.push(candidate);
            }
        }

        if join.on.is_some() && matches!(join.kind, JoinType::Right | JoinType::Full) {
            for (ri, seen) in right_matched.iter().enumerate() {
                if !seen {
                    let mut candidate = vec![None; j + 1];
                    candidate.push(Some(ri));
                    next.push(candidate);
                }
            }
        }

        combos = next;
    }

    let projection = plan
        .columns
        .iter()
        .map(|c| {
            ctx.resolve(&ColumnRef {
                table: Some(c.table.clone()),
                column: c.column.clone(),
            })
        })
        .collect::<BridgeResult<Vec<(usize, usize)>>>()?;

    let limit = plan.limit.unwrap_or(usize::MAX);
    Ok(combos
        .iter()
        .take(limit)
        .map(|combo| {
            projection
                .iter()
                .map(|&(pos, index)| ctx.cell(combo, pos, index).map(str::to_string))
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_predicate;

    fn session() -> MemorySession {
        MemorySession::new()
            .with_table(
                "orders",
                &[("id", "UInt32"), ("cust_id", "UInt32")],
                vec![vec!["1", "10"], vec!["2", "20"], vec!["3", "99"]],
            )
            .with_table(
                "customers",
                &[("id", "UInt32"), ("name", "String")],
                vec![vec!["10", "Alice"], vec!["20", "Bob"], vec!["30", "Carol"]],
            )
    }

    fn join_plan(kind: JoinType) -> ReadPlan {
        ReadPlan {
            source: "orders".into(),
            columns: vec![
                ProjectedColumn {
                    table: "orders".into(),
                    column: "id".into(),
                    alias: "orders.id".into(),
                },
                ProjectedColumn {
                    table: "customers".into(),
                    column: "name".into(),
                    alias: "customers.name".into(),
                },
            ],
            joins: vec![JoinClause {
                kind,
                table: "customers".into(),
                on: Some(parse_predicate("orders.cust_id = customers.id").unwrap()),
            }],
            limit: None,
        }
    }

    async fn collect(session: &MemorySession, plan: &ReadPlan) -> Vec<Row> {
        let mut stream = session.query(plan).await.unwrap();
        let mut out = vec![];
        while let Some(batch) = stream.next_batch(2).await.unwrap() {
            out.extend(batch);
        }
        out
    }

    fn cells(rows: &[Row]) -> Vec<Vec<&str>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.as_deref().unwrap_or("NULL")).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_inner_join() {
        let rows = collect(&session(), &join_plan(JoinType::Inner)).await;
        assert_eq!(cells(&rows), vec![vec!["1", "Alice"], vec!["2", "Bob"]]);
    }

    #[tokio::test]
    async fn test_outer_joins() {
        let s = session();
        let left = collect(&s, &join_plan(JoinType::Left)).await;
        assert_eq!(
            cells(&left),
            vec![vec!["1", "Alice"], vec!["2", "Bob"], vec!["3", "NULL"]]
        );

        let right = collect(&s, &join_plan(JoinType::Right)).await;
        assert_eq!(
            cells(&right),
            vec![vec!["1", "Alice"], vec!["2", "Bob"], vec!["NULL", "Carol"]]
        );

        let full = collect(&s, &join_plan(JoinType::Full)).await;
        assert_eq!(full.len(), 4);
    }

    #[tokio::test]
    async fn test_insert_records_calls_and_maps_columns() {
        let s = session();
        s.create_table(&CreateTable::new("t", vec!["a".into(), "b".into()]))
            .await
            .unwrap();
        s.insert("t", &["b".to_string()], &[vec![Some("x".into())]])
            .await
            .unwrap();
        assert_eq!(s.rows("t").unwrap(), vec![vec![None, Some("x".to_string())]]);
        assert_eq!(
            s.insert_calls(),
            vec![InsertCall {
                table: "t".into(),
                columns: vec!["b".into()],
                rows: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_failing_inserts() {
        let s = session().fail_inserts_after(1);
        s.create_table(&CreateTable::new("t", vec!["a".into()])).await.unwrap();
        s.insert("t", &["a".to_string()], &[vec![Some("1".into())]]).await.unwrap();
        let err = s
            .insert("t", &["a".to_string()], &[vec![Some("2".into())]])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn test_compare_text_numeric() {
        assert_eq!(compare_text("10", "9"), Ordering::Greater);
        assert_eq!(compare_text("10", "10.0"), Ordering::Equal);
        assert_eq!(compare_text("abc", "abd"), Ordering::Less);
    }
}
