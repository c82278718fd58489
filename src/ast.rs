//! Data model for flatbridge.
//!
//! Table descriptors come out of the schema inspector, projection and join
//! specs come from the caller, and a [`ReadPlan`] is the structured query
//! object the planner builds from them. Plans are rendered to SQL only at
//! execution time (see [`crate::transpiler`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// A single column as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A table and its columns, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Column names in catalog order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Table name -> selected columns. An empty list selects every column.
pub type ProjectionSpec = HashMap<String, Vec<String>>;

/// How non-primary tables are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinType {
    type Err = BridgeError;

    /// Accepts `INNER`, `left`, `FULL OUTER JOIN`, `inner join`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let words: Vec<&str> = upper
            .split_whitespace()
            .filter(|w| *w != "JOIN" && *w != "OUTER")
            .collect();
        match words.as_slice() {
            ["INNER"] => Ok(JoinType::Inner),
            ["LEFT"] => Ok(JoinType::Left),
            ["RIGHT"] => Ok(JoinType::Right),
            ["FULL"] => Ok(JoinType::Full),
            _ => Err(BridgeError::Plan(format!(
                "invalid join type '{}'. Expected: INNER, LEFT, RIGHT or FULL",
                s
            ))),
        }
    }
}

/// Join configuration for multi-table reads.
///
/// `conditions[i]` joins `tables[i + 1]` to the tables before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    #[serde(alias = "joinType")]
    pub join_type: JoinType,
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl JoinSpec {
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            conditions: vec![],
        }
    }

    pub fn on(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }
}

/// A reference to a column, optionally qualified by its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Column(ColumnRef),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// A validated join condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Logical {
        op: LogicalOp,
        left: Box<Predicate>,
        right: Box<Predicate>,
    },
}

impl Predicate {
    /// Every column referenced by this predicate, left to right.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Predicate::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Column(c) = operand {
                        out.push(c);
                    }
                }
            }
            Predicate::Logical { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }
}

/// A column in the output of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedColumn {
    pub table: String,
    pub column: String,
    /// Name of the column in the result set.
    pub alias: String,
}

/// A join onto a non-primary table. `on: None` joins every row (cross join).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub kind: JoinType,
    pub table: String,
    pub on: Option<Predicate>,
}

/// The resolved, executable description of a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadPlan {
    /// Primary table.
    pub source: String,
    pub columns: Vec<ProjectedColumn>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    pub limit: Option<usize>,
}

impl ReadPlan {
    /// All tables read by this plan, primary first.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source.as_str()).chain(self.joins.iter().map(|j| j.table.as_str()))
    }

    pub fn is_join(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Result-set column names, in output order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.alias.clone()).collect()
    }

    /// Cap the number of rows read. An existing smaller limit is kept.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(self.limit.map_or(limit, |l| l.min(limit)));
        self
    }
}

/// DDL for an auto-provisioned destination table. Every column is text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<String>,
}

impl CreateTable {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// The catalog view of the table this statement creates.
    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor::new(
            self.table.clone(),
            self.columns
                .iter()
                .map(|c| ColumnInfo::new(c.clone(), "String"))
                .collect(),
        )
    }
}

/// Header of a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertInto<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_type_parsing() {
        assert_eq!("INNER".parse::<JoinType>().unwrap(), JoinType::Inner);
        assert_eq!("inner join".parse::<JoinType>().unwrap(), JoinType::Inner);
        assert_eq!("LEFT JOIN".parse::<JoinType>().unwrap(), JoinType::Left);
        assert_eq!("full outer join".parse::<JoinType>().unwrap(), JoinType::Full);
        assert!("CROSS".parse::<JoinType>().is_err());
    }

    #[test]
    fn test_join_spec_serde() {
        let spec: JoinSpec = serde_json::from_str(
            r#"{"joinType": "LEFT", "conditions": ["a.id = b.a_id"]}"#,
        )
        .unwrap();
        assert_eq!(spec, JoinSpec::new(JoinType::Left).on("a.id = b.a_id"));
    }

    #[test]
    fn test_with_limit_keeps_smaller() {
        let plan = ReadPlan {
            source: "t".into(),
            columns: vec![],
            joins: vec![],
            limit: Some(10),
        };
        assert_eq!(plan.clone().with_limit(100).limit, Some(10));
        assert_eq!(plan.with_limit(5).limit, Some(5));
    }
}
