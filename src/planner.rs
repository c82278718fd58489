//! Projection/join builder.
//!
//! Turns described tables, a per-table column selection and an optional join
//! configuration into a [`ReadPlan`]. Every identifier in the plan is checked
//! against the table descriptors and every join condition is parsed, so the
//! plan can be rendered safely by any session.

use std::collections::HashSet;

use tracing::warn;

use crate::ast::*;
use crate::error::{BridgeError, BridgeResult};
use crate::parser::parse_predicate;

/// Build a read plan.
///
/// `tables[0]` is the primary table. Each further table is joined with the
/// configured join type using `join.conditions[i - 1]`; tables past the end
/// of the condition list are joined without a condition (a cross join).
/// Selecting more than one table without a join configuration is an error.
pub fn build_plan(
    tables: &[TableDescriptor],
    projection: &ProjectionSpec,
    join: Option<&JoinSpec>,
    limit: Option<usize>,
) -> BridgeResult<ReadPlan> {
    let Some(primary) = tables.first() else {
        return Err(BridgeError::Plan("no tables selected".to_string()));
    };

    let mut seen = HashSet::new();
    for table in tables {
        if !seen.insert(table.name.as_str()) {
            return Err(BridgeError::Plan(format!(
                "table '{}' is selected more than once",
                table.name
            )));
        }
    }

    let mut unknown: Vec<&String> = projection.keys().filter(|k| !seen.contains(k.as_str())).collect();
    unknown.sort();
    for key in unknown {
        warn!(table = %key, "ignoring column selection for a table that is not selected");
    }

    let joined = tables.len() > 1;
    let join = match (joined, join) {
        (true, None) => {
            return Err(BridgeError::Plan("join configuration required".to_string()));
        }
        (true, Some(j)) => Some(j),
        (false, _) => None,
    };

    let mut columns = Vec::new();
    for table in tables {
        columns.extend(project_table(table, projection.get(&table.name), joined)?);
    }

    let mut joins = Vec::new();
    if let Some(spec) = join {
        for (i, table) in tables.iter().enumerate().skip(1) {
            let on = match spec.conditions.get(i - 1) {
                Some(condition) => {
                    let predicate = parse_predicate(condition)?;
                    check_predicate(&predicate, &tables[..=i])?;
                    Some(predicate)
                }
                None => {
                    warn!(table = %table.name, "no join condition supplied, joining every row");
                    None
                }
            };
            joins.push(JoinClause {
                kind: spec.join_type,
                table: table.name.clone(),
                on,
            });
        }

        if spec.conditions.len() > tables.len() - 1 {
            warn!(
                supplied = spec.conditions.len(),
                used = tables.len() - 1,
                "ignoring surplus join conditions"
            );
        }
    }

    Ok(ReadPlan {
        source: primary.name.clone(),
        columns,
        joins,
        limit,
    })
}

fn project_table(
    table: &TableDescriptor,
    selected: Option<&Vec<String>>,
    qualify: bool,
) -> BridgeResult<Vec<ProjectedColumn>> {
    let names: Vec<String> = match selected {
        Some(cols) if !cols.is_empty() => {
            for col in cols {
                if !table.has_column(col) {
                    return Err(BridgeError::Plan(format!(
                        "column '{}' does not exist in table '{}'",
                        col, table.name
                    )));
                }
            }
            cols.clone()
        }
        _ => table.column_names(),
    };

    Ok(names
        .into_iter()
        .map(|column| ProjectedColumn {
            table: table.name.clone(),
            alias: if qualify {
                format!("{}.{}", table.name, column)
            } else {
                column.clone()
            },
            column,
        })
        .collect())
}

/// Every column a join condition mentions must exist in a table joined so far.
fn check_predicate(predicate: &Predicate, visible: &[TableDescriptor]) -> BridgeResult<()> {
    for column in predicate.columns() {
        let found = match &column.table {
            Some(t) => {
                let table = visible.iter().find(|d| &d.name == t).ok_or_else(|| {
                    BridgeError::Plan(format!(
                        "join condition references table '{}' which is not joined at this point",
                        t
                    ))
                })?;
                table.has_column(&column.column)
            }
            None => visible.iter().any(|d| d.has_column(&column.column)),
        };
        if !found {
            return Err(BridgeError::Plan(format!(
                "join condition references unknown column '{}'",
                column
            )));
        }
    }
    Ok(())
}
