//! SQL transpiler for read plans and DDL.
//!
//! Renders the structured plan objects into the ClickHouse SQL dialect.
//! Identifiers are escaped, literals are quoted, and join conditions only
//! ever come from a parsed [`Predicate`], never from raw caller strings.

use crate::ast::*;

/// SQL and ClickHouse keywords that must be quoted when used as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "order", "group", "user", "table", "select", "from", "where", "join", "left", "right",
    "inner", "outer", "full", "cross", "on", "using", "and", "or", "not", "null", "true",
    "false", "limit", "offset", "as", "in", "is", "like", "between", "having", "union", "all",
    "distinct", "case", "when", "then", "else", "end", "create", "alter", "drop", "insert",
    "update", "delete", "index", "key", "primary", "default", "format", "settings", "final",
    "sample", "prewhere", "array", "global", "any", "asof", "with", "interval", "engine",
];

/// Escape an identifier if it's a reserved word or contains special chars.
/// Returns the identifier quoted with backticks if needed.
pub fn escape_identifier(name: &str) -> String {
    let lower = name.to_lowercase();
    let needs_escaping = RESERVED_WORDS.contains(&lower.as_str())
        || name.is_empty()
        || name.chars().any(|c| !c.is_ascii_alphanumeric() && c != '_')
        || name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);

    if needs_escaping {
        quote_identifier(name)
    } else {
        name.to_string()
    }
}

/// Always quote an identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Trait for converting plan nodes to SQL.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

impl ToSql for ReadPlan {
    fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if self.is_join() {
                    format!(
                        "{}.{} AS {}",
                        escape_identifier(&c.table),
                        escape_identifier(&c.column),
                        quote_identifier(&c.alias)
                    )
                } else {
                    escape_identifier(&c.column)
                }
            })
            .collect();
        if cols.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&escape_identifier(&self.source));

        for join in &self.joins {
            match &join.on {
                Some(predicate) => {
                    sql.push_str(&format!(
                        " {} JOIN {} ON {}",
                        join.kind,
                        escape_identifier(&join.table),
                        predicate.to_sql()
                    ));
                }
                None => {
                    sql.push_str(&format!(" CROSS JOIN {}", escape_identifier(&join.table)));
                }
            }
        }

        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        sql
    }
}

impl ToSql for Predicate {
    fn to_sql(&self) -> String {
        match self {
            Predicate::Compare { left, op, right } => {
                format!("{} {} {}", left.to_sql(), op.as_str(), right.to_sql())
            }
            Predicate::Logical { op, left, right } => {
                let joiner = match op {
                    LogicalOp::And => "AND",
                    LogicalOp::Or => "OR",
                };
                format!("({} {} {})", left.to_sql(), joiner, right.to_sql())
            }
        }
    }
}

impl ToSql for Operand {
    fn to_sql(&self) -> String {
        match self {
            Operand::Column(c) => c.to_sql(),
            Operand::Int(n) => n.to_string(),
            Operand::Float(f) => f.to_string(),
            Operand::String(s) => quote_literal(s),
        }
    }
}

impl ToSql for ColumnRef {
    fn to_sql(&self) -> String {
        match &self.table {
            Some(t) => format!("{}.{}", escape_identifier(t), escape_identifier(&self.column)),
            None => escape_identifier(&self.column),
        }
    }
}

impl ToSql for CreateTable {
    /// Every column is a `String`; `ORDER BY tuple()` gives unsorted,
    /// insert-only MergeTree storage with no primary key.
    fn to_sql(&self) -> String {
        let defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} String", quote_identifier(c)))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE = MergeTree() ORDER BY tuple()",
            escape_identifier(&self.table),
            defs.join(", ")
        )
    }
}

impl ToSql for InsertInto<'_> {
    fn to_sql(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| quote_identifier(c)).collect();
        format!(
            "INSERT INTO {} ({}) FORMAT TabSeparated",
            escape_identifier(self.table),
            cols.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_predicate;

    fn projected(table: &str, column: &str, alias: &str) -> ProjectedColumn {
        ProjectedColumn {
            table: table.into(),
            column: column.into(),
            alias: alias.into(),
        }
    }

    #[test]
    fn test_single_table_select() {
        let plan = ReadPlan {
            source: "users".into(),
            columns: vec![projected("users", "id", "id"), projected("users", "email", "email")],
            joins: vec![],
            limit: None,
        };
        assert_eq!(plan.to_sql(), "SELECT id, email FROM users");
    }

    #[test]
    fn test_select_with_limit_and_reserved_words() {
        let plan = ReadPlan {
            source: "order".into(),
            columns: vec![projected("order", "user", "user"), projected("order", "2fa", "2fa")],
            joins: vec![],
            limit: Some(100),
        };
        assert_eq!(plan.to_sql(), "SELECT `user`, `2fa` FROM `order` LIMIT 100");
    }

    #[test]
    fn test_join_select() {
        let plan = ReadPlan {
            source: "orders".into(),
            columns: vec![
                projected("orders", "id", "orders.id"),
                projected("customers", "name", "customers.name"),
            ],
            joins: vec![JoinClause {
                kind: JoinType::Inner,
                table: "customers".into(),
                on: Some(parse_predicate("orders.cust_id = customers.id").unwrap()),
            }],
            limit: None,
        };
        assert_eq!(
            plan.to_sql(),
            "SELECT orders.id AS `orders.id`, customers.name AS `customers.name` \
             FROM orders INNER JOIN customers ON orders.cust_id = customers.id"
        );
    }

    #[test]
    fn test_conditionless_join_is_cross_join() {
        let plan = ReadPlan {
            source: "a".into(),
            columns: vec![projected("a", "x", "a.x"), projected("b", "y", "b.y")],
            joins: vec![JoinClause {
                kind: JoinType::Left,
                table: "b".into(),
                on: None,
            }],
            limit: Some(5),
        };
        assert_eq!(
            plan.to_sql(),
            "SELECT a.x AS `a.x`, b.y AS `b.y` FROM a CROSS JOIN b LIMIT 5"
        );
    }

    #[test]
    fn test_predicate_literals_are_quoted() {
        let p = parse_predicate("c.name = 'EU' OR c.id > -3").unwrap();
        assert_eq!(p.to_sql(), "(c.name = 'EU' OR c.id > -3)");
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), "'it\\'s'");
        assert_eq!(quote_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_create_table() {
        let ddl = CreateTable::new("T", vec!["id".into(), "first name".into()]);
        assert_eq!(
            ddl.to_sql(),
            "CREATE TABLE IF NOT EXISTS T (`id` String, `first name` String) \
             ENGINE = MergeTree() ORDER BY tuple()"
        );
    }

    #[test]
    fn test_insert_header() {
        let cols = vec!["id".to_string(), "name".to_string()];
        let insert = InsertInto {
            table: "people",
            columns: &cols,
        };
        assert_eq!(
            insert.to_sql(),
            "INSERT INTO people (`id`, `name`) FORMAT TabSeparated"
        );
    }

    #[test]
    fn test_escape_identifier_with_backtick() {
        assert_eq!(escape_identifier("a`b"), "`a\\`b`");
        assert_eq!(escape_identifier("plain_name"), "plain_name");
    }
}
