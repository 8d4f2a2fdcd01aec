//! Dialect drivers: rendering table plans and diff operations into DDL.
//!
//! One driver per supported dialect. Identifiers are always quoted with the
//! dialect's quoting character, doubled when it appears inside the
//! identifier. String defaults are single-quoted with embedded quotes
//! doubled.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::CURRENT_TIMESTAMP_TOKEN;
use crate::error::{Error, Result};
use crate::model::ColumnType;
use crate::plan::{ColumnPlan, IndexPlan, IndexType, TablePlan};

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Postgres,
    Mysql,
    Sqlite,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::Postgres => "postgres",
            DialectKind::Mysql => "mysql",
            DialectKind::Sqlite => "sqlite",
        }
    }

    pub fn driver(&self) -> &'static dyn Dialect {
        match self {
            DialectKind::Postgres => &PostgresDialect,
            DialectKind::Mysql => &MysqlDialect,
            DialectKind::Sqlite => &SqliteDialect,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            "mysql" | "mariadb" => Ok(DialectKind::Mysql),
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            other => Err(format!("unknown dialect `{other}`")),
        }
    }
}

/// Name of the implicit enum type backing an enum column.
pub fn enum_type_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_enum")
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn escape_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn quote_ident(&self, ident: &str) -> String;

    /// Positional parameter placeholder, 1-based.
    fn placeholder(&self, position: usize) -> String;

    /// Standalone enum type creation. `None` for dialects without enum
    /// types; those emit the constraint inline in the column definition.
    fn create_enum_type(&self, name: &str, values: &[String]) -> Option<String>;

    fn drop_enum_type(&self, name: &str) -> Option<String>;

    fn create_table(&self, plan: &TablePlan) -> Result<String>;

    fn create_index(&self, table: &str, index: &IndexPlan) -> String {
        let unique = match index.index_type {
            IndexType::Unique => "UNIQUE ",
            IndexType::Index => "",
        };
        let columns = index
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            unique,
            self.quote_ident(&format!("{}_{}", table, index.name)),
            self.quote_ident(table),
            columns
        )
    }

    fn add_foreign_key(
        &self,
        table: &str,
        column: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});",
            self.quote_ident(table),
            self.quote_ident(&format!("{table}_{column}_fk")),
            self.quote_ident(column),
            self.quote_ident(ref_table),
            self.quote_ident(ref_column)
        ))
    }

    /// Whether foreign keys must be declared inline at table creation
    /// because the dialect cannot add constraints afterwards.
    fn inline_foreign_keys(&self) -> bool {
        false
    }

    fn add_column(&self, table: &str, column: &ColumnPlan) -> Result<String>;

    fn modify_column(&self, table: &str, column: &ColumnPlan) -> Result<String>;

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }

    fn drop_index(&self, table: &str, index: &str) -> String;

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {};", self.quote_ident(table))
    }

    /// SQL type for a column plan, enum handling included.
    fn column_type_sql(&self, table: &str, column: &ColumnPlan) -> Result<String>;

    /// Rendered literal for a column default.
    fn default_literal(&self, column: &ColumnPlan) -> Result<String> {
        let value = column.default_value.as_ref().ok_or_else(|| Error::DialectRender {
            dialect: self.kind().as_str(),
            operation: "default".to_string(),
            reason: format!("column `{}` has no default value", column.name),
        })?;
        Ok(render_default(self.kind(), value))
    }

    // JSON projection helpers used by eager-load subqueries.

    /// Expression turning one row of subquery `alias` into a JSON object.
    /// Dialects without a whole-row conversion build the object from the
    /// given column names.
    fn json_object_row(&self, alias: &str, columns: &[String]) -> String;

    /// Aggregate a per-row JSON object expression into a JSON array,
    /// defaulting to an empty array when no rows match.
    fn json_array_wrap(&self, object_expr: &str) -> String;

    // Migrations tracking table.

    fn create_migrations_table(&self) -> String;

    fn executed_migrations_query(&self) -> String {
        format!(
            "SELECT version FROM {} ORDER BY version;",
            self.quote_ident(crate::constants::SQL_MIGRATIONS_TABLE)
        )
    }

    fn record_migration_query(&self) -> String {
        format!(
            "INSERT INTO {} (version, description, checksum) VALUES ({}, {}, {});",
            self.quote_ident(crate::constants::SQL_MIGRATIONS_TABLE),
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }
}

/// Shared default-literal rendering: strings quoted (current-timestamp
/// pseudo-token excepted), booleans as dialect literals, numerics unquoted,
/// structured values as quoted JSON.
pub(crate) fn render_default(kind: DialectKind, value: &Value) -> String {
    match value {
        Value::String(s) if s == CURRENT_TIMESTAMP_TOKEN => s.clone(),
        Value::String(s) => escape_string(s),
        Value::Bool(b) => match kind {
            DialectKind::Sqlite => if *b { "1" } else { "0" }.to_string(),
            _ => if *b { "TRUE" } else { "FALSE" }.to_string(),
        },
        Value::Number(n) => n.to_string(),
        Value::Null => "NULL".to_string(),
        other => escape_string(&other.to_string()),
    }
}

/// Shared CREATE TABLE assembly used by every driver: the driver supplies
/// the per-column definition, this composes the statement.
pub(crate) fn render_create_table(
    dialect: &dyn Dialect,
    plan: &TablePlan,
    column_def: impl Fn(&ColumnPlan) -> Result<String>,
) -> Result<String> {
    let mut defs = Vec::with_capacity(plan.columns.len());
    for column in &plan.columns {
        let mut def = column_def(column)?;
        if dialect.inline_foreign_keys()
            && let Some(refs) = &column.references
        {
            def.push_str(&format!(
                " REFERENCES {} ({})",
                dialect.quote_ident(&refs.table),
                dialect.quote_ident(&refs.column)
            ));
        }
        defs.push(format!("  {def}"));
    }
    Ok(format!(
        "CREATE TABLE {} (\n{}\n);",
        dialect.quote_ident(&plan.table),
        defs.join(",\n")
    ))
}

/// Types an integer-family primary key may take.
pub(crate) fn is_integer_type(ty: ColumnType) -> bool {
    matches!(ty, ColumnType::Integer | ColumnType::BigInt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_kind_round_trips_through_strings() {
        for kind in [DialectKind::Postgres, DialectKind::Mysql, DialectKind::Sqlite] {
            assert_eq!(kind.as_str().parse::<DialectKind>().unwrap(), kind);
        }
        assert!("oracle".parse::<DialectKind>().is_err());
    }

    #[test]
    fn escape_string_doubles_quotes() {
        assert_eq!(escape_string("it's"), "'it''s'");
        assert_eq!(escape_string("plain"), "'plain'");
    }

    #[test]
    fn default_rendering_per_kind() {
        assert_eq!(
            render_default(DialectKind::Postgres, &Value::String("CURRENT_TIMESTAMP".into())),
            "CURRENT_TIMESTAMP"
        );
        assert_eq!(
            render_default(DialectKind::Postgres, &Value::String("on".into())),
            "'on'"
        );
        assert_eq!(render_default(DialectKind::Postgres, &Value::Bool(true)), "TRUE");
        assert_eq!(render_default(DialectKind::Sqlite, &Value::Bool(true)), "1");
        assert_eq!(render_default(DialectKind::Mysql, &Value::from(42)), "42");
    }
}
