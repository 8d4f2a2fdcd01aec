//! SQLite driver. AUTOINCREMENT is only valid on INTEGER PRIMARY KEY
//! columns, enums are emulated with CHECK constraints, and foreign keys are
//! declared inline at table creation because ALTER TABLE cannot add
//! constraints afterwards.

use crate::error::{Error, Result};
use crate::model::ColumnType;
use crate::plan::{ColumnPlan, TablePlan};

use super::{escape_string, is_integer_type, render_create_table, Dialect, DialectKind};

pub struct SqliteDialect;

impl SqliteDialect {
    fn column_def(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        if column.is_primary_key && column.auto_increment && is_integer_type(column.column_type) {
            // AUTOINCREMENT requires exactly INTEGER PRIMARY KEY.
            return Ok(format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                self.quote_ident(&column.name)
            ));
        }

        let mut def = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.column_type_sql(table, column)?
        );
        if column.is_primary_key {
            def.push_str(" PRIMARY KEY");
        } else if !column.is_nullable {
            def.push_str(" NOT NULL");
        }
        if column.has_default {
            def.push_str(&format!(" DEFAULT {}", self.default_literal(column)?));
        }
        Ok(def)
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn create_enum_type(&self, _name: &str, _values: &[String]) -> Option<String> {
        None
    }

    fn drop_enum_type(&self, _name: &str) -> Option<String> {
        None
    }

    fn create_table(&self, plan: &TablePlan) -> Result<String> {
        render_create_table(self, plan, |column| self.column_def(&plan.table, column))
    }

    fn add_foreign_key(
        &self,
        table: &str,
        column: &str,
        _ref_table: &str,
        _ref_column: &str,
    ) -> Result<String> {
        Err(Error::DialectRender {
            dialect: "sqlite",
            operation: "add foreign key".to_string(),
            reason: format!(
                "SQLite cannot add a constraint to existing table `{table}` (column `{column}`); foreign keys are declared at table creation"
            ),
        })
    }

    fn inline_foreign_keys(&self) -> bool {
        true
    }

    fn add_column(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.quote_ident(table),
            self.column_def(table, column)?
        ))
    }

    fn modify_column(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        Err(Error::DialectRender {
            dialect: "sqlite",
            operation: "modify column".to_string(),
            reason: format!(
                "SQLite cannot alter the type of column `{}` on `{}`; recreate the table instead",
                column.name, table
            ),
        })
    }

    fn drop_index(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX IF EXISTS {};", self.quote_ident(index))
    }

    fn column_type_sql(&self, _table: &str, column: &ColumnPlan) -> Result<String> {
        let sql = match column.column_type {
            ColumnType::String | ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "INTEGER".to_string(),
            ColumnType::Integer | ColumnType::BigInt => "INTEGER".to_string(),
            ColumnType::Float | ColumnType::Double => "REAL".to_string(),
            ColumnType::Decimal => "NUMERIC".to_string(),
            ColumnType::Date | ColumnType::DateTime => "TEXT".to_string(),
            ColumnType::Json => "TEXT".to_string(),
            ColumnType::Enum => {
                let values = column
                    .enum_values
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|v| escape_string(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "TEXT CHECK ({} IN ({}))",
                    self.quote_ident(&column.name),
                    values
                )
            }
        };
        Ok(sql)
    }

    fn json_object_row(&self, alias: &str, columns: &[String]) -> String {
        let pairs = columns
            .iter()
            .map(|c| format!("'{}', {}.{}", c, self.quote_ident(alias), self.quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("json_object({pairs})")
    }

    fn json_array_wrap(&self, object_expr: &str) -> String {
        format!("COALESCE(json_group_array({object_expr}), '[]')")
    }

    fn create_migrations_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  version INTEGER PRIMARY KEY,\n  description TEXT NOT NULL,\n  applied_at TEXT DEFAULT CURRENT_TIMESTAMP,\n  checksum TEXT NOT NULL\n);",
            self.quote_ident(crate::constants::SQL_MIGRATIONS_TABLE)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnReference;

    #[test]
    fn autoincrement_only_on_integer_primary_key() {
        let plan = TablePlan {
            table: "users".into(),
            columns: vec![ColumnPlan {
                name: "id".into(),
                column_type: ColumnType::Integer,
                is_primary_key: true,
                is_nullable: false,
                auto_increment: true,
                ..ColumnPlan::default()
            }],
            indexes: vec![],
        };
        let sql = SqliteDialect.create_table(&plan).unwrap();
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn enum_becomes_a_check_constraint() {
        let column = ColumnPlan {
            name: "status".into(),
            column_type: ColumnType::Enum,
            enum_values: Some(vec!["on".into(), "off".into()]),
            ..ColumnPlan::default()
        };
        let ty = SqliteDialect.column_type_sql("users", &column).unwrap();
        assert_eq!(ty, "TEXT CHECK (\"status\" IN ('on', 'off'))");
    }

    #[test]
    fn foreign_keys_render_inline_at_creation() {
        let plan = TablePlan {
            table: "posts".into(),
            columns: vec![ColumnPlan {
                name: "user_id".into(),
                column_type: ColumnType::Integer,
                references: Some(ColumnReference {
                    table: "users".into(),
                    column: "id".into(),
                }),
                ..ColumnPlan::default()
            }],
            indexes: vec![],
        };
        let sql = SqliteDialect.create_table(&plan).unwrap();
        assert!(sql.contains("REFERENCES \"users\" (\"id\")"));
        assert!(SqliteDialect.add_foreign_key("posts", "user_id", "users", "id").is_err());
    }

    #[test]
    fn modify_column_is_unsupported() {
        let column = ColumnPlan {
            name: "age".into(),
            column_type: ColumnType::Integer,
            ..ColumnPlan::default()
        };
        let err = SqliteDialect.modify_column("users", &column).unwrap_err();
        assert!(err.to_string().contains("sqlite"));
    }
}
