//! PostgreSQL driver. Integer auto-increment primary keys use the SERIAL
//! types; enum columns are backed by named enum types; column type changes
//! go through `ALTER COLUMN ... TYPE ... USING`.

use crate::error::{Error, Result};
use crate::model::ColumnType;
use crate::plan::{ColumnPlan, TablePlan};

use super::{enum_type_name, escape_string, is_integer_type, render_create_table, Dialect, DialectKind};

pub struct PostgresDialect;

impl PostgresDialect {
    fn column_def(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        if column.is_primary_key && column.auto_increment && is_integer_type(column.column_type) {
            let serial = match column.column_type {
                ColumnType::BigInt => "BIGSERIAL",
                _ => "SERIAL",
            };
            return Ok(format!("{} {} PRIMARY KEY", self.quote_ident(&column.name), serial));
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

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn create_enum_type(&self, name: &str, values: &[String]) -> Option<String> {
        let values = values
            .iter()
            .map(|v| escape_string(v))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "CREATE TYPE {} AS ENUM ({});",
            self.quote_ident(name),
            values
        ))
    }

    fn drop_enum_type(&self, name: &str) -> Option<String> {
        Some(format!("DROP TYPE IF EXISTS {};", self.quote_ident(name)))
    }

    fn create_table(&self, plan: &TablePlan) -> Result<String> {
        render_create_table(self, plan, |column| self.column_def(&plan.table, column))
    }

    fn add_column(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.quote_ident(table),
            self.column_def(table, column)?
        ))
    }

    fn modify_column(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        let table_ident = self.quote_ident(table);
        let column_ident = self.quote_ident(&column.name);
        let ty = self.column_type_sql(table, column)?;

        let mut statements = vec![format!(
            "ALTER TABLE {table_ident} ALTER COLUMN {column_ident} TYPE {ty} USING {column_ident}::{ty};"
        )];
        if column.is_nullable {
            statements.push(format!(
                "ALTER TABLE {table_ident} ALTER COLUMN {column_ident} DROP NOT NULL;"
            ));
        } else {
            statements.push(format!(
                "ALTER TABLE {table_ident} ALTER COLUMN {column_ident} SET NOT NULL;"
            ));
        }
        if column.has_default {
            statements.push(format!(
                "ALTER TABLE {table_ident} ALTER COLUMN {column_ident} SET DEFAULT {};",
                self.default_literal(column)?
            ));
        } else {
            statements.push(format!(
                "ALTER TABLE {table_ident} ALTER COLUMN {column_ident} DROP DEFAULT;"
            ));
        }
        Ok(statements.join("\n"))
    }

    fn drop_index(&self, _table: &str, index: &str) -> String {
        format!("DROP INDEX IF EXISTS {};", self.quote_ident(index))
    }

    fn column_type_sql(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        let sql = match column.column_type {
            ColumnType::String => "VARCHAR(255)".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal => "NUMERIC".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Enum => {
                if column.enum_values.as_ref().is_none_or(|v| v.is_empty()) {
                    return Err(Error::DialectRender {
                        dialect: "postgres",
                        operation: "column type".to_string(),
                        reason: format!("enum column `{}` declares no values", column.name),
                    });
                }
                self.quote_ident(&enum_type_name(table, &column.name))
            }
        };
        Ok(sql)
    }

    fn json_object_row(&self, alias: &str, _columns: &[String]) -> String {
        format!("ROW_TO_JSON({})", self.quote_ident(alias))
    }

    fn json_array_wrap(&self, object_expr: &str) -> String {
        format!("COALESCE(JSON_AGG({object_expr}), '[]')")
    }

    fn create_migrations_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  version BIGINT PRIMARY KEY,\n  description TEXT NOT NULL,\n  applied_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,\n  checksum TEXT NOT NULL\n);",
            self.quote_ident(crate::constants::SQL_MIGRATIONS_TABLE)
        )
    }
}
