//! MySQL driver. Backtick quoting, explicit AUTO_INCREMENT on integer
//! primary keys, enum values inline in the column definition.

use crate::error::Result;
use crate::model::ColumnType;
use crate::plan::{ColumnPlan, IndexPlan, IndexType, TablePlan};

use super::{escape_string, is_integer_type, render_create_table, Dialect, DialectKind};

pub struct MysqlDialect;

impl MysqlDialect {
    fn column_def(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        let mut def = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.column_type_sql(table, column)?
        );
        if column.is_primary_key {
            if column.auto_increment && is_integer_type(column.column_type) {
                def.push_str(" AUTO_INCREMENT");
            }
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

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
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

    // MySQL has no IF NOT EXISTS for index creation.
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
            "CREATE {}INDEX {} ON {} ({});",
            unique,
            self.quote_ident(&format!("{}_{}", table, index.name)),
            self.quote_ident(table),
            columns
        )
    }

    fn add_column(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.quote_ident(table),
            self.column_def(table, column)?
        ))
    }

    fn modify_column(&self, table: &str, column: &ColumnPlan) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} MODIFY COLUMN {};",
            self.quote_ident(table),
            self.column_def(table, column)?
        ))
    }

    fn drop_index(&self, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX {} ON {};",
            self.quote_ident(index),
            self.quote_ident(table)
        )
    }

    fn column_type_sql(&self, _table: &str, column: &ColumnPlan) -> Result<String> {
        let sql = match column.column_type {
            ColumnType::String => "VARCHAR(255)".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Integer => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal => "DECIMAL(10, 2)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Enum => {
                let values = column
                    .enum_values
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|v| escape_string(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("ENUM({values})")
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
        format!("JSON_OBJECT({pairs})")
    }

    fn json_array_wrap(&self, object_expr: &str) -> String {
        format!("COALESCE(JSON_ARRAYAGG({object_expr}), JSON_ARRAY())")
    }

    fn create_migrations_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  version BIGINT PRIMARY KEY,\n  description TEXT NOT NULL,\n  applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,\n  checksum TEXT NOT NULL\n);",
            self.quote_ident(crate::constants::SQL_MIGRATIONS_TABLE)
        )
    }
}
