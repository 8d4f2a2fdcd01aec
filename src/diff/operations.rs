//! The migration operation vocabulary emitted by the plan differ.

use crate::model::ColumnReference;
use crate::plan::{ColumnPlan, IndexPlan, TablePlan};

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOp {
    CreateEnumType {
        name: String,
        values: Vec<String>,
    },
    DropEnumType {
        name: String,
    },
    CreateTable(TablePlan),
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnPlan,
    },
    DropColumn {
        table: String,
        column: String,
    },
    ModifyColumn {
        table: String,
        column: ColumnPlan,
    },
    AddIndex {
        table: String,
        index: IndexPlan,
    },
    DropIndex {
        table: String,
        /// Plan-local index name; drivers compose `{table}_{name}`.
        index: String,
    },
    AddForeignKey {
        table: String,
        column: String,
        references: ColumnReference,
    },
    DropForeignKey {
        table: String,
        column: String,
    },
}

impl MigrationOp {
    pub fn table(&self) -> &str {
        match self {
            MigrationOp::CreateTable(plan) => &plan.table,
            MigrationOp::DropTable { table }
            | MigrationOp::AddColumn { table, .. }
            | MigrationOp::DropColumn { table, .. }
            | MigrationOp::ModifyColumn { table, .. }
            | MigrationOp::AddIndex { table, .. }
            | MigrationOp::DropIndex { table, .. }
            | MigrationOp::AddForeignKey { table, .. }
            | MigrationOp::DropForeignKey { table, .. } => table,
            MigrationOp::CreateEnumType { name, .. } | MigrationOp::DropEnumType { name } => name,
        }
    }

    pub fn is_create_table(&self) -> bool {
        matches!(self, MigrationOp::CreateTable(_))
    }

    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            MigrationOp::DropTable { .. }
                | MigrationOp::DropColumn { .. }
                | MigrationOp::DropEnumType { .. }
        )
    }

    /// Short human-readable description used in logs.
    pub fn describe(&self) -> String {
        match self {
            MigrationOp::CreateEnumType { name, .. } => format!("create enum type {name}"),
            MigrationOp::DropEnumType { name } => format!("drop enum type {name}"),
            MigrationOp::CreateTable(plan) => format!("create table {}", plan.table),
            MigrationOp::DropTable { table } => format!("drop table {table}"),
            MigrationOp::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            MigrationOp::DropColumn { table, column } => format!("drop column {table}.{column}"),
            MigrationOp::ModifyColumn { table, column } => {
                format!("modify column {}.{}", table, column.name)
            }
            MigrationOp::AddIndex { table, index } => {
                format!("add index {}_{}", table, index.name)
            }
            MigrationOp::DropIndex { table, index } => format!("drop index {table}_{index}"),
            MigrationOp::AddForeignKey { table, column, .. } => {
                format!("add foreign key {table}.{column}")
            }
            MigrationOp::DropForeignKey { table, column } => {
                format!("drop foreign key {table}.{column}")
            }
        }
    }
}
