//! Plan differ: given a prior plan (possibly absent) and the current plan,
//! emit the ordered operation list whose sequential application brings the
//! schema to the current shape.
//!
//! Ordering: table drops first, then creates (topologically ordered by
//! foreign-key references, lexicographic tie-break), then per-table
//! alterations, then index and foreign-key additions for new tables. Within
//! an altered table: drop index, drop FK, drop column, modify column, add
//! column, add FK, add index.

pub mod operations;

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tracing::{info, warn};

use crate::dialect::{enum_type_name, Dialect};
use crate::error::Result;
use crate::model::ColumnType;
use crate::plan::{ColumnPlan, MigrationPlan, TablePlan};

pub use operations::MigrationOp;

/// Generic keyed set-diff: both sides folded into maps, the union of keys
/// dispatched to a per-entry diff closure.
pub fn diff_list<T, I: Eq + Ord + Clone, R>(
    old: &[T],
    new: &[T],
    id_of: impl Fn(&T) -> I,
    diff_fn: impl Fn(Option<&T>, Option<&T>) -> Vec<R>,
) -> Vec<R> {
    let mut old_map = BTreeMap::new();
    let mut new_map = BTreeMap::new();
    for o in old {
        old_map.insert(id_of(o), o);
    }
    for n in new {
        new_map.insert(id_of(n), n);
    }

    let all_ids: BTreeSet<_> = old_map.keys().chain(new_map.keys()).cloned().collect();

    all_ids
        .into_iter()
        .flat_map(|id| diff_fn(old_map.get(&id).copied(), new_map.get(&id).copied()))
        .collect()
}

pub fn diff_plans(prior: Option<&MigrationPlan>, current: &MigrationPlan) -> Vec<MigrationOp> {
    info!(
        dialect = %current.dialect,
        tables = current.tables.len(),
        full = prior.is_none(),
        "diffing migration plans"
    );

    let empty: Vec<TablePlan> = Vec::new();
    let prior_tables = prior.map(|p| p.tables.as_slice()).unwrap_or(&empty);

    let mut dropped: Vec<&TablePlan> = Vec::new();
    let mut created: Vec<&TablePlan> = Vec::new();
    let mut altered: Vec<(&TablePlan, &TablePlan)> = Vec::new();

    let prior_by_name: BTreeMap<&str, &TablePlan> =
        prior_tables.iter().map(|t| (t.table.as_str(), t)).collect();
    let current_by_name: BTreeMap<&str, &TablePlan> =
        current.tables.iter().map(|t| (t.table.as_str(), t)).collect();

    for (name, table) in &prior_by_name {
        if !current_by_name.contains_key(name) {
            dropped.push(table);
        }
    }
    for (name, table) in &current_by_name {
        match prior_by_name.get(name) {
            None => created.push(table),
            Some(old) => altered.push((old, table)),
        }
    }

    let mut ops = Vec::new();

    // Drops lead so a recreated table never collides with its old self.
    for table in &dropped {
        ops.push(MigrationOp::DropTable {
            table: table.table.clone(),
        });
        for column in &table.columns {
            if column.column_type == ColumnType::Enum {
                ops.push(MigrationOp::DropEnumType {
                    name: enum_type_name(&table.table, &column.name),
                });
            }
        }
    }

    // Creates in FK-dependency order.
    for table in order_creates(&created) {
        for column in &table.columns {
            if column.column_type == ColumnType::Enum {
                ops.push(MigrationOp::CreateEnumType {
                    name: enum_type_name(&table.table, &column.name),
                    values: column.enum_values.clone().unwrap_or_default(),
                });
            }
        }
        ops.push(MigrationOp::CreateTable(table.clone()));
    }

    // Alterations per common table, lexicographic by table name.
    for (old, new) in &altered {
        ops.extend(diff_table(old, new));
    }

    // Index and FK additions for freshly created tables come last.
    for table in &created {
        for column in &table.columns {
            if let Some(refs) = &column.references {
                ops.push(MigrationOp::AddForeignKey {
                    table: table.table.clone(),
                    column: column.name.clone(),
                    references: refs.clone(),
                });
            }
        }
        for index in &table.indexes {
            ops.push(MigrationOp::AddIndex {
                table: table.table.clone(),
                index: index.clone(),
            });
        }
    }

    ops
}

/// Topologically order new tables so referenced tables are created first.
/// Reference cycles fall back to lexicographic order with a warning.
fn order_creates<'a>(created: &[&'a TablePlan]) -> Vec<&'a TablePlan> {
    let mut sorted: Vec<&TablePlan> = created.to_vec();
    sorted.sort_by(|a, b| a.table.cmp(&b.table));

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut nodes = Vec::with_capacity(sorted.len());
    let mut index_of = BTreeMap::new();
    for (i, table) in sorted.iter().enumerate() {
        nodes.push(graph.add_node(i));
        index_of.insert(table.table.as_str(), i);
    }
    for (i, table) in sorted.iter().enumerate() {
        for column in &table.columns {
            if let Some(refs) = &column.references
                && let Some(&dep) = index_of.get(refs.table.as_str())
                && dep != i
            {
                graph.add_edge(nodes[dep], nodes[i], ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|node| sorted[graph[node]]).collect(),
        Err(_) => {
            warn!("reference cycle among created tables; falling back to lexicographic order");
            sorted
        }
    }
}

fn diff_table(old: &TablePlan, new: &TablePlan) -> Vec<MigrationOp> {
    let table = new.table.clone();

    let mut drop_indexes = Vec::new();
    let mut add_indexes = Vec::new();
    let mut drop_fks = Vec::new();
    let mut add_fks = Vec::new();
    let mut drop_columns = Vec::new();
    let mut modify_columns = Vec::new();
    let mut add_columns = Vec::new();
    let mut enum_creates = Vec::new();
    let mut enum_drops = Vec::new();

    let column_ops = diff_list(
        &old.columns,
        &new.columns,
        |c| c.name.clone(),
        |old_col, new_col| diff_column(&table, old_col, new_col),
    );
    for op in column_ops {
        match op {
            ColumnDelta::Add(column) => {
                if column.column_type == ColumnType::Enum {
                    enum_creates.push(MigrationOp::CreateEnumType {
                        name: enum_type_name(&table, &column.name),
                        values: column.enum_values.clone().unwrap_or_default(),
                    });
                }
                if let Some(refs) = &column.references {
                    add_fks.push(MigrationOp::AddForeignKey {
                        table: table.clone(),
                        column: column.name.clone(),
                        references: refs.clone(),
                    });
                }
                add_columns.push(MigrationOp::AddColumn {
                    table: table.clone(),
                    column,
                });
            }
            ColumnDelta::Drop(column) => {
                if column.references.is_some() {
                    drop_fks.push(MigrationOp::DropForeignKey {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                if column.column_type == ColumnType::Enum {
                    enum_drops.push(MigrationOp::DropEnumType {
                        name: enum_type_name(&table, &column.name),
                    });
                }
                drop_columns.push(MigrationOp::DropColumn {
                    table: table.clone(),
                    column: column.name,
                });
            }
            ColumnDelta::Modify { old, new } => {
                if old.references != new.references {
                    if old.references.is_some() {
                        drop_fks.push(MigrationOp::DropForeignKey {
                            table: table.clone(),
                            column: new.name.clone(),
                        });
                    }
                    if let Some(refs) = &new.references {
                        add_fks.push(MigrationOp::AddForeignKey {
                            table: table.clone(),
                            column: new.name.clone(),
                            references: refs.clone(),
                        });
                    }
                }
                modify_columns.push(MigrationOp::ModifyColumn {
                    table: table.clone(),
                    column: new,
                });
            }
        }
    }

    let index_ops = diff_list(
        &old.indexes,
        &new.indexes,
        |i| i.name.clone(),
        |old_idx, new_idx| match (old_idx, new_idx) {
            (None, Some(idx)) => vec![MigrationOp::AddIndex {
                table: table.clone(),
                index: idx.clone(),
            }],
            (Some(idx), None) => vec![MigrationOp::DropIndex {
                table: table.clone(),
                index: idx.name.clone(),
            }],
            (Some(old_idx), Some(new_idx)) if old_idx != new_idx => vec![
                MigrationOp::DropIndex {
                    table: table.clone(),
                    index: old_idx.name.clone(),
                },
                MigrationOp::AddIndex {
                    table: table.clone(),
                    index: new_idx.clone(),
                },
            ],
            _ => Vec::new(),
        },
    );
    for op in index_ops {
        match &op {
            MigrationOp::DropIndex { .. } => drop_indexes.push(op),
            _ => add_indexes.push(op),
        }
    }

    let mut ops = Vec::new();
    ops.extend(drop_indexes);
    ops.extend(drop_fks);
    ops.extend(drop_columns);
    ops.extend(enum_drops);
    ops.extend(enum_creates);
    ops.extend(modify_columns);
    ops.extend(add_columns);
    ops.extend(add_fks);
    ops.extend(add_indexes);
    ops
}

enum ColumnDelta {
    Add(ColumnPlan),
    Drop(ColumnPlan),
    Modify { old: ColumnPlan, new: ColumnPlan },
}

fn diff_column(
    table: &str,
    old: Option<&ColumnPlan>,
    new: Option<&ColumnPlan>,
) -> Vec<ColumnDelta> {
    match (old, new) {
        (None, Some(column)) => vec![ColumnDelta::Add(column.clone())],
        (Some(column), None) => vec![ColumnDelta::Drop(column.clone())],
        (Some(o), Some(n)) => {
            if o.is_primary_key != n.is_primary_key {
                warn!(
                    table,
                    column = %n.name,
                    "primary-key change detected; tables are not recreated automatically"
                );
            }
            if o.definition_fingerprint() != n.definition_fingerprint() {
                vec![ColumnDelta::Modify {
                    old: o.clone(),
                    new: n.clone(),
                }]
            } else {
                Vec::new()
            }
        }
        (None, None) => Vec::new(),
    }
}

/// Render an ordered operation list into DDL, one statement block per line.
///
/// Dialects that declare foreign keys inline at table creation skip the
/// separate FK additions for tables created in the same batch.
pub fn render_ops(ops: &[MigrationOp], dialect: &dyn Dialect) -> Result<String> {
    let created_tables: BTreeSet<&str> = ops
        .iter()
        .filter(|op| op.is_create_table())
        .map(|op| op.table())
        .collect();

    let mut statements = Vec::with_capacity(ops.len());
    for op in ops {
        let sql = match op {
            MigrationOp::CreateEnumType { name, values } => {
                match dialect.create_enum_type(name, values) {
                    Some(sql) => sql,
                    None => continue,
                }
            }
            MigrationOp::DropEnumType { name } => match dialect.drop_enum_type(name) {
                Some(sql) => sql,
                None => continue,
            },
            MigrationOp::CreateTable(plan) => dialect.create_table(plan)?,
            MigrationOp::DropTable { table } => dialect.drop_table(table),
            MigrationOp::AddColumn { table, column } => dialect.add_column(table, column)?,
            MigrationOp::DropColumn { table, column } => dialect.drop_column(table, column),
            MigrationOp::ModifyColumn { table, column } => dialect.modify_column(table, column)?,
            MigrationOp::AddIndex { table, index } => dialect.create_index(table, index),
            MigrationOp::DropIndex { table, index } => {
                dialect.drop_index(table, &format!("{table}_{index}"))
            }
            MigrationOp::AddForeignKey {
                table,
                column,
                references,
            } => {
                if dialect.inline_foreign_keys() && created_tables.contains(table.as_str()) {
                    continue;
                }
                dialect.add_foreign_key(table, column, &references.table, &references.column)?
            }
            MigrationOp::DropForeignKey { table, column } => {
                if dialect.inline_foreign_keys() {
                    warn!(table, column, "dialect cannot drop foreign keys; skipping");
                    continue;
                }
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                    dialect.quote_ident(table),
                    dialect.quote_ident(&format!("{table}_{column}_fk"))
                )
            }
        };
        statements.push(sql);
    }
    Ok(statements.join("\n"))
}
