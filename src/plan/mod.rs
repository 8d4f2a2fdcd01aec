//! Dialect-agnostic table plans compiled from the model metadata graph.
//!
//! A `MigrationPlan` is the unit the differ and snapshot store work with:
//! one `TablePlan` per model, columns in a deterministic derivation order,
//! indexes as the union of author-declared indexes and unique-attribute
//! indexes.

pub mod hash;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::CURRENT_TIMESTAMP_TOKEN;
use crate::dialect::DialectKind;
use crate::meta::SchemaMeta;
use crate::model::{Attribute, ColumnReference, ColumnType, NormalizedModel};

pub use hash::plan_hash;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnPlan {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    pub has_default: bool,
    pub default_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnReference>,
    pub unique: bool,
    pub auto_increment: bool,
}

impl Default for ColumnPlan {
    fn default() -> Self {
        Self {
            name: String::new(),
            column_type: ColumnType::String,
            is_primary_key: false,
            is_nullable: true,
            has_default: false,
            default_value: None,
            enum_values: None,
            references: None,
            unique: false,
            auto_increment: false,
        }
    }
}

impl ColumnPlan {
    /// The comparison key used by the differ: everything that affects the
    /// rendered column definition, primary-key status aside.
    pub fn definition_fingerprint(&self) -> (ColumnType, bool, bool, Option<&Value>, bool, Option<&ColumnReference>) {
        (
            self.column_type,
            self.is_nullable,
            self.has_default,
            self.default_value.as_ref(),
            self.unique,
            self.references.as_ref(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Index,
    Unique,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPlan {
    /// Plan-local name; the dialect driver composes `{table}_{name}` when
    /// rendering.
    pub name: String,
    pub columns: Vec<String>,
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePlan {
    pub table: String,
    pub columns: Vec<ColumnPlan>,
    pub indexes: Vec<IndexPlan>,
}

impl TablePlan {
    pub fn column(&self, name: &str) -> Option<&ColumnPlan> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub dialect: DialectKind,
    pub tables: Vec<TablePlan>,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub hash: String,
}

impl MigrationPlan {
    pub fn table(&self, name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Compile the current metadata graph into a migration plan for one dialect.
pub fn compile(meta: &SchemaMeta, dialect: DialectKind) -> MigrationPlan {
    let tables: Vec<TablePlan> = meta
        .models()
        .map(compile_table)
        .sorted_by(|a, b| a.table.cmp(&b.table))
        .collect();

    let mut plan = MigrationPlan {
        dialect,
        tables,
        generated_at: Utc::now(),
        hash: String::new(),
    };
    plan.hash = plan_hash(&plan);
    plan
}

/// Compile a single model into its table plan. Also used by the query
/// builder to enumerate a table's columns for eager-load projections.
pub fn compile_table(model: &NormalizedModel) -> TablePlan {
    let mut columns = Vec::new();

    // Primary key leads; the dialect driver supplies the auto-increment
    // clause.
    let pk_type = model
        .attribute(&model.primary_key)
        .map(|a| a.logical_type())
        .filter(|t| *t == ColumnType::BigInt)
        .unwrap_or(ColumnType::Integer);
    columns.push(ColumnPlan {
        name: model.primary_key.clone(),
        column_type: pk_type,
        is_primary_key: true,
        is_nullable: false,
        auto_increment: model.auto_increment,
        ..ColumnPlan::default()
    });

    // User attributes in `order` ascending, stable on ties.
    let mut attrs: Vec<&Attribute> = model
        .attributes
        .iter()
        .filter(|a| a.name != model.primary_key && !is_trait_column(model, &a.name))
        .collect();
    attrs.sort_by_key(|a| a.order);
    for attr in attrs {
        columns.push(compile_column(attr));
    }

    // Trait-derived columns in a fixed tail order.
    if model.traits.timestamps {
        columns.push(timestamp_column("created_at"));
        columns.push(timestamp_column("updated_at"));
    }
    if model.traits.soft_deletes {
        columns.push(ColumnPlan {
            name: "deleted_at".to_string(),
            column_type: ColumnType::DateTime,
            is_nullable: true,
            ..ColumnPlan::default()
        });
    }
    if model.traits.uuid {
        columns.push(ColumnPlan {
            name: "uuid".to_string(),
            column_type: ColumnType::String,
            is_nullable: false,
            unique: true,
            ..ColumnPlan::default()
        });
    }
    if model.traits.versioning {
        columns.push(ColumnPlan {
            name: "_v".to_string(),
            column_type: ColumnType::Integer,
            is_nullable: false,
            has_default: true,
            default_value: Some(Value::from(1)),
            ..ColumnPlan::default()
        });
    }

    let mut indexes: Vec<IndexPlan> = model
        .indexes
        .iter()
        .map(|idx| IndexPlan {
            name: idx.name.clone(),
            columns: idx.columns.clone(),
            index_type: if idx.unique {
                IndexType::Unique
            } else {
                IndexType::Index
            },
        })
        .collect();
    for column in &columns {
        if column.unique && !column.is_primary_key {
            indexes.push(IndexPlan {
                name: format!("{}_unique", column.name),
                columns: vec![column.name.clone()],
                index_type: IndexType::Unique,
            });
        }
    }

    TablePlan {
        table: model.table.clone(),
        columns,
        indexes,
    }
}

/// Trait columns the tail pass owns; an author attribute with the same name
/// would double up, so declared duplicates defer to the trait.
fn is_trait_column(model: &NormalizedModel, name: &str) -> bool {
    (model.traits.timestamps && (name == "created_at" || name == "updated_at"))
        || (model.traits.soft_deletes && name == "deleted_at")
        || (model.traits.uuid && name == "uuid")
        || (model.traits.versioning && name == "_v")
}

fn compile_column(attr: &Attribute) -> ColumnPlan {
    ColumnPlan {
        name: attr.name.clone(),
        column_type: attr.logical_type(),
        is_primary_key: false,
        is_nullable: attr.nullable && !attr.required,
        has_default: attr.default.is_some(),
        default_value: attr.default.clone(),
        enum_values: attr.enum_values.clone(),
        references: attr.references.clone(),
        unique: attr.unique,
        auto_increment: false,
    }
}

fn timestamp_column(name: &str) -> ColumnPlan {
    ColumnPlan {
        name: name.to_string(),
        column_type: ColumnType::DateTime,
        is_nullable: false,
        has_default: true,
        default_value: Some(Value::String(CURRENT_TIMESTAMP_TOKEN.to_string())),
        ..ColumnPlan::default()
    }
}
