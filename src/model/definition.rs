//! Raw, author-facing model declarations.
//!
//! These shapes accept the loose input grammar: relations declared either as
//! an ordered sequence of related-model names or as a named alias mapping,
//! optional traits, and attribute descriptors with mostly-optional flags.
//! `normalize` turns them into the canonical records the rest of the crate
//! consumes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::ScopeFn;

/// A model declaration as it arrives from a model source. Declarations may be
/// wrapped in a definition holder; the normalizer unwraps exactly once.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawModel {
    Wrapped { definition: ModelDefinition },
    Bare(ModelDefinition),
}

impl RawModel {
    pub fn into_definition(self) -> ModelDefinition {
        match self {
            RawModel::Wrapped { definition } => definition,
            RawModel::Bare(definition) => definition,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelDefinition {
    pub name: String,
    pub table: Option<String>,
    pub primary_key: Option<String>,
    pub auto_increment: Option<bool>,
    pub attributes: Vec<AttributeDef>,
    pub traits: TraitFlags,

    pub has_one: Option<RelationDecl>,
    pub has_many: Option<RelationDecl>,
    pub belongs_to: Option<RelationDecl>,
    pub belongs_to_many: Option<RelationDecl>,
    pub has_one_through: Option<BTreeMap<String, ThroughTarget>>,
    pub has_many_through: Option<BTreeMap<String, ThroughTarget>>,
    pub morph_one: Option<RelationDecl>,
    pub morph_many: Option<RelationDecl>,
    pub morph_to: Option<RelationDecl>,
    pub morph_to_many: Option<RelationDecl>,
    pub morphed_by_many: Option<RelationDecl>,

    pub indexes: Option<Vec<IndexDef>>,

    /// Closures cannot travel through serde; scopes are registered on the
    /// loaded definition programmatically.
    #[serde(skip)]
    pub scopes: Vec<(String, ScopeFn)>,
}

impl ModelDefinition {
    pub fn with_scope(mut self, alias: impl Into<String>, scope: ScopeFn) -> Self {
        self.scopes.push((alias.into(), scope));
        self
    }
}

/// A relation field: either an ordered sequence of related-model names
/// (implicit alias = model name) or an explicit alias -> model mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelationDecl {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughTarget {
    pub through: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeDef {
    pub name: String,
    /// Sort hint; ties fall back to declared position.
    pub order: Option<i64>,
    pub fillable: Option<bool>,
    pub required: Option<bool>,
    pub nullable: Option<bool>,
    pub unique: Option<bool>,
    pub hidden: Option<bool>,
    pub default: Option<Value>,
    pub cast: Option<CastType>,
    /// Opaque validation payload, passed through untouched.
    pub validation: Option<Value>,
    pub references: Option<ColumnReference>,
    /// Explicit logical column type; otherwise derived from `cast`.
    #[serde(rename = "type")]
    pub column_type: Option<ColumnType>,
    pub enum_values: Option<Vec<String>>,
    /// DynamoDB attribute-type hint.
    pub dynamo_type: Option<DynamoAttrType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraitFlags {
    #[serde(alias = "useTimestamps")]
    pub timestamps: bool,
    #[serde(alias = "useSoftDeletes")]
    pub soft_deletes: bool,
    #[serde(alias = "useUuid")]
    pub uuid: bool,
    #[serde(alias = "useVersioning")]
    pub versioning: bool,
    #[serde(alias = "useSearch")]
    pub search: bool,
    #[serde(alias = "useSeeder")]
    pub seeder: bool,
    #[serde(alias = "useApi")]
    pub api: bool,
    #[serde(alias = "useTtl")]
    pub ttl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Logical cast hint on an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    Integer,
    Int,
    Float,
    Double,
    Decimal,
    Boolean,
    Array,
    List,
    Object,
    Json,
    Map,
}

/// Logical column types fed to the dialect drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Text,
    Boolean,
    Integer,
    #[serde(rename = "bigint")]
    BigInt,
    Float,
    Double,
    Decimal,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Json,
    Enum,
}

impl ColumnType {
    pub fn from_cast(cast: CastType) -> Self {
        match cast {
            CastType::Integer | CastType::Int => ColumnType::Integer,
            CastType::Float => ColumnType::Float,
            CastType::Double => ColumnType::Double,
            CastType::Decimal => ColumnType::Decimal,
            CastType::Boolean => ColumnType::Boolean,
            CastType::Array
            | CastType::List
            | CastType::Object
            | CastType::Json
            | CastType::Map => ColumnType::Json,
        }
    }
}

/// DynamoDB attribute type hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamoAttrType {
    S,
    N,
    B,
    BOOL,
    NULL,
    M,
    L,
    SS,
    NS,
    BS,
}

impl DynamoAttrType {
    /// Wire-protocol discriminator for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DynamoAttrType::S => "S",
            DynamoAttrType::N => "N",
            DynamoAttrType::B => "B",
            DynamoAttrType::BOOL => "BOOL",
            DynamoAttrType::NULL => "NULL",
            DynamoAttrType::M => "M",
            DynamoAttrType::L => "L",
            DynamoAttrType::SS => "SS",
            DynamoAttrType::NS => "NS",
            DynamoAttrType::BS => "BS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_decl_accepts_both_grammars() {
        let list: RelationDecl = serde_json::from_str(r#"["Post", "Comment"]"#).unwrap();
        assert!(matches!(list, RelationDecl::List(ref v) if v.len() == 2));

        let map: RelationDecl = serde_json::from_str(r#"{"articles": "Post"}"#).unwrap();
        match map {
            RelationDecl::Map(m) => assert_eq!(m.get("articles").unwrap(), "Post"),
            RelationDecl::List(_) => panic!("expected map grammar"),
        }
    }

    #[test]
    fn wrapped_definitions_unwrap_once() {
        let raw: RawModel =
            serde_json::from_str(r#"{"definition": {"name": "User"}}"#).unwrap();
        assert_eq!(raw.into_definition().name, "User");

        let raw: RawModel = serde_json::from_str(r#"{"name": "User"}"#).unwrap();
        assert_eq!(raw.into_definition().name, "User");
    }

    #[test]
    fn trait_flags_accept_use_prefixed_aliases() {
        let flags: TraitFlags =
            serde_json::from_str(r#"{"useTimestamps": true, "softDeletes": true}"#).unwrap();
        assert!(flags.timestamps);
        assert!(flags.soft_deletes);
        assert!(!flags.uuid);
    }

    #[test]
    fn column_type_derivation_from_cast() {
        assert_eq!(ColumnType::from_cast(CastType::Int), ColumnType::Integer);
        assert_eq!(ColumnType::from_cast(CastType::Map), ColumnType::Json);
        assert_eq!(ColumnType::from_cast(CastType::Boolean), ColumnType::Boolean);
    }
}
