//! Model normalization: raw declarations in, canonical records out.
//!
//! Normalization never fails. Unknown related-model names are retained
//! verbatim; resolution errors belong to the consumer that actually walks a
//! relation.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::naming::default_table_name;
use crate::query::ScopeFn;

use super::definition::{
    AttributeDef, CastType, ColumnReference, ColumnType, DynamoAttrType, IndexDef,
    ModelDefinition, RawModel, RelationDecl, ThroughTarget, TraitFlags,
};

/// Columns whose `fillable` flag defaults to false when the author leaves it
/// unset: primary keys and the bookkeeping columns.
const NON_FILLABLE_DEFAULTS: [&str; 3] = ["created_at", "updated_at", "deleted_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    HasOneThrough,
    HasManyThrough,
    MorphOne,
    MorphMany,
    MorphTo,
    MorphToMany,
    MorphedByMany,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::HasOne => "hasOne",
            RelationKind::HasMany => "hasMany",
            RelationKind::BelongsTo => "belongsTo",
            RelationKind::BelongsToMany => "belongsToMany",
            RelationKind::HasOneThrough => "hasOneThrough",
            RelationKind::HasManyThrough => "hasManyThrough",
            RelationKind::MorphOne => "morphOne",
            RelationKind::MorphMany => "morphMany",
            RelationKind::MorphTo => "morphTo",
            RelationKind::MorphToMany => "morphToMany",
            RelationKind::MorphedByMany => "morphedByMany",
        };
        f.write_str(s)
    }
}

/// The resolved end of a relation alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    Model(String),
    Through { through: String, target: String },
}

impl RelationTarget {
    /// The final related model name, skipping over the intermediate for
    /// through-relations.
    pub fn model(&self) -> &str {
        match self {
            RelationTarget::Model(m) => m,
            RelationTarget::Through { target, .. } => target,
        }
    }
}

/// Every relation family of a model, each alias mapped to its target.
#[derive(Debug, Clone, Default)]
pub struct RelationSet {
    pub has_one: BTreeMap<String, String>,
    pub has_many: BTreeMap<String, String>,
    pub belongs_to: BTreeMap<String, String>,
    pub belongs_to_many: BTreeMap<String, String>,
    pub has_one_through: BTreeMap<String, ThroughTarget>,
    pub has_many_through: BTreeMap<String, ThroughTarget>,
    pub morph_one: BTreeMap<String, String>,
    pub morph_many: BTreeMap<String, String>,
    pub morph_to: BTreeMap<String, String>,
    pub morph_to_many: BTreeMap<String, String>,
    pub morphed_by_many: BTreeMap<String, String>,
}

impl RelationSet {
    /// Find an alias across all relation families.
    pub fn lookup(&self, alias: &str) -> Option<(RelationKind, RelationTarget)> {
        let direct = [
            (RelationKind::HasOne, &self.has_one),
            (RelationKind::HasMany, &self.has_many),
            (RelationKind::BelongsTo, &self.belongs_to),
            (RelationKind::BelongsToMany, &self.belongs_to_many),
            (RelationKind::MorphOne, &self.morph_one),
            (RelationKind::MorphMany, &self.morph_many),
            (RelationKind::MorphTo, &self.morph_to),
            (RelationKind::MorphToMany, &self.morph_to_many),
            (RelationKind::MorphedByMany, &self.morphed_by_many),
        ];
        for (kind, map) in direct {
            if let Some(target) = map.get(alias) {
                return Some((kind, RelationTarget::Model(target.clone())));
            }
        }
        let through = [
            (RelationKind::HasOneThrough, &self.has_one_through),
            (RelationKind::HasManyThrough, &self.has_many_through),
        ];
        for (kind, map) in through {
            if let Some(t) = map.get(alias) {
                return Some((
                    kind,
                    RelationTarget::Through {
                        through: t.through.clone(),
                        target: t.target.clone(),
                    },
                ));
            }
        }
        None
    }

    /// Enumerate every (kind, alias, target) triple in a deterministic order.
    pub fn iter_all(&self) -> Vec<(RelationKind, String, RelationTarget)> {
        let mut out = Vec::new();
        let direct = [
            (RelationKind::HasOne, &self.has_one),
            (RelationKind::HasMany, &self.has_many),
            (RelationKind::BelongsTo, &self.belongs_to),
            (RelationKind::BelongsToMany, &self.belongs_to_many),
            (RelationKind::MorphOne, &self.morph_one),
            (RelationKind::MorphMany, &self.morph_many),
            (RelationKind::MorphTo, &self.morph_to),
            (RelationKind::MorphToMany, &self.morph_to_many),
            (RelationKind::MorphedByMany, &self.morphed_by_many),
        ];
        for (kind, map) in direct {
            for (alias, target) in map {
                out.push((kind, alias.clone(), RelationTarget::Model(target.clone())));
            }
        }
        let through = [
            (RelationKind::HasOneThrough, &self.has_one_through),
            (RelationKind::HasManyThrough, &self.has_many_through),
        ];
        for (kind, map) in through {
            for (alias, t) in map {
                out.push((
                    kind,
                    alias.clone(),
                    RelationTarget::Through {
                        through: t.through.clone(),
                        target: t.target.clone(),
                    },
                ));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.iter_all().is_empty()
    }
}

/// A canonicalized attribute with every flag resolved.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub order: i64,
    pub fillable: bool,
    pub required: bool,
    pub nullable: bool,
    pub unique: bool,
    pub hidden: bool,
    pub default: Option<Value>,
    pub cast: Option<CastType>,
    pub validation: Option<Value>,
    pub references: Option<ColumnReference>,
    pub column_type: Option<ColumnType>,
    pub enum_values: Option<Vec<String>>,
    pub dynamo_type: Option<DynamoAttrType>,
}

impl Attribute {
    /// The logical column type fed to the plan compiler: the explicit type if
    /// declared, otherwise enum when enum values exist, otherwise derived
    /// from the cast hint, otherwise string.
    pub fn logical_type(&self) -> ColumnType {
        if let Some(ty) = self.column_type {
            return ty;
        }
        if self.enum_values.is_some() {
            return ColumnType::Enum;
        }
        match self.cast {
            Some(cast) => ColumnType::from_cast(cast),
            None => ColumnType::String,
        }
    }
}

/// The canonical model record. Immutable once produced.
#[derive(Debug, Clone)]
pub struct NormalizedModel {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub auto_increment: bool,
    pub attributes: Vec<Attribute>,
    pub traits: TraitFlags,
    pub relations: RelationSet,
    pub scopes: BTreeMap<String, ScopeFn>,
    pub indexes: Vec<IndexDef>,
}

impl NormalizedModel {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Whether rows of this model carry a soft-delete timestamp column.
    pub fn has_soft_delete_column(&self, column: &str) -> bool {
        self.traits.soft_deletes || self.attribute(column).is_some()
    }
}

/// Normalize one raw declaration. Infallible by design; all resolution
/// errors are deferred to the consumer.
pub fn normalize(raw: RawModel) -> NormalizedModel {
    let def = raw.into_definition();
    let table = def
        .table
        .clone()
        .unwrap_or_else(|| default_table_name(&def.name));
    let primary_key = def.primary_key.clone().unwrap_or_else(|| "id".to_string());
    let auto_increment = def.auto_increment.unwrap_or(true);

    let attributes = normalize_attributes(&def, &primary_key);
    let relations = normalize_relations(&def);

    let mut scopes = BTreeMap::new();
    for (alias, scope) in def.scopes {
        scopes.insert(alias, scope);
    }

    NormalizedModel {
        name: def.name,
        table,
        primary_key,
        auto_increment,
        attributes,
        traits: def.traits,
        relations,
        scopes,
        indexes: def.indexes.unwrap_or_default(),
    }
}

fn normalize_attributes(def: &ModelDefinition, primary_key: &str) -> Vec<Attribute> {
    def.attributes
        .iter()
        .enumerate()
        .map(|(position, attr)| canonicalize_attribute(attr, position, primary_key))
        .collect()
}

fn canonicalize_attribute(attr: &AttributeDef, position: usize, primary_key: &str) -> Attribute {
    let bookkeeping = attr.name == primary_key
        || NON_FILLABLE_DEFAULTS.contains(&attr.name.as_str());
    Attribute {
        name: attr.name.clone(),
        order: attr.order.unwrap_or(position as i64),
        fillable: attr.fillable.unwrap_or(!bookkeeping),
        required: attr.required.unwrap_or(false),
        nullable: attr.nullable.unwrap_or(true),
        unique: attr.unique.unwrap_or(false),
        hidden: attr.hidden.unwrap_or(false),
        default: attr.default.clone(),
        cast: attr.cast,
        validation: attr.validation.clone(),
        references: attr.references.clone(),
        column_type: attr.column_type,
        enum_values: attr.enum_values.clone(),
        dynamo_type: attr.dynamo_type,
    }
}

fn normalize_relations(def: &ModelDefinition) -> RelationSet {
    RelationSet {
        has_one: decl_to_map(&def.has_one),
        has_many: decl_to_map(&def.has_many),
        belongs_to: decl_to_map(&def.belongs_to),
        belongs_to_many: decl_to_map(&def.belongs_to_many),
        has_one_through: def.has_one_through.clone().unwrap_or_default(),
        has_many_through: def.has_many_through.clone().unwrap_or_default(),
        morph_one: decl_to_map(&def.morph_one),
        morph_many: decl_to_map(&def.morph_many),
        morph_to: decl_to_map(&def.morph_to),
        morph_to_many: decl_to_map(&def.morph_to_many),
        morphed_by_many: decl_to_map(&def.morphed_by_many),
    }
}

/// A sequence declaration becomes an identity mapping: each related-model
/// name is its own alias. Named mappings are retained as-is.
fn decl_to_map(decl: &Option<RelationDecl>) -> BTreeMap<String, String> {
    match decl {
        None => BTreeMap::new(),
        Some(RelationDecl::List(names)) => names
            .iter()
            .map(|n| (n.clone(), n.clone()))
            .collect(),
        Some(RelationDecl::Map(map)) => map.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> NormalizedModel {
        normalize(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn infers_table_and_primary_key() {
        let model = parse(r#"{"name": "User"}"#);
        assert_eq!(model.table, "users");
        assert_eq!(model.primary_key, "id");
        assert!(model.auto_increment);
    }

    #[test]
    fn explicit_table_wins_over_inference() {
        let model = parse(r#"{"name": "Person", "table": "people", "primaryKey": "uid"}"#);
        assert_eq!(model.table, "people");
        assert_eq!(model.primary_key, "uid");
    }

    #[test]
    fn sequence_relations_become_identity_mappings() {
        let model = parse(r#"{"name": "User", "hasMany": ["Post", "Comment"]}"#);
        assert_eq!(model.relations.has_many.get("Post").unwrap(), "Post");
        assert_eq!(model.relations.has_many.get("Comment").unwrap(), "Comment");
    }

    #[test]
    fn named_relations_are_retained() {
        let model = parse(r#"{"name": "User", "hasMany": {"articles": "Post"}}"#);
        assert_eq!(model.relations.has_many.get("articles").unwrap(), "Post");
        let (kind, target) = model.relations.lookup("articles").unwrap();
        assert_eq!(kind, RelationKind::HasMany);
        assert_eq!(target.model(), "Post");
    }

    #[test]
    fn through_relations_preserve_structure() {
        let model = parse(
            r#"{"name": "Country", "hasManyThrough": {"posts": {"through": "User", "target": "Post"}}}"#,
        );
        let (kind, target) = model.relations.lookup("posts").unwrap();
        assert_eq!(kind, RelationKind::HasManyThrough);
        match target {
            RelationTarget::Through { through, target } => {
                assert_eq!(through, "User");
                assert_eq!(target, "Post");
            }
            RelationTarget::Model(_) => panic!("expected through target"),
        }
    }

    #[test]
    fn unknown_targets_are_kept_verbatim() {
        let model = parse(r#"{"name": "User", "belongsTo": ["Ghost"]}"#);
        assert_eq!(model.relations.belongs_to.get("Ghost").unwrap(), "Ghost");
    }

    #[test]
    fn morph_relations_normalize_into_their_families() {
        let model = parse(
            r#"{"name": "User",
                "morphOne": {"avatar": "Image"},
                "morphMany": ["Image"],
                "morphTo": {"imageable": "Image"},
                "morphToMany": {"tags": "Tag"},
                "morphedByMany": {"posts": "Post"}}"#,
        );

        let expected = [
            ("avatar", RelationKind::MorphOne, "Image"),
            ("Image", RelationKind::MorphMany, "Image"),
            ("imageable", RelationKind::MorphTo, "Image"),
            ("tags", RelationKind::MorphToMany, "Tag"),
            ("posts", RelationKind::MorphedByMany, "Post"),
        ];
        for (alias, kind, related) in expected {
            let (found_kind, target) = model.relations.lookup(alias).unwrap();
            assert_eq!(found_kind, kind);
            assert_eq!(target.model(), related);
        }
    }

    #[test]
    fn attribute_flag_defaults() {
        let model = parse(
            r#"{"name": "User", "attributes": [
                {"name": "id"},
                {"name": "email", "unique": true},
                {"name": "created_at"}
            ]}"#,
        );
        let id = model.attribute("id").unwrap();
        assert!(!id.fillable);
        let email = model.attribute("email").unwrap();
        assert!(email.fillable);
        assert!(email.unique);
        assert!(email.nullable);
        assert!(!email.required);
        let created = model.attribute("created_at").unwrap();
        assert!(!created.fillable);
    }

    #[test]
    fn attribute_order_defaults_to_position() {
        let model = parse(
            r#"{"name": "User", "attributes": [
                {"name": "b"},
                {"name": "a", "order": 10}
            ]}"#,
        );
        assert_eq!(model.attribute("b").unwrap().order, 0);
        assert_eq!(model.attribute("a").unwrap().order, 10);
    }

    #[test]
    fn logical_type_precedence() {
        let model = parse(
            r#"{"name": "User", "attributes": [
                {"name": "age", "cast": "int"},
                {"name": "status", "enumValues": ["on", "off"]},
                {"name": "bio", "type": "text", "cast": "json"},
                {"name": "plain"}
            ]}"#,
        );
        assert_eq!(model.attribute("age").unwrap().logical_type(), ColumnType::Integer);
        assert_eq!(model.attribute("status").unwrap().logical_type(), ColumnType::Enum);
        assert_eq!(model.attribute("bio").unwrap().logical_type(), ColumnType::Text);
        assert_eq!(model.attribute("plain").unwrap().logical_type(), ColumnType::String);
    }
}
