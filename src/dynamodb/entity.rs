//! Single-table entity registry: key patterns, item assembly, parsed model
//! derivation and access-pattern enumeration.
//!
//! Key patterns accept both placeholder grammars, `{field}` and `${field}`,
//! normalized to the brace form at registration. Partial interpolation
//! leaves unmatched placeholders in place so access-pattern listings can
//! render template fragments; strict primary-key construction raises on the
//! first missing field.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::DynamoConfig;
use crate::constants::MAX_GSI_COUNT;
use crate::error::{Error, Result};
use crate::meta::SchemaMeta;
use crate::model::{DynamoAttrType, NormalizedModel, RelationKind, RelationTarget};
use crate::naming::{default_table_name, foreign_key_for, pascal_case, pivot_table_name};

/// Normalize `${field}` placeholders to the `{field}` form.
fn normalize_pattern(pattern: &str) -> String {
    pattern.replace("${", "{")
}

/// Placeholder field names appearing in a pattern, in order.
pub fn pattern_fields(pattern: &str) -> Vec<String> {
    let pattern = normalize_pattern(pattern);
    let mut fields = Vec::new();
    let mut rest = pattern.as_str();
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        fields.push(rest[start + 1..start + end].to_string());
        rest = &rest[start + end + 1..];
    }
    fields
}

/// Substitute each placeholder with the stringified field value; missing
/// fields leave the placeholder literal in place.
pub fn resolve_key_pattern(pattern: &str, data: &Map<String, Value>) -> String {
    let pattern = normalize_pattern(pattern);
    let mut out = pattern.clone();
    for field in pattern_fields(&pattern) {
        if let Some(value) = data.get(&field) {
            let rendered = stringify(value);
            out = out.replace(&format!("{{{field}}}"), &rendered);
        }
    }
    out
}

/// Like `resolve_key_pattern` but raising on the first missing field.
fn resolve_key_pattern_strict(pattern: &str, data: &Map<String, Value>) -> Result<String> {
    let pattern = normalize_pattern(pattern);
    for field in pattern_fields(&pattern) {
        if !data.contains_key(&field) {
            return Err(Error::DynamoDbKeyResolution { field });
        }
    }
    Ok(resolve_key_pattern(&pattern, data))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A resolved primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub pk: String,
    pub sk: String,
}

#[derive(Debug, Clone)]
pub struct EntityIndexPattern {
    pub index_name: String,
    pub pk_pattern: String,
    pub sk_pattern: String,
}

/// One registered entity type.
#[derive(Debug, Clone)]
pub struct EntityPattern {
    pub name: String,
    pub pk_pattern: String,
    pub sk_pattern: String,
    /// Fields the primary key patterns draw from.
    pub key_fields: Vec<String>,
    pub indexes: Vec<EntityIndexPattern>,
    pub has_timestamps: bool,
    pub has_versioning: bool,
}

impl EntityPattern {
    pub fn new(
        name: impl Into<String>,
        pk_pattern: impl Into<String>,
        sk_pattern: impl Into<String>,
    ) -> Self {
        let pk_pattern = normalize_pattern(&pk_pattern.into());
        let sk_pattern = normalize_pattern(&sk_pattern.into());
        let mut key_fields = pattern_fields(&pk_pattern);
        for field in pattern_fields(&sk_pattern) {
            if !key_fields.contains(&field) {
                key_fields.push(field);
            }
        }
        Self {
            name: name.into(),
            pk_pattern,
            sk_pattern,
            key_fields,
            indexes: Vec::new(),
            has_timestamps: false,
            has_versioning: false,
        }
    }

    pub fn with_index(
        mut self,
        index_name: impl Into<String>,
        pk_pattern: impl Into<String>,
        sk_pattern: impl Into<String>,
    ) -> Self {
        self.indexes.push(EntityIndexPattern {
            index_name: index_name.into(),
            pk_pattern: normalize_pattern(&pk_pattern.into()),
            sk_pattern: normalize_pattern(&sk_pattern.into()),
        });
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.has_timestamps = true;
        self
    }

    pub fn with_versioning(mut self) -> Self {
        self.has_versioning = true;
        self
    }
}

/// Entity patterns keyed by name. Registration happens during
/// initialization; afterwards the registry is read-only and shared.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    config: DynamoConfig,
    entities: BTreeMap<String, EntityPattern>,
}

impl EntityRegistry {
    pub fn new(config: DynamoConfig) -> Self {
        Self {
            config,
            entities: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, pattern: EntityPattern) {
        self.entities.insert(pattern.name.clone(), pattern);
    }

    pub fn get(&self, name: &str) -> Option<&EntityPattern> {
        self.entities.get(name)
    }

    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    pub fn config(&self) -> &DynamoConfig {
        &self.config
    }

    fn require(&self, name: &str) -> Result<&EntityPattern> {
        self.entities.get(name).ok_or_else(|| {
            Error::Configuration(format!("entity `{name}` is not registered"))
        })
    }

    /// Resolve both key patterns strictly against the given data.
    pub fn build_primary_key(&self, name: &str, data: &Map<String, Value>) -> Result<PrimaryKey> {
        let entity = self.require(name)?;
        Ok(PrimaryKey {
            pk: resolve_key_pattern_strict(&entity.pk_pattern, data)?,
            sk: resolve_key_pattern_strict(&entity.sk_pattern, data)?,
        })
    }

    /// Assemble a full item: keys, entity-type discriminator, payload, and
    /// trait-driven bookkeeping attributes.
    pub fn create_item(&self, name: &str, data: &Map<String, Value>) -> Result<Map<String, Value>> {
        let entity = self.require(name)?;
        let key = self.build_primary_key(name, data)?;

        let mut item = Map::new();
        item.insert(self.config.pk_attribute.clone(), Value::String(key.pk));
        item.insert(self.config.sk_attribute.clone(), Value::String(key.sk));
        item.insert(
            self.config.entity_type_attribute.clone(),
            Value::String(entity.name.clone()),
        );
        for (k, v) in data {
            item.insert(k.clone(), v.clone());
        }

        if entity.has_timestamps {
            let now = Utc::now().to_rfc3339();
            item.entry("createdAt".to_string())
                .or_insert_with(|| Value::String(now.clone()));
            item.insert("updatedAt".to_string(), Value::String(now));
        }
        if entity.has_versioning {
            item.entry("_v".to_string()).or_insert(Value::from(1));
        }

        Ok(item)
    }
}

// -- Parsed models ---------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DynamoAttribute {
    pub name: String,
    pub attr_type: Option<DynamoAttrType>,
}

#[derive(Debug, Clone)]
pub struct DynamoRelationship {
    pub kind: RelationKind,
    pub alias: String,
    pub related_model: String,
    pub foreign_key: String,
    pub local_key: String,
    pub pivot_entity: Option<String>,
    pub requires_gsi: bool,
    pub gsi_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GsiKeyPattern {
    pub index: usize,
    pub pk: String,
    pub sk: String,
}

#[derive(Debug, Clone)]
pub struct KeyPatterns {
    pub pk: String,
    pub sk: String,
    pub gsi: Vec<GsiKeyPattern>,
}

#[derive(Debug, Clone)]
pub struct AccessPattern {
    pub name: String,
    /// `None` targets the main index.
    pub index: Option<String>,
    pub key_condition: String,
    pub description: String,
}

/// A model compiled for single-table storage.
#[derive(Debug, Clone)]
pub struct ParsedDynamoModel {
    pub name: String,
    pub entity_type: String,
    pub primary_key: String,
    pub attributes: Vec<DynamoAttribute>,
    pub relationships: Vec<DynamoRelationship>,
    pub key_patterns: KeyPatterns,
    pub access_patterns: Vec<AccessPattern>,
    pub has_timestamps: bool,
    pub has_soft_deletes: bool,
    pub has_versioning: bool,
    pub has_ttl: bool,
}

/// Compile one normalized model into its single-table form.
///
/// Reverse-lookup relations request a GSI; at most five are assigned.
/// Overflow relationships keep `requires_gsi` with no index and are
/// surfaced in a warning.
pub fn parse_model(model: &NormalizedModel, config: &DynamoConfig) -> ParsedDynamoModel {
    let entity_type = model.name.to_uppercase();
    let delimiter = &config.key_delimiter;

    let attributes = model
        .attributes
        .iter()
        .map(|a| DynamoAttribute {
            name: a.name.clone(),
            attr_type: a.dynamo_type,
        })
        .collect();

    let mut relationships: Vec<DynamoRelationship> = model
        .relations
        .iter_all()
        .into_iter()
        .map(|(kind, alias, target)| {
            let related_model = target.model().to_string();
            let related_table = default_table_name(&related_model);
            let (foreign_key, requires_gsi) = match kind {
                RelationKind::HasOne | RelationKind::HasMany => {
                    (foreign_key_for(&model.table), false)
                }
                RelationKind::BelongsTo => (foreign_key_for(&related_table), true),
                RelationKind::BelongsToMany => (foreign_key_for(&related_table), true),
                _ => (foreign_key_for(&model.table), false),
            };
            let pivot_entity = match (&kind, &target) {
                (RelationKind::BelongsToMany, RelationTarget::Model(related)) => {
                    Some(pivot_table_name(&model.name, related))
                }
                _ => None,
            };
            DynamoRelationship {
                kind,
                alias,
                related_model,
                foreign_key,
                local_key: model.primary_key.clone(),
                pivot_entity,
                requires_gsi,
                gsi_index: None,
            }
        })
        .collect();

    // GSI assignment: a counter incremented over the requires_gsi subset,
    // capped at five. Overflow keeps requires_gsi without an index.
    let mut assigned = 0usize;
    let mut overflow: Vec<String> = Vec::new();
    for relationship in relationships.iter_mut().filter(|r| r.requires_gsi) {
        if assigned < MAX_GSI_COUNT {
            assigned += 1;
            relationship.gsi_index = Some(assigned);
        } else {
            overflow.push(relationship.alias.clone());
        }
    }
    if !overflow.is_empty() {
        warn!(
            model = %model.name,
            relationships = ?overflow,
            "more than {MAX_GSI_COUNT} relationships require a GSI; overflow left unindexed"
        );
    }

    let pk_pattern = format!("{entity_type}{delimiter}{{{}}}", model.primary_key);
    let gsi_patterns: Vec<GsiKeyPattern> = relationships
        .iter()
        .filter_map(|r| {
            r.gsi_index.map(|index| GsiKeyPattern {
                index,
                pk: format!(
                    "{}{delimiter}{{{}}}",
                    r.related_model.to_uppercase(),
                    r.foreign_key
                ),
                sk: pk_pattern.clone(),
            })
        })
        .collect();

    let access_patterns = derive_access_patterns(model, &entity_type, delimiter, &relationships);

    ParsedDynamoModel {
        name: model.name.clone(),
        entity_type: entity_type.clone(),
        primary_key: model.primary_key.clone(),
        attributes,
        relationships,
        key_patterns: KeyPatterns {
            pk: pk_pattern.clone(),
            sk: pk_pattern,
            gsi: gsi_patterns,
        },
        access_patterns,
        has_timestamps: model.traits.timestamps,
        has_soft_deletes: model.traits.soft_deletes,
        has_versioning: model.traits.versioning,
        has_ttl: model.traits.ttl,
    }
}

/// Every model always exposes get-by-id and list-all; relations add their
/// own patterns. Unresolved relation targets are listed as declared, no
/// resolution happens here.
fn derive_access_patterns(
    model: &NormalizedModel,
    entity_type: &str,
    delimiter: &str,
    relationships: &[DynamoRelationship],
) -> Vec<AccessPattern> {
    let pk = &model.primary_key;
    let mut patterns = vec![
        AccessPattern {
            name: format!("get{}ById", model.name),
            index: None,
            key_condition: format!(
                "pk = {entity_type}{delimiter}{{{pk}}} AND sk = {entity_type}{delimiter}{{{pk}}}"
            ),
            description: format!("Fetch a single {} by primary key", model.name),
        },
        AccessPattern {
            name: format!("listAll{}s", model.name),
            index: None,
            key_condition: format!("entityType = {entity_type}"),
            description: format!("Enumerate every {} item by entity type", model.name),
        },
    ];

    for relationship in relationships {
        match relationship.kind {
            RelationKind::HasMany => {
                let related_upper = relationship.related_model.to_uppercase();
                patterns.push(AccessPattern {
                    name: format!("list{}For{}", pascal_case(&relationship.alias), model.name),
                    index: None,
                    key_condition: format!(
                        "pk = {entity_type}{delimiter}{{{pk}}} AND begins_with(sk, {related_upper}{delimiter})"
                    ),
                    description: format!(
                        "List {} items under one {}",
                        relationship.related_model, model.name
                    ),
                });
            }
            _ => {
                if let Some(index) = relationship.gsi_index {
                    let related_upper = relationship.related_model.to_uppercase();
                    patterns.push(AccessPattern {
                        name: format!("get{}By{}", model.name, pascal_case(&relationship.alias)),
                        index: Some(format!("GSI{index}")),
                        key_condition: format!(
                            "gsi{index}pk = {related_upper}{delimiter}{{{}}}",
                            relationship.foreign_key
                        ),
                        description: format!(
                            "Reverse lookup of {} by {}",
                            model.name, relationship.related_model
                        ),
                    });
                }
            }
        }
    }

    patterns
}

/// Build a registry covering every model in the graph.
pub fn registry_from_meta(meta: &SchemaMeta, config: &DynamoConfig) -> EntityRegistry {
    let mut registry = EntityRegistry::new(config.clone());
    for model in meta.models() {
        let parsed = parse_model(model, config);
        let mut pattern = EntityPattern::new(
            parsed.name.clone(),
            parsed.key_patterns.pk.clone(),
            parsed.key_patterns.sk.clone(),
        );
        for gsi in &parsed.key_patterns.gsi {
            pattern = pattern.with_index(
                format!("GSI{}", gsi.index),
                gsi.pk.clone(),
                gsi.sk.clone(),
            );
        }
        if parsed.has_timestamps {
            pattern = pattern.with_timestamps();
        }
        if parsed.has_versioning {
            pattern = pattern.with_versioning();
        }
        registry.register(pattern);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalize;
    use serde_json::json;

    fn data(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn both_placeholder_grammars_are_accepted() {
        let d = data(&[("id", json!("123"))]);
        assert_eq!(resolve_key_pattern("USER#{id}", &d), "USER#123");
        assert_eq!(resolve_key_pattern("USER#${id}", &d), "USER#123");
    }

    #[test]
    fn partial_interpolation_leaves_missing_fields_literal() {
        let d = data(&[("id", json!("123"))]);
        assert_eq!(
            resolve_key_pattern("USER#{id}#POST#{post_id}", &d),
            "USER#123#POST#{post_id}"
        );
    }

    #[test]
    fn numeric_values_stringify_without_quotes() {
        let d = data(&[("id", json!(42))]);
        assert_eq!(resolve_key_pattern("USER#{id}", &d), "USER#42");
    }

    #[test]
    fn build_primary_key_resolves_or_raises() {
        let mut registry = EntityRegistry::new(DynamoConfig::default());
        registry.register(EntityPattern::new("User", "USER#{id}", "USER#{id}"));

        let key = registry
            .build_primary_key("User", &data(&[("id", json!("123"))]))
            .unwrap();
        assert_eq!(key.pk, "USER#123");
        assert_eq!(key.sk, "USER#123");

        let err = registry.build_primary_key("User", &Map::new()).unwrap_err();
        assert_eq!(err.to_string(), "Missing value for pattern key: id");
    }

    #[test]
    fn create_item_assembles_keys_type_and_traits() {
        let mut registry = EntityRegistry::new(DynamoConfig::default());
        registry.register(
            EntityPattern::new("User", "USER#{id}", "USER#{id}")
                .with_timestamps()
                .with_versioning(),
        );

        let item = registry
            .create_item("User", &data(&[("id", json!("7")), ("email", json!("a@b.c"))]))
            .unwrap();
        assert_eq!(item["pk"], json!("USER#7"));
        assert_eq!(item["sk"], json!("USER#7"));
        assert_eq!(item["_et"], json!("User"));
        assert_eq!(item["email"], json!("a@b.c"));
        assert!(item.contains_key("createdAt"));
        assert!(item.contains_key("updatedAt"));
        assert_eq!(item["_v"], json!(1));

        // Existing bookkeeping values are preserved.
        let item = registry
            .create_item(
                "User",
                &data(&[
                    ("id", json!("7")),
                    ("createdAt", json!("2020-01-01T00:00:00Z")),
                    ("_v", json!(3)),
                ]),
            )
            .unwrap();
        assert_eq!(item["createdAt"], json!("2020-01-01T00:00:00Z"));
        assert_eq!(item["_v"], json!(3));
    }

    #[test]
    fn parse_model_derives_keys_and_relationships() {
        let model = normalize(
            serde_json::from_str(
                r#"{"name": "Post", "hasMany": {"comments": "Comment"}, "belongsTo": {"author": "User"}}"#,
            )
            .unwrap(),
        );
        let parsed = parse_model(&model, &DynamoConfig::default());

        assert_eq!(parsed.entity_type, "POST");
        assert_eq!(parsed.key_patterns.pk, "POST#{id}");
        assert_eq!(parsed.key_patterns.sk, "POST#{id}");

        let author = parsed
            .relationships
            .iter()
            .find(|r| r.alias == "author")
            .unwrap();
        assert!(author.requires_gsi);
        assert_eq!(author.gsi_index, Some(1));
        assert_eq!(author.foreign_key, "user_id");

        let comments = parsed
            .relationships
            .iter()
            .find(|r| r.alias == "comments")
            .unwrap();
        assert!(!comments.requires_gsi);

        assert_eq!(parsed.key_patterns.gsi.len(), 1);
        assert_eq!(parsed.key_patterns.gsi[0].pk, "USER#{user_id}");
    }

    #[test]
    fn gsi_assignment_caps_at_five() {
        let model = normalize(
            serde_json::from_str(
                r#"{"name": "Hub", "belongsTo": ["A", "B", "C", "D", "E", "F", "G"]}"#,
            )
            .unwrap(),
        );
        let parsed = parse_model(&model, &DynamoConfig::default());

        let indexed: Vec<_> = parsed
            .relationships
            .iter()
            .filter(|r| r.gsi_index.is_some())
            .collect();
        assert_eq!(indexed.len(), 5);
        assert_eq!(parsed.key_patterns.gsi.len(), 5);

        let overflow: Vec<_> = parsed
            .relationships
            .iter()
            .filter(|r| r.requires_gsi && r.gsi_index.is_none())
            .collect();
        assert_eq!(overflow.len(), 2);
    }

    #[test]
    fn access_patterns_always_include_the_basics() {
        let model = normalize(
            serde_json::from_str(r#"{"name": "User", "hasMany": {"posts": "Post"}}"#).unwrap(),
        );
        let parsed = parse_model(&model, &DynamoConfig::default());

        let names: Vec<&str> = parsed
            .access_patterns
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert!(names.contains(&"getUserById"));
        assert!(names.contains(&"listAllUsers"));
        assert!(names.contains(&"listPostsForUser"));

        let list = parsed
            .access_patterns
            .iter()
            .find(|p| p.name == "listPostsForUser")
            .unwrap();
        assert!(list.key_condition.contains("begins_with(sk, POST#)"));
    }

    #[test]
    fn reverse_lookup_pattern_names_are_pascal_cased() {
        let model = normalize(
            serde_json::from_str(r#"{"name": "Post", "belongsTo": {"author": "User"}}"#).unwrap(),
        );
        let parsed = parse_model(&model, &DynamoConfig::default());
        assert!(
            parsed
                .access_patterns
                .iter()
                .any(|p| p.name == "getPostByAuthor" && p.index.as_deref() == Some("GSI1"))
        );
    }

    #[test]
    fn unresolved_targets_stay_silent_in_access_patterns() {
        let model = normalize(
            serde_json::from_str(r#"{"name": "User", "hasMany": {"ghosts": "Ghost"}}"#).unwrap(),
        );
        // No registry of models involved; derivation is purely declarative.
        let parsed = parse_model(&model, &DynamoConfig::default());
        assert!(
            parsed
                .access_patterns
                .iter()
                .any(|p| p.key_condition.contains("GHOST#"))
        );
    }
}
