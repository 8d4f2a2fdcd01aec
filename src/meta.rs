//! The schema metadata graph: every normalized model folded into a set of
//! lookup maps shared by the query builder, the plan compiler and the
//! DynamoDB registry.
//!
//! The graph is logically immutable after construction; concurrent readers
//! need no locking. It is rebuilt from scratch whenever the model set
//! changes. Relation targets are not validated here; consumers raise on use.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{NormalizedModel, RelationKind, RelationSet, RelationTarget};
use crate::query::ScopeFn;

#[derive(Debug, Clone, Default)]
pub struct SchemaMeta {
    models: BTreeMap<String, NormalizedModel>,
    model_to_table: BTreeMap<String, String>,
    table_to_model: BTreeMap<String, String>,
    primary_keys: BTreeMap<String, String>,
    relations: BTreeMap<String, RelationSet>,
    scopes: BTreeMap<String, BTreeMap<String, ScopeFn>>,
}

/// A relation alias resolved against the graph, with both ends mapped to
/// concrete tables.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub kind: RelationKind,
    pub alias: String,
    pub parent_table: String,
    pub parent_model: String,
    pub related_model: String,
    pub related_table: String,
    /// Intermediate (model, table) for through-relations.
    pub through: Option<(String, String)>,
}

impl SchemaMeta {
    /// Fold a set of normalized models into the graph. Deterministic and
    /// independent of input order.
    pub fn build(models: Vec<NormalizedModel>) -> Arc<Self> {
        let mut meta = SchemaMeta::default();
        for model in models {
            meta.model_to_table
                .insert(model.name.clone(), model.table.clone());
            meta.table_to_model
                .insert(model.table.clone(), model.name.clone());
            meta.primary_keys
                .insert(model.table.clone(), model.primary_key.clone());
            meta.relations
                .insert(model.table.clone(), model.relations.clone());
            if !model.scopes.is_empty() {
                meta.scopes
                    .insert(model.table.clone(), model.scopes.clone());
            }
            meta.models.insert(model.name.clone(), model);
        }
        Arc::new(meta)
    }

    pub fn models(&self) -> impl Iterator<Item = &NormalizedModel> {
        self.models.values()
    }

    pub fn model(&self, name: &str) -> Option<&NormalizedModel> {
        self.models.get(name)
    }

    pub fn model_by_table(&self, table: &str) -> Option<&NormalizedModel> {
        self.table_to_model
            .get(table)
            .and_then(|name| self.models.get(name))
    }

    pub fn table_for_model(&self, model: &str) -> Option<&str> {
        self.model_to_table.get(model).map(String::as_str)
    }

    pub fn model_for_table(&self, table: &str) -> Option<&str> {
        self.table_to_model.get(table).map(String::as_str)
    }

    /// Primary key column for a table; falls back to `id` for tables the
    /// graph has never seen (unresolved relation endpoints).
    pub fn primary_key(&self, table: &str) -> &str {
        self.primary_keys
            .get(table)
            .map(String::as_str)
            .unwrap_or("id")
    }

    pub fn scope(&self, table: &str, alias: &str) -> Option<&ScopeFn> {
        self.scopes.get(table).and_then(|m| m.get(alias))
    }

    // Introspection surface.

    pub fn get_relationships(&self, table: &str) -> Option<&RelationSet> {
        self.relations.get(table)
    }

    pub fn has_relationship(&self, table: &str, alias: &str) -> bool {
        self.relations
            .get(table)
            .is_some_and(|set| set.lookup(alias).is_some())
    }

    pub fn get_relationship_type(&self, table: &str, alias: &str) -> Option<RelationKind> {
        self.relations
            .get(table)
            .and_then(|set| set.lookup(alias))
            .map(|(kind, _)| kind)
    }

    /// Table of the relation's target model, when the target resolves.
    pub fn get_relationship_target(&self, table: &str, alias: &str) -> Option<&str> {
        let (_, target) = self.relations.get(table)?.lookup(alias)?;
        self.table_for_model(target.model())
            .or_else(|| match &target {
                // A target naming a table directly (no registered model)
                // resolves to itself when some model maps to it.
                RelationTarget::Model(name) if self.table_to_model.contains_key(name.as_str()) => {
                    self.table_to_model.get_key_value(name.as_str()).map(|(k, _)| k.as_str())
                }
                _ => None,
            })
    }

    /// Resolve an alias into a relation with concrete tables on both ends.
    /// `RelationNotFound` when the alias is absent, `ModelResolution` when
    /// the target model was never registered.
    pub fn resolve_relation(&self, table: &str, alias: &str) -> Result<ResolvedRelation> {
        let set = self
            .relations
            .get(table)
            .ok_or_else(|| Error::RelationNotFound {
                table: table.to_string(),
                alias: alias.to_string(),
            })?;
        let (kind, target) = set.lookup(alias).ok_or_else(|| Error::RelationNotFound {
            table: table.to_string(),
            alias: alias.to_string(),
        })?;

        let parent_model = self
            .model_for_table(table)
            .unwrap_or(table)
            .to_string();

        let related_model = target.model().to_string();
        let related_table = self
            .table_for_model(&related_model)
            .ok_or_else(|| Error::ModelResolution {
                table: table.to_string(),
                alias: alias.to_string(),
                target: related_model.clone(),
            })?
            .to_string();

        let through = match &target {
            RelationTarget::Through { through, .. } => {
                let through_table = self
                    .table_for_model(through)
                    .ok_or_else(|| Error::ModelResolution {
                        table: table.to_string(),
                        alias: alias.to_string(),
                        target: through.clone(),
                    })?
                    .to_string();
                Some((through.clone(), through_table))
            }
            RelationTarget::Model(_) => None,
        };

        Ok(ResolvedRelation {
            kind,
            alias: alias.to_string(),
            parent_table: table.to_string(),
            parent_model,
            related_model,
            related_table,
            through,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalize;

    fn meta_for(defs: &[&str]) -> Arc<SchemaMeta> {
        let models = defs
            .iter()
            .map(|json| normalize(serde_json::from_str(json).unwrap()))
            .collect();
        SchemaMeta::build(models)
    }

    fn sample() -> Arc<SchemaMeta> {
        meta_for(&[
            r#"{"name": "User", "hasMany": ["Post"]}"#,
            r#"{"name": "Post", "belongsTo": ["User"], "belongsToMany": {"tags": "Tag"}}"#,
            r#"{"name": "Tag"}"#,
        ])
    }

    #[test]
    fn maps_are_mutual_inverses() {
        let meta = sample();
        for model in meta.models() {
            let table = meta.table_for_model(&model.name).unwrap();
            assert_eq!(meta.model_for_table(table).unwrap(), model.name);
        }
    }

    #[test]
    fn build_is_order_independent() {
        let a = meta_for(&[r#"{"name": "User"}"#, r#"{"name": "Post"}"#]);
        let b = meta_for(&[r#"{"name": "Post"}"#, r#"{"name": "User"}"#]);
        assert_eq!(
            a.models().map(|m| m.name.clone()).collect::<Vec<_>>(),
            b.models().map(|m| m.name.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn introspection_surface() {
        let meta = sample();
        assert!(meta.has_relationship("users", "Post"));
        assert!(!meta.has_relationship("users", "comments"));
        assert_eq!(
            meta.get_relationship_type("posts", "tags"),
            Some(RelationKind::BelongsToMany)
        );
        assert_eq!(meta.get_relationship_target("posts", "tags"), Some("tags"));
        assert_eq!(meta.get_relationship_type("posts", "nope"), None);
    }

    #[test]
    fn resolve_relation_distinguishes_missing_alias_from_missing_model() {
        let meta = meta_for(&[r#"{"name": "Post", "belongsTo": ["Ghost"]}"#]);

        let err = meta.resolve_relation("posts", "nope").unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = meta.resolve_relation("posts", "Ghost").unwrap_err();
        assert!(err.to_string().contains("Ghost"));
        assert!(matches!(err, Error::ModelResolution { .. }));
    }

    #[test]
    fn resolves_relation_endpoints_to_tables() {
        let meta = sample();
        let rel = meta.resolve_relation("users", "Post").unwrap();
        assert_eq!(rel.kind, RelationKind::HasMany);
        assert_eq!(rel.related_table, "posts");
        assert_eq!(rel.parent_table, "users");
        assert!(rel.through.is_none());
    }
}
