//! Relation resolution for the query builder: eager-load chain validation
//! (cycles, depth, unknown aliases) and the join predicates backing
//! existence subqueries, aggregate subqueries and eager loads.

use std::collections::BTreeSet;
use std::fmt;

use crate::dialect::{escape_string, Dialect};
use crate::error::{Error, Result};
use crate::meta::{ResolvedRelation, SchemaMeta};
use crate::model::RelationKind;
use crate::naming::{foreign_key_for, pivot_table_name, singularize};

use super::clause::WithSpec;
use super::SubBuilderFn;

/// One validated eager load: the dotted path split into segments, with an
/// optional constraint applied to the leaf relation's sub-query.
#[derive(Clone)]
pub struct EagerLoad {
    pub path: Vec<String>,
    pub constraint: Option<SubBuilderFn>,
}

impl EagerLoad {
    pub fn path_key(&self) -> String {
        self.path.join(".")
    }
}

impl fmt::Debug for EagerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EagerLoad({}{})",
            self.path_key(),
            if self.constraint.is_some() {
                ", constrained"
            } else {
                ""
            }
        )
    }
}

/// Walk a dotted chain left-to-right against the metadata graph, enforcing
/// the depth cap and rejecting repeated (table, alias) pairs.
pub fn validate_chain(
    meta: &SchemaMeta,
    base_table: &str,
    chain: &str,
    max_depth: usize,
) -> Result<Vec<String>> {
    let segments: Vec<String> = chain
        .split('.')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if segments.len() > max_depth {
        return Err(Error::DepthLimit {
            chain: chain.to_string(),
            max_depth,
        });
    }

    let mut visited: BTreeSet<(String, String)> = BTreeSet::new();
    let mut table = base_table.to_string();
    for alias in &segments {
        if !visited.insert((table.clone(), alias.clone())) {
            return Err(Error::CircularRelationship {
                chain: chain.to_string(),
                table,
                alias: alias.clone(),
            });
        }
        let rel = meta.resolve_relation(&table, alias)?;
        table = rel.related_table;
    }

    Ok(segments)
}

/// Expand one `with(...)` input into validated eager loads. Whitespace is
/// trimmed, empty entries are dropped, duplicates within the call collapse.
pub fn expand_with_spec(
    meta: &SchemaMeta,
    base_table: &str,
    spec: WithSpec,
    max_depth: usize,
) -> Result<Vec<EagerLoad>> {
    let mut out: Vec<EagerLoad> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    let mut push = |path: Vec<String>, constraint: Option<SubBuilderFn>| {
        let key = path.join(".");
        if seen.insert(key) {
            out.push(EagerLoad { path, constraint });
        }
    };

    match spec {
        WithSpec::None => {}
        WithSpec::One(chain) => {
            let chain = chain.trim();
            if !chain.is_empty() {
                push(validate_chain(meta, base_table, chain, max_depth)?, None);
            }
        }
        WithSpec::Many(chains) => {
            for chain in chains {
                let chain = chain.trim();
                if chain.is_empty() {
                    continue;
                }
                push(validate_chain(meta, base_table, chain, max_depth)?, None);
            }
        }
        WithSpec::Constrained(alias, constraint) => {
            let alias = alias.trim();
            if !alias.is_empty() {
                push(
                    validate_chain(meta, base_table, alias, max_depth)?,
                    Some(constraint),
                );
            }
        }
    }

    Ok(out)
}

/// Total relation loads a set of eager specs will trigger: every distinct
/// path prefix is one load.
pub fn count_loads(eager: &[EagerLoad]) -> usize {
    let mut prefixes: BTreeSet<String> = BTreeSet::new();
    for load in eager {
        for depth in 1..=load.path.len() {
            prefixes.insert(load.path[..depth].join("."));
        }
    }
    prefixes.len()
}

/// The SQL skeleton of a relation traversal: what goes in the subquery's
/// FROM clause and how the subquery correlates back to the parent row.
#[derive(Debug, Clone)]
pub struct RelationJoin {
    pub from_sql: String,
    pub correlation_sql: String,
    pub related_table: String,
    /// Pivot table for many-to-many traversals, for pivot-column selection.
    pub pivot_table: Option<String>,
}

/// Derive the join skeleton for a resolved relation.
pub fn relation_join(
    meta: &SchemaMeta,
    rel: &ResolvedRelation,
    dialect: &dyn Dialect,
) -> Result<RelationJoin> {
    let q = |ident: &str| dialect.quote_ident(ident);
    let col = |table: &str, column: &str| format!("{}.{}", q(table), q(column));

    let parent = &rel.parent_table;
    let related = &rel.related_table;
    let parent_pk = meta.primary_key(parent);
    let related_pk = meta.primary_key(related);

    let join = match rel.kind {
        RelationKind::HasOne | RelationKind::HasMany => {
            let fk = foreign_key_for(parent);
            RelationJoin {
                from_sql: q(related),
                correlation_sql: format!(
                    "{} = {}",
                    col(related, &fk),
                    col(parent, parent_pk)
                ),
                related_table: related.clone(),
                pivot_table: None,
            }
        }
        RelationKind::BelongsTo => {
            let fk = foreign_key_for(related);
            RelationJoin {
                from_sql: q(related),
                correlation_sql: format!(
                    "{} = {}",
                    col(parent, &fk),
                    col(related, related_pk)
                ),
                related_table: related.clone(),
                pivot_table: None,
            }
        }
        RelationKind::BelongsToMany => {
            let pivot = pivot_table_name(&rel.parent_model, &rel.related_model);
            let parent_fk = foreign_key_for(parent);
            let related_fk = foreign_key_for(related);
            RelationJoin {
                from_sql: format!(
                    "{} INNER JOIN {} ON {} = {}",
                    q(&pivot),
                    q(related),
                    col(&pivot, &related_fk),
                    col(related, related_pk)
                ),
                correlation_sql: format!(
                    "{} = {}",
                    col(&pivot, &parent_fk),
                    col(parent, parent_pk)
                ),
                related_table: related.clone(),
                pivot_table: Some(pivot),
            }
        }
        RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
            let (_, through_table) = rel
                .through
                .clone()
                .expect("through-relations always resolve an intermediate");
            let related_fk = foreign_key_for(&through_table);
            let through_fk = foreign_key_for(parent);
            let through_pk = meta.primary_key(&through_table);
            RelationJoin {
                from_sql: format!(
                    "{} INNER JOIN {} ON {} = {}",
                    q(related),
                    q(&through_table),
                    col(related, &related_fk),
                    col(&through_table, through_pk)
                ),
                correlation_sql: format!(
                    "{} = {}",
                    col(&through_table, &through_fk),
                    col(parent, parent_pk)
                ),
                related_table: related.clone(),
                pivot_table: None,
            }
        }
        RelationKind::MorphOne | RelationKind::MorphMany => {
            let base = format!("{}able", singularize(related));
            RelationJoin {
                from_sql: q(related),
                correlation_sql: format!(
                    "{} = {} AND {} = {}",
                    col(related, &format!("{base}_id")),
                    col(parent, parent_pk),
                    col(related, &format!("{base}_type")),
                    escape_string(&rel.parent_model)
                ),
                related_table: related.clone(),
                pivot_table: None,
            }
        }
        RelationKind::MorphTo => {
            let alias = &rel.alias;
            RelationJoin {
                from_sql: q(related),
                correlation_sql: format!(
                    "{} = {} AND {} = {}",
                    col(parent, &format!("{alias}_id")),
                    col(related, related_pk),
                    col(parent, &format!("{alias}_type")),
                    escape_string(&rel.related_model)
                ),
                related_table: related.clone(),
                pivot_table: None,
            }
        }
        RelationKind::MorphToMany => {
            let base = singularize(related);
            let pivot = format!("{base}ables");
            RelationJoin {
                from_sql: format!(
                    "{} INNER JOIN {} ON {} = {}",
                    q(&pivot),
                    q(related),
                    col(&pivot, &format!("{base}_id")),
                    col(related, related_pk)
                ),
                correlation_sql: format!(
                    "{} = {} AND {} = {}",
                    col(&pivot, &format!("{base}able_id")),
                    col(parent, parent_pk),
                    col(&pivot, &format!("{base}able_type")),
                    escape_string(&rel.parent_model)
                ),
                related_table: related.clone(),
                pivot_table: Some(pivot),
            }
        }
        RelationKind::MorphedByMany => {
            let base = singularize(parent);
            let pivot = format!("{base}ables");
            RelationJoin {
                from_sql: format!(
                    "{} INNER JOIN {} ON {} = {} AND {} = {}",
                    q(&pivot),
                    q(related),
                    col(&pivot, &format!("{base}able_id")),
                    col(related, related_pk),
                    col(&pivot, &format!("{base}able_type")),
                    escape_string(&rel.related_model)
                ),
                correlation_sql: format!(
                    "{} = {}",
                    col(&pivot, &format!("{base}_id")),
                    col(parent, parent_pk)
                ),
                related_table: related.clone(),
                pivot_table: Some(pivot),
            }
        }
    };

    Ok(join)
}
