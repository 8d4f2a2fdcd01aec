//! Fluent query construction and SQL rendering.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::meta::SchemaMeta;
use crate::model::RelationKind;
use crate::naming::snake_case;
use crate::plan::compile_table;

use super::clause::{
    CmpOp, Conjunction, HavingClause, OrderClause, SortDirection, SqlQuery, TrashMode, WhereClause,
    WhereExpr, WithSpec,
};
use super::executor::SqlClient;
use super::relations::{
    count_loads, expand_with_spec, relation_join, EagerLoad,
};
use super::SubBuilderFn;

/// Accumulates parameters during rendering and hands out dialect-correct
/// placeholders.
pub(crate) struct ParamBinder {
    dialect: &'static dyn Dialect,
    pub(crate) params: Vec<Value>,
}

impl ParamBinder {
    pub(crate) fn new(dialect: &'static dyn Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }
}

#[derive(Clone)]
pub struct QueryBuilder {
    pub(crate) meta: Arc<SchemaMeta>,
    pub(crate) config: Arc<Config>,
    pub(crate) client: Option<Arc<dyn SqlClient>>,
    pub(crate) table: String,
    pub(crate) projection: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) wheres: Vec<WhereClause>,
    pub(crate) orders: Vec<OrderClause>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<HavingClause>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) eager: Vec<EagerLoad>,
    pub(crate) count_relations: Vec<String>,
    pub(crate) pivot_columns: BTreeMap<String, Vec<String>>,
    pub(crate) trash_mode: TrashMode,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.table)
            .field("wheres", &self.wheres.len())
            .field("eager", &self.eager)
            .finish()
    }
}

impl QueryBuilder {
    pub(crate) fn new(
        meta: Arc<SchemaMeta>,
        config: Arc<Config>,
        client: Option<Arc<dyn SqlClient>>,
        table: String,
    ) -> Self {
        Self {
            meta,
            config,
            client,
            table,
            projection: Vec::new(),
            distinct: false,
            wheres: Vec::new(),
            orders: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            limit: None,
            offset: None,
            eager: Vec::new(),
            count_relations: Vec::new(),
            pivot_columns: BTreeMap::new(),
            trash_mode: TrashMode::Default,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn dialect(&self) -> &'static dyn Dialect {
        self.config.dialect.driver()
    }

    // -- Projection --------------------------------------------------------

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // -- Predicates --------------------------------------------------------

    fn push_where(mut self, conjunction: Conjunction, expr: WhereExpr) -> Self {
        self.wheres.push(WhereClause { conjunction, expr });
        self
    }

    /// Two-argument `where`: the operator defaults to `=`.
    pub fn where_(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_cmp(column, CmpOp::Eq, value)
    }

    /// Three-argument `where` with a textual operator.
    pub fn where_op(
        self,
        column: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let op = CmpOp::parse(op)
            .ok_or_else(|| Error::Configuration(format!("unknown operator `{op}`")))?;
        Ok(self.where_cmp(column, op, value))
    }

    pub fn where_cmp(
        self,
        column: impl Into<String>,
        op: CmpOp,
        value: impl Into<Value>,
    ) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::Compare {
                column: column.into(),
                op,
                value: value.into(),
            },
        )
    }

    pub fn or_where(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_where(
            Conjunction::Or,
            WhereExpr::Compare {
                column: column.into(),
                op: CmpOp::Eq,
                value: value.into(),
            },
        )
    }

    pub fn or_where_op(
        self,
        column: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let op = CmpOp::parse(op)
            .ok_or_else(|| Error::Configuration(format!("unknown operator `{op}`")))?;
        Ok(self.push_where(
            Conjunction::Or,
            WhereExpr::Compare {
                column: column.into(),
                op,
                value: value.into(),
            },
        ))
    }

    pub fn where_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::In {
                column: column.into(),
                values,
                negated: false,
            },
        )
    }

    pub fn where_not_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::In {
                column: column.into(),
                values,
                negated: true,
            },
        )
    }

    pub fn where_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::Compare {
                column: column.into(),
                op: CmpOp::Like,
                value: Value::String(pattern.into()),
            },
        )
    }

    pub fn where_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::Between {
                column: column.into(),
                low: low.into(),
                high: high.into(),
            },
        )
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::Null {
                column: column.into(),
                negated: false,
            },
        )
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.push_where(
            Conjunction::And,
            WhereExpr::Null {
                column: column.into(),
                negated: true,
            },
        )
    }

    /// Dynamic column predicate: accepts the column name in either
    /// snake_case or PascalCase/camelCase (`whereUserId` style). Unknown
    /// names fall back to the snake_case spelling verbatim.
    pub fn where_column(self, name: &str, value: impl Into<Value>) -> Self {
        let column = self.resolve_column_name(name);
        self.where_(column, value)
    }

    fn resolve_column_name(&self, name: &str) -> String {
        if let Some(model) = self.meta.model_by_table(&self.table) {
            if model.attribute(name).is_some() || model.primary_key == name {
                return name.to_string();
            }
            let snake = snake_case(name);
            if model.attribute(&snake).is_some() || model.primary_key == snake {
                return snake;
            }
        }
        snake_case(name)
    }

    // -- Ordering, grouping, pagination ------------------------------------

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.orders.push(OrderClause {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn order_by_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Asc)
    }

    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    pub fn latest(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    pub fn oldest(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Asc)
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn take(self, n: u64) -> Self {
        self.limit(n)
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn skip(self, n: u64) -> Self {
        self.offset(n)
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn having(
        mut self,
        expression: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let op = CmpOp::parse(op)
            .ok_or_else(|| Error::Configuration(format!("unknown operator `{op}`")))?;
        self.havings.push(HavingClause {
            expression: expression.into(),
            op,
            value: value.into(),
        });
        Ok(self)
    }

    // -- Soft deletes ------------------------------------------------------

    pub fn with_trashed(mut self) -> Self {
        self.trash_mode = TrashMode::WithTrashed;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trash_mode = TrashMode::OnlyTrashed;
        self
    }

    /// Whether the soft-delete discipline applies to this query's table.
    pub(crate) fn soft_deletes_active(&self) -> bool {
        let sd = &self.config.soft_deletes;
        sd.enabled
            && self
                .meta
                .model_by_table(&self.table)
                .is_some_and(|m| m.has_soft_delete_column(&sd.column))
    }

    // -- Scopes ------------------------------------------------------------

    pub fn scope(self, alias: &str) -> Result<Self> {
        self.scope_with(alias, None)
    }

    pub fn scope_with(self, alias: &str, value: Option<Value>) -> Result<Self> {
        let scope = self.meta.scope(&self.table, alias).cloned();
        match scope {
            Some(scope) => Ok(scope.apply(self, value)),
            None => Err(Error::ScopeNotFound {
                table: self.table.clone(),
                alias: alias.to_string(),
            }),
        }
    }

    // -- Eager loading and relation subqueries ------------------------------

    /// Register eager loads. Accepts dotted chains, sequences, constrained
    /// aliases and nothing at all; repeated registrations are idempotent.
    pub fn with(mut self, spec: impl Into<WithSpec>) -> Result<Self> {
        let loads = expand_with_spec(
            &self.meta,
            &self.table,
            spec.into(),
            self.config.max_depth,
        )?;
        for load in loads {
            if !self.eager.iter().any(|e| e.path_key() == load.path_key()) {
                self.eager.push(load);
            }
        }
        Ok(self)
    }

    /// Eager-load one alias with a constraint on its sub-query.
    pub fn with_constrained(self, alias: &str, constraint: SubBuilderFn) -> Result<Self> {
        self.with(WithSpec::Constrained(alias.to_string(), constraint))
    }

    pub fn where_has(self, alias: &str, constraint: Option<SubBuilderFn>) -> Result<Self> {
        self.push_exists(alias, false, constraint)
    }

    pub fn where_doesnt_have(self, alias: &str, constraint: Option<SubBuilderFn>) -> Result<Self> {
        self.push_exists(alias, true, constraint)
    }

    pub fn has(self, alias: &str) -> Result<Self> {
        self.where_has(alias, None)
    }

    pub fn doesnt_have(self, alias: &str) -> Result<Self> {
        self.where_doesnt_have(alias, None)
    }

    fn push_exists(
        self,
        alias: &str,
        negated: bool,
        constraint: Option<SubBuilderFn>,
    ) -> Result<Self> {
        // Resolution errors surface at compose time.
        self.meta.resolve_relation(&self.table, alias)?;
        Ok(self.push_where(
            Conjunction::And,
            WhereExpr::Exists {
                alias: alias.to_string(),
                negated,
                constraint,
            },
        ))
    }

    /// Add `(SELECT COUNT(*) ...) AS {alias}_count` projections.
    pub fn with_count<I, S>(mut self, relations: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in relations {
            let alias = alias.into();
            self.meta.resolve_relation(&self.table, &alias)?;
            if !self.count_relations.contains(&alias) {
                self.count_relations.push(alias);
            }
        }
        Ok(self)
    }

    /// Select pivot columns for a many-to-many relation's eager load.
    pub fn with_pivot<I, S>(mut self, relation: &str, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rel = self.meta.resolve_relation(&self.table, relation)?;
        if rel.kind != RelationKind::BelongsToMany {
            return Err(Error::RelationTypeMismatch {
                table: self.table.clone(),
                alias: relation.to_string(),
            });
        }
        let entry = self.pivot_columns.entry(relation.to_string()).or_default();
        for column in columns {
            let column = column.into();
            if !entry.contains(&column) {
                entry.push(column);
            }
        }
        // The pivot columns ride on the relation's eager load.
        if !self.eager.iter().any(|e| e.path_key() == relation) {
            self = self.with(relation)?;
        }
        Ok(self)
    }

    // -- Rendering ---------------------------------------------------------

    fn format_column(&self, table: &str, column: &str) -> String {
        if column == "*" {
            return format!("{}.*", self.dialect().quote_ident(table));
        }
        if column.contains('(') || column.contains(' ') || column.contains('"') || column.contains('`') {
            return column.to_string();
        }
        if let Some((t, c)) = column.split_once('.') {
            return format!(
                "{}.{}",
                self.dialect().quote_ident(t),
                self.dialect().quote_ident(c)
            );
        }
        format!(
            "{}.{}",
            self.dialect().quote_ident(table),
            self.dialect().quote_ident(column)
        )
    }

    /// The soft-delete predicate for this query's table, when one applies.
    fn soft_delete_predicate(&self) -> Option<String> {
        if !self.soft_deletes_active() {
            return None;
        }
        let column = self.format_column(&self.table, &self.config.soft_deletes.column);
        match self.trash_mode {
            TrashMode::Default => self
                .config
                .soft_deletes
                .default_filter
                .then(|| format!("{column} IS NULL")),
            TrashMode::WithTrashed => None,
            TrashMode::OnlyTrashed => Some(format!("{column} IS NOT NULL")),
        }
    }

    pub(crate) fn render_where_body(&self, binder: &mut ParamBinder) -> Result<Option<String>> {
        let mut sql = String::new();
        for (i, clause) in self.wheres.iter().enumerate() {
            let rendered = self.render_where_expr(&clause.expr, binder)?;
            if i == 0 {
                sql.push_str(&rendered);
            } else {
                let joiner = match clause.conjunction {
                    Conjunction::And => " AND ",
                    Conjunction::Or => " OR ",
                };
                sql.push_str(joiner);
                sql.push_str(&rendered);
            }
        }
        if let Some(predicate) = self.soft_delete_predicate() {
            if sql.is_empty() {
                sql = predicate;
            } else {
                sql = format!("{sql} AND {predicate}");
            }
        }
        Ok(if sql.is_empty() { None } else { Some(sql) })
    }

    fn render_where_expr(&self, expr: &WhereExpr, binder: &mut ParamBinder) -> Result<String> {
        let sql = match expr {
            WhereExpr::Compare { column, op, value } => {
                let placeholder = binder.push(value.clone());
                format!(
                    "{} {} {}",
                    self.format_column(&self.table, column),
                    op.as_sql(),
                    placeholder
                )
            }
            WhereExpr::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // An empty IN list can never match; NOT IN always does.
                    if *negated {
                        "1 = 1".to_string()
                    } else {
                        "1 = 0".to_string()
                    }
                } else {
                    let placeholders: Vec<String> =
                        values.iter().map(|v| binder.push(v.clone())).collect();
                    format!(
                        "{} {}IN ({})",
                        self.format_column(&self.table, column),
                        if *negated { "NOT " } else { "" },
                        placeholders.join(", ")
                    )
                }
            }
            WhereExpr::Between { column, low, high } => {
                let low = binder.push(low.clone());
                let high = binder.push(high.clone());
                format!(
                    "{} BETWEEN {} AND {}",
                    self.format_column(&self.table, column),
                    low,
                    high
                )
            }
            WhereExpr::Null { column, negated } => format!(
                "{} IS {}NULL",
                self.format_column(&self.table, column),
                if *negated { "NOT " } else { "" }
            ),
            WhereExpr::Exists {
                alias,
                negated,
                constraint,
            } => {
                let rel = self.meta.resolve_relation(&self.table, alias)?;
                let join = relation_join(&self.meta, &rel, self.dialect())?;

                let mut body = join.correlation_sql.clone();
                let mut sub = QueryBuilder::new(
                    Arc::clone(&self.meta),
                    Arc::clone(&self.config),
                    None,
                    rel.related_table.clone(),
                );
                if let Some(constraint) = constraint {
                    sub = constraint(sub);
                }
                if let Some(extra) = sub.render_where_body(binder)? {
                    body = format!("{body} AND {extra}");
                }

                format!(
                    "{}EXISTS (SELECT 1 FROM {} WHERE {})",
                    if *negated { "NOT " } else { "" },
                    join.from_sql,
                    body
                )
            }
        };
        Ok(sql)
    }

    fn render_count_subquery(&self, alias: &str) -> Result<String> {
        let rel = self.meta.resolve_relation(&self.table, alias)?;
        let join = relation_join(&self.meta, &rel, self.dialect())?;
        Ok(format!(
            "(SELECT COUNT(*) FROM {} WHERE {}) AS {}",
            join.from_sql,
            join.correlation_sql,
            self.dialect().quote_ident(&format!("{alias}_count"))
        ))
    }

    /// Columns a related table projects in an eager-load subquery.
    fn related_columns(&self, table: &str) -> Vec<String> {
        match self.meta.model_by_table(table) {
            Some(model) => compile_table(model)
                .columns
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn render_eager_subquery(
        &self,
        parent_table: &str,
        node: &EagerNode,
        depth: usize,
        binder: &mut ParamBinder,
    ) -> Result<String> {
        let dialect = self.dialect();
        let rel = self.meta.resolve_relation(parent_table, &node.alias)?;
        let join = relation_join(&self.meta, &rel, dialect)?;
        let related = &join.related_table;

        // Inner projection: the related table's columns, nested eager
        // subqueries, and any requested pivot columns.
        let mut select_parts: Vec<String> = Vec::new();
        let mut object_columns: Vec<String> = Vec::new();
        for column in self.related_columns(related) {
            select_parts.push(format!(
                "{}.{}",
                dialect.quote_ident(related),
                dialect.quote_ident(&column)
            ));
            object_columns.push(column);
        }
        if select_parts.is_empty() {
            select_parts.push(format!("{}.*", dialect.quote_ident(related)));
        }
        for child in node.children.values() {
            let nested = self.render_eager_subquery(related, child, depth + 1, binder)?;
            select_parts.push(format!(
                "{} AS {}",
                nested,
                dialect.quote_ident(&child.alias)
            ));
            object_columns.push(child.alias.clone());
        }
        if depth == 0
            && let Some(pivot) = &join.pivot_table
            && let Some(columns) = self.pivot_columns.get(&node.alias)
        {
            for column in columns {
                select_parts.push(format!(
                    "{}.{} AS {}",
                    dialect.quote_ident(pivot),
                    dialect.quote_ident(column),
                    dialect.quote_ident(&format!("pivot_{column}"))
                ));
                object_columns.push(format!("pivot_{column}"));
            }
        }

        // Constraints and soft-delete discipline of the related table apply
        // inside the subquery body.
        let mut body = join.correlation_sql.clone();
        let mut sub = QueryBuilder::new(
            Arc::clone(&self.meta),
            Arc::clone(&self.config),
            None,
            related.clone(),
        );
        if let Some(constraint) = &node.constraint {
            sub = constraint(sub);
        }
        if let Some(extra) = sub.render_where_body(binder)? {
            body = format!("{body} AND {extra}");
        }
        let mut tail = String::new();
        for (i, order) in sub.orders.iter().enumerate() {
            tail.push_str(if i == 0 { " ORDER BY " } else { ", " });
            tail.push_str(&format!(
                "{} {}",
                sub.format_column(related, &order.column),
                order.direction.as_sql()
            ));
        }
        let single = matches!(
            rel.kind,
            RelationKind::HasOne
                | RelationKind::BelongsTo
                | RelationKind::HasOneThrough
                | RelationKind::MorphOne
                | RelationKind::MorphTo
        );
        if single {
            tail.push_str(" LIMIT 1");
        } else if let Some(limit) = sub.limit {
            tail.push_str(&format!(" LIMIT {limit}"));
        }

        let sub_alias = format!("_qb_sub{depth}");
        let inner = format!(
            "SELECT {} FROM {} WHERE {}{}",
            select_parts.join(", "),
            join.from_sql,
            body,
            tail
        );

        let object = dialect.json_object_row(&sub_alias, &object_columns);
        let rendered = if single {
            format!(
                "(SELECT {} FROM ({}) AS {})",
                object,
                inner,
                dialect.quote_ident(&sub_alias)
            )
        } else {
            format!(
                "(SELECT {} FROM ({}) AS {})",
                dialect.json_array_wrap(&object),
                inner,
                dialect.quote_ident(&sub_alias)
            )
        };
        Ok(rendered)
    }

    fn eager_tree(&self) -> BTreeMap<String, EagerNode> {
        let mut roots: BTreeMap<String, EagerNode> = BTreeMap::new();
        for load in &self.eager {
            let mut current = roots
                .entry(load.path[0].clone())
                .or_insert_with(|| EagerNode::new(&load.path[0]));
            for segment in &load.path[1..] {
                current = current
                    .children
                    .entry(segment.clone())
                    .or_insert_with(|| EagerNode::new(segment));
            }
            if load.constraint.is_some() {
                current.constraint = load.constraint.clone();
            }
        }
        roots
    }

    /// Render the SELECT statement with its positional parameters.
    pub fn to_sql(&self) -> Result<SqlQuery> {
        let loads = count_loads(&self.eager);
        if loads > self.config.max_eager_load {
            return Err(Error::EagerLoadLimit {
                requested: loads,
                limit: self.config.max_eager_load,
            });
        }

        let dialect = self.dialect();
        let mut binder = ParamBinder::new(dialect);

        let mut select_parts: Vec<String> = if self.projection.is_empty() {
            vec![format!("{}.*", dialect.quote_ident(&self.table))]
        } else {
            self.projection
                .iter()
                .map(|c| self.format_column(&self.table, c))
                .collect()
        };
        for alias in &self.count_relations {
            select_parts.push(self.render_count_subquery(alias)?);
        }
        for node in self.eager_tree().values() {
            let subquery = self.render_eager_subquery(&self.table, node, 0, &mut binder)?;
            select_parts.push(format!(
                "{} AS {}",
                subquery,
                dialect.quote_ident(&node.alias)
            ));
        }

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            select_parts.join(", "),
            dialect.quote_ident(&self.table)
        );

        if let Some(body) = self.render_where_body(&mut binder)? {
            sql.push_str(&format!(" WHERE {body}"));
        }

        if !self.groups.is_empty() {
            let groups: Vec<String> = self
                .groups
                .iter()
                .map(|c| self.format_column(&self.table, c))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        if !self.havings.is_empty() {
            let havings: Vec<String> = self
                .havings
                .iter()
                .map(|h| {
                    let placeholder = binder.push(h.value.clone());
                    format!("{} {} {}", h.expression, h.op.as_sql(), placeholder)
                })
                .collect();
            sql.push_str(&format!(" HAVING {}", havings.join(" AND ")));
        }

        if !self.orders.is_empty() {
            let orders: Vec<String> = self
                .orders
                .iter()
                .map(|o| {
                    format!(
                        "{} {}",
                        self.format_column(&self.table, &o.column),
                        o.direction.as_sql()
                    )
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(SqlQuery {
            sql,
            params: binder.params,
        })
    }

    /// Render an aggregate terminal (`COUNT`, `SUM`, ...) over the current
    /// predicate set.
    pub(crate) fn render_aggregate(&self, function: &str, column: Option<&str>) -> Result<SqlQuery> {
        let dialect = self.dialect();
        let mut binder = ParamBinder::new(dialect);
        let target = match column {
            Some(c) => self.format_column(&self.table, c),
            None => "*".to_string(),
        };
        let mut sql = format!(
            "SELECT {function}({target}) AS {} FROM {}",
            dialect.quote_ident("aggregate"),
            dialect.quote_ident(&self.table)
        );
        if let Some(body) = self.render_where_body(&mut binder)? {
            sql.push_str(&format!(" WHERE {body}"));
        }
        Ok(SqlQuery {
            sql,
            params: binder.params,
        })
    }

    pub(crate) fn render_insert(&self, rows: &[BTreeMap<String, Value>]) -> Result<SqlQuery> {
        let dialect = self.dialect();
        let first = rows
            .first()
            .ok_or_else(|| Error::Configuration("insert requires at least one row".into()))?;
        let columns: Vec<&String> = first.keys().collect();
        let mut binder = ParamBinder::new(dialect);

        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let mut placeholders = Vec::with_capacity(columns.len());
            for column in &columns {
                let value = row.get(*column).cloned().unwrap_or(Value::Null);
                placeholders.push(binder.push(value));
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let column_sql: Vec<String> = columns
            .iter()
            .map(|c| dialect.quote_ident(c))
            .collect();
        Ok(SqlQuery {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {}",
                dialect.quote_ident(&self.table),
                column_sql.join(", "),
                tuples.join(", ")
            ),
            params: binder.params,
        })
    }

    pub(crate) fn render_update(&self, values: &BTreeMap<String, Value>) -> Result<SqlQuery> {
        if values.is_empty() {
            return Err(Error::Configuration("update requires at least one column".into()));
        }
        let dialect = self.dialect();
        let mut binder = ParamBinder::new(dialect);

        let assignments: Vec<String> = values
            .iter()
            .map(|(column, value)| {
                let placeholder = binder.push(value.clone());
                format!("{} = {}", dialect.quote_ident(column), placeholder)
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_ident(&self.table),
            assignments.join(", ")
        );
        if let Some(body) = self.render_where_body(&mut binder)? {
            sql.push_str(&format!(" WHERE {body}"));
        }
        Ok(SqlQuery {
            sql,
            params: binder.params,
        })
    }

    /// DELETE honoring the soft-delete discipline: soft-delete tables get an
    /// UPDATE of the timestamp column instead of a row removal.
    pub(crate) fn render_delete(&self, force: bool) -> Result<SqlQuery> {
        let dialect = self.dialect();
        if !force && self.soft_deletes_active() {
            let mut binder = ParamBinder::new(dialect);
            let mut sql = format!(
                "UPDATE {} SET {} = CURRENT_TIMESTAMP",
                dialect.quote_ident(&self.table),
                dialect.quote_ident(&self.config.soft_deletes.column)
            );
            if let Some(body) = self.render_where_body(&mut binder)? {
                sql.push_str(&format!(" WHERE {body}"));
            }
            return Ok(SqlQuery {
                sql,
                params: binder.params,
            });
        }

        let mut binder = ParamBinder::new(dialect);
        let mut sql = format!("DELETE FROM {}", dialect.quote_ident(&self.table));
        if let Some(body) = self.render_where_body(&mut binder)? {
            sql.push_str(&format!(" WHERE {body}"));
        }
        Ok(SqlQuery {
            sql,
            params: binder.params,
        })
    }
}

struct EagerNode {
    alias: String,
    constraint: Option<SubBuilderFn>,
    children: BTreeMap<String, EagerNode>,
}

impl EagerNode {
    fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            constraint: None,
            children: BTreeMap::new(),
        }
    }
}
