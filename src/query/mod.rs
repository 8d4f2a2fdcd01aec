//! The relational query builder.
//!
//! A builder is bound to a table and accumulates clauses in call order;
//! terminal methods render SQL through the configured dialect driver and
//! execute it through the `SqlClient` collaborator. In-memory composition
//! never suspends; only terminals do.

pub mod builder;
pub mod clause;
pub mod executor;
pub mod relations;

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::SchemaMeta;

pub use builder::QueryBuilder;
pub use clause::{CmpOp, SortDirection, SqlQuery, TrashMode, WithSpec};
pub use executor::{Paginated, Row, SqlClient, SqlxClient};

/// A reusable query scope: receives the builder (and an optional argument)
/// and returns the constrained builder.
#[derive(Clone)]
pub struct ScopeFn(Arc<dyn Fn(QueryBuilder, Option<Value>) -> QueryBuilder + Send + Sync>);

impl ScopeFn {
    pub fn new(
        scope: impl Fn(QueryBuilder, Option<Value>) -> QueryBuilder + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(scope))
    }

    pub fn apply(&self, builder: QueryBuilder, value: Option<Value>) -> QueryBuilder {
        (self.0)(builder, value)
    }
}

impl std::fmt::Debug for ScopeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScopeFn")
    }
}

/// A constraint applied to a relation sub-query, for conditional eager
/// loading and existence subqueries.
pub type SubBuilderFn = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// Entry point binding the metadata graph, configuration and SQL client
/// together. Builders are spawned per call site and consumed by terminals.
#[derive(Clone)]
pub struct Db {
    meta: Arc<SchemaMeta>,
    config: Arc<Config>,
    client: Option<Arc<dyn SqlClient>>,
}

impl Db {
    pub fn new(meta: Arc<SchemaMeta>, config: Config) -> Self {
        Self {
            meta,
            config: Arc::new(config),
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn SqlClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn meta(&self) -> &SchemaMeta {
        &self.meta
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a builder against a table.
    pub fn table(&self, table: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(
            Arc::clone(&self.meta),
            Arc::clone(&self.config),
            self.client.clone(),
            table.into(),
        )
    }

    /// Start a builder against the table backing a model.
    pub fn model(&self, model: &str) -> Result<QueryBuilder> {
        let table = self
            .meta
            .table_for_model(model)
            .ok_or_else(|| Error::Configuration(format!("model `{model}` is not registered")))?
            .to_string();
        Ok(self.table(table))
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.config.dialect)
            .field("client", &self.client.is_some())
            .finish()
    }
}
