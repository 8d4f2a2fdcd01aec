//! Terminal query execution through the SQL client collaborator.
//!
//! Every terminal is a suspension point: it accepts a cancellation token,
//! wraps the round trip in lifecycle hooks and tracing, and consumes the
//! builder.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column as _, PgPool, Row as _};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hooks::{HookContext, Hooks, QueryEvent};

use super::builder::QueryBuilder;
use super::clause::SqlQuery;

/// A result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// The SQL client collaborator: rendered SQL plus positional parameters in,
/// rows or an affected-row count out. Implementations must honor the
/// cancellation token.
#[async_trait]
pub trait SqlClient: Send + Sync {
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>>;

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Production client backed by a sqlx Postgres pool.
#[derive(Debug, Clone)]
pub struct SqlxClient {
    pool: PgPool,
}

impl SqlxClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other),
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<Value>, _>(i) {
            v.unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
            v.map(Value::Bool).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map(Value::String).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
            v.map(|ts| Value::String(ts.to_rfc3339())).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
            v.map(|ts| Value::String(ts.to_string())).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        out.insert(column.name().to_string(), value);
    }
    out
}

#[async_trait]
impl SqlClient for SqlxClient {
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            rows = query.fetch_all(&self.pool) => rows?,
        };
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = query.execute(&self.pool) => result?,
        };
        Ok(result.rows_affected())
    }
}

/// Page envelope returned by `paginate`.
#[derive(Debug, Clone)]
pub struct Paginated {
    pub data: Vec<Row>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub last_page: u64,
}

impl QueryBuilder {
    fn require_client(&self) -> Result<Arc<dyn SqlClient>> {
        self.client
            .clone()
            .ok_or_else(|| Error::Configuration("no SQL client bound to this builder".into()))
    }

    fn hooks(&self) -> &Hooks {
        &self.config.hooks
    }

    async fn run_rows(
        &self,
        query: &SqlQuery,
        operation: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let client = self.require_client()?;
        let hooks = self.hooks();
        let event = QueryEvent {
            table: self.table.clone(),
            operation,
            sql: query.sql.clone(),
            error: None,
        };
        if self.config.debug.capture_text {
            debug!(table = %self.table, sql = %query.sql, "rendered query");
        }
        Hooks::emit(&hooks.start_span, event.clone()).await;
        Hooks::emit(&hooks.on_query_start, event.clone()).await;

        let result = client.query(&query.sql, &query.params, cancel).await;
        match &result {
            Ok(_) => Hooks::emit(&hooks.on_query_end, event).await,
            Err(e) => {
                let mut event = event;
                event.error = Some(e.to_string());
                Hooks::emit(&hooks.on_query_error, event).await;
            }
        }
        result
    }

    async fn run_execute(
        &self,
        query: &SqlQuery,
        operation: &'static str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let client = self.require_client()?;
        let hooks = self.hooks();
        let event = QueryEvent {
            table: self.table.clone(),
            operation,
            sql: query.sql.clone(),
            error: None,
        };
        if self.config.debug.capture_text {
            debug!(table = %self.table, sql = %query.sql, "rendered statement");
        }
        Hooks::emit(&hooks.start_span, event.clone()).await;
        Hooks::emit(&hooks.on_query_start, event.clone()).await;

        let result = client.execute(&query.sql, &query.params, cancel).await;
        match &result {
            Ok(_) => Hooks::emit(&hooks.on_query_end, event).await,
            Err(e) => {
                let mut event = event;
                event.error = Some(e.to_string());
                Hooks::emit(&hooks.on_query_error, event).await;
            }
        }
        result
    }

    /// Parse eager-load columns delivered as JSON text (MySQL and SQLite
    /// return aggregated JSON as strings) into structured values.
    fn decode_eager_columns(&self, rows: &mut [Row]) {
        let aliases: Vec<String> = self
            .eager
            .iter()
            .map(|load| load.path[0].clone())
            .collect();
        for row in rows {
            for alias in &aliases {
                let parsed = match row.get(alias) {
                    Some(Value::String(text)) => serde_json::from_str::<Value>(text).ok(),
                    _ => None,
                };
                if let Some(parsed) = parsed {
                    row.insert(alias.clone(), parsed);
                }
            }
        }
    }

    // -- Read terminals ----------------------------------------------------

    pub async fn get(self, cancel: &CancellationToken) -> Result<Vec<Row>> {
        let query = self.to_sql()?;
        let mut rows = self.run_rows(&query, "select", cancel).await?;
        self.decode_eager_columns(&mut rows);
        Ok(rows)
    }

    pub async fn first(self, cancel: &CancellationToken) -> Result<Option<Row>> {
        let mut rows = self.limit(1).get(cancel).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    pub async fn pluck(self, column: &str, cancel: &CancellationToken) -> Result<Vec<Value>> {
        let column_name = column
            .rsplit('.')
            .next()
            .unwrap_or(column)
            .to_string();
        let rows = self.select([column]).get(cancel).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get(&column_name).cloned().unwrap_or(Value::Null))
            .collect())
    }

    pub async fn exists(self, cancel: &CancellationToken) -> Result<bool> {
        Ok(self.count(cancel).await? > 0)
    }

    async fn aggregate(
        self,
        function: &'static str,
        column: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let query = self.render_aggregate(function, column)?;
        let rows = self.run_rows(&query, "aggregate", cancel).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("aggregate").cloned())
            .unwrap_or(Value::Null))
    }

    pub async fn count(self, cancel: &CancellationToken) -> Result<u64> {
        let value = self.aggregate("COUNT", None, cancel).await?;
        Ok(value.as_i64().unwrap_or_else(|| {
            value
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default()
        }) as u64)
    }

    pub async fn sum(self, column: &str, cancel: &CancellationToken) -> Result<Value> {
        self.aggregate("SUM", Some(column), cancel).await
    }

    pub async fn avg(self, column: &str, cancel: &CancellationToken) -> Result<Value> {
        self.aggregate("AVG", Some(column), cancel).await
    }

    pub async fn min(self, column: &str, cancel: &CancellationToken) -> Result<Value> {
        self.aggregate("MIN", Some(column), cancel).await
    }

    pub async fn max(self, column: &str, cancel: &CancellationToken) -> Result<Value> {
        self.aggregate("MAX", Some(column), cancel).await
    }

    pub async fn paginate(
        self,
        page: u64,
        per_page: u64,
        cancel: &CancellationToken,
    ) -> Result<Paginated> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let total = self.clone().count(cancel).await?;
        let data = self
            .limit(per_page)
            .offset((page - 1) * per_page)
            .get(cancel)
            .await?;
        Ok(Paginated {
            data,
            total,
            page,
            per_page,
            last_page: total.div_ceil(per_page).max(1),
        })
    }

    // -- Write terminals ---------------------------------------------------

    pub async fn insert(
        self,
        values: BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.insert_many(vec![values], cancel).await
    }

    pub async fn insert_many(
        self,
        mut rows: Vec<BTreeMap<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        // Models with the uuid trait get a generated identifier unless the
        // caller supplied one.
        if self
            .meta
            .model_by_table(&self.table)
            .is_some_and(|m| m.traits.uuid)
        {
            for row in &mut rows {
                row.entry("uuid".to_string())
                    .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            }
        }

        let data = Value::Array(
            rows.iter()
                .map(|row| Value::Object(row.clone().into_iter().collect()))
                .collect(),
        );
        Hooks::run(
            &self.hooks().before_create,
            "beforeCreate",
            HookContext {
                table: self.table.clone(),
                data: Some(data.clone()),
                ..HookContext::default()
            },
        )
        .await?;

        let query = self.render_insert(&rows)?;
        let affected = self.run_execute(&query, "insert", cancel).await?;

        Hooks::run(
            &self.hooks().after_create,
            "afterCreate",
            HookContext {
                table: self.table.clone(),
                data: Some(data),
                result: Some(Value::from(affected)),
                ..HookContext::default()
            },
        )
        .await?;
        Ok(affected)
    }

    pub async fn update(
        self,
        values: BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let data = Value::Object(values.clone().into_iter().collect());
        let query = self.render_update(&values)?;
        Hooks::run(
            &self.hooks().before_update,
            "beforeUpdate",
            HookContext {
                table: self.table.clone(),
                data: Some(data.clone()),
                filter: Some(Value::String(query.sql.clone())),
                ..HookContext::default()
            },
        )
        .await?;

        let affected = self.run_execute(&query, "update", cancel).await?;

        Hooks::run(
            &self.hooks().after_update,
            "afterUpdate",
            HookContext {
                table: self.table.clone(),
                data: Some(data),
                result: Some(Value::from(affected)),
                ..HookContext::default()
            },
        )
        .await?;
        Ok(affected)
    }

    pub async fn delete(self, cancel: &CancellationToken) -> Result<u64> {
        self.delete_inner(false, cancel).await
    }

    /// Bypass the soft-delete discipline and remove rows outright.
    pub async fn force_delete(self, cancel: &CancellationToken) -> Result<u64> {
        self.delete_inner(true, cancel).await
    }

    async fn delete_inner(self, force: bool, cancel: &CancellationToken) -> Result<u64> {
        let query = self.render_delete(force)?;
        Hooks::run(
            &self.hooks().before_delete,
            "beforeDelete",
            HookContext {
                table: self.table.clone(),
                filter: Some(Value::String(query.sql.clone())),
                ..HookContext::default()
            },
        )
        .await?;

        let affected = self.run_execute(&query, "delete", cancel).await?;

        Hooks::run(
            &self.hooks().after_delete,
            "afterDelete",
            HookContext {
                table: self.table.clone(),
                result: Some(Value::from(affected)),
                ..HookContext::default()
            },
        )
        .await?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::meta::SchemaMeta;
    use crate::model::normalize;
    use crate::query::Db;
    use std::sync::Mutex;

    /// Records every statement and replays scripted rows.
    #[derive(Default)]
    pub(crate) struct StubClient {
        pub executed: Mutex<Vec<SqlQuery>>,
        pub rows: Mutex<Vec<Vec<Row>>>,
    }

    #[async_trait]
    impl SqlClient for StubClient {
        async fn query(
            &self,
            sql: &str,
            params: &[Value],
            cancel: &CancellationToken,
        ) -> Result<Vec<Row>> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.executed.lock().unwrap().push(SqlQuery {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            let mut scripted = self.rows.lock().unwrap();
            Ok(if scripted.is_empty() {
                Vec::new()
            } else {
                scripted.remove(0)
            })
        }

        async fn execute(
            &self,
            sql: &str,
            params: &[Value],
            cancel: &CancellationToken,
        ) -> Result<u64> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.executed.lock().unwrap().push(SqlQuery {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            Ok(1)
        }
    }

    fn db_with(client: Arc<StubClient>) -> Db {
        let models = vec![
            normalize(
                serde_json::from_str(
                    r#"{"name": "User", "attributes": [{"name": "email"}], "hasMany": {"posts": "Post"}}"#,
                )
                .unwrap(),
            ),
            normalize(serde_json::from_str(r#"{"name": "Post"}"#).unwrap()),
        ];
        Db::new(SchemaMeta::build(models), Config::default()).with_client(client)
    }

    #[tokio::test]
    async fn get_runs_the_rendered_select() {
        let client = Arc::new(StubClient::default());
        let db = db_with(Arc::clone(&client));
        let cancel = CancellationToken::new();

        db.table("users")
            .where_("email", "a@b.c")
            .get(&cancel)
            .await
            .unwrap();

        let executed = client.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].sql.contains("SELECT \"users\".* FROM \"users\""));
        assert_eq!(executed[0].params, vec![Value::String("a@b.c".into())]);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = Arc::new(StubClient::default());
        let db = db_with(Arc::clone(&client));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = db.table("users").get(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(client.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_reads_the_aggregate_column() {
        let client = Arc::new(StubClient::default());
        let mut row = Row::new();
        row.insert("aggregate".into(), Value::from(42));
        client.rows.lock().unwrap().push(vec![row]);

        let db = db_with(Arc::clone(&client));
        let cancel = CancellationToken::new();
        let count = db.table("users").count(&cancel).await.unwrap();
        assert_eq!(count, 42);
        assert!(
            client.executed.lock().unwrap()[0]
                .sql
                .contains("SELECT COUNT(*) AS \"aggregate\"")
        );
    }

    #[tokio::test]
    async fn eager_columns_delivered_as_text_are_decoded() {
        let client = Arc::new(StubClient::default());
        let mut row = Row::new();
        row.insert("id".into(), Value::from(1));
        row.insert("posts".into(), Value::String(r#"[{"id": 2}]"#.into()));
        client.rows.lock().unwrap().push(vec![row]);

        let db = db_with(Arc::clone(&client));
        let cancel = CancellationToken::new();
        let rows = db
            .table("users")
            .with("posts")
            .unwrap()
            .get(&cancel)
            .await
            .unwrap();
        assert_eq!(rows[0]["posts"], serde_json::json!([{"id": 2}]));
    }

    #[tokio::test]
    async fn hooks_fire_in_order_and_abort_on_error() {
        use futures_util::FutureExt;

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let mut config = Config::default();
        let o = Arc::clone(&order);
        config.hooks.before_create = Some(Arc::new(move |_ctx| {
            let o = Arc::clone(&o);
            async move {
                o.lock().unwrap().push("before");
                Ok(())
            }
            .boxed()
        }));
        let o = Arc::clone(&order);
        config.hooks.after_create = Some(Arc::new(move |_ctx| {
            let o = Arc::clone(&o);
            async move {
                o.lock().unwrap().push("after");
                Ok(())
            }
            .boxed()
        }));

        let client = Arc::new(StubClient::default());
        let models = vec![normalize(serde_json::from_str(r#"{"name": "User"}"#).unwrap())];
        let db = Db::new(SchemaMeta::build(models), config).with_client(Arc::clone(&client) as Arc<dyn SqlClient>);
        let cancel = CancellationToken::new();

        let mut values = BTreeMap::new();
        values.insert("email".to_string(), Value::String("a@b.c".into()));
        db.table("users").insert(values, &cancel).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["before", "after"]);

        // A failing before-hook aborts before any SQL runs.
        let mut config = Config::default();
        config.hooks.before_delete = Some(Arc::new(|_ctx| {
            async { Err(Error::Configuration("nope".into())) }.boxed()
        }));
        let client2 = Arc::new(StubClient::default());
        let models = vec![normalize(serde_json::from_str(r#"{"name": "User"}"#).unwrap())];
        let db = Db::new(SchemaMeta::build(models), config).with_client(Arc::clone(&client2) as Arc<dyn SqlClient>);
        let err = db.table("users").delete(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::HookAborted { .. }));
        assert!(client2.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn paginate_returns_the_envelope() {
        let client = Arc::new(StubClient::default());
        let mut count_row = Row::new();
        count_row.insert("aggregate".into(), Value::from(7));
        client.rows.lock().unwrap().push(vec![count_row]);
        client.rows.lock().unwrap().push(vec![Row::new(), Row::new()]);

        let db = db_with(Arc::clone(&client));
        let cancel = CancellationToken::new();
        let page = db.table("users").paginate(2, 3, &cancel).await.unwrap();

        assert_eq!(page.total, 7);
        assert_eq!(page.page, 2);
        assert_eq!(page.per_page, 3);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.data.len(), 2);

        let executed = client.executed.lock().unwrap();
        assert!(executed[1].sql.contains("LIMIT 3 OFFSET 3"));
    }

    #[tokio::test]
    async fn terminal_without_client_is_a_configuration_error() {
        let models = vec![normalize(serde_json::from_str(r#"{"name": "User"}"#).unwrap())];
        let db = Db::new(SchemaMeta::build(models), Config::default());
        let cancel = CancellationToken::new();
        let err = db.table("users").get(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
