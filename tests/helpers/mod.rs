//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use qb::dynamodb::{HttpResponse, SignedHttp, SignedRequest};
use qb::error::{Error, Result};
use qb::model::{normalize, NormalizedModel, RawModel};
use qb::query::{Row, SqlClient};
use qb::SchemaMeta;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub fn raw_models(defs: &[&str]) -> Vec<RawModel> {
    defs.iter()
        .map(|json| serde_json::from_str(json).expect("fixture model parses"))
        .collect()
}

pub fn normalized_models(defs: &[&str]) -> Vec<NormalizedModel> {
    raw_models(defs).into_iter().map(normalize).collect()
}

pub fn meta_for(defs: &[&str]) -> Arc<SchemaMeta> {
    SchemaMeta::build(normalized_models(defs))
}

/// The blog fixture used across scenarios.
pub fn blog_models() -> Vec<&'static str> {
    vec![
        r#"{"name": "User",
            "attributes": [{"name": "name"}, {"name": "email", "unique": true}, {"name": "status"}],
            "hasMany": {"posts": "Post", "comments": "Comment"}}"#,
        r#"{"name": "Post",
            "attributes": [
                {"name": "title"},
                {"name": "published", "cast": "boolean"},
                {"name": "user_id", "cast": "int", "references": {"table": "users", "column": "id"}}
            ],
            "belongsTo": {"author": "User"},
            "hasMany": {"comments": "Comment"},
            "belongsToMany": {"tags": "Tag"}}"#,
        r#"{"name": "Comment", "attributes": [{"name": "body"}]}"#,
        r#"{"name": "Tag", "attributes": [{"name": "label"}]}"#,
    ]
}

/// SQL client stub: records statements, replays scripted row sets.
#[derive(Default)]
pub struct RecordingSqlClient {
    pub statements: Mutex<Vec<(String, Vec<Value>)>>,
    pub scripted_rows: Mutex<Vec<Vec<Row>>>,
}

#[async_trait]
impl SqlClient for RecordingSqlClient {
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        let mut scripted = self.scripted_rows.lock().unwrap();
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
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }
}

/// Signed-HTTP stub scripting DynamoDB responses.
#[derive(Default)]
pub struct ScriptedTransport {
    pub requests: Mutex<Vec<SignedRequest>>,
    pub responses: Mutex<Vec<HttpResponse>>,
}

impl ScriptedTransport {
    pub fn push(&self, status: u16, body: Value) {
        self.responses.lock().unwrap().push(HttpResponse {
            status,
            body: body.to_string(),
        });
    }

    pub fn bodies_for_target(&self, operation: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.headers
                    .iter()
                    .any(|(k, v)| k == "X-Amz-Target" && v.ends_with(operation))
            })
            .map(|r| serde_json::from_str(&r.body).expect("request bodies are JSON"))
            .collect()
    }
}

#[async_trait]
impl SignedHttp for ScriptedTransport {
    async fn send(
        &self,
        request: SignedRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        Ok(if responses.is_empty() {
            HttpResponse {
                status: 200,
                body: "{}".to_string(),
            }
        } else {
            responses.remove(0)
        })
    }
}
