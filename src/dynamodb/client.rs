//! The DynamoDB wire client: composes JSON 1.0 request envelopes and
//! dispatches them through the signed-HTTP collaborator. Request signing is
//! the collaborator's concern; this layer only guarantees the envelope
//! headers are present and the remote error shape is decoded.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// A request ready for SigV4 signing and transport.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Signed-HTTP collaborator: receives the composed request, signs it with
/// the caller's credentials and returns the raw response.
#[async_trait]
pub trait SignedHttp: Send + Sync {
    async fn send(&self, request: SignedRequest, cancel: &CancellationToken)
        -> Result<HttpResponse>;
}

#[derive(Clone)]
pub struct DynamoClient {
    endpoint: String,
    transport: Arc<dyn SignedHttp>,
}

impl std::fmt::Debug for DynamoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl DynamoClient {
    /// Regional endpoint unless an explicit one (local DynamoDB, VPC
    /// endpoint) is given.
    pub fn new(region: &str, endpoint: Option<String>, transport: Arc<dyn SignedHttp>) -> Self {
        let endpoint =
            endpoint.unwrap_or_else(|| format!("https://dynamodb.{region}.amazonaws.com"));
        Self { endpoint, transport }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Dispatch one operation and decode the response body. Remote errors
    /// surface as `DynamoDb` with the `__type` code and message.
    pub async fn call(
        &self,
        operation: &str,
        body: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        debug!(operation, endpoint = %self.endpoint, "dispatching DynamoDB operation");

        let request = SignedRequest {
            method: "POST",
            url: self.endpoint.clone(),
            headers: vec![
                ("Content-Type".to_string(), CONTENT_TYPE.to_string()),
                (
                    "X-Amz-Target".to_string(),
                    format!("{TARGET_PREFIX}.{operation}"),
                ),
            ],
            body: body.to_string(),
        };

        let response = self.transport.send(request, cancel).await?;
        if response.status != 200 {
            let parsed: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);
            let code = parsed
                .get("__type")
                .and_then(Value::as_str)
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
                .unwrap_or_else(|| "UnknownError".to_string());
            let message = parsed
                .get("message")
                .or_else(|| parsed.get("Message"))
                .and_then(Value::as_str)
                .unwrap_or(&response.body)
                .to_string();
            return Err(Error::DynamoDb {
                status: response.status,
                code,
                message,
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| Error::DynamoDb {
            status: response.status,
            code: "MalformedResponse".to_string(),
            message: e.to_string(),
        })
    }
}
