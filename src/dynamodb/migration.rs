//! DynamoDB table migrations: diff a desired table definition against the
//! live `DescribeTable` shape and drive the control-plane API until the
//! table converges, polling for ACTIVE between structural changes.

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::constants::{
    DYNAMO_MIGRATIONS_TABLE, GSI_ACTIVE_MAX_POLLS, GSI_ACTIVE_POLL_INTERVAL, MIGRATION_PK_PREFIX,
    MIGRATION_SK_PREFIX, TABLE_ACTIVE_MAX_POLLS, TABLE_ACTIVE_POLL_INTERVAL,
};
use crate::error::{Error, Result};
use crate::meta::SchemaMeta;

use super::client::DynamoClient;
use super::entity::parse_model;
use super::request::{PutItemRequestBuilder, QueryRequestBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    Provisioned,
    PayPerRequest,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingMode::Provisioned => "PROVISIONED",
            BillingMode::PayPerRequest => "PAY_PER_REQUEST",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "PROVISIONED" => BillingMode::Provisioned,
            _ => BillingMode::PayPerRequest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub read: u64,
    pub write: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub hash: String,
    pub range: Option<String>,
}

impl KeySchema {
    fn to_json(&self) -> Value {
        let mut schema = vec![json!({"AttributeName": self.hash, "KeyType": "HASH"})];
        if let Some(range) = &self.range {
            schema.push(json!({"AttributeName": range, "KeyType": "RANGE"}));
        }
        Value::Array(schema)
    }

    fn from_json(value: &Value) -> Option<Self> {
        let entries = value.as_array()?;
        let mut hash = None;
        let mut range = None;
        for entry in entries {
            let name = entry.get("AttributeName")?.as_str()?.to_string();
            match entry.get("KeyType")?.as_str()? {
                "HASH" => hash = Some(name),
                "RANGE" => range = Some(name),
                _ => {}
            }
        }
        Some(Self { hash: hash?, range })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GsiDefinition {
    pub name: String,
    pub key_schema: KeySchema,
    pub throughput: Option<Throughput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub table_name: String,
    /// Attribute name to scalar type (S, N, B) for every key attribute.
    pub attribute_definitions: Vec<(String, String)>,
    pub key_schema: KeySchema,
    pub billing_mode: BillingMode,
    pub provisioned: Option<Throughput>,
    pub gsis: Vec<GsiDefinition>,
    pub ttl_attribute: Option<String>,
    pub stream_enabled: bool,
    pub stream_view_type: Option<String>,
}

impl TableDefinition {
    pub fn new(table_name: impl Into<String>, pk: &str, sk: &str) -> Self {
        Self {
            table_name: table_name.into(),
            attribute_definitions: vec![
                (pk.to_string(), "S".to_string()),
                (sk.to_string(), "S".to_string()),
            ],
            key_schema: KeySchema {
                hash: pk.to_string(),
                range: Some(sk.to_string()),
            },
            billing_mode: BillingMode::PayPerRequest,
            provisioned: None,
            gsis: Vec::new(),
            ttl_attribute: None,
            stream_enabled: false,
            stream_view_type: None,
        }
    }

    pub fn with_gsi(mut self, name: impl Into<String>, hash: &str, range: &str) -> Self {
        for attr in [hash, range] {
            if !self.attribute_definitions.iter().any(|(n, _)| n == attr) {
                self.attribute_definitions
                    .push((attr.to_string(), "S".to_string()));
            }
        }
        self.gsis.push(GsiDefinition {
            name: name.into(),
            key_schema: KeySchema {
                hash: hash.to_string(),
                range: Some(range.to_string()),
            },
            throughput: None,
        });
        self
    }

    pub fn with_ttl(mut self, attribute: impl Into<String>) -> Self {
        self.ttl_attribute = Some(attribute.into());
        self
    }

    pub fn with_stream(mut self, view_type: impl Into<String>) -> Self {
        self.stream_enabled = true;
        self.stream_view_type = Some(view_type.into());
        self
    }

    pub fn with_provisioned(mut self, read: u64, write: u64) -> Self {
        self.billing_mode = BillingMode::Provisioned;
        self.provisioned = Some(Throughput { read, write });
        self
    }

    fn attribute_definitions_json(&self) -> Value {
        Value::Array(
            self.attribute_definitions
                .iter()
                .map(|(name, ty)| json!({"AttributeName": name, "AttributeType": ty}))
                .collect(),
        )
    }

    /// Canonical JSON used for hashing and the control-table record.
    pub fn canonical_json(&self) -> Value {
        json!({
            "tableName": self.table_name,
            "keySchema": {"hash": self.key_schema.hash, "range": self.key_schema.range},
            "billingMode": self.billing_mode.as_str(),
            "gsis": self.gsis.iter().map(|g| json!({
                "name": g.name,
                "hash": g.key_schema.hash,
                "range": g.key_schema.range,
            })).collect::<Vec<_>>(),
            "ttlAttribute": self.ttl_attribute,
            "streamEnabled": self.stream_enabled,
        })
    }
}

/// Desired single-table definition for the whole model graph: the standard
/// pk/sk pair plus one `GSI{n}` per assigned reverse-lookup index.
pub fn desired_table_definition(
    meta: &SchemaMeta,
    config: &crate::config::DynamoConfig,
    table_name: &str,
) -> TableDefinition {
    let mut max_gsi = 0usize;
    let mut wants_ttl = false;
    for model in meta.models() {
        let parsed = parse_model(model, config);
        for gsi in &parsed.key_patterns.gsi {
            max_gsi = max_gsi.max(gsi.index);
        }
        wants_ttl |= parsed.has_ttl;
    }

    let mut definition =
        TableDefinition::new(table_name, &config.pk_attribute, &config.sk_attribute);
    for n in 1..=max_gsi {
        definition = definition.with_gsi(
            format!("GSI{n}"),
            &format!("gsi{n}pk"),
            &format!("gsi{n}sk"),
        );
    }
    if wants_ttl {
        definition = definition.with_ttl("ttl");
    }
    definition
}

/// Parse a `DescribeTable` response into the canonical definition. The TTL
/// attribute arrives from `DescribeTimeToLive` and is filled by the caller.
pub fn definition_from_describe(response: &Value) -> Option<TableDefinition> {
    let table = response.get("Table")?;
    let table_name = table.get("TableName")?.as_str()?.to_string();
    let key_schema = KeySchema::from_json(table.get("KeySchema")?)?;

    let attribute_definitions = table
        .get("AttributeDefinitions")
        .and_then(Value::as_array)
        .map(|defs| {
            defs.iter()
                .filter_map(|d| {
                    Some((
                        d.get("AttributeName")?.as_str()?.to_string(),
                        d.get("AttributeType")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    let billing_mode = table
        .get("BillingModeSummary")
        .and_then(|b| b.get("BillingMode"))
        .and_then(Value::as_str)
        .map(BillingMode::parse)
        .unwrap_or(BillingMode::Provisioned);

    let provisioned = table.get("ProvisionedThroughput").and_then(|t| {
        let read = t.get("ReadCapacityUnits")?.as_u64()?;
        let write = t.get("WriteCapacityUnits")?.as_u64()?;
        if read == 0 && write == 0 {
            None
        } else {
            Some(Throughput { read, write })
        }
    });

    let gsis = table
        .get("GlobalSecondaryIndexes")
        .and_then(Value::as_array)
        .map(|indexes| {
            indexes
                .iter()
                .filter_map(|idx| {
                    Some(GsiDefinition {
                        name: idx.get("IndexName")?.as_str()?.to_string(),
                        key_schema: KeySchema::from_json(idx.get("KeySchema")?)?,
                        throughput: idx.get("ProvisionedThroughput").and_then(|t| {
                            let read = t.get("ReadCapacityUnits")?.as_u64()?;
                            let write = t.get("WriteCapacityUnits")?.as_u64()?;
                            if read == 0 && write == 0 {
                                None
                            } else {
                                Some(Throughput { read, write })
                            }
                        }),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let (stream_enabled, stream_view_type) = table
        .get("StreamSpecification")
        .map(|s| {
            (
                s.get("StreamEnabled").and_then(Value::as_bool).unwrap_or(false),
                s.get("StreamViewType")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
        })
        .unwrap_or((false, None));

    Some(TableDefinition {
        table_name,
        attribute_definitions,
        key_schema,
        billing_mode,
        provisioned,
        gsis,
        ttl_attribute: None,
        stream_enabled,
        stream_view_type,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum DynamoMigrationOp {
    CreateTable(TableDefinition),
    DeleteTable {
        table: String,
    },
    AddGsi(GsiDefinition),
    DeleteGsi {
        name: String,
    },
    UpdateGsiThroughput {
        name: String,
        throughput: Throughput,
    },
    UpdateTtl {
        attribute: Option<String>,
        enabled: bool,
    },
    UpdateBillingMode(BillingMode),
    EnableStream {
        view_type: String,
    },
    DisableStream,
}

/// Diff the live definition against the desired one.
///
/// Key-schema changes are reported but never acted on; recreating a table
/// is a decision for the operator.
pub fn diff_table_definitions(
    current: Option<&TableDefinition>,
    desired: &TableDefinition,
) -> Vec<DynamoMigrationOp> {
    let Some(current) = current else {
        return vec![DynamoMigrationOp::CreateTable(desired.clone())];
    };

    let mut ops = Vec::new();

    if current.key_schema != desired.key_schema {
        warn!(
            table = %desired.table_name,
            "key-schema change detected; the table is not recreated automatically"
        );
    }

    for gsi in &desired.gsis {
        match current.gsis.iter().find(|g| g.name == gsi.name) {
            None => ops.push(DynamoMigrationOp::AddGsi(gsi.clone())),
            Some(existing) => {
                if let Some(throughput) = gsi.throughput
                    && existing.throughput != Some(throughput)
                {
                    ops.push(DynamoMigrationOp::UpdateGsiThroughput {
                        name: gsi.name.clone(),
                        throughput,
                    });
                }
            }
        }
    }
    for gsi in &current.gsis {
        if !desired.gsis.iter().any(|g| g.name == gsi.name) {
            ops.push(DynamoMigrationOp::DeleteGsi {
                name: gsi.name.clone(),
            });
        }
    }

    if current.billing_mode != desired.billing_mode {
        ops.push(DynamoMigrationOp::UpdateBillingMode(desired.billing_mode));
    }

    if current.ttl_attribute != desired.ttl_attribute {
        ops.push(DynamoMigrationOp::UpdateTtl {
            attribute: desired.ttl_attribute.clone(),
            enabled: desired.ttl_attribute.is_some(),
        });
    }

    match (current.stream_enabled, desired.stream_enabled) {
        (false, true) => ops.push(DynamoMigrationOp::EnableStream {
            view_type: desired
                .stream_view_type
                .clone()
                .unwrap_or_else(|| "NEW_AND_OLD_IMAGES".to_string()),
        }),
        (true, false) => ops.push(DynamoMigrationOp::DisableStream),
        _ => {}
    }

    ops
}

/// Executes migration operations against a live endpoint.
#[derive(Debug, Clone)]
pub struct DynamoMigrator {
    client: DynamoClient,
    dry_run: bool,
}

impl DynamoMigrator {
    pub fn new(client: DynamoClient) -> Self {
        Self {
            client,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Read the live definition, TTL status included. A missing table reads
    /// as `None`.
    pub async fn current_definition(
        &self,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TableDefinition>> {
        let response = match self
            .client
            .call("DescribeTable", json!({"TableName": table}), cancel)
            .await
        {
            Ok(response) => response,
            Err(Error::DynamoDb { code, .. }) if code == "ResourceNotFoundException" => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut definition = match definition_from_describe(&response) {
            Some(definition) => definition,
            None => return Ok(None),
        };

        let ttl = self
            .client
            .call("DescribeTimeToLive", json!({"TableName": table}), cancel)
            .await?;
        if let Some(desc) = ttl.get("TimeToLiveDescription") {
            let enabled = matches!(
                desc.get("TimeToLiveStatus").and_then(Value::as_str),
                Some("ENABLED") | Some("ENABLING")
            );
            if enabled {
                definition.ttl_attribute = desc
                    .get("AttributeName")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }

        Ok(Some(definition))
    }

    /// Diff and execute. Returns the operations that were applied (or, in
    /// dry-run mode, would have been).
    pub async fn migrate(
        &self,
        desired: &TableDefinition,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamoMigrationOp>> {
        let current = self.current_definition(&desired.table_name, cancel).await?;
        let ops = diff_table_definitions(current.as_ref(), desired);
        if ops.is_empty() {
            info!(table = %desired.table_name, "no DynamoDB changes detected");
            return Ok(ops);
        }

        for op in &ops {
            if self.dry_run {
                info!(table = %desired.table_name, ?op, "dry run; skipping operation");
                continue;
            }
            self.apply_op(&desired.table_name, op, cancel).await?;
        }

        if !self.dry_run {
            self.record_migration(desired, cancel).await?;
        }
        Ok(ops)
    }

    async fn apply_op(
        &self,
        table: &str,
        op: &DynamoMigrationOp,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(table, operation = ?op, "applying DynamoDB migration operation");
        match op {
            DynamoMigrationOp::CreateTable(definition) => {
                let mut body = json!({
                    "TableName": definition.table_name,
                    "AttributeDefinitions": definition.attribute_definitions_json(),
                    "KeySchema": definition.key_schema.to_json(),
                    "BillingMode": definition.billing_mode.as_str(),
                });
                let map = body.as_object_mut().expect("body is an object");
                if let Some(throughput) = definition.provisioned {
                    map.insert(
                        "ProvisionedThroughput".into(),
                        json!({
                            "ReadCapacityUnits": throughput.read,
                            "WriteCapacityUnits": throughput.write
                        }),
                    );
                }
                if !definition.gsis.is_empty() {
                    map.insert(
                        "GlobalSecondaryIndexes".into(),
                        Value::Array(
                            definition
                                .gsis
                                .iter()
                                .map(|g| {
                                    json!({
                                        "IndexName": g.name,
                                        "KeySchema": g.key_schema.to_json(),
                                        "Projection": {"ProjectionType": "ALL"},
                                    })
                                })
                                .collect(),
                        ),
                    );
                }
                if definition.stream_enabled {
                    map.insert(
                        "StreamSpecification".into(),
                        json!({
                            "StreamEnabled": true,
                            "StreamViewType": definition
                                .stream_view_type
                                .clone()
                                .unwrap_or_else(|| "NEW_AND_OLD_IMAGES".to_string())
                        }),
                    );
                }
                self.client.call("CreateTable", body, cancel).await?;
                self.wait_for_table_active(table, cancel).await
            }
            DynamoMigrationOp::DeleteTable { table } => {
                self.client
                    .call("DeleteTable", json!({"TableName": table}), cancel)
                    .await?;
                Ok(())
            }
            DynamoMigrationOp::AddGsi(gsi) => {
                let mut attribute_definitions = vec![json!({
                    "AttributeName": gsi.key_schema.hash,
                    "AttributeType": "S"
                })];
                if let Some(range) = &gsi.key_schema.range {
                    attribute_definitions
                        .push(json!({"AttributeName": range, "AttributeType": "S"}));
                }
                let body = json!({
                    "TableName": table,
                    "AttributeDefinitions": attribute_definitions,
                    "GlobalSecondaryIndexUpdates": [{
                        "Create": {
                            "IndexName": gsi.name,
                            "KeySchema": gsi.key_schema.to_json(),
                            "Projection": {"ProjectionType": "ALL"},
                        }
                    }]
                });
                self.client.call("UpdateTable", body, cancel).await?;
                self.wait_for_gsi_active(table, &gsi.name, cancel).await
            }
            DynamoMigrationOp::DeleteGsi { name } => {
                let body = json!({
                    "TableName": table,
                    "GlobalSecondaryIndexUpdates": [{"Delete": {"IndexName": name}}]
                });
                self.client.call("UpdateTable", body, cancel).await?;
                self.wait_for_table_active(table, cancel).await
            }
            DynamoMigrationOp::UpdateGsiThroughput { name, throughput } => {
                let body = json!({
                    "TableName": table,
                    "GlobalSecondaryIndexUpdates": [{
                        "Update": {
                            "IndexName": name,
                            "ProvisionedThroughput": {
                                "ReadCapacityUnits": throughput.read,
                                "WriteCapacityUnits": throughput.write
                            }
                        }
                    }]
                });
                self.client.call("UpdateTable", body, cancel).await?;
                self.wait_for_gsi_active(table, name, cancel).await
            }
            DynamoMigrationOp::UpdateTtl { attribute, enabled } => {
                let body = json!({
                    "TableName": table,
                    "TimeToLiveSpecification": {
                        "Enabled": enabled,
                        "AttributeName": attribute.clone().unwrap_or_else(|| "ttl".to_string())
                    }
                });
                self.client.call("UpdateTimeToLive", body, cancel).await?;
                Ok(())
            }
            DynamoMigrationOp::UpdateBillingMode(mode) => {
                let mut body = json!({"TableName": table, "BillingMode": mode.as_str()});
                if *mode == BillingMode::Provisioned {
                    body.as_object_mut().expect("body is an object").insert(
                        "ProvisionedThroughput".into(),
                        json!({"ReadCapacityUnits": 5, "WriteCapacityUnits": 5}),
                    );
                }
                self.client.call("UpdateTable", body, cancel).await?;
                self.wait_for_table_active(table, cancel).await
            }
            DynamoMigrationOp::EnableStream { view_type } => {
                let body = json!({
                    "TableName": table,
                    "StreamSpecification": {"StreamEnabled": true, "StreamViewType": view_type}
                });
                self.client.call("UpdateTable", body, cancel).await?;
                self.wait_for_table_active(table, cancel).await
            }
            DynamoMigrationOp::DisableStream => {
                let body = json!({
                    "TableName": table,
                    "StreamSpecification": {"StreamEnabled": false}
                });
                self.client.call("UpdateTable", body, cancel).await?;
                self.wait_for_table_active(table, cancel).await
            }
        }
    }

    async fn wait_for_table_active(&self, table: &str, cancel: &CancellationToken) -> Result<()> {
        for _ in 0..TABLE_ACTIVE_MAX_POLLS {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let response = self
                .client
                .call("DescribeTable", json!({"TableName": table}), cancel)
                .await?;
            let status = response
                .get("Table")
                .and_then(|t| t.get("TableStatus"))
                .and_then(Value::as_str);
            if status == Some("ACTIVE") {
                return Ok(());
            }
            tokio::time::sleep(TABLE_ACTIVE_POLL_INTERVAL).await;
        }
        Err(Error::WaitForActiveTimeout {
            resource: format!("table {table}"),
            attempts: TABLE_ACTIVE_MAX_POLLS,
        })
    }

    async fn wait_for_gsi_active(
        &self,
        table: &str,
        index: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for _ in 0..GSI_ACTIVE_MAX_POLLS {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let response = self
                .client
                .call("DescribeTable", json!({"TableName": table}), cancel)
                .await?;
            let status = response
                .get("Table")
                .and_then(|t| t.get("GlobalSecondaryIndexes"))
                .and_then(Value::as_array)
                .and_then(|indexes| {
                    indexes
                        .iter()
                        .find(|i| i.get("IndexName").and_then(Value::as_str) == Some(index))
                })
                .and_then(|i| i.get("IndexStatus"))
                .and_then(Value::as_str);
            if status == Some("ACTIVE") {
                return Ok(());
            }
            tokio::time::sleep(GSI_ACTIVE_POLL_INTERVAL).await;
        }
        Err(Error::WaitForActiveTimeout {
            resource: format!("index {index} on table {table}"),
            attempts: GSI_ACTIVE_MAX_POLLS,
        })
    }

    async fn ensure_control_table(&self, cancel: &CancellationToken) -> Result<()> {
        match self
            .client
            .call(
                "DescribeTable",
                json!({"TableName": DYNAMO_MIGRATIONS_TABLE}),
                cancel,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::DynamoDb { code, .. }) if code == "ResourceNotFoundException" => {
                info!(table = DYNAMO_MIGRATIONS_TABLE, "creating migrations control table");
                let body = json!({
                    "TableName": DYNAMO_MIGRATIONS_TABLE,
                    "AttributeDefinitions": [
                        {"AttributeName": "pk", "AttributeType": "S"},
                        {"AttributeName": "sk", "AttributeType": "S"}
                    ],
                    "KeySchema": [
                        {"AttributeName": "pk", "KeyType": "HASH"},
                        {"AttributeName": "sk", "KeyType": "RANGE"}
                    ],
                    "BillingMode": "PAY_PER_REQUEST"
                });
                self.client.call("CreateTable", body, cancel).await?;
                self.wait_for_table_active(DYNAMO_MIGRATIONS_TABLE, cancel)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Append the next version row for this table. The conditional put
    /// aborts on (pk, sk) collision so concurrent runs cannot share a
    /// version number.
    async fn record_migration(
        &self,
        desired: &TableDefinition,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_control_table(cancel).await?;

        let pk = format!("{MIGRATION_PK_PREFIX}{}", desired.table_name);
        let latest = QueryRequestBuilder::new(DYNAMO_MIGRATIONS_TABLE)
            .key_eq("pk", pk.clone())
            .scan_forward(false)
            .limit(1)
            .build();
        let response = self.client.call("Query", latest, cancel).await?;
        let prior_version = response
            .get("Items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| item.get("version"))
            .and_then(|v| v.get("N"))
            .and_then(Value::as_str)
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0);
        let version = prior_version + 1;

        let definition_json = desired.canonical_json();
        let mut item = Map::new();
        item.insert("pk".into(), Value::String(pk));
        item.insert(
            "sk".into(),
            Value::String(format!("{MIGRATION_SK_PREFIX}{version:06}")),
        );
        item.insert(
            "tableName".into(),
            Value::String(desired.table_name.clone()),
        );
        item.insert(
            "hash".into(),
            Value::String(format!("{:x}", md5::compute(definition_json.to_string()))),
        );
        item.insert(
            "definition".into(),
            Value::String(definition_json.to_string()),
        );
        item.insert(
            "appliedAt".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        item.insert("version".into(), Value::from(version));

        let put = PutItemRequestBuilder::new(DYNAMO_MIGRATIONS_TABLE, &item)
            .unless_exists("sk")
            .build();
        self.client.call("PutItem", put, cancel).await?;
        info!(table = %desired.table_name, version, "recorded DynamoDB migration");
        Ok(())
    }
}
