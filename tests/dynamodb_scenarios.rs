//! DynamoDB scenarios: key construction, codec round trips, alias
//! uniqueness, GSI caps and the end-to-end migration drive against a
//! scripted endpoint.

mod helpers;

use std::sync::Arc;

use qb::config::DynamoConfig;
use qb::dynamodb::{
    desired_table_definition, marshall, parse_model, registry_from_meta, resolve_key_pattern,
    unmarshall, DynamoClient, DynamoMigrationOp, DynamoMigrator, EntityPattern, EntityRegistry,
    QueryRequestBuilder, TableDefinition,
};
use qb::model::normalize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use helpers::{meta_for, ScriptedTransport};

fn data(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn primary_key_builds_or_names_the_missing_field() {
    let mut registry = EntityRegistry::new(DynamoConfig::default());
    registry.register(EntityPattern::new("User", "USER#{id}", "USER#{id}"));

    let key = registry
        .build_primary_key("User", &data(&[("id", json!("123"))]))
        .unwrap();
    assert_eq!(key.pk, "USER#123");
    assert_eq!(key.sk, "USER#123");

    let err = registry.build_primary_key("User", &Map::new()).unwrap_err();
    assert!(err.to_string().contains("id"));
    assert_eq!(err.to_string(), "Missing value for pattern key: id");
}

#[test]
fn dollar_grammar_and_partial_interpolation() {
    let d = data(&[("tenant", json!("acme"))]);
    assert_eq!(
        resolve_key_pattern("TENANT#${tenant}#USER#{user_id}", &d),
        "TENANT#acme#USER#{user_id}"
    );
}

#[test]
fn codec_round_trips_hold() {
    // JSON-representable values that avoid the set-vs-list ambiguity.
    for value in [
        json!(null),
        json!("s"),
        json!(17),
        json!(1.25),
        json!(false),
        json!({"nested": {"deep": [1, 2]}}),
        json!(["only", "strings"]),
    ] {
        assert_eq!(unmarshall(&marshall(&value)).unwrap(), value);
    }

    for attr in [
        json!({"S": "v"}),
        json!({"N": "3"}),
        json!({"BOOL": true}),
        json!({"NULL": true}),
        json!({"SS": ["a", "b"]}),
        json!({"NS": ["1", "2"]}),
        json!({"L": [{"S": "a"}, {"N": "1"}]}),
        json!({"M": {"k": {"BOOL": false}}}),
    ] {
        assert_eq!(marshall(&unmarshall(&attr).unwrap()), attr);
    }
}

#[test]
fn expression_aliases_are_unique_per_request() {
    let body = QueryRequestBuilder::new("app")
        .key_eq("pk", "USER#1")
        .key_begins_with("sk", "POST#")
        .filter("status", "=", "published")
        .unwrap()
        .filter("views", ">", 10)
        .unwrap()
        .project(&["id", "title"])
        .build();

    let names: Vec<&String> = body["ExpressionAttributeNames"]
        .as_object()
        .unwrap()
        .keys()
        .collect();
    let values: Vec<&String> = body["ExpressionAttributeValues"]
        .as_object()
        .unwrap()
        .keys()
        .collect();

    let mut deduped = names.clone();
    deduped.dedup();
    assert_eq!(names.len(), 6);
    assert_eq!(deduped.len(), 6);
    assert_eq!(values.len(), 4);
}

#[test]
fn gsi_key_patterns_cap_at_five() {
    let model = normalize(
        serde_json::from_str(
            r#"{"name": "Order", "belongsTo": ["A", "B", "C", "D", "E", "F", "G", "H"]}"#,
        )
        .unwrap(),
    );
    let parsed = parse_model(&model, &DynamoConfig::default());

    assert_eq!(parsed.key_patterns.gsi.len(), 5);
    let unindexed = parsed
        .relationships
        .iter()
        .filter(|r| r.requires_gsi && r.gsi_index.is_none())
        .count();
    assert_eq!(unindexed, 3);
}

#[test]
fn registry_builds_items_for_the_whole_graph() {
    let meta = meta_for(&[
        r#"{"name": "User", "traits": {"timestamps": true}, "hasMany": {"posts": "Post"}}"#,
        r#"{"name": "Post", "belongsTo": {"author": "User"}}"#,
    ]);
    let registry = registry_from_meta(&meta, &DynamoConfig::default());

    let item = registry
        .create_item("User", &data(&[("id", json!("u1")), ("name", json!("Ada"))]))
        .unwrap();
    assert_eq!(item["pk"], json!("USER#u1"));
    assert_eq!(item["_et"], json!("User"));
    assert!(item.contains_key("createdAt"));

    // Post carries a GSI pattern for its author lookup.
    let post = registry.get("Post").unwrap();
    assert_eq!(post.indexes.len(), 1);
    assert_eq!(post.indexes[0].index_name, "GSI1");
    assert_eq!(post.indexes[0].pk_pattern, "USER#{user_id}");
}

fn describe_with_gsis(table: &str, gsis: &[&str]) -> Value {
    json!({
        "Table": {
            "TableName": table,
            "TableStatus": "ACTIVE",
            "KeySchema": [
                {"AttributeName": "pk", "KeyType": "HASH"},
                {"AttributeName": "sk", "KeyType": "RANGE"}
            ],
            "AttributeDefinitions": [
                {"AttributeName": "pk", "AttributeType": "S"},
                {"AttributeName": "sk", "AttributeType": "S"}
            ],
            "BillingModeSummary": {"BillingMode": "PAY_PER_REQUEST"},
            "GlobalSecondaryIndexes": gsis.iter().map(|name| json!({
                "IndexName": name,
                "IndexStatus": "ACTIVE",
                "KeySchema": [
                    {"AttributeName": "gsi1pk", "KeyType": "HASH"},
                    {"AttributeName": "gsi1sk", "KeyType": "RANGE"}
                ]
            })).collect::<Vec<_>>()
        }
    })
}

#[tokio::test]
async fn adding_one_gsi_drives_the_full_sequence() {
    let transport = Arc::new(ScriptedTransport::default());
    // Current state: table with GSI1 only, no TTL.
    transport.push(200, describe_with_gsis("app", &["GSI1"]));
    transport.push(
        200,
        json!({"TimeToLiveDescription": {"TimeToLiveStatus": "DISABLED"}}),
    );
    // UpdateTable for GSI2, then the wait poll reporting ACTIVE.
    transport.push(200, json!({}));
    transport.push(
        200,
        json!({"Table": {"TableName": "app", "TableStatus": "ACTIVE",
            "GlobalSecondaryIndexes": [{"IndexName": "GSI2", "IndexStatus": "ACTIVE"}]}}),
    );
    // Control table exists; prior version is 1; put succeeds.
    transport.push(200, describe_with_gsis("_qb_migrations", &[]));
    transport.push(200, json!({"Items": [{"version": {"N": "1"}}]}));
    transport.push(200, json!({}));

    let client = DynamoClient::new("us-east-1", None, Arc::clone(&transport) as _);
    let migrator = DynamoMigrator::new(client);
    let cancel = CancellationToken::new();

    let desired = TableDefinition::new("app", "pk", "sk")
        .with_gsi("GSI1", "gsi1pk", "gsi1sk")
        .with_gsi("GSI2", "gsi2pk", "gsi2sk");
    let ops = migrator.migrate(&desired, &cancel).await.unwrap();

    // Exactly one ADD_GSI, no DELETE_GSI.
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], DynamoMigrationOp::AddGsi(gsi) if gsi.name == "GSI2"));

    let updates = transport.bodies_for_target("UpdateTable");
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0]["GlobalSecondaryIndexUpdates"][0]["Create"]["IndexName"],
        "GSI2"
    );

    // The control-table row advances to the zero-padded next version.
    let puts = transport.bodies_for_target("PutItem");
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0]["TableName"], "_qb_migrations");
    assert_eq!(puts[0]["Item"]["pk"], json!({"S": "MIGRATION#app"}));
    assert_eq!(puts[0]["Item"]["sk"], json!({"S": "VERSION#000002"}));
    assert_eq!(puts[0]["Item"]["version"], json!({"N": "2"}));
    assert!(puts[0]["ConditionExpression"]
        .as_str()
        .unwrap()
        .contains("attribute_not_exists"));
}

#[tokio::test]
async fn missing_table_is_created_and_awaited() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(
        400,
        json!({"__type": "x#ResourceNotFoundException", "message": "not found"}),
    );
    // CreateTable, then one wait poll.
    transport.push(200, json!({}));
    transport.push(200, describe_with_gsis("app", &[]));
    // Control table path.
    transport.push(200, describe_with_gsis("_qb_migrations", &[]));
    transport.push(200, json!({"Items": []}));
    transport.push(200, json!({}));

    let client = DynamoClient::new("us-east-1", None, Arc::clone(&transport) as _);
    let migrator = DynamoMigrator::new(client);
    let cancel = CancellationToken::new();

    let ops = migrator
        .migrate(&TableDefinition::new("app", "pk", "sk"), &cancel)
        .await
        .unwrap();
    assert!(matches!(ops[0], DynamoMigrationOp::CreateTable(_)));

    let creates = transport.bodies_for_target("CreateTable");
    assert_eq!(creates[0]["TableName"], "app");
    assert_eq!(creates[0]["BillingMode"], "PAY_PER_REQUEST");

    // First version row.
    let puts = transport.bodies_for_target("PutItem");
    assert_eq!(puts[0]["Item"]["sk"], json!({"S": "VERSION#000001"}));
}

#[test]
fn desired_definition_follows_the_model_graph() {
    let meta = meta_for(&[
        r#"{"name": "Post", "belongsTo": ["User"]}"#,
        r#"{"name": "User", "traits": {"ttl": true}}"#,
    ]);
    let definition = desired_table_definition(&meta, &DynamoConfig::default(), "app");

    assert_eq!(definition.gsis.len(), 1);
    assert_eq!(definition.gsis[0].name, "GSI1");
    assert_eq!(definition.ttl_attribute.as_deref(), Some("ttl"));
    assert_eq!(definition.key_schema.hash, "pk");
    assert_eq!(definition.key_schema.range.as_deref(), Some("sk"));
}
