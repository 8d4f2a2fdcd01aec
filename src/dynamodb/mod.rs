//! DynamoDB single-table adapter: value codec, entity registry with key
//! patterns and access-pattern derivation, request builders, the wire
//! client, and the table migration driver.

pub mod client;
pub mod entity;
pub mod expression;
pub mod migration;
pub mod request;
pub mod value;

pub use client::{DynamoClient, HttpResponse, SignedHttp, SignedRequest};
pub use entity::{
    parse_model, pattern_fields, registry_from_meta, resolve_key_pattern, AccessPattern,
    DynamoAttribute, DynamoRelationship, EntityIndexPattern, EntityPattern, EntityRegistry,
    GsiKeyPattern, KeyPatterns, ParsedDynamoModel, PrimaryKey,
};
pub use expression::{CondOp, ExpressionBuilder, UpdateExpressionBuilder};
pub use migration::{
    definition_from_describe, desired_table_definition, diff_table_definitions, BillingMode,
    DynamoMigrationOp, DynamoMigrator, GsiDefinition, KeySchema, TableDefinition, Throughput,
};
pub use request::{
    DeleteItemRequestBuilder, GetItemRequestBuilder, PutItemRequestBuilder, QueryRequestBuilder,
    ScanRequestBuilder, UpdateItemRequestBuilder,
};
pub use value::{marshall, marshall_item, unmarshall, unmarshall_item};
