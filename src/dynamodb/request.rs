//! Fluent construction of DynamoDB API request bodies (JSON 1.0 wire
//! shapes). Each builder owns one `ExpressionBuilder`, so attribute-name
//! and value aliases stay unique across key conditions, filters and
//! projections of a single request.

use serde_json::{json, Map, Value};

use crate::error::Result;

use super::expression::{CondOp, ExpressionBuilder, UpdateExpressionBuilder};
use super::value::marshall_item;

#[derive(Debug, Clone, Default)]
pub struct QueryRequestBuilder {
    table: String,
    index_name: Option<String>,
    expr: ExpressionBuilder,
    key_conditions: Vec<String>,
    filters: Vec<String>,
    projection: Option<String>,
    limit: Option<u64>,
    scan_forward: Option<bool>,
    exclusive_start_key: Option<Map<String, Value>>,
    consistent_read: bool,
}

impl QueryRequestBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn key_eq(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        let condition = self.expr.compare(attribute, CondOp::Eq, &value.into());
        self.key_conditions.push(condition);
        self
    }

    pub fn key_begins_with(mut self, attribute: &str, prefix: impl Into<Value>) -> Self {
        let condition = self.expr.begins_with(attribute, &prefix.into());
        self.key_conditions.push(condition);
        self
    }

    pub fn key_between(
        mut self,
        attribute: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let condition = self.expr.between(attribute, &low.into(), &high.into());
        self.key_conditions.push(condition);
        self
    }

    pub fn filter(mut self, attribute: &str, op: &str, value: impl Into<Value>) -> Result<Self> {
        let condition = self.expr.compare_str(attribute, op, &value.into())?;
        self.filters.push(condition);
        Ok(self)
    }

    pub fn filter_contains(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        let condition = self.expr.contains(attribute, &value.into());
        self.filters.push(condition);
        self
    }

    pub fn filter_attribute_exists(mut self, attribute: &str) -> Self {
        let condition = self.expr.attribute_exists(attribute);
        self.filters.push(condition);
        self
    }

    pub fn project(mut self, attributes: &[&str]) -> Self {
        self.projection = Some(self.expr.projection(attributes));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = Some(forward);
        self
    }

    pub fn start_key(mut self, key: Map<String, Value>) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    pub fn build(self) -> Value {
        let mut body = json!({
            "TableName": self.table,
            "KeyConditionExpression": self.key_conditions.join(" AND "),
        });
        let map = body.as_object_mut().expect("body is an object");
        if let Some(index) = self.index_name {
            map.insert("IndexName".into(), Value::String(index));
        }
        if !self.filters.is_empty() {
            map.insert(
                "FilterExpression".into(),
                Value::String(self.filters.join(" AND ")),
            );
        }
        if let Some(projection) = self.projection {
            map.insert("ProjectionExpression".into(), Value::String(projection));
        }
        if self.expr.has_names() {
            map.insert("ExpressionAttributeNames".into(), self.expr.names_json());
        }
        if self.expr.has_values() {
            map.insert("ExpressionAttributeValues".into(), self.expr.values_json());
        }
        if let Some(limit) = self.limit {
            map.insert("Limit".into(), Value::from(limit));
        }
        if let Some(forward) = self.scan_forward {
            map.insert("ScanIndexForward".into(), Value::Bool(forward));
        }
        if let Some(start) = self.exclusive_start_key {
            map.insert("ExclusiveStartKey".into(), Value::Object(start));
        }
        if self.consistent_read {
            map.insert("ConsistentRead".into(), Value::Bool(true));
        }
        body
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanRequestBuilder {
    table: String,
    index_name: Option<String>,
    expr: ExpressionBuilder,
    filters: Vec<String>,
    projection: Option<String>,
    limit: Option<u64>,
}

impl ScanRequestBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn filter(mut self, attribute: &str, op: &str, value: impl Into<Value>) -> Result<Self> {
        let condition = self.expr.compare_str(attribute, op, &value.into())?;
        self.filters.push(condition);
        Ok(self)
    }

    pub fn project(mut self, attributes: &[&str]) -> Self {
        self.projection = Some(self.expr.projection(attributes));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> Value {
        let mut body = json!({"TableName": self.table});
        let map = body.as_object_mut().expect("body is an object");
        if let Some(index) = self.index_name {
            map.insert("IndexName".into(), Value::String(index));
        }
        if !self.filters.is_empty() {
            map.insert(
                "FilterExpression".into(),
                Value::String(self.filters.join(" AND ")),
            );
        }
        if let Some(projection) = self.projection {
            map.insert("ProjectionExpression".into(), Value::String(projection));
        }
        if self.expr.has_names() {
            map.insert("ExpressionAttributeNames".into(), self.expr.names_json());
        }
        if self.expr.has_values() {
            map.insert("ExpressionAttributeValues".into(), self.expr.values_json());
        }
        if let Some(limit) = self.limit {
            map.insert("Limit".into(), Value::from(limit));
        }
        body
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetItemRequestBuilder {
    table: String,
    key: Map<String, Value>,
    expr: ExpressionBuilder,
    projection: Option<String>,
    consistent_read: bool,
}

impl GetItemRequestBuilder {
    pub fn new(table: impl Into<String>, key: &Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            key: marshall_item(key),
            ..Self::default()
        }
    }

    pub fn project(mut self, attributes: &[&str]) -> Self {
        self.projection = Some(self.expr.projection(attributes));
        self
    }

    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    pub fn build(self) -> Value {
        let mut body = json!({"TableName": self.table, "Key": self.key});
        let map = body.as_object_mut().expect("body is an object");
        if let Some(projection) = self.projection {
            map.insert("ProjectionExpression".into(), Value::String(projection));
        }
        if self.expr.has_names() {
            map.insert("ExpressionAttributeNames".into(), self.expr.names_json());
        }
        if self.consistent_read {
            map.insert("ConsistentRead".into(), Value::Bool(true));
        }
        body
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutItemRequestBuilder {
    table: String,
    item: Map<String, Value>,
    expr: ExpressionBuilder,
    conditions: Vec<String>,
}

impl PutItemRequestBuilder {
    pub fn new(table: impl Into<String>, item: &Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            item: marshall_item(item),
            ..Self::default()
        }
    }

    /// Refuse the put when the attribute already exists; the usual guard
    /// against overwriting an item or colliding on a version key.
    pub fn unless_exists(mut self, attribute: &str) -> Self {
        let condition = self.expr.attribute_not_exists(attribute);
        self.conditions.push(condition);
        self
    }

    pub fn condition(mut self, attribute: &str, op: &str, value: impl Into<Value>) -> Result<Self> {
        let condition = self.expr.compare_str(attribute, op, &value.into())?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn build(self) -> Value {
        let mut body = json!({"TableName": self.table, "Item": self.item});
        let map = body.as_object_mut().expect("body is an object");
        if !self.conditions.is_empty() {
            map.insert(
                "ConditionExpression".into(),
                Value::String(self.conditions.join(" AND ")),
            );
        }
        if self.expr.has_names() {
            map.insert("ExpressionAttributeNames".into(), self.expr.names_json());
        }
        if self.expr.has_values() {
            map.insert("ExpressionAttributeValues".into(), self.expr.values_json());
        }
        body
    }
}

#[derive(Debug, Clone)]
pub struct UpdateItemRequestBuilder {
    table: String,
    key: Map<String, Value>,
    update: UpdateExpressionBuilder,
    return_values: Option<String>,
}

impl UpdateItemRequestBuilder {
    pub fn new(table: impl Into<String>, key: &Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            key: marshall_item(key),
            update: UpdateExpressionBuilder::new(),
            return_values: None,
        }
    }

    pub fn set(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.update.set(attribute, &value.into());
        self
    }

    pub fn remove(mut self, attribute: &str) -> Self {
        self.update.remove(attribute);
        self
    }

    pub fn add(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.update.add(attribute, &value.into());
        self
    }

    pub fn delete(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.update.delete(attribute, &value.into());
        self
    }

    pub fn return_all_new(mut self) -> Self {
        self.return_values = Some("ALL_NEW".to_string());
        self
    }

    pub fn build(self) -> Value {
        let mut body = json!({
            "TableName": self.table,
            "Key": self.key,
            "UpdateExpression": self.update.build(),
            "ExpressionAttributeNames": self.update.names_json(),
        });
        let map = body.as_object_mut().expect("body is an object");
        if self.update.has_values() {
            map.insert("ExpressionAttributeValues".into(), self.update.values_json());
        }
        if let Some(rv) = self.return_values {
            map.insert("ReturnValues".into(), Value::String(rv));
        }
        body
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteItemRequestBuilder {
    table: String,
    key: Map<String, Value>,
    expr: ExpressionBuilder,
    conditions: Vec<String>,
}

impl DeleteItemRequestBuilder {
    pub fn new(table: impl Into<String>, key: &Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            key: marshall_item(key),
            ..Self::default()
        }
    }

    pub fn condition(mut self, attribute: &str, op: &str, value: impl Into<Value>) -> Result<Self> {
        let condition = self.expr.compare_str(attribute, op, &value.into())?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn build(self) -> Value {
        let mut body = json!({"TableName": self.table, "Key": self.key});
        let map = body.as_object_mut().expect("body is an object");
        if !self.conditions.is_empty() {
            map.insert(
                "ConditionExpression".into(),
                Value::String(self.conditions.join(" AND ")),
            );
        }
        if self.expr.has_names() {
            map.insert("ExpressionAttributeNames".into(), self.expr.names_json());
        }
        if self.expr.has_values() {
            map.insert("ExpressionAttributeValues".into(), self.expr.values_json());
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_request_shape() {
        let body = QueryRequestBuilder::new("app-table")
            .key_eq("pk", "USER#1")
            .key_begins_with("sk", "POST#")
            .filter("status", "=", "published")
            .unwrap()
            .limit(25)
            .scan_forward(false)
            .build();

        assert_eq!(body["TableName"], "app-table");
        assert_eq!(
            body["KeyConditionExpression"],
            "#name0 = :val0 AND begins_with(#name1, :val1)"
        );
        assert_eq!(body["FilterExpression"], "#name2 = :val2");
        assert_eq!(body["ExpressionAttributeNames"]["#name0"], "pk");
        assert_eq!(body["ExpressionAttributeValues"][":val1"], json!({"S": "POST#"}));
        assert_eq!(body["Limit"], 25);
        assert_eq!(body["ScanIndexForward"], false);
    }

    #[test]
    fn gsi_query_names_the_index() {
        let body = QueryRequestBuilder::new("app-table")
            .index("GSI1")
            .key_eq("gsi1pk", "USER#9")
            .build();
        assert_eq!(body["IndexName"], "GSI1");
    }

    #[test]
    fn aliases_stay_unique_across_sections() {
        let body = QueryRequestBuilder::new("t")
            .key_eq("pk", "A")
            .filter("x", ">", 1)
            .unwrap()
            .filter_contains("tags", "rust")
            .project(&["id", "x"])
            .build();

        let names = body["ExpressionAttributeNames"].as_object().unwrap();
        // #name0..#name2 plus #proj0..#proj1, no collisions.
        assert_eq!(names.len(), 5);
        let values = body["ExpressionAttributeValues"].as_object().unwrap();
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn put_item_marshalls_and_guards() {
        let mut item = Map::new();
        item.insert("pk".into(), json!("USER#1"));
        item.insert("age".into(), json!(30));
        let body = PutItemRequestBuilder::new("t", &item)
            .unless_exists("pk")
            .build();

        assert_eq!(body["Item"]["pk"], json!({"S": "USER#1"}));
        assert_eq!(body["Item"]["age"], json!({"N": "30"}));
        assert_eq!(body["ConditionExpression"], "attribute_not_exists(#name0)");
    }

    #[test]
    fn update_item_builds_update_expression() {
        let mut key = Map::new();
        key.insert("pk".into(), json!("USER#1"));
        key.insert("sk".into(), json!("USER#1"));
        let body = UpdateItemRequestBuilder::new("t", &key)
            .set("status", "archived")
            .remove("draft")
            .return_all_new()
            .build();

        assert_eq!(body["UpdateExpression"], "SET #name0 = :val0 REMOVE #name1");
        assert_eq!(body["Key"]["pk"], json!({"S": "USER#1"}));
        assert_eq!(body["ReturnValues"], "ALL_NEW");
    }

    #[test]
    fn get_and_delete_requests() {
        let mut key = Map::new();
        key.insert("pk".into(), json!("USER#1"));
        let get = GetItemRequestBuilder::new("t", &key)
            .project(&["email"])
            .consistent_read()
            .build();
        assert_eq!(get["ProjectionExpression"], "#proj0");
        assert_eq!(get["ConsistentRead"], true);

        let del = DeleteItemRequestBuilder::new("t", &key).build();
        assert_eq!(del["Key"]["pk"], json!({"S": "USER#1"}));
        assert!(del.get("ConditionExpression").is_none());
    }
}
