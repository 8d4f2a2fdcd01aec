//! DynamoDB expression building with attribute-name and value aliasing.
//!
//! Every condition draws a fresh counter value, so `#name{N}` and `:val{N}`
//! aliases are unique within the expression a builder produces, key
//! conditions, filters and projections included.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::DynamoAttrType;

use super::value::marshall;

/// Comparison operators accepted in key conditions and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(CondOp::Eq),
            "<" => Some(CondOp::Lt),
            "<=" => Some(CondOp::Le),
            ">" => Some(CondOp::Gt),
            ">=" => Some(CondOp::Ge),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CondOp::Eq => "=",
            CondOp::Lt => "<",
            CondOp::Le => "<=",
            CondOp::Gt => ">",
            CondOp::Ge => ">=",
        }
    }
}

/// Shared aliasing state. One builder per request keeps every alias unique
/// across that request's expressions.
#[derive(Debug, Default, Clone)]
pub struct ExpressionBuilder {
    names: Map<String, Value>,
    values: Map<String, Value>,
    counter: usize,
    proj_counter: usize,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> usize {
        let n = self.counter;
        self.counter += 1;
        n
    }

    fn alias_name(&mut self, n: usize, attribute: &str) -> String {
        let alias = format!("#name{n}");
        self.names
            .insert(alias.clone(), Value::String(attribute.to_string()));
        alias
    }

    fn alias_value(&mut self, alias: String, value: &Value) -> String {
        self.values.insert(alias.clone(), marshall(value));
        alias
    }

    /// `#nameN op :valN`
    pub fn compare(&mut self, attribute: &str, op: CondOp, value: &Value) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        let val = self.alias_value(format!(":val{n}"), value);
        format!("{name} {} {val}", op.as_str())
    }

    /// Textual-operator variant for callers holding user input.
    pub fn compare_str(&mut self, attribute: &str, op: &str, value: &Value) -> Result<String> {
        let op = CondOp::parse(op)
            .ok_or_else(|| Error::Configuration(format!("unknown DynamoDB operator `{op}`")))?;
        Ok(self.compare(attribute, op, value))
    }

    /// `#nameN BETWEEN :valNa AND :valNb`
    pub fn between(&mut self, attribute: &str, low: &Value, high: &Value) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        let low = self.alias_value(format!(":val{n}a"), low);
        let high = self.alias_value(format!(":val{n}b"), high);
        format!("{name} BETWEEN {low} AND {high}")
    }

    pub fn begins_with(&mut self, attribute: &str, prefix: &Value) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        let val = self.alias_value(format!(":val{n}"), prefix);
        format!("begins_with({name}, {val})")
    }

    pub fn contains(&mut self, attribute: &str, value: &Value) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        let val = self.alias_value(format!(":val{n}"), value);
        format!("contains({name}, {val})")
    }

    pub fn attribute_exists(&mut self, attribute: &str) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        format!("attribute_exists({name})")
    }

    pub fn attribute_not_exists(&mut self, attribute: &str) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        format!("attribute_not_exists({name})")
    }

    pub fn attribute_type(&mut self, attribute: &str, ty: DynamoAttrType) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        let val = self.alias_value(
            format!(":val{n}"),
            &Value::String(ty.as_str().to_string()),
        );
        format!("attribute_type({name}, {val})")
    }

    /// `#nameN IN (:valN_0, :valN_1, ...)`
    pub fn in_list(&mut self, attribute: &str, values: &[Value]) -> String {
        let n = self.next();
        let name = self.alias_name(n, attribute);
        let aliases: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| self.alias_value(format!(":val{n}_{i}"), v))
            .collect();
        format!("{name} IN ({})", aliases.join(", "))
    }

    /// Projection expression with `#projN` aliases.
    pub fn projection(&mut self, attributes: &[&str]) -> String {
        let aliases: Vec<String> = attributes
            .iter()
            .map(|attr| {
                let alias = format!("#proj{}", self.proj_counter);
                self.proj_counter += 1;
                self.names
                    .insert(alias.clone(), Value::String((*attr).to_string()));
                alias
            })
            .collect();
        aliases.join(", ")
    }

    pub fn has_names(&self) -> bool {
        !self.names.is_empty()
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn names_json(&self) -> Value {
        Value::Object(self.names.clone())
    }

    pub fn values_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// SET / REMOVE / ADD / DELETE clause assembly for update expressions.
#[derive(Debug, Default, Clone)]
pub struct UpdateExpressionBuilder {
    expr: ExpressionBuilder,
    sets: Vec<String>,
    removes: Vec<String>,
    adds: Vec<String>,
    deletes: Vec<String>,
}

impl UpdateExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attribute: &str, value: &Value) -> &mut Self {
        let n = self.expr.next();
        let name = self.expr.alias_name(n, attribute);
        let val = self.expr.alias_value(format!(":val{n}"), value);
        self.sets.push(format!("{name} = {val}"));
        self
    }

    pub fn remove(&mut self, attribute: &str) -> &mut Self {
        let n = self.expr.next();
        let name = self.expr.alias_name(n, attribute);
        self.removes.push(name);
        self
    }

    pub fn add(&mut self, attribute: &str, value: &Value) -> &mut Self {
        let n = self.expr.next();
        let name = self.expr.alias_name(n, attribute);
        let val = self.expr.alias_value(format!(":val{n}"), value);
        self.adds.push(format!("{name} {val}"));
        self
    }

    pub fn delete(&mut self, attribute: &str, value: &Value) -> &mut Self {
        let n = self.expr.next();
        let name = self.expr.alias_name(n, attribute);
        let val = self.expr.alias_value(format!(":val{n}"), value);
        self.deletes.push(format!("{name} {val}"));
        self
    }

    /// Clauses joined by single spaces, empty clauses omitted.
    pub fn build(&self) -> String {
        let mut parts = Vec::new();
        if !self.sets.is_empty() {
            parts.push(format!("SET {}", self.sets.join(", ")));
        }
        if !self.removes.is_empty() {
            parts.push(format!("REMOVE {}", self.removes.join(", ")));
        }
        if !self.adds.is_empty() {
            parts.push(format!("ADD {}", self.adds.join(", ")));
        }
        if !self.deletes.is_empty() {
            parts.push(format!("DELETE {}", self.deletes.join(", ")));
        }
        parts.join(" ")
    }

    pub fn names_json(&self) -> Value {
        self.expr.names_json()
    }

    pub fn values_json(&self) -> Value {
        self.expr.values_json()
    }

    pub fn has_values(&self) -> bool {
        self.expr.has_values()
    }
}
