//! Deterministic plan hashing.
//!
//! Two plans hash identically iff their canonical JSON serializations are
//! byte-equal: tables sorted by name, columns sorted by name within each
//! table, indexes sorted by name. The generation timestamp and the stored
//! hash itself are excluded so re-compiling an unchanged model set yields an
//! unchanged hash.

use serde_json::Value;

use super::MigrationPlan;

/// Canonical JSON for hashing and equality checks.
pub fn canonical_json(plan: &MigrationPlan) -> String {
    let mut value = serde_json::to_value(plan).expect("plans always serialize");
    if let Value::Object(map) = &mut value {
        map.remove("generatedAt");
        map.remove("hash");
        if let Some(Value::Array(tables)) = map.get_mut("tables") {
            for table in tables.iter_mut() {
                if let Value::Object(table) = table {
                    sort_by_key(table.get_mut("columns"), "name");
                    sort_by_key(table.get_mut("indexes"), "name");
                }
            }
            tables.sort_by(|a, b| str_field(a, "table").cmp(&str_field(b, "table")));
        }
    }
    // serde_json objects iterate in sorted key order, so this serialization
    // is stable across runs.
    value.to_string()
}

/// md5 over the canonical JSON, hex-encoded.
pub fn plan_hash(plan: &MigrationPlan) -> String {
    format!("{:x}", md5::compute(canonical_json(plan)))
}

fn sort_by_key(value: Option<&mut Value>, key: &str) {
    if let Some(Value::Array(items)) = value {
        items.sort_by(|a, b| str_field(a, key).cmp(&str_field(b, key)));
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::meta::SchemaMeta;
    use crate::model::normalize;
    use crate::plan::compile;

    fn plan_for(defs: &[&str]) -> MigrationPlan {
        let models = defs
            .iter()
            .map(|json| normalize(serde_json::from_str(json).unwrap()))
            .collect();
        compile(&SchemaMeta::build(models), DialectKind::Postgres)
    }

    #[test]
    fn hash_is_stable_across_recompiles() {
        let defs = [r#"{"name": "User", "attributes": [{"name": "email"}]}"#];
        let a = plan_for(&defs);
        let b = plan_for(&defs);
        // generated_at differs; the hash must not.
        assert_eq!(a.hash, b.hash);
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn hash_is_independent_of_model_declaration_order() {
        let a = plan_for(&[r#"{"name": "User"}"#, r#"{"name": "Post"}"#]);
        let b = plan_for(&[r#"{"name": "Post"}"#, r#"{"name": "User"}"#]);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn hash_changes_when_structure_changes() {
        let a = plan_for(&[r#"{"name": "User"}"#]);
        let b = plan_for(&[r#"{"name": "User", "attributes": [{"name": "email"}]}"#]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn canonical_json_strips_volatile_fields() {
        let plan = plan_for(&[r#"{"name": "User"}"#]);
        let canonical = canonical_json(&plan);
        assert!(!canonical.contains("generatedAt"));
        assert!(!canonical.contains("\"hash\""));
    }
}
