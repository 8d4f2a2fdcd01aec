//! DynamoDB attribute-value codec: JSON language values to typed attribute
//! values and back.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Convert a language value into a typed DynamoDB attribute value.
///
/// Sequences collapse to the narrowest set type: all-string becomes `SS`,
/// all-number becomes `NS`, anything else (including empty) stays a list.
pub fn marshall(value: &Value) -> Value {
    match value {
        Value::Null => serde_json::json!({"NULL": true}),
        Value::String(s) => serde_json::json!({"S": s}),
        Value::Number(n) => serde_json::json!({"N": n.to_string()}),
        Value::Bool(b) => serde_json::json!({"BOOL": b}),
        Value::Array(items) => {
            if items.is_empty() {
                serde_json::json!({"L": []})
            } else if items.iter().all(Value::is_string) {
                serde_json::json!({"SS": items})
            } else if items.iter().all(Value::is_number) {
                let strings: Vec<String> = items.iter().map(|n| n.to_string()).collect();
                serde_json::json!({"NS": strings})
            } else {
                let items: Vec<Value> = items.iter().map(marshall).collect();
                serde_json::json!({"L": items})
            }
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), marshall(v));
            }
            serde_json::json!({"M": out})
        }
    }
}

/// Marshall every value of an item map.
pub fn marshall_item(item: &Map<String, Value>) -> Map<String, Value> {
    item.iter().map(|(k, v)| (k.clone(), marshall(v))).collect()
}

/// Convert a typed attribute value back into a language value.
pub fn unmarshall(attr: &Value) -> Result<Value> {
    let map = attr.as_object().ok_or_else(|| codec_error(attr))?;
    let (key, inner) = map.iter().next().ok_or_else(|| codec_error(attr))?;
    if map.len() != 1 {
        return Err(codec_error(attr));
    }

    let value = match key.as_str() {
        "NULL" => Value::Null,
        "S" => inner.clone(),
        "BOOL" => inner.clone(),
        "B" => inner.clone(),
        "N" => parse_number(inner)?,
        "SS" | "BS" => inner.clone(),
        "NS" => {
            let items = inner.as_array().ok_or_else(|| codec_error(attr))?;
            Value::Array(items.iter().map(parse_number).collect::<Result<_>>()?)
        }
        "L" => {
            let items = inner.as_array().ok_or_else(|| codec_error(attr))?;
            Value::Array(items.iter().map(unmarshall).collect::<Result<_>>()?)
        }
        "M" => {
            let entries = inner.as_object().ok_or_else(|| codec_error(attr))?;
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), unmarshall(v)?);
            }
            Value::Object(out)
        }
        _ => return Err(codec_error(attr)),
    };
    Ok(value)
}

/// Unmarshall every value of an item map.
pub fn unmarshall_item(item: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (k, v) in item {
        out.insert(k.clone(), unmarshall(v)?);
    }
    Ok(out)
}

fn parse_number(value: &Value) -> Result<Value> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::Configuration(format!("numeric attribute is not a string: {value}")))?;
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
        .ok_or_else(|| Error::Configuration(format!("unparseable numeric attribute `{text}`")))
}

fn codec_error(attr: &Value) -> Error {
    Error::Configuration(format!("malformed DynamoDB attribute value: {attr}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_round_trip() {
        for value in [
            json!(null),
            json!("text"),
            json!(42),
            json!(-7),
            json!(2.5),
            json!(true),
            json!(false),
        ] {
            assert_eq!(unmarshall(&marshall(&value)).unwrap(), value);
        }
    }

    #[test]
    fn string_sequences_become_string_sets() {
        assert_eq!(marshall(&json!(["a", "b"])), json!({"SS": ["a", "b"]}));
        assert_eq!(
            unmarshall(&json!({"SS": ["a", "b"]})).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn number_sequences_become_number_sets() {
        assert_eq!(marshall(&json!([1, 2])), json!({"NS": ["1", "2"]}));
        assert_eq!(unmarshall(&json!({"NS": ["1", "2"]})).unwrap(), json!([1, 2]));
    }

    #[test]
    fn empty_and_mixed_sequences_stay_lists() {
        assert_eq!(marshall(&json!([])), json!({"L": []}));
        assert_eq!(
            marshall(&json!(["a", 1])),
            json!({"L": [{"S": "a"}, {"N": "1"}]})
        );
        assert_eq!(
            unmarshall(&json!({"L": [{"S": "a"}, {"N": "1"}]})).unwrap(),
            json!(["a", 1])
        );
    }

    #[test]
    fn nested_objects_round_trip() {
        let value = json!({"user": {"id": 1, "tags": ["x", "y"], "meta": {"ok": true}}});
        assert_eq!(unmarshall(&marshall(&value)).unwrap(), value);
    }

    #[test]
    fn canonical_attribute_values_round_trip() {
        for attr in [
            json!({"S": "x"}),
            json!({"N": "12"}),
            json!({"BOOL": true}),
            json!({"NULL": true}),
            json!({"M": {"a": {"S": "b"}}}),
            json!({"L": [{"BOOL": false}]}),
            json!({"SS": ["a"]}),
            json!({"NS": ["3"]}),
        ] {
            let round = marshall(&unmarshall(&attr).unwrap());
            // NULL unmarshalls to null which marshalls back to NULL, etc.
            assert_eq!(round, attr);
        }
    }

    #[test]
    fn malformed_attributes_are_rejected() {
        assert!(unmarshall(&json!("bare")).is_err());
        assert!(unmarshall(&json!({"XX": 1})).is_err());
        assert!(unmarshall(&json!({"S": "a", "N": "1"})).is_err());
    }
}
