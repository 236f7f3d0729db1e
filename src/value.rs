//! Value preprocessing for payloads that cannot serialize natively.
//!
//! The storage surface is [`serde_json::Value`], but payloads arriving from
//! dynamic producers can reference things JSON cannot carry: callables,
//! symbols, arbitrary-precision integers, or self-referential structures.
//! Those arrive (or are rewritten) as tagged records of the form
//! `{"kind": "...", "repr": "..."}` so that a round trip through any
//! backend preserves structure instead of failing mid-write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name that marks a tagged record.
const KIND_FIELD: &str = "kind";
/// Field name that carries the textual representation.
const REPR_FIELD: &str = "repr";

/// A value whose non-serializable parts have been rewritten into tagged
/// records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreprocessedValue {
    /// A non-serializable payload captured by kind and representation.
    Tagged(TaggedValue),
    /// A plain JSON value (possibly containing nested tagged records).
    Scalar(Value),
}

/// The tagged forms, serialized as `{"kind": …, "repr": …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaggedValue {
    Function { repr: String },
    Symbol { repr: String },
    Bigint { repr: String },
    Circular,
}

impl TaggedValue {
    /// The JSON record form of this tag.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn as_tagged(map: &Map<String, Value>) -> Option<TaggedValue> {
    let kind = map.get(KIND_FIELD)?.as_str()?;
    let repr = || map.get(REPR_FIELD).and_then(Value::as_str).map(str::to_owned);
    match kind {
        "function" => Some(TaggedValue::Function { repr: repr()? }),
        "symbol" => Some(TaggedValue::Symbol { repr: repr()? }),
        "bigint" => Some(TaggedValue::Bigint { repr: repr()? }),
        "circular" => Some(TaggedValue::Circular),
        _ => None,
    }
}

/// Classify a value, recognizing tagged records produced by a dynamic
/// producer (or by an earlier [`preprocess`] pass).
pub fn preprocess(value: Value) -> PreprocessedValue {
    if let Value::Object(map) = &value {
        if let Some(tagged) = as_tagged(map) {
            return PreprocessedValue::Tagged(tagged);
        }
    }
    PreprocessedValue::Scalar(value)
}

/// Restore the JSON form. Tagged records keep their record shape, so
/// `restore(preprocess(v)) == v` for every JSON value.
pub fn restore(value: PreprocessedValue) -> Value {
    match value {
        PreprocessedValue::Tagged(tagged) => tagged.to_value(),
        PreprocessedValue::Scalar(value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_values_are_scalar() {
        for value in [json!(1), json!("s"), json!([1, 2]), json!({"a": 1}), json!(null)] {
            let processed = preprocess(value.clone());
            assert!(matches!(processed, PreprocessedValue::Scalar(_)), "{value}");
            assert_eq!(restore(processed), value);
        }
    }

    #[test]
    fn tagged_records_are_recognized() {
        let record = json!({"kind": "bigint", "repr": "123456789012345678901234567890"});
        match preprocess(record.clone()) {
            PreprocessedValue::Tagged(TaggedValue::Bigint { repr }) => {
                assert_eq!(repr, "123456789012345678901234567890");
            }
            other => panic!("expected bigint tag, got {other:?}"),
        }
        assert_eq!(restore(preprocess(record.clone())), record);
    }

    #[test]
    fn circular_tag_needs_no_repr() {
        let record = json!({"kind": "circular"});
        assert!(matches!(
            preprocess(record),
            PreprocessedValue::Tagged(TaggedValue::Circular)
        ));
    }

    #[test]
    fn unknown_kinds_stay_plain_objects() {
        let record = json!({"kind": "unrelated", "other": 1});
        assert!(matches!(preprocess(record), PreprocessedValue::Scalar(_)));
    }

    #[test]
    fn serialized_form_is_the_record_shape() {
        let tagged = TaggedValue::Function { repr: "fn main()".into() };
        assert_eq!(tagged.to_value(), json!({"kind": "function", "repr": "fn main()"}));
    }
}
