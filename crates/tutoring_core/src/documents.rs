//! crates/tutoring_core/src/documents.rs
//!
//! Collection names, typed (de)serialization of stored documents, and the
//! query/patch semantics every `DocumentStore` implementation shares.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{ServiceError, ServiceResult};
use crate::ports::{Direction, Document, Filter, Patch, PortError, PortResult, Query};

pub mod collections {
    pub const USERS: &str = "users";
    pub const TUTOR_APPLICATIONS: &str = "tutorApplications";
    pub const SUBJECTS: &str = "subjects";
    pub const AVAILABILITY: &str = "availability";
    pub const SESSIONS: &str = "sessions";
    pub const REVIEWS: &str = "reviews";
    pub const CHATS: &str = "chats";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const REPORTED_ISSUES: &str = "reportedIssues";

    /// The message sub-collection of one chat.
    pub fn messages(chat_id: &str) -> String {
        format!("{}/{}/messages", CHATS, chat_id)
    }
}

/// A decoded document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub id: String,
    pub version: u64,
    pub value: T,
}

pub fn decode<T: DeserializeOwned>(doc: Document) -> ServiceResult<Versioned<T>> {
    let value = serde_json::from_value(doc.data).map_err(|e| {
        ServiceError::Store(PortError::Unexpected(format!(
            "Malformed document {}: {}",
            doc.id, e
        )))
    })?;
    Ok(Versioned {
        id: doc.id,
        version: doc.version,
        value,
    })
}

pub fn decode_all<T: DeserializeOwned>(docs: Vec<Document>) -> ServiceResult<Vec<T>> {
    docs.into_iter()
        .map(|doc| decode(doc).map(|v| v.value))
        .collect()
}

pub fn encode<T: Serialize>(value: &T) -> ServiceResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::Store(PortError::Unexpected(format!("Failed to encode: {}", e))))
}

//=========================================================================================
// Field access and ordering
//=========================================================================================

/// Resolves a dotted field path inside a document body.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |node, key| node.get(key))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// A total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Equals { field, .. }
            | Filter::Range { field, .. }
            | Filter::ArrayContains { field, .. } => field,
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Equals { field, value } => lookup(data, field) == Some(value),
            Filter::Range { field, start, end } => {
                let Some(actual) = lookup(data, field) else {
                    return false;
                };
                let within_start = start.as_ref().map_or(true, |s| {
                    type_rank(actual) == type_rank(s) && compare_values(actual, s) != Ordering::Less
                });
                let within_end = end.as_ref().map_or(true, |e| {
                    type_rank(actual) == type_rank(e)
                        && compare_values(actual, e) != Ordering::Greater
                });
                within_start && within_end
            }
            Filter::ArrayContains { field, value } => matches!(
                lookup(data, field),
                Some(Value::Array(items)) if items.contains(value)
            ),
        }
    }
}

impl Query {
    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }

    /// Applies ordering and limit to already-filtered documents.
    /// The sort is stable, so ties keep the incoming order.
    pub fn arrange(&self, docs: &mut Vec<Document>) {
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let l = lookup(&a.data, field).unwrap_or(&Value::Null);
                let r = lookup(&b.data, field).unwrap_or(&Value::Null);
                let ord = compare_values(l, r);
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
    }
}

//=========================================================================================
// Patches
//=========================================================================================

/// Merges a patch into a document body. Dotted keys create intermediate
/// objects as needed.
pub fn apply_patch(data: &mut Value, patch: &Patch) -> PortResult<()> {
    for (path, value) in patch {
        let mut node = &mut *data;
        let mut keys = path.split('.').peekable();
        while let Some(key) = keys.next() {
            let Value::Object(map) = node else {
                return Err(PortError::Unexpected(format!(
                    "Cannot set '{}': parent is not an object",
                    path
                )));
            };
            if keys.peek().is_none() {
                map.insert(key.to_string(), value.clone());
                break;
            }
            node = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
    Ok(())
}

/// Builds a patch from `(path, value)` pairs.
pub fn patch<const N: usize>(fields: [(&str, Value); N]) -> Patch {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document {
            id: id.to_string(),
            version: 1,
            data,
        }
    }

    #[test]
    fn range_filter_is_inclusive_and_type_strict() {
        let q = Query::collection("availability").where_between("date", "2024-06-01", "2024-06-03");
        assert!(q.matches(&json!({"date": "2024-06-01"})));
        assert!(q.matches(&json!({"date": "2024-06-03"})));
        assert!(!q.matches(&json!({"date": "2024-06-04"})));
        assert!(!q.matches(&json!({"date": 20240602})));
        assert!(!q.matches(&json!({})));
    }

    #[test]
    fn array_contains_and_nested_equality() {
        let data = json!({"participantIds": ["a", "b"], "participants": {"tutorId": "b"}});
        assert!(Query::collection("chats")
            .where_array_contains("participantIds", "a")
            .where_eq("participants.tutorId", "b")
            .matches(&data));
        assert!(!Query::collection("chats")
            .where_array_contains("participantIds", "c")
            .matches(&data));
    }

    #[test]
    fn arrange_orders_descending_and_limits() {
        let mut docs = vec![
            doc("a", json!({"rating": 3.5})),
            doc("b", json!({"rating": 4.8})),
            doc("c", json!({})),
            doc("d", json!({"rating": 4.1})),
        ];
        let q = Query::collection("users")
            .order_by("rating", Direction::Descending)
            .limit(3);
        q.arrange(&mut docs);
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a"]);
    }

    #[test]
    fn dotted_patch_creates_nested_fields() {
        let mut data = json!({"ended": false, "deletedBy": {}});
        apply_patch(
            &mut data,
            &patch([("ended", json!(true)), ("deletedBy.u1", json!(true)), ("typing.u2", json!(false))]),
        )
        .unwrap();
        assert_eq!(data["ended"], true);
        assert_eq!(data["deletedBy"]["u1"], true);
        assert_eq!(data["typing"]["u2"], false);
    }

    #[test]
    fn patch_through_a_scalar_is_rejected() {
        let mut data = json!({"ended": false});
        let err = apply_patch(&mut data, &patch([("ended.flag", json!(true))])).unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
    }
}
