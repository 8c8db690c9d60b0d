//! Outbound payload shaping.
//!
//! Every call a saga makes carries the saga id next to the step's own data so
//! the receiving service can correlate and deduplicate.

use serde_json::{Map, Value};

use crate::SagaId;

/// Field name under which the saga id travels in outbound payloads.
pub const SAGA_ID_FIELD: &str = "sagaId";

/// Returns `data` with a `sagaId` field merged in.
///
/// Objects are merged key by key (the saga id wins over a caller-supplied
/// `sagaId`). `null` yields an object holding only the saga id. Any other
/// value is nested under `"data"`.
pub fn with_saga_id(data: &Value, saga_id: SagaId) -> Value {
    let mut object = match data {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    object.insert(
        SAGA_ID_FIELD.to_string(),
        Value::String(saga_id.to_string()),
    );
    Value::Object(object)
}
