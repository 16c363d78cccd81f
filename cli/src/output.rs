use chrono::{DateTime, Utc};
use feast_online_core::feast::types::Value;
use feast_online_core::feast::types::value::Val;
use feast_online_core::model::FeatureStatus;
use feast_online_core::{FeatureDatum, FeatureView};
use serde_json::{Map, Value as JsonValue, json};

pub fn value_to_json(value: &Value) -> JsonValue {
    match &value.val {
        None | Some(Val::NullVal(_)) => JsonValue::Null,
        Some(Val::Int32Val(v)) => json!(v),
        Some(Val::Int64Val(v)) | Some(Val::UnixTimestampVal(v)) => json!(v),
        Some(Val::FloatVal(v)) => json!(v),
        Some(Val::DoubleVal(v)) => json!(v),
        Some(Val::StringVal(v)) => json!(v),
        Some(Val::BoolVal(v)) => json!(v),
        Some(Val::BytesVal(v)) => json!(v),
        Some(Val::BytesListVal(list)) => json!(list.val),
        Some(Val::StringListVal(list)) => json!(list.val),
        Some(Val::Int32ListVal(list)) => json!(list.val),
        Some(Val::Int64ListVal(list)) | Some(Val::UnixTimestampListVal(list)) => json!(list.val),
        Some(Val::DoubleListVal(list)) => json!(list.val),
        Some(Val::FloatListVal(list)) => json!(list.val),
        Some(Val::BoolListVal(list)) => json!(list.val),
    }
}

/// Renders one entity row of an online read.
pub fn row_to_json(
    view: &FeatureView,
    entity: JsonValue,
    row: &[FeatureDatum],
    now: DateTime<Utc>,
) -> JsonValue {
    let features: Map<String, JsonValue> = row
        .iter()
        .map(|datum| {
            let status: FeatureStatus = view.status_of(datum, now);
            (
                datum.reference.feature_name.to_string(),
                json!({
                    "value": value_to_json(&datum.value),
                    "status": status,
                    "event_timestamp": datum.event_ts.to_rfc3339(),
                }),
            )
        })
        .collect();
    json!({
        "entity": entity,
        "features": features,
    })
}
