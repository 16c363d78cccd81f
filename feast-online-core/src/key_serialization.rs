use crate::config::EntityKeySerializationVersion;
use crate::feast::types::EntityKey;
use crate::feast::types::Value;
use crate::feast::types::value::Val;
use crate::feast::types::value_type::Enum;
use anyhow::{Result, anyhow};

fn push_typed_bytes(bytes: &mut Vec<u8>, value_type: Enum, payload: &[u8]) {
    bytes.extend((value_type as u32).to_le_bytes());
    bytes.extend((payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
}

fn serialize_value(bytes: &mut Vec<u8>, value: &Value) -> Result<()> {
    let val = value
        .val
        .as_ref()
        .ok_or_else(|| anyhow!("Entity key value is empty"))?;
    match val {
        Val::Int32Val(v) => push_typed_bytes(bytes, Enum::Int32, &v.to_le_bytes()),
        Val::Int64Val(v) => push_typed_bytes(bytes, Enum::Int64, &v.to_le_bytes()),
        Val::StringVal(v) => push_typed_bytes(bytes, Enum::String, v.as_bytes()),
        Val::BytesVal(v) => push_typed_bytes(bytes, Enum::Bytes, v),
        other => return Err(anyhow!("Unsupported entity key value type: {:?}", other)),
    }
    Ok(())
}

/// Serializes an entity key the way Feast materializes it into online stores.
/// Join keys are sorted, so the order of pairs in `entity_key` does not matter.
pub fn serialize_key(
    entity_key: &EntityKey,
    serializer_version: EntityKeySerializationVersion,
) -> Result<Vec<u8>> {
    if serializer_version != EntityKeySerializationVersion::V3 {
        return Err(anyhow!(
            "Unsupported entity key serialization version {}",
            u64::from(serializer_version)
        ));
    }
    if entity_key.join_keys.len() != entity_key.entity_values.len() {
        return Err(anyhow!(
            "Entity key has {} join keys but {} values",
            entity_key.join_keys.len(),
            entity_key.entity_values.len()
        ));
    }
    let mut pairs: Vec<(&str, &Value)> = entity_key
        .join_keys
        .iter()
        .map(String::as_str)
        .zip(entity_key.entity_values.iter())
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut bytes: Vec<u8> = vec![];
    bytes.extend((pairs.len() as u32).to_le_bytes());
    for (key, _) in &pairs {
        push_typed_bytes(&mut bytes, Enum::String, key.as_bytes());
    }
    for (_, value) in &pairs {
        serialize_value(&mut bytes, value)?;
    }
    Ok(bytes)
}
