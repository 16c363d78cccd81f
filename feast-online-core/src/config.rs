use crate::error::OnlineStoreError;
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

const REDACTED: &str = "***";

/// Online store section of `feature_store.yaml`.
///
/// Only `type` is interpreted here; every other key is handed to the selected
/// backend as is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OnlineStoreConfig(Map<String, JsonValue>);

impl OnlineStoreConfig {
    pub fn from_json(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(fields) => Ok(Self(fields)),
            other => Err(anyhow!(
                "Online store configuration must be a mapping, got {}",
                other
            )),
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn store_type(&self) -> std::result::Result<&str, OnlineStoreError> {
        match self.0.get("type") {
            Some(JsonValue::String(store_type)) => Ok(store_type),
            Some(other) => Err(OnlineStoreError::configuration(
                self.describe(),
                format!("'type' must be a string, got {}", other),
            )),
            None => Err(OnlineStoreError::configuration(
                self.describe(),
                "missing 'type' field",
            )),
        }
    }

    /// Deserializes the backend specific view of this configuration.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(JsonValue::Object(self.0.clone()))
            .with_context(|| format!("Invalid online store configuration {}", self.describe()))
    }

    /// Renders the configuration for error messages with credentials masked.
    pub fn describe(&self) -> String {
        let redacted: Map<String, JsonValue> = self
            .0
            .iter()
            .map(|(key, value)| {
                let lower = key.to_ascii_lowercase();
                if lower.contains("password")
                    || lower.contains("secret")
                    || lower == "connection_string"
                {
                    (key.clone(), JsonValue::String(REDACTED.to_string()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect();
        JsonValue::Object(redacted).to_string()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum EntityKeySerializationVersion {
    V1,
    V2,
    #[default]
    V3,
}

impl From<EntityKeySerializationVersion> for u64 {
    fn from(value: EntityKeySerializationVersion) -> Self {
        match value {
            EntityKeySerializationVersion::V1 => 1,
            EntityKeySerializationVersion::V2 => 2,
            EntityKeySerializationVersion::V3 => 3,
        }
    }
}

impl TryFrom<u64> for EntityKeySerializationVersion {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EntityKeySerializationVersion::V1),
            2 => Ok(EntityKeySerializationVersion::V2),
            3 => Ok(EntityKeySerializationVersion::V3),
            _ => Err(format!(
                "unsupported entity_key_serialization_version {}",
                value
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoConfig {
    pub project: String,
    pub project_description: Option<String>,
    pub online_store: OnlineStoreConfig,
    #[serde(default)]
    pub entity_key_serialization_version: EntityKeySerializationVersion,
}

impl RepoConfig {
    /// Fails unless entity keys use the version 3 layout, the only one online
    /// stores read.
    pub fn check_key_serialization_version(&self) -> std::result::Result<(), OnlineStoreError> {
        match self.entity_key_serialization_version {
            EntityKeySerializationVersion::V3 => Ok(()),
            version => Err(OnlineStoreError::configuration(
                self.online_store.describe(),
                format!(
                    "entity_key_serialization_version {} is not supported, only 3 is",
                    u64::from(version)
                ),
            )),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(anyhow!("Empty configuration file"));
        }
        let config: RepoConfig = serde_saphyr::from_str(yaml).map_err(|err| anyhow!(err))?;
        Ok(config)
    }
}
