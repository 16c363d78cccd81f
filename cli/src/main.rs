use crate::cli_options::{CliCommand, CliOptions, EntityArg, EntityValueArg};
use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use clap::Parser;
use feast_online_core::config::RepoConfig;
use feast_online_core::feast::types::value::Val;
use feast_online_core::feast::types::{EntityKey, Value};
use feast_online_core::model::dummy_entity_key;
use feast_online_core::onlinestore::MemoryOnlineStoreFactory;
use feast_online_core::{FeatureGroup, FeatureView, OnlineStoreRegistry};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli_options;
mod output;

const FEATURE_REPO_DIR_ENV_VAR_NAME: &str = "FEATURE_REPO_DIR_ENV_VAR";
const FEAST_FS_YAML_FILE_PATH_ENV_VAR: &str = "FEAST_FS_YAML_FILE_PATH";
const DEFAULT_FEATURE_STORE_FILE_NAME: &str = "feature_store.yaml";

fn to_entity_key(entity: &EntityArg) -> EntityKey {
    let (join_keys, entity_values) = entity
        .join_keys
        .iter()
        .map(|(join_key, value)| {
            let val = match value {
                EntityValueArg::Int(v) => Val::Int64Val(*v),
                EntityValueArg::String(v) => Val::StringVal(v.clone()),
            };
            (join_key.clone(), Value { val: Some(val) })
        })
        .unzip();
    EntityKey {
        join_keys,
        entity_values,
    }
}

fn ttl_from_seconds(ttl_seconds: i64) -> Result<Duration> {
    if ttl_seconds < 0 {
        return Err(anyhow!("--ttl-seconds must not be negative"));
    }
    Duration::try_seconds(ttl_seconds)
        .ok_or_else(|| anyhow!("--ttl-seconds {} is out of range", ttl_seconds))
}

fn entity_to_json(entity_key: &EntityKey) -> JsonValue {
    let fields: Map<String, JsonValue> = entity_key
        .join_keys
        .iter()
        .zip(entity_key.entity_values.iter())
        .map(|(join_key, value)| (join_key.clone(), output::value_to_json(value)))
        .collect();
    JsonValue::Object(fields)
}

#[tokio::main]
async fn main() -> Result<()> {
    let CliOptions {
        chdir,
        log_level,
        feature_store_yaml,
        command,
    } = CliOptions::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::from(log_level).into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cwd =
        if let Some(path) = chdir.or_else(|| std::env::var(FEATURE_REPO_DIR_ENV_VAR_NAME).ok()) {
            PathBuf::from(path)
        } else {
            std::env::current_dir()?
        };

    let feature_store_yaml = feature_store_yaml
        .or(std::env::var(FEAST_FS_YAML_FILE_PATH_ENV_VAR).ok())
        .unwrap_or(DEFAULT_FEATURE_STORE_FILE_NAME.to_string());
    let config_path = cwd.join(&feature_store_yaml);
    let yaml_str = fs::read_to_string(&config_path)
        .map_err(|err| anyhow!("Cannot read {}: {}", config_path.display(), err))?;
    let repo_config = RepoConfig::from_yaml_str(&yaml_str)?;

    match command {
        CliCommand::Read {
            view,
            features,
            entities,
            ttl_seconds,
        } => {
            let ttl = ttl_from_seconds(ttl_seconds)?;
            let entity_keys: Vec<EntityKey> = entities.iter().map(to_entity_key).collect();
            let entity_names: Vec<String> = entity_keys
                .first()
                .map(|key| key.join_keys.clone())
                .unwrap_or_default();
            let feature_view = FeatureView::new(
                FeatureGroup::new(view, features),
                ttl,
                entity_names,
            );
            let entity_keys = if feature_view.is_entity_less() {
                vec![dummy_entity_key()]
            } else {
                entity_keys
            };

            let registry =
                OnlineStoreRegistry::new().register("memory", MemoryOnlineStoreFactory);
            let online_store = registry.create_for_repo(&repo_config).await?;
            tracing::info!(
                "Read {} features of {} for {} entities",
                feature_view.features().len(),
                feature_view.name(),
                entity_keys.len()
            );
            let result = online_store
                .online_read(&entity_keys, feature_view.name(), feature_view.features())
                .await;
            online_store.release().await;

            let now = Utc::now();
            for (entity_key, row) in entity_keys.iter().zip(result?.iter()) {
                let rendered =
                    output::row_to_json(&feature_view, entity_to_json(entity_key), row, now);
                println!("{}", rendered);
            }
        }
    }
    Ok(())
}
