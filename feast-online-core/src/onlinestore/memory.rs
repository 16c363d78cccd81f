use crate::config::{EntityKeySerializationVersion, OnlineStoreConfig};
use crate::error::OnlineStoreError;
use crate::feast::types::{EntityKey, Value};
use crate::key_serialization::serialize_key;
use crate::model::{FeatureDatum, FeatureReference};
use crate::onlinestore::{FeatureRows, OnlineStore, OnlineStoreFactory, check_shape};
use anyhow::{Result, anyhow};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap as HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    event_ts: DateTime<Utc>,
}

/// view name -> serialized entity key -> feature name -> value
type Table = HashMap<String, HashMap<Vec<u8>, HashMap<String, StoredValue>>>;

/// Online store kept in process memory.
///
/// Reads work on a snapshot of the table; writes publish a new table, so readers
/// never wait on writers.
pub struct MemoryOnlineStore {
    project: String,
    table: ArcSwapOption<Table>,
}

impl MemoryOnlineStore {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            table: ArcSwapOption::from_pointee(Table::default()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Materializes one feature value for `entity_key`.
    pub fn write_row(
        &self,
        entity_key: &EntityKey,
        view_name: &str,
        feature_name: &str,
        value: Value,
        event_ts: DateTime<Utc>,
    ) -> Result<()> {
        let key = serialize_key(entity_key, EntityKeySerializationVersion::V3)?;
        let stored = StoredValue { value, event_ts };
        let previous = self.table.rcu(|current| {
            current.as_ref().map(|table| {
                let mut next = Table::clone(table);
                next.entry(view_name.to_string())
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .insert(feature_name.to_string(), stored.clone());
                Arc::new(next)
            })
        });
        if previous.is_none() {
            return Err(anyhow!("online store has been released"));
        }
        Ok(())
    }
}

#[async_trait]
impl OnlineStore for MemoryOnlineStore {
    async fn online_read(
        &self,
        entity_keys: &[EntityKey],
        view_name: &str,
        feature_names: &[String],
    ) -> std::result::Result<FeatureRows, OnlineStoreError> {
        let Some(table) = self.table.load_full() else {
            return Err(OnlineStoreError::released(view_name));
        };
        let view_rows = table.get(view_name);
        let references: Vec<FeatureReference> = feature_names
            .iter()
            .map(|feature_name| FeatureReference::new(view_name, feature_name.as_str()))
            .collect();

        let mut rows: FeatureRows = Vec::with_capacity(entity_keys.len());
        for entity_key in entity_keys {
            let key = serialize_key(entity_key, EntityKeySerializationVersion::V3)
                .map_err(|err| OnlineStoreError::store_read(view_name, err))?;
            let entity_row = view_rows.and_then(|view| view.get(&key));
            let row = references
                .iter()
                .map(|reference| {
                    match entity_row.and_then(|row| row.get(reference.feature_name.as_ref())) {
                        Some(stored) => FeatureDatum::new(
                            reference.clone(),
                            stored.event_ts,
                            stored.value.clone(),
                        ),
                        None => FeatureDatum::absent(reference.clone()),
                    }
                })
                .collect();
            rows.push(row);
        }
        check_shape(&rows, entity_keys.len(), feature_names.len())
            .map_err(|err| OnlineStoreError::store_read(view_name, err))?;
        Ok(rows)
    }

    async fn release(&self) {
        if self.table.swap(None).is_some() {
            debug!("Released in-memory online store for project {}", self.project);
        }
    }
}

/// Builds empty [`MemoryOnlineStore`]s; takes no backend specific options.
pub struct MemoryOnlineStoreFactory;

#[async_trait]
impl OnlineStoreFactory for MemoryOnlineStoreFactory {
    async fn create(
        &self,
        project: &str,
        _config: &OnlineStoreConfig,
    ) -> Result<Arc<dyn OnlineStore>> {
        Ok(Arc::new(MemoryOnlineStore::new(project)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feast::types::value::Val;
    use crate::model::{
        DUMMY_ENTITY_NAME, FeatureGroup, FeatureView, dummy_entity_key,
    };
    use chrono::Duration;

    fn driver(id: i64) -> EntityKey {
        EntityKey {
            join_keys: vec!["driver_id".to_string()],
            entity_values: vec![Value {
                val: Some(Val::Int64Val(id)),
            }],
        }
    }

    fn double(v: f64) -> Value {
        Value {
            val: Some(Val::DoubleVal(v)),
        }
    }

    fn features(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_values_keep_their_position() -> Result<()> {
        let store = MemoryOnlineStore::new("demo");
        let t1 = Utc::now();
        store.write_row(&driver(1), "driver_stats", "conv_rate", double(0.5), t1)?;

        let rows = store
            .online_read(
                &[driver(1), driver(2)],
                "driver_stats",
                &features(&["conv_rate", "acc_rate"]),
            )
            .await?;

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.len() == 2));
        assert_eq!(
            rows[0][0],
            FeatureDatum::new(FeatureReference::new("driver_stats", "conv_rate"), t1, double(0.5))
        );
        assert_eq!(
            rows[0][1],
            FeatureDatum::absent(FeatureReference::new("driver_stats", "acc_rate"))
        );
        assert_eq!(
            rows[1][0],
            FeatureDatum::absent(FeatureReference::new("driver_stats", "conv_rate"))
        );
        assert!(rows[1][1].is_absent());
        Ok(())
    }

    #[tokio::test]
    async fn shape_holds_for_degenerate_requests() -> Result<()> {
        let store = MemoryOnlineStore::new("demo");
        for (entity_count, feature_count) in [(0, 0), (0, 3), (3, 0), (2, 3)] {
            let keys: Vec<EntityKey> = (0..entity_count).map(driver).collect();
            let names: Vec<String> = (0..feature_count).map(|i| format!("f{}", i)).collect();
            let rows = store.online_read(&keys, "unknown_view", &names).await?;
            assert_eq!(rows.len(), entity_count as usize);
            assert!(rows.iter().all(|row| row.len() == feature_count));
        }
        Ok(())
    }

    #[tokio::test]
    async fn repeated_entities_and_features_are_answered_positionally() -> Result<()> {
        let store = MemoryOnlineStore::new("demo");
        let ts = Utc::now();
        store.write_row(&driver(7), "driver_stats", "acc_rate", double(0.9), ts)?;

        let rows = store
            .online_read(
                &[driver(7), driver(8), driver(7)],
                "driver_stats",
                &features(&["acc_rate", "acc_rate"]),
            )
            .await?;
        assert_eq!(rows[0], rows[2]);
        assert_eq!(rows[0][0].value, double(0.9));
        assert_eq!(rows[0][1].value, double(0.9));
        assert!(rows[1].iter().all(FeatureDatum::is_absent));
        Ok(())
    }

    #[tokio::test]
    async fn entity_less_view_reads_through_dummy_key() -> Result<()> {
        let view = FeatureView::new(
            FeatureGroup::new("global_stats", ["total_requests"]),
            Duration::zero(),
            Vec::<String>::new(),
        );
        assert!(view.entity_keys().contains(DUMMY_ENTITY_NAME));

        let store = MemoryOnlineStore::new("demo");
        let value = Value {
            val: Some(Val::Int64Val(42)),
        };
        store.write_row(
            &dummy_entity_key(),
            view.name(),
            "total_requests",
            value.clone(),
            Utc::now(),
        )?;
        let rows = store
            .online_read(&[dummy_entity_key()], view.name(), view.features())
            .await?;
        assert_eq!(rows[0][0].value, value);
        Ok(())
    }

    #[tokio::test]
    async fn unserializable_key_fails_whole_call() -> Result<()> {
        let store = MemoryOnlineStore::new("demo");
        let bad_key = EntityKey {
            join_keys: vec!["score".to_string()],
            entity_values: vec![double(1.5)],
        };
        let err = store
            .online_read(&[driver(1), bad_key], "driver_stats", &features(&["conv_rate"]))
            .await
            .unwrap_err();
        assert!(matches!(err, OnlineStoreError::StoreRead { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn release_is_idempotent_and_blocks_reads() -> Result<()> {
        let store = MemoryOnlineStore::new("demo");
        store.write_row(&driver(1), "driver_stats", "conv_rate", double(0.1), Utc::now())?;
        store.release().await;
        store.release().await;

        let err = store
            .online_read(&[driver(1)], "driver_stats", &features(&["conv_rate"]))
            .await
            .unwrap_err();
        assert!(matches!(err, OnlineStoreError::StoreRead { .. }));
        assert!(
            store
                .write_row(&driver(1), "driver_stats", "conv_rate", double(0.2), Utc::now())
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn release_without_use_is_safe() {
        let store = MemoryOnlineStore::new("demo");
        store.release().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_share_one_store() -> Result<()> {
        let store = Arc::new(MemoryOnlineStore::new("demo"));
        for id in 0..16 {
            store.write_row(
                &driver(id),
                "driver_stats",
                "conv_rate",
                double(id as f64),
                Utc::now(),
            )?;
        }
        let store: Arc<dyn OnlineStore> = store;

        let mut handles = Vec::new();
        for task in 0..8_i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let keys: Vec<EntityKey> = (0..16).map(|id| driver((id + task) % 16)).collect();
                let rows = store
                    .online_read(&keys, "driver_stats", &features(&["conv_rate"]))
                    .await?;
                for (key, row) in keys.iter().zip(rows.iter()) {
                    let expected = match &key.entity_values[0].val {
                        Some(Val::Int64Val(id)) => double(*id as f64),
                        _ => unreachable!(),
                    };
                    assert_eq!(row[0].value, expected);
                }
                Ok::<_, OnlineStoreError>(())
            }));
        }
        for handle in handles {
            handle.await??;
        }
        Ok(())
    }

    #[tokio::test]
    async fn factory_builds_empty_store() -> Result<()> {
        let config = OnlineStoreConfig::from_json(serde_json::json!({"type": "memory"}))?;
        let store = MemoryOnlineStoreFactory.create("demo", &config).await?;
        let rows = store
            .online_read(&[driver(1)], "driver_stats", &features(&["conv_rate"]))
            .await?;
        assert!(rows[0][0].is_absent());
        Ok(())
    }
}
