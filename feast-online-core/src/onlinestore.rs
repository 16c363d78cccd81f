//! Online store abstraction and backend selection.

pub mod memory;
pub mod redis;

use crate::config::{OnlineStoreConfig, RepoConfig};
use crate::error::OnlineStoreError;
use crate::feast::types::EntityKey;
use crate::model::FeatureDatum;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rustc_hash::FxHashMap as HashMap;
use std::sync::Arc;
use tracing::debug;

pub use self::memory::{MemoryOnlineStore, MemoryOnlineStoreFactory};
pub use self::redis::{RedisOnlineStore, RedisOnlineStoreFactory};

/// Rows of an online read: one per entity key, one datum per feature name.
pub type FeatureRows = Vec<Vec<FeatureDatum>>;

#[async_trait]
pub trait OnlineStore: Send + Sync + 'static {
    /// Reads `feature_names` of view `view_name` for every key in `entity_keys`.
    ///
    /// The outer vector has one element per entity key and the inner vectors one
    /// datum per feature name, both in request order. Features without a
    /// materialized value come back as [`FeatureDatum::absent`]. Any backend fault
    /// fails the whole call with [`OnlineStoreError::StoreRead`].
    async fn online_read(
        &self,
        entity_keys: &[EntityKey],
        view_name: &str,
        feature_names: &[String],
    ) -> std::result::Result<FeatureRows, OnlineStoreError>;

    /// Releases connections held by the store. Safe to call more than once;
    /// reads issued afterwards fail with [`OnlineStoreError::StoreRead`].
    async fn release(&self);
}

/// Verifies the positional shape of a read result before it is handed out.
pub(crate) fn check_shape(
    rows: &FeatureRows,
    entity_count: usize,
    feature_count: usize,
) -> Result<()> {
    if rows.len() != entity_count {
        return Err(anyhow!(
            "Mismatched number of rows: expected {}, got {}",
            entity_count,
            rows.len()
        ));
    }
    if let Some((i, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != feature_count)
    {
        return Err(anyhow!(
            "Mismatched number of features in row {}: expected {}, got {}",
            i,
            feature_count,
            row.len()
        ));
    }
    Ok(())
}

/// Constructor of one online store backend.
#[async_trait]
pub trait OnlineStoreFactory: Send + Sync {
    async fn create(
        &self,
        project: &str,
        config: &OnlineStoreConfig,
    ) -> Result<Arc<dyn OnlineStore>>;
}

/// Table of backend constructors keyed by the `type` field of the online store
/// configuration.
#[derive(Clone, Default)]
pub struct OnlineStoreRegistry {
    factories: HashMap<String, Arc<dyn OnlineStoreFactory>>,
}

impl OnlineStoreRegistry {
    /// Registry without any backend.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    pub fn new() -> Self {
        Self::empty().register("redis", RedisOnlineStoreFactory)
    }

    /// Registers `factory` for `backend_type`, replacing a previous registration.
    pub fn register(
        mut self,
        backend_type: impl Into<String>,
        factory: impl OnlineStoreFactory + 'static,
    ) -> Self {
        self.factories
            .insert(backend_type.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, backend_type: &str) -> bool {
        self.factories.contains_key(backend_type)
    }

    pub fn backend_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort();
        types
    }

    /// Builds the backend named by `config`'s `type`. Nothing is cached; every
    /// call constructs a fresh store.
    pub async fn create(
        &self,
        project: &str,
        config: &OnlineStoreConfig,
    ) -> Result<Arc<dyn OnlineStore>> {
        let backend_type = config.store_type()?;
        let factory = self
            .factories
            .get(backend_type)
            .ok_or_else(|| OnlineStoreError::unsupported_backend(backend_type))?;
        debug!("Create {} online store for project {}", backend_type, project);
        factory.create(project, config).await
    }

    /// Builds the online store of `repo_config` after checking its entity key
    /// serialization version.
    pub async fn create_for_repo(&self, repo_config: &RepoConfig) -> Result<Arc<dyn OnlineStore>> {
        repo_config.check_key_serialization_version()?;
        self.create(&repo_config.project, &repo_config.online_store)
            .await
    }
}

/// Builds the online store configured in `repo_config` from the built-in backends.
pub async fn get_online_store(repo_config: &RepoConfig) -> Result<Arc<dyn OnlineStore>> {
    OnlineStoreRegistry::new().create_for_repo(repo_config).await
}
