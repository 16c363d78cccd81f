use crate::config::{EntityKeySerializationVersion, OnlineStoreConfig};
use crate::error::OnlineStoreError;
use crate::feast::types::{EntityKey, Value as FeastValue};
use crate::key_serialization::serialize_key;
use crate::model::{FeatureDatum, FeatureReference};
use crate::onlinestore::{FeatureRows, OnlineStore, OnlineStoreFactory, check_shape};
use crate::util::{prost_timestamp_to_datetime, read_file_to_bytes};
use anyhow::{Context, Result, anyhow};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost::Message;
use prost_types::Timestamp;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::{ClusterClient, ClusterClientBuilder};
use redis::{
    Client, ClientTlsConfig, ConnectionAddr, ConnectionInfo, IntoConnectionInfo,
    RedisConnectionInfo, RedisResult, TlsCertificates,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONNECTION_STRING: &str = "localhost:6379";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisType {
    #[default]
    #[serde(alias = "redis")]
    SingleNode,
    RedisCluster,
    #[serde(alias = "redis_sentinel")]
    Sentinel,
}

/// Redis specific keys of the online store configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RedisOnlineStoreConfig {
    #[serde(default)]
    pub redis_type: RedisType,
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    #[serde(default)]
    pub sentinel_master: Option<String>,
}

fn default_connection_string() -> String {
    DEFAULT_CONNECTION_STRING.to_string()
}

fn feature_redis_key(view_name: &str, feature_name: &str) -> Result<Vec<u8>> {
    let mut key_bytes = view_name.as_bytes().to_vec();
    key_bytes.push(b':');
    key_bytes.extend_from_slice(feature_name.as_bytes());
    let hashed_key = murmur3::murmur3_32(&mut std::io::Cursor::new(&key_bytes), 0)?;
    Ok(hashed_key.to_le_bytes().to_vec())
}

fn timestamp_redis_key(view_name: &str) -> Vec<u8> {
    ["_ts:", view_name].concat().into_bytes()
}

#[derive(Debug, Default, Clone, PartialEq)]
struct CommonConnectionOptions {
    password: Option<String>,
    username: Option<String>,
    ssl: Option<bool>,
    db: Option<i64>,
    ssl_certfile: Option<String>,
    ssl_keyfile: Option<String>,
    ssl_ca_certs: Option<String>,
}

impl CommonConnectionOptions {
    fn ssl_enabled(&self) -> bool {
        self.ssl.unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct RedisConnectionOption {
    hosts: Vec<(String, u16)>,
    common_options: CommonConnectionOptions,
}

fn parse_redis_connection_string(connection_string: &str) -> Result<RedisConnectionOption> {
    let mut result = RedisConnectionOption::default();
    for (i, part) in connection_string.split(',').map(str::trim).enumerate() {
        if part.matches(':').count() == 1 {
            let (host, port_str) = part
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid connection URL of host at index {}", i))?;
            let port = port_str
                .parse::<u16>()
                .with_context(|| format!("Failed to parse port '{}'", port_str))?;
            result.hosts.push((host.to_string(), port));
        } else if part.matches('=').count() == 1 {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid connection option at index {}", i))?;
            parse_common_options(&mut result.common_options, i, key, value)?;
        } else {
            return Err(anyhow!(
                "Invalid connection URL part at index {}: {}",
                i,
                part
            ));
        }
    }
    if result.hosts.is_empty() {
        return Err(anyhow!(
            "Redis connection string does not contain any host:port"
        ));
    }
    Ok(result)
}

fn parse_common_options(
    result: &mut CommonConnectionOptions,
    i: usize,
    key: &str,
    value: &str,
) -> Result<()> {
    match key.to_ascii_lowercase().as_str() {
        "password" => result.password = Some(value.to_string()),
        "username" => result.username = Some(value.to_string()),
        "db" => {
            result.db = Some(
                value
                    .parse::<i64>()
                    .with_context(|| format!("Invalid db value at index {}: {}", i, value))?,
            )
        }
        "ssl" => {
            let ssl_value = match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(anyhow!(
                        "Invalid ssl value at index {}: {}, supported values are 'true', 'false', '1', '0', 'yes', 'no'",
                        i,
                        value
                    ));
                }
            };
            result.ssl = Some(ssl_value);
        }
        "ssl_certfile" => result.ssl_certfile = Some(value.to_string()),
        "ssl_keyfile" => result.ssl_keyfile = Some(value.to_string()),
        "ssl_ca_certs" => result.ssl_ca_certs = Some(value.to_string()),
        other => {
            return Err(anyhow!(
                "Invalid connection option at index {}: {}",
                i,
                other
            ));
        }
    }
    Ok(())
}

impl TryFrom<&CommonConnectionOptions> for TlsCertificates {
    type Error = anyhow::Error;

    fn try_from(value: &CommonConnectionOptions) -> Result<Self> {
        let client_tls = match (value.ssl_certfile.as_ref(), value.ssl_keyfile.as_ref()) {
            (Some(cert), Some(key)) => Some(ClientTlsConfig {
                client_cert: read_file_to_bytes(cert)?,
                client_key: read_file_to_bytes(key)?,
            }),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "Both ssl_keyfile and ssl_certfile must be provided together or neither"
                ));
            }
        };
        Ok(TlsCertificates {
            client_tls,
            root_cert: value
                .ssl_ca_certs
                .as_deref()
                .map(read_file_to_bytes)
                .transpose()?,
        })
    }
}

#[derive(Debug, Default, Clone)]
struct SingleNodeConnectionOption {
    host: String,
    port: u16,
    common_options: CommonConnectionOptions,
}

impl TryFrom<RedisConnectionOption> for SingleNodeConnectionOption {
    type Error = anyhow::Error;

    fn try_from(value: RedisConnectionOption) -> Result<Self, Self::Error> {
        if value.hosts.len() != 1 {
            return Err(anyhow!(
                "Expected single host for single node redis, got {}",
                value.hosts.len()
            ));
        }
        let (host, port) = &value.hosts[0];
        Ok(SingleNodeConnectionOption {
            host: host.clone(),
            port: *port,
            common_options: value.common_options,
        })
    }
}

impl IntoConnectionInfo for SingleNodeConnectionOption {
    fn into_connection_info(self) -> RedisResult<ConnectionInfo> {
        let mut redis = RedisConnectionInfo::default();
        if let Some(db) = self.common_options.db {
            redis.db = db;
        }
        let addr = if self.common_options.ssl_enabled() {
            ConnectionAddr::TcpTls {
                host: self.host,
                port: self.port,
                insecure: false,
                tls_params: None,
            }
        } else {
            ConnectionAddr::Tcp(self.host, self.port)
        };
        redis.username = self.common_options.username;
        redis.password = self.common_options.password;
        Ok(ConnectionInfo { addr, redis })
    }
}

struct RedisClusterHost {
    host: String,
    port: u16,
    db: Option<i64>,
}

impl From<&RedisConnectionOption> for Vec<RedisClusterHost> {
    fn from(value: &RedisConnectionOption) -> Self {
        let db = value.common_options.db;
        value
            .hosts
            .iter()
            .map(|(host, port)| RedisClusterHost {
                host: host.clone(),
                port: *port,
                db,
            })
            .collect()
    }
}

impl IntoConnectionInfo for RedisClusterHost {
    fn into_connection_info(self) -> RedisResult<ConnectionInfo> {
        let mut redis_info = RedisConnectionInfo::default();
        if let Some(db) = self.db {
            redis_info.db = db;
        }
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host, self.port),
            redis: redis_info,
        })
    }
}

impl TryFrom<RedisConnectionOption> for ClusterClient {
    type Error = anyhow::Error;

    fn try_from(value: RedisConnectionOption) -> Result<Self> {
        let hosts: Vec<RedisClusterHost> = (&value).into();
        let mut builder = ClusterClientBuilder::new(hosts);
        let RedisConnectionOption {
            hosts: _,
            common_options,
        } = value;
        if common_options.ssl_enabled() {
            let certificates = TlsCertificates::try_from(&common_options)?;
            builder = builder.certs(certificates);
        }
        if let Some(username) = common_options.username {
            builder = builder.username(username);
        }
        if let Some(password) = common_options.password {
            builder = builder.password(password);
        }
        Ok(builder.build()?)
    }
}

fn install_tls_provider() {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn check_redis_connection(client: &Client) -> Result<()> {
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .with_context(|| anyhow!("Cannot establish redis connection"))?;
    let ping_response: String = redis::cmd("PING").query_async(&mut conn).await?;
    if ping_response.to_uppercase() != "PONG" {
        return Err(anyhow!(
            "Failed to connect to Redis online store, unexpected PING response: {}",
            ping_response
        ));
    }
    Ok(())
}

/// Online store reading features materialized by Feast into Redis.
///
/// Every entity is a hash keyed by the serialized entity key followed by the
/// project name. Feature values live under the murmur3 hash of
/// `<view>:<feature>` and the view's event timestamp under `_ts:<view>`.
pub struct RedisOnlineStore<C> {
    project: String,
    connection: ArcSwapOption<C>,
}

impl<C> RedisOnlineStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(project: impl Into<String>, connection: C) -> Self {
        Self {
            project: project.into(),
            connection: ArcSwapOption::from_pointee(connection),
        }
    }

    fn hash_key(&self, entity_key: &EntityKey) -> Result<Vec<u8>> {
        let mut key = serialize_key(entity_key, EntityKeySerializationVersion::V3)?;
        key.extend_from_slice(self.project.as_bytes());
        Ok(key)
    }

    async fn read_rows(
        &self,
        connection: &C,
        entity_keys: &[EntityKey],
        view_name: &str,
        feature_names: &[String],
    ) -> Result<FeatureRows> {
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(feature_names.len() + 1);
        fields.push(timestamp_redis_key(view_name));
        for feature_name in feature_names {
            fields.push(feature_redis_key(view_name, feature_name)?);
        }

        let mut pipeline = redis::pipe();
        for entity_key in entity_keys {
            pipeline
                .cmd("HMGET")
                .arg(self.hash_key(entity_key)?)
                .arg(&fields);
        }
        let mut connection = connection.clone();
        let results: Vec<Vec<Option<Vec<u8>>>> = pipeline.query_async(&mut connection).await?;
        if results.len() != entity_keys.len() {
            return Err(anyhow!(
                "Mismatched number of results: expected {}, got {}",
                entity_keys.len(),
                results.len()
            ));
        }

        let references: Vec<FeatureReference> = feature_names
            .iter()
            .map(|feature_name| FeatureReference::new(view_name, feature_name.as_str()))
            .collect();
        results
            .into_iter()
            .map(|values| decode_row(view_name, &references, values))
            .collect()
    }
}

fn decode_row(
    view_name: &str,
    references: &[FeatureReference],
    values: Vec<Option<Vec<u8>>>,
) -> Result<Vec<FeatureDatum>> {
    if values.len() != references.len() + 1 {
        return Err(anyhow!(
            "Mismatched number of fields: expected {}, got {}",
            references.len() + 1,
            values.len()
        ));
    }
    let mut values = values.into_iter();
    let event_ts: Option<DateTime<Utc>> = values
        .next()
        .flatten()
        .map(|bytes| {
            Timestamp::decode(bytes.as_slice())
                .map(|ts| prost_timestamp_to_datetime(&ts))
                .with_context(|| {
                    format!("Failed to decode timestamp for feature view {}", view_name)
                })
        })
        .transpose()?;

    references
        .iter()
        .zip(values)
        .map(|(reference, value)| match value {
            Some(bytes) => {
                let decoded = FeastValue::decode(bytes.as_slice()).with_context(|| {
                    format!("Failed to decode value for feature {}", reference)
                })?;
                Ok(FeatureDatum::new(
                    reference.clone(),
                    event_ts.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    decoded,
                ))
            }
            None => Ok(FeatureDatum::absent(reference.clone())),
        })
        .collect()
}

#[async_trait]
impl<C> OnlineStore for RedisOnlineStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn online_read(
        &self,
        entity_keys: &[EntityKey],
        view_name: &str,
        feature_names: &[String],
    ) -> std::result::Result<FeatureRows, OnlineStoreError> {
        let Some(connection) = self.connection.load_full() else {
            return Err(OnlineStoreError::released(view_name));
        };
        if entity_keys.is_empty() || feature_names.is_empty() {
            return Ok(vec![Vec::new(); entity_keys.len()]);
        }
        let rows = self
            .read_rows(&connection, entity_keys, view_name, feature_names)
            .await
            .and_then(|rows| {
                check_shape(&rows, entity_keys.len(), feature_names.len())?;
                Ok(rows)
            })
            .map_err(|err| OnlineStoreError::store_read(view_name, err))?;
        Ok(rows)
    }

    async fn release(&self) {
        if self.connection.swap(None).is_some() {
            info!("Released redis online store for project {}", self.project);
        }
    }
}

/// Connects to Redis according to `config`.
pub async fn connect(
    project: String,
    config: RedisOnlineStoreConfig,
) -> Result<Arc<dyn OnlineStore>> {
    let RedisOnlineStoreConfig {
        redis_type,
        connection_string,
        sentinel_master: _,
    } = config;
    let connection_option = parse_redis_connection_string(&connection_string)?;
    if connection_option.common_options.ssl_enabled() {
        install_tls_provider();
    }
    match redis_type {
        RedisType::SingleNode => {
            let certificates = TlsCertificates::try_from(&connection_option.common_options)?;
            let single_node_option = SingleNodeConnectionOption::try_from(connection_option)?;
            debug!(
                "Connect to redis {}:{}",
                single_node_option.host, single_node_option.port
            );
            let client = Client::build_with_tls(single_node_option, certificates)?;

            check_redis_connection(&client).await?;
            let connection_pool = ConnectionManager::new(client).await?;
            Ok(Arc::new(RedisOnlineStore::new(project, connection_pool)))
        }
        RedisType::RedisCluster => {
            debug!(
                "Connect to redis cluster with {} seed nodes",
                connection_option.hosts.len()
            );
            let cluster_client = ClusterClient::try_from(connection_option)?;
            let connection_pool = cluster_client
                .get_async_connection()
                .await
                .with_context(|| anyhow!("Cannot establish redis cluster connection"))?;
            Ok(Arc::new(RedisOnlineStore::new(project, connection_pool)))
        }
        RedisType::Sentinel => Err(anyhow!("Sentinel Redis type is not supported yet")),
    }
}

/// Builds [`RedisOnlineStore`]s from the `redis` online store configuration.
pub struct RedisOnlineStoreFactory;

#[async_trait]
impl OnlineStoreFactory for RedisOnlineStoreFactory {
    async fn create(
        &self,
        project: &str,
        config: &OnlineStoreConfig,
    ) -> Result<Arc<dyn OnlineStore>> {
        let redis_config: RedisOnlineStoreConfig = config.decode()?;
        connect(project.to_owned(), redis_config).await
    }
}
