use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use shale_core::{Result, ShaleError};
use std::path::PathBuf;

fn load<T: DeserializeOwned>(path: &str) -> Result<T> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::with_name(path))
        .add_source(::config::Environment::with_prefix("SHALE"))
        .build()
        .map_err(|e| ShaleError::Config(e.to_string()))?;

    settings
        .try_deserialize()
        .map_err(|e| ShaleError::Config(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind_addr: String,
    /// Ordered shard endpoints; list position is the shard id recorded in
    /// the catalog, so the order must not change across restarts.
    pub shards: Vec<String>,
    pub snapshot_path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl GatewayConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        load(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShardRole {
    #[default]
    Primary,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    Direct,
    Queue,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardServerConfig {
    pub bind_addr: String,
    pub shard_id: usize,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub role: ShardRole,
    #[serde(default)]
    pub replication: ReplicationMode,
    /// Backup chunk endpoint; required on primaries with replication, since
    /// deletes always propagate by direct call.
    #[serde(default)]
    pub backup_endpoint: Option<String>,
    #[serde(default)]
    pub queue_endpoint: Option<String>,
    /// Queue channel this shard's replication traffic rides on.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

impl ShardServerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        load(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl QueueConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        load(path)
    }
}

fn default_chunk_size() -> usize {
    shale_core::DEFAULT_CHUNK_SIZE
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    30
}
