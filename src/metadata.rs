//! Cluster-wide metadata and the cluster registry entries.
use serde::{Deserialize, Serialize};

/// Metadata container for the entire cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    /// Brokers.
    pub brokers: Vec<Broker>,

    /// The ID of the controller broker.
    pub controller_id: i32,

    /// Generated cluster identifier.
    pub cluster_id: String,

    /// Number of topics.
    pub topic_count: usize,

    /// Number of partitions over all topics.
    pub partition_count: usize,
}

impl ClusterMetadata {
    /// Looks up a broker by id.
    ///
    /// Partitions and coordinators only carry broker ids, so this returns `None` rather than dangling when the
    /// broker is gone.
    pub fn broker(&self, id: i32) -> Option<&Broker> {
        self.brokers.iter().find(|b| b.id == id)
    }

    /// Ids of all brokers, in order.
    pub fn broker_ids(&self) -> Vec<i32> {
        self.brokers.iter().map(|b| b.id).collect()
    }
}

/// Metadata for a certain broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    /// The broker ID
    pub id: i32,

    /// The broker hostname
    pub host: String,

    /// The broker port, always in `[1024, 65535]`
    pub port: u16,

    /// Rack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
}

/// Connection state of a registered cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Connected,
    Disconnected,
}

/// User-supplied settings for registering or updating a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub name: String,
    pub bootstrap_servers: String,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, bootstrap_servers: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bootstrap_servers: bootstrap_servers.into(),
            ssl_enabled: false,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// A registered cluster as shown in the cluster list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub id: String,
    pub name: String,
    pub bootstrap_servers: String,
    pub status: ClusterStatus,
    pub version: String,
    pub broker_count: usize,
    pub topic_count: usize,
    pub partition_count: usize,
    pub ssl_enabled: bool,
    pub timeout_ms: u64,
}

impl ClusterInfo {
    pub(crate) fn from_config(id: String, config: ClusterConfig, status: ClusterStatus) -> Self {
        Self {
            id,
            name: config.name,
            bootstrap_servers: config.bootstrap_servers,
            status,
            version: BROKER_VERSION.to_owned(),
            broker_count: 0,
            topic_count: 0,
            partition_count: 0,
            ssl_enabled: config.ssl_enabled,
            timeout_ms: config.timeout_ms,
        }
    }

    /// Copies the counts of a synthesized topology into this entry.
    pub(crate) fn record_counts(&mut self, metadata: &ClusterMetadata) {
        self.broker_count = metadata.brokers.len();
        self.topic_count = metadata.topic_count;
        self.partition_count = metadata.partition_count;
    }
}

/// Broker version reported for every simulated cluster.
pub const BROKER_VERSION: &str = "3.5.0";

/// Outcome of a successful connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub version: String,
    pub broker_count: usize,
}
