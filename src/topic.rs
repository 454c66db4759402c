use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Leader id of a partition without a leader.
pub const NO_LEADER: i32 = -1;

/// Offset value meaning "unknown".
pub const UNKNOWN_OFFSET: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub name: String,
    pub internal: bool,
    pub partitions: Vec<Partition>,
    pub configs: Vec<TopicConfigEntry>,
}

impl Topic {
    pub fn partition(&self, id: i32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn partition_mut(&mut self, id: i32) -> Option<&mut Partition> {
        self.partitions.iter_mut().find(|p| p.id == id)
    }

    /// Largest replica set of any partition.
    pub fn replication_factor(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.replicas.len())
            .max()
            .unwrap_or_default()
    }

    pub fn config(&self, name: &str) -> Option<&str> {
        self.configs
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Merges `changes` into the config list.
    ///
    /// Existing entries are overwritten and marked as dynamic, unknown names are appended.
    pub fn apply_configs(&mut self, changes: &BTreeMap<String, String>) {
        for (name, value) in changes {
            match self.configs.iter_mut().find(|c| &c.name == name) {
                Some(entry) => {
                    entry.value = value.clone();
                    entry.source = ConfigSource::DynamicTopic;
                }
                None => self
                    .configs
                    .push(TopicConfigEntry::dynamic(name.clone(), value.clone())),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    /// The partition index
    pub id: i32,

    /// The ID of the leader broker, [`NO_LEADER`] if offline
    pub leader: i32,

    /// The set of all nodes that host this partition
    pub replicas: Vec<i32>,

    /// The set of all nodes that are in sync with the leader for this partition
    pub isr: Vec<i32>,

    pub earliest_offset: i64,

    pub latest_offset: i64,

    pub message_count: i64,
}

impl Partition {
    /// Appends `n` records and returns the offset of the first one.
    ///
    /// Offsets only ever grow. A partition with unknown offsets starts at `0`.
    pub fn append(&mut self, n: i64) -> i64 {
        if self.earliest_offset == UNKNOWN_OFFSET || self.latest_offset == UNKNOWN_OFFSET {
            self.earliest_offset = 0;
            self.latest_offset = 0;
        }
        let first = self.latest_offset;
        self.latest_offset += n.max(0);
        self.message_count = self.latest_offset - self.earliest_offset;
        first
    }
}

/// Where the current value of a topic config comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    Default,
    DynamicTopic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfigEntry {
    pub name: String,
    pub value: String,
    pub source: ConfigSource,
    pub is_sensitive: bool,
    pub is_read_only: bool,
}

impl TopicConfigEntry {
    pub fn default_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            source: ConfigSource::Default,
            is_sensitive: false,
            is_read_only: false,
        }
    }

    pub fn dynamic(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: ConfigSource::DynamicTopic,
            ..Self::default_value(name, value)
        }
    }
}

/// Request to create a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
}

impl NewTopic {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            configs: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(name.into(), value.into());
        self
    }
}
