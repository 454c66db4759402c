use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::{group::ConsumerGroup, metadata::ClusterMetadata, synth::Synthesizer, topic::Topic};

/// Everything the engine knows about one cluster.
///
/// Consumer groups only commit offsets against topics of the same topology, and the counts in
/// [`ClusterMetadata`] always match the topics actually present.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub metadata: ClusterMetadata,
    pub topics: BTreeMap<String, Topic>,
    pub groups: BTreeMap<String, ConsumerGroup>,

    /// Next partition for records that carry neither a partition nor a key.
    round_robin: usize,
}

impl ClusterTopology {
    pub(crate) fn synthesize(synth: &mut Synthesizer, group_count: usize) -> Self {
        let metadata = synth.cluster_metadata();

        let topics: Vec<Topic> = (0..metadata.topic_count)
            .map(|i| synth.topic(i + 1))
            .collect();
        let groups = (0..group_count)
            .map(|i| synth.consumer_group_over(i + 1, &topics))
            .map(|g| (g.group_id.clone(), g))
            .collect();

        let mut topology = Self {
            metadata,
            topics: topics.into_iter().map(|t| (t.name.clone(), t)).collect(),
            groups,
            round_robin: 0,
        };
        topology.refresh_counts();
        topology
    }

    /// Recomputes topic and partition counts after topics were added or removed.
    pub(crate) fn refresh_counts(&mut self) {
        self.metadata.topic_count = self.topics.len();
        self.metadata.partition_count = self.topics.values().map(|t| t.partitions.len()).sum();
    }

    pub(crate) fn next_round_robin(&mut self, partitions: usize) -> i32 {
        let partition = self.round_robin % partitions.max(1);
        self.round_robin = self.round_robin.wrapping_add(1);
        partition as i32
    }
}

/// Look-aside cache of [`ClusterTopology`] per cluster id.
#[derive(Debug, Default)]
pub(crate) struct TopologyCache {
    cache: Mutex<HashMap<String, ClusterTopology>>,
}

impl TopologyCache {
    /// Grab a copy of the cached topology.
    pub(crate) fn get(&self, cluster_id: &str) -> Option<ClusterTopology> {
        let topology = self.cache.lock().get(cluster_id).cloned();
        if topology.is_some() {
            debug!(cluster_id, "using cached topology");
        }
        topology
    }

    /// Runs `f` on the slot of `cluster_id` while holding the cache lock.
    ///
    /// `f` sees `None` when the cluster has no topology yet and may fill the slot.
    pub(crate) fn with<T>(
        &self,
        cluster_id: &str,
        f: impl FnOnce(&mut Option<ClusterTopology>) -> T,
    ) -> T {
        let mut cache = self.cache.lock();
        let mut slot = cache.remove(cluster_id);
        if slot.is_none() {
            debug!(cluster_id, "topology cache miss");
        }

        let out = f(&mut slot);

        if let Some(topology) = slot {
            cache.insert(cluster_id.to_owned(), topology);
        }
        out
    }

    pub(crate) fn invalidate(&self, cluster_id: &str) {
        self.cache.lock().remove(cluster_id);
        debug!(cluster_id, "invalidated topology cache");
    }
}
