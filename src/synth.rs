//! Synthesizes internally consistent cluster topology from a [`RandomSource`].
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    group::{ConsumerGroup, Coordinator, GroupOffset, GroupState, Member},
    log_store::LogLevel,
    metadata::{Broker, ClusterMetadata},
    random::RandomSource,
    record::ConsumerRecord,
    topic::{NewTopic, Partition, Topic, TopicConfigEntry},
};

/// Size of the broker pool partitions and coordinators are placed on, unless overridden.
pub const DEFAULT_BROKER_POOL: i32 = 3;

const COMPONENTS: [&str; 5] = [
    "Broker",
    "Controller",
    "Producer",
    "Consumer",
    "GroupCoordinator",
];

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const GIB: i64 = 1024 * 1024 * 1024;

/// Pins the shape of a synthesized topic.
///
/// `None` fields are drawn at random.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicShape {
    pub partitions: Option<i32>,
    pub replication_factor: Option<i32>,
}

/// Log line as emitted by a broker process, before it is turned into a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub thread: String,
    pub class: String,
}

#[derive(Debug)]
pub struct Synthesizer<R = rand::rngs::StdRng> {
    random: RandomSource<R>,
    broker_pool: i32,
}

impl<R: Rng> Synthesizer<R> {
    pub fn new(random: RandomSource<R>) -> Self {
        Self {
            random,
            broker_pool: DEFAULT_BROKER_POOL,
        }
    }

    /// Places partitions on brokers `0..broker_pool`.
    pub fn with_broker_pool(self, broker_pool: i32) -> Self {
        Self {
            broker_pool: broker_pool.max(1),
            ..self
        }
    }

    pub fn broker_pool(&self) -> i32 {
        self.broker_pool
    }

    pub fn random(&mut self) -> &mut RandomSource<R> {
        &mut self.random
    }

    pub fn broker(&mut self, id: i32) -> Broker {
        let rack = self
            .random
            .boolean()
            .then(|| format!("rack-{}", self.random.int(1, 3)));

        Broker {
            id,
            host: format!("broker-{id}.kafka.cluster"),
            port: self.random.port(),
            rack,
        }
    }

    pub fn cluster_metadata(&mut self) -> ClusterMetadata {
        let broker_count = self.random.int32(3, 5);
        let topic_count = self.random.int(10, 50);

        let brokers: Vec<_> = (0..broker_count).map(|id| self.broker(id)).collect();

        ClusterMetadata {
            brokers,
            controller_id: self.random.int32(0, broker_count - 1),
            cluster_id: format!("cluster-{}", self.random.slug(12)),
            topic_count: topic_count as usize,
            partition_count: self.random.int(topic_count, topic_count * 5) as usize,
        }
    }

    pub fn topic(&mut self, sequence_id: usize) -> Topic {
        self.topic_with_shape(sequence_id, TopicShape::default())
    }

    pub fn topic_with_shape(&mut self, sequence_id: usize, shape: TopicShape) -> Topic {
        let partition_count = shape
            .partitions
            .unwrap_or_else(|| self.random.int32(1, 10))
            .max(1);
        let replication_factor = shape
            .replication_factor
            .unwrap_or_else(|| self.random.int32(1, 3))
            .clamp(1, self.broker_pool);

        let partitions = (0..partition_count)
            .map(|id| {
                let (replicas, isr) = self.placement(replication_factor);
                let earliest_offset = self.random.int(0, 10_000);
                let latest_offset = self.random.int(10_000, 50_000);
                Partition {
                    id,
                    leader: replicas[0],
                    replicas,
                    isr,
                    earliest_offset,
                    latest_offset,
                    message_count: latest_offset - earliest_offset,
                }
            })
            .collect();

        let cleanup_policy = if self.random.boolean() {
            "delete"
        } else {
            "compact"
        };

        Topic {
            name: format!("topic-{sequence_id}-{}", self.random.slug(5)),
            internal: self.random.boolean(),
            partitions,
            configs: vec![
                TopicConfigEntry::default_value("cleanup.policy", cleanup_policy),
                TopicConfigEntry::default_value(
                    "retention.ms",
                    (self.random.int(1, 7) * DAY_MS).to_string(),
                ),
                TopicConfigEntry::default_value(
                    "retention.bytes",
                    (self.random.int(1, 10) * GIB).to_string(),
                ),
            ],
        }
    }

    /// Fresh, empty topic for a creation request.
    ///
    /// Replicas are assigned round robin over the broker pool and are all in sync. Configs of the request
    /// override the defaults.
    pub fn new_topic(&mut self, request: &NewTopic) -> Topic {
        let mut topic = self.topic_with_shape(
            0,
            TopicShape {
                partitions: Some(request.partitions),
                replication_factor: Some(request.replication_factor),
            },
        );
        topic.name = request.name.clone();
        topic.internal = false;

        let rf = request.replication_factor.clamp(1, self.broker_pool);
        for partition in &mut topic.partitions {
            let replicas: Vec<i32> = (0..rf)
                .map(|i| (partition.id + i) % self.broker_pool)
                .collect();
            partition.leader = replicas[0];
            partition.isr = replicas.clone();
            partition.replicas = replicas;
            partition.earliest_offset = 0;
            partition.latest_offset = 0;
            partition.message_count = 0;
        }

        topic.apply_configs(&request.configs);
        topic
    }

    /// Distinct replicas with the leader first, and an ISR holding the leader plus a random subset of the rest.
    fn placement(&mut self, replication_factor: i32) -> (Vec<i32>, Vec<i32>) {
        let pool: Vec<i32> = (0..self.broker_pool).collect();
        let replicas = self.random.sample(&pool, replication_factor as usize);

        let followers = replicas.len().saturating_sub(1);
        let in_sync_followers = self.random.int(0, followers as i64) as usize;
        let mut isr = vec![replicas[0]];
        isr.extend(self.random.sample(&replicas[1..], in_sync_followers));

        (replicas, isr)
    }

    /// Consumer group over made-up topics.
    pub fn consumer_group(&mut self, sequence_id: usize) -> ConsumerGroup {
        let now = Utc::now();
        let topic_count = self.random.int(1, 5);

        let mut offsets = vec![];
        for _ in 0..topic_count {
            let topic = format!("topic-{}-{}", self.random.int(1, 10), self.random.slug(5));
            let partition_count = self.random.int32(1, 5);

            for partition in 0..partition_count {
                let current = self.random.int(0, 50_000);
                let end = self.random.int(current, 60_000);
                let consumed = self.random.recent_timestamp(now);
                offsets.push(GroupOffset::new(
                    topic.clone(),
                    partition,
                    current,
                    end,
                    Some(consumed),
                ));
            }
        }

        self.assemble_group(sequence_id, offsets)
    }

    /// Consumer group committed against existing topics.
    ///
    /// End offsets are the partitions' latest offsets and committed offsets lie within the retained range.
    pub fn consumer_group_over(&mut self, sequence_id: usize, topics: &[Topic]) -> ConsumerGroup {
        if topics.is_empty() {
            return self.consumer_group(sequence_id);
        }

        let now = Utc::now();
        let topic_count = self.random.int(1, 5_i64.min(topics.len() as i64)) as usize;
        let picked: Vec<&Topic> = self
            .random
            .sample(&topics.iter().collect::<Vec<_>>(), topic_count);

        let mut offsets = vec![];
        for topic in picked {
            for partition in &topic.partitions {
                let earliest = partition.earliest_offset.max(0);
                let latest = partition.latest_offset.max(earliest);
                let current = self.random.int(earliest, latest);
                let consumed = self.random.recent_timestamp(now);
                offsets.push(GroupOffset::new(
                    topic.name.clone(),
                    partition.id,
                    current,
                    latest,
                    Some(consumed),
                ));
            }
        }

        self.assemble_group(sequence_id, offsets)
    }

    fn assemble_group(&mut self, sequence_id: usize, offsets: Vec<GroupOffset>) -> ConsumerGroup {
        // topic -> partitions with committed offsets
        let mut owned: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
        for offset in &offsets {
            owned
                .entry(offset.topic.as_str())
                .or_default()
                .push(offset.partition);
        }
        let topic_names: Vec<&str> = owned.keys().copied().collect();

        let member_count = self.random.int(1, 5);
        let members = (0..member_count)
            .map(|i| {
                let topic_count = self.random.int(1, topic_names.len() as i64) as usize;
                let assignment = self
                    .random
                    .sample(&topic_names, topic_count)
                    .into_iter()
                    .map(|topic| {
                        let partitions = &owned[topic];
                        let count = self.random.int(1, partitions.len() as i64) as usize;
                        let set: BTreeSet<i32> =
                            self.random.sample(partitions, count).into_iter().collect();
                        (topic.to_owned(), set)
                    })
                    .collect();

                Member {
                    member_id: format!("member-{i}-{}", self.random.string(8)),
                    client_id: format!("client-{i}"),
                    host: self.random.ip().to_string(),
                    assignment,
                }
            })
            .collect();

        let state = GroupState::ALL[self.random.index(GroupState::ALL.len())];

        ConsumerGroup {
            group_id: format!("group-{sequence_id}-{}", self.random.slug(5)),
            state,
            coordinator: Coordinator {
                id: self.random.int32(0, self.broker_pool - 1),
                host: self.random.ip().to_string(),
                port: self.random.port(),
            },
            members,
            offsets,
        }
    }

    pub fn message(&mut self, topic: &str, partition: i32, offset: i64) -> ConsumerRecord {
        let now = Utc::now();

        let headers = if self.random.boolean() {
            BTreeMap::from([
                ("content-type".to_owned(), "application/json".to_owned()),
                (
                    "user-id".to_owned(),
                    format!("user-{}", self.random.int(1, 1000)),
                ),
                ("trace-id".to_owned(), self.random.string(16)),
            ])
        } else {
            BTreeMap::new()
        };

        let key = self
            .random
            .boolean()
            .then(|| format!("key-{}", self.random.string(8)));

        let value = if self.random.boolean() {
            json!({
                "id": self.random.int(1, 10_000),
                "name": self.random.text(20),
                "value": self.random.int(1, 100),
                "timestamp": now.timestamp_millis(),
            })
            .to_string()
        } else {
            self.random.text(50)
        };

        ConsumerRecord {
            topic: topic.to_owned(),
            partition,
            offset,
            timestamp: self.random.recent_timestamp(now),
            key,
            value,
            headers,
        }
    }

    /// `count` broker log lines from the past 30 days, newest first.
    pub fn raw_logs(&mut self, count: usize) -> Vec<RawLog> {
        let now = Utc::now();
        let mut logs: Vec<_> = (0..count)
            .map(|_| {
                let len = self.random.int(20, 100) as usize;
                RawLog {
                    timestamp: self.random.recent_timestamp(now),
                    level: LogLevel::ALL[self.random.index(LogLevel::ALL.len())],
                    component: COMPONENTS[self.random.index(COMPONENTS.len())].to_owned(),
                    message: self.random.text(len),
                    thread: format!("kafka-{}", self.random.slug(8)),
                    class: format!("kafka.{}", self.random.slug(10)),
                }
            })
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn synth(seed: u64) -> Synthesizer {
        Synthesizer::new(RandomSource::seeded(seed))
    }

    fn assert_partition_invariants(p: &Partition, pool: i32) {
        assert!(p.earliest_offset <= p.latest_offset);
        assert_eq!(p.message_count, p.latest_offset - p.earliest_offset);
        assert!(p.replicas.contains(&p.leader));
        assert!(!p.isr.is_empty());
        assert!(p.isr.len() <= p.replicas.len());
        assert!(p.isr.iter().all(|id| p.replicas.contains(id)));
        assert!(p.replicas.iter().all(|id| (0..pool).contains(id)));

        let distinct: BTreeSet<_> = p.replicas.iter().collect();
        assert_eq!(distinct.len(), p.replicas.len());
    }

    #[test]
    fn test_three_partition_topic() {
        let mut synth = synth(1);
        let topic = synth.topic_with_shape(
            1,
            TopicShape {
                partitions: Some(3),
                replication_factor: None,
            },
        );

        let ids: Vec<_> = topic.partitions.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(topic.partitions.iter().all(|p| (0..3).contains(&p.leader)));
        assert!(topic.name.starts_with("topic-1-"));
        assert_eq!(topic.configs.len(), 3);
    }

    #[test]
    fn test_new_topic() {
        let mut synth = synth(2);
        let request = NewTopic::new("orders", 4, 2).with_config("cleanup.policy", "compact");
        let topic = synth.new_topic(&request);

        assert_eq!(topic.name, "orders");
        assert_eq!(topic.partitions.len(), 4);
        for p in &topic.partitions {
            assert_eq!(p.replicas.len(), 2);
            assert_eq!(p.isr, p.replicas);
            assert_eq!((p.earliest_offset, p.latest_offset, p.message_count), (0, 0, 0));
            assert_partition_invariants(p, DEFAULT_BROKER_POOL);
        }
        assert_eq!(topic.config("cleanup.policy"), Some("compact"));
    }

    #[test]
    fn test_replication_factor_clamped_to_pool() {
        let mut synth = synth(3).with_broker_pool(2);
        let topic = synth.topic_with_shape(
            0,
            TopicShape {
                partitions: Some(5),
                replication_factor: Some(3),
            },
        );
        assert!(topic.partitions.iter().all(|p| p.replicas.len() == 2));
    }

    #[test]
    fn test_cluster_metadata() {
        let mut synth = synth(4);
        let metadata = synth.cluster_metadata();

        assert!((3..=5).contains(&metadata.brokers.len()));
        assert!(metadata.broker(metadata.controller_id).is_some());
        assert!(metadata.cluster_id.starts_with("cluster-"));
        assert_eq!(metadata.cluster_id.len(), "cluster-".len() + 12);
        assert!((10..=50).contains(&metadata.topic_count));
        assert!(metadata.partition_count >= metadata.topic_count);
        assert!(metadata.partition_count <= metadata.topic_count * 5);
        for broker in &metadata.brokers {
            assert_eq!(broker.host, format!("broker-{}.kafka.cluster", broker.id));
        }
    }

    #[test]
    fn test_group_over_topics() {
        let mut synth = synth(5);
        let topics: Vec<_> = (0..4).map(|i| synth.topic(i)).collect();
        let group = synth.consumer_group_over(1, &topics);

        for offset in &group.offsets {
            let topic = topics.iter().find(|t| t.name == offset.topic).unwrap();
            let partition = topic.partition(offset.partition).unwrap();
            assert_eq!(offset.end_offset, partition.latest_offset);
            assert!(offset.current_offset >= partition.earliest_offset);
            assert!(offset.current_offset <= partition.latest_offset);
        }
    }

    #[test]
    fn test_raw_logs_newest_first() {
        let mut synth = synth(6);
        let logs = synth.raw_logs(50);
        assert_eq!(logs.len(), 50);
        assert!(logs.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert!(logs.iter().all(|l| COMPONENTS.contains(&l.component.as_str())));
    }

    #[test]
    fn test_message() {
        let mut synth = synth(7);
        let record = synth.message("orders", 2, 42);
        assert_eq!(record.topic, "orders");
        assert_eq!((record.partition, record.offset), (2, 42));
        assert!(record.timestamp <= Utc::now());
    }

    proptest! {
        #[test]
        fn proptest_topic_invariants(seed in any::<u64>(), pool in 1i32..6) {
            let mut synth = synth(seed).with_broker_pool(pool);
            let topic = synth.topic(0);

            prop_assert!((1..=10).contains(&topic.partitions.len()));
            for (i, p) in topic.partitions.iter().enumerate() {
                prop_assert_eq!(p.id, i as i32);
                assert_partition_invariants(p, pool);
            }
        }

        #[test]
        fn proptest_group_invariants(seed in any::<u64>()) {
            let mut synth = synth(seed);
            let group = synth.consumer_group(seed as usize);

            prop_assert!(!group.members.is_empty() && group.members.len() <= 5);
            prop_assert!((0..DEFAULT_BROKER_POOL).contains(&group.coordinator.id));
            for offset in &group.offsets {
                prop_assert!(offset.current_offset <= offset.end_offset);
                prop_assert_eq!(offset.lag, offset.end_offset - offset.current_offset);
            }
            for member in &group.members {
                prop_assert!(member.partition_count() > 0);
                for (topic, partitions) in &member.assignment {
                    for partition in partitions {
                        prop_assert!(group.offset(topic, *partition).is_some());
                    }
                }
            }
        }
    }
}
