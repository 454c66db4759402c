//! Metric bundles served to the dashboard pages.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{DataPoint, MetricSeries, TimeRange, aggregate, average, generate_series, last};
use crate::{
    derive::{consumer_group_total_lag, partition_message_count},
    group::ConsumerGroup,
    metadata::ClusterMetadata,
    random::RandomSource,
    topic::{NO_LEADER, Topic, UNKNOWN_OFFSET},
};

/// Points in the disk usage trend of [`ClusterMetrics`].
pub const DISK_TREND_POINTS: usize = 6;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * KIB;

/// Every dashboard series over one time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub range: TimeRange,
    pub message_rate: MetricSeries,
    pub byte_rate: MetricSeries,
    pub request_rate: MetricSeries,
    pub error_rate: MetricSeries,
    pub disk_usage: MetricSeries,
    pub network_in: MetricSeries,
    pub network_out: MetricSeries,
    pub active_connections: MetricSeries,
    pub consumer_lag: MetricSeries,
}

impl MetricsSnapshot {
    pub fn generate<R: Rng>(
        random: &mut RandomSource<R>,
        range: TimeRange,
        points: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let cadence = range.cadence(points);
        let mut series = |base: f64, variance: f64| {
            generate_series(random, base, variance, points, cadence, now)
        };

        Self {
            range,
            message_rate: series(1_000.0, 500.0),
            byte_rate: series(MIB, 512.0 * KIB),
            request_rate: series(100.0, 50.0),
            error_rate: series(5.0, 5.0),
            disk_usage: series(50.0, 10.0),
            network_in: series(10.0 * MIB, 5.0 * MIB),
            network_out: series(8.0 * MIB, 4.0 * MIB),
            active_connections: series(100.0, 50.0),
            consumer_lag: series(1_000.0, 500.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    pub broker_count: usize,
    pub online_broker_count: usize,
    pub topic_count: usize,
    pub partition_count: usize,
    pub messages_in_per_sec: f64,
    pub messages_out_per_sec: f64,
    /// Bytes.
    pub average_message_size: f64,
    pub total_lag: i64,
    /// Percent.
    pub disk_usage: f64,
    pub disk_usage_trend: Vec<f64>,
    pub network_in: f64,
    pub network_out: f64,
    pub timestamp: DateTime<Utc>,
    pub history: MetricsSnapshot,
}

impl ClusterMetrics {
    pub fn build<R: Rng>(
        random: &mut RandomSource<R>,
        metadata: &ClusterMetadata,
        topics: &[Topic],
        groups: &[ConsumerGroup],
        range: TimeRange,
        points: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let history = MetricsSnapshot::generate(random, range, points, now);

        // one broker occasionally drops out
        let broker_count = metadata.brokers.len();
        let offline = usize::from(broker_count > 1 && random.chance(0.1));

        let messages_in_per_sec = last(&history.message_rate);
        let messages_out_per_sec = messages_in_per_sec * random.uniform(0.85, 1.0);

        let message_rate = average(&history.message_rate);
        let average_message_size = if message_rate > 0.0 {
            average(&history.byte_rate) / message_rate
        } else {
            0.0
        };

        let disk_usage_trend = disk_trend(&history.disk_usage, range);

        Self {
            broker_count,
            online_broker_count: broker_count - offline,
            topic_count: topics.len(),
            partition_count: topics.iter().map(|t| t.partitions.len()).sum(),
            messages_in_per_sec,
            messages_out_per_sec,
            average_message_size,
            total_lag: groups.iter().map(consumer_group_total_lag).sum(),
            disk_usage: disk_usage_trend.last().copied().unwrap_or_default(),
            disk_usage_trend,
            network_in: last(&history.network_in),
            network_out: last(&history.network_out),
            timestamp: now,
            history,
        }
    }
}

/// Buckets the disk series into at most [`DISK_TREND_POINTS`] averages, newest last.
fn disk_trend(series: &[DataPoint], range: TimeRange) -> Vec<f64> {
    let interval = range.duration() / DISK_TREND_POINTS as i32;
    let buckets = aggregate(series, interval);
    let skip = buckets.len().saturating_sub(DISK_TREND_POINTS);
    buckets.into_iter().skip(skip).map(|p| p.value).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMetrics {
    pub partition: i32,
    pub leader: i32,
    pub messages_in_per_sec: f64,
    pub messages_out_per_sec: f64,
    /// Latest offset.
    pub offset: i64,
    /// Lag of all groups consuming this partition.
    pub lag: i64,
    /// Approximate bytes on disk.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeBucket {
    pub range: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderShare {
    pub broker_id: i32,
    pub partition_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMetrics {
    pub topic: String,
    pub partitions: Vec<PartitionMetrics>,
    pub message_size_distribution: Vec<SizeBucket>,
    /// Partitions led per broker, offline partitions excluded.
    pub leader_distribution: Vec<LeaderShare>,
    pub message_rate: MetricSeries,
}

impl TopicMetrics {
    pub fn build<R: Rng>(
        random: &mut RandomSource<R>,
        topic: &Topic,
        groups: &[ConsumerGroup],
        range: TimeRange,
        points: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let average_size = random.uniform(512.0, 2.0 * KIB);

        let partitions: Vec<_> = topic
            .partitions
            .iter()
            .map(|p| {
                let messages_in_per_sec = random.uniform(10.0, 100.0);
                let lag = groups
                    .iter()
                    .filter_map(|g| g.offset(&topic.name, p.id))
                    .map(|o| o.lag)
                    .filter(|lag| *lag != UNKNOWN_OFFSET)
                    .sum();
                let messages = partition_message_count(p).max(0);
                PartitionMetrics {
                    partition: p.id,
                    leader: p.leader,
                    messages_in_per_sec,
                    messages_out_per_sec: messages_in_per_sec * random.uniform(0.8, 1.0),
                    offset: p.latest_offset,
                    lag,
                    size: (messages as f64 * average_size) as u64,
                }
            })
            .collect();

        let mut leaders: BTreeMap<i32, usize> = BTreeMap::new();
        for p in topic.partitions.iter().filter(|p| p.leader != NO_LEADER) {
            *leaders.entry(p.leader).or_default() += 1;
        }

        let total = topic
            .partitions
            .iter()
            .map(|p| partition_message_count(p).max(0) as u64)
            .sum();
        let message_size_distribution = size_distribution(random, total);

        let base_rate = partitions.iter().map(|p| p.messages_in_per_sec).sum::<f64>();
        let message_rate = generate_series(
            random,
            base_rate,
            base_rate / 2.0,
            points,
            range.cadence(points),
            now,
        );

        Self {
            topic: topic.name.clone(),
            partitions,
            message_size_distribution,
            leader_distribution: leaders
                .into_iter()
                .map(|(broker_id, partition_count)| LeaderShare {
                    broker_id,
                    partition_count,
                })
                .collect(),
            message_rate,
        }
    }
}

/// Splits `total` messages over the size buckets, most of them small.
fn size_distribution<R: Rng>(random: &mut RandomSource<R>, total: u64) -> Vec<SizeBucket> {
    const RANGES: [&str; 4] = ["0-1KB", "1-10KB", "10-100KB", ">100KB"];

    let weights = [
        random.uniform(0.5, 0.7),
        random.uniform(0.2, 0.3),
        random.uniform(0.05, 0.1),
        random.uniform(0.01, 0.05),
    ];
    let weight_sum: f64 = weights.iter().sum();

    let mut counts: Vec<u64> = weights
        .iter()
        .map(|w| (total as f64 * w / weight_sum).floor() as u64)
        .collect();
    // rounding remainder goes to the smallest bucket
    let assigned: u64 = counts.iter().sum();
    counts[0] += total.saturating_sub(assigned);

    RANGES
        .iter()
        .zip(counts)
        .map(|(range, count)| SizeBucket {
            range: (*range).to_owned(),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMetrics {
    pub member_id: String,
    pub client_id: String,
    pub host: String,
    pub messages_consumed_per_sec: f64,
    pub assigned_partitions: BTreeMap<String, BTreeSet<i32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LagTrend {
    pub topic: String,
    pub partition: i32,
    /// Ends at the partition's current lag.
    pub lag: MetricSeries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RebalanceKind {
    Join,
    Leave,
    Rebalance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: RebalanceKind,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroupMetrics {
    pub group_id: String,
    pub members: Vec<MemberMetrics>,
    pub partition_lag_trend: Vec<LagTrend>,
    /// Oldest first.
    pub rebalance_events: Vec<RebalanceEvent>,
    pub total_lag: i64,
}

impl ConsumerGroupMetrics {
    pub fn build<R: Rng>(
        random: &mut RandomSource<R>,
        group: &ConsumerGroup,
        range: TimeRange,
        points: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let members = group
            .members
            .iter()
            .map(|m| MemberMetrics {
                member_id: m.member_id.clone(),
                client_id: m.client_id.clone(),
                host: m.host.clone(),
                messages_consumed_per_sec: if m.partition_count() == 0 {
                    0.0
                } else {
                    random.uniform(10.0, 50.0) * m.partition_count() as f64
                },
                assigned_partitions: m.assignment.clone(),
            })
            .collect();

        let cadence = range.cadence(points);
        let partition_lag_trend = group
            .offsets
            .iter()
            .map(|o| {
                let current = o.lag.max(0) as f64;
                let mut lag = generate_series(random, current, current, points, cadence, now);
                if let Some(p) = lag.last_mut() {
                    p.value = current;
                }
                LagTrend {
                    topic: o.topic.clone(),
                    partition: o.partition,
                    lag,
                }
            })
            .collect();

        let rebalance_events = rebalance_events(random, group, now);

        Self {
            group_id: group.group_id.clone(),
            members,
            partition_lag_trend,
            rebalance_events,
            total_lag: consumer_group_total_lag(group),
        }
    }
}

fn rebalance_events<R: Rng>(
    random: &mut RandomSource<R>,
    group: &ConsumerGroup,
    now: DateTime<Utc>,
) -> Vec<RebalanceEvent> {
    let count = if group.state.is_rebalancing() {
        random.int(1, 5)
    } else {
        random.int(0, 3)
    };

    let mut events: Vec<_> = (0..count)
        .map(|_| {
            let timestamp = random.timestamp(now - TimeDelta::days(1), now);
            let member = random
                .choose(&group.members)
                .map(|m| m.member_id.clone())
                .unwrap_or_else(|| format!("member-{}", random.slug(8)));
            let (kind, details) = match random.index(3) {
                0 => (RebalanceKind::Join, format!("Member {member} joined the group")),
                1 => (RebalanceKind::Leave, format!("Member {member} left the group")),
                _ => (
                    RebalanceKind::Rebalance,
                    format!("Partitions reassigned after {member} changed its subscription"),
                ),
            };
            RebalanceEvent {
                timestamp,
                kind,
                details,
            }
        })
        .collect();
    events.sort_by_key(|e| e.timestamp);
    events
}
