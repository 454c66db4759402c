use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Engine;
use crate::{
    error::{Error, Result},
    group::ConsumerGroup,
    log_store::LogEntry,
    metrics::{ClusterMetrics, ConsumerGroupMetrics, TimeRange, TopicMetrics},
    topic::Topic,
    validation::{require, validate_group_id},
};

/// Log lines returned when a query does not ask for a count.
pub const DEFAULT_LOG_COUNT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// [`DEFAULT_LOG_COUNT`] when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl LogQuery {
    pub fn new(count: usize) -> Self {
        Self { count: Some(count) }
    }
}

impl Engine {
    pub async fn get_cluster_metrics(
        &self,
        cluster_id: &str,
        range: TimeRange,
    ) -> Result<ClusterMetrics> {
        require("cluster id", cluster_id)?;
        self.settle().await;

        let points = self.config.metric_points;
        self.with_topology(cluster_id, |topology, synth| {
            let topics: Vec<Topic> = topology.topics.values().cloned().collect();
            let groups: Vec<ConsumerGroup> = topology.groups.values().cloned().collect();
            Ok(ClusterMetrics::build(
                synth.random(),
                &topology.metadata,
                &topics,
                &groups,
                range,
                points,
                Utc::now(),
            ))
        })
    }

    pub async fn get_topic_metrics(
        &self,
        cluster_id: &str,
        topic: &str,
        range: TimeRange,
    ) -> Result<TopicMetrics> {
        require("cluster id", cluster_id)?;
        require("topic name", topic)?;
        self.settle().await;

        let points = self.config.metric_points;
        self.with_topology(cluster_id, |topology, synth| {
            let entry = topology
                .topics
                .get(topic)
                .ok_or_else(|| Error::not_found("topic", topic))?;
            let groups: Vec<ConsumerGroup> = topology
                .groups
                .values()
                .filter(|g| g.offsets.iter().any(|o| o.topic == topic))
                .cloned()
                .collect();
            Ok(TopicMetrics::build(
                synth.random(),
                entry,
                &groups,
                range,
                points,
                Utc::now(),
            ))
        })
    }

    pub async fn get_consumer_group_metrics(
        &self,
        cluster_id: &str,
        group_id: &str,
        range: TimeRange,
    ) -> Result<ConsumerGroupMetrics> {
        require("cluster id", cluster_id)?;
        validate_group_id(group_id)?;
        self.settle().await;

        let points = self.config.metric_points;
        self.with_topology(cluster_id, |topology, synth| {
            let group = topology
                .groups
                .get(group_id)
                .ok_or_else(|| Error::not_found("consumer group", group_id))?;
            Ok(ConsumerGroupMetrics::build(
                synth.random(),
                group,
                range,
                points,
                Utc::now(),
            ))
        })
    }

    /// Broker log lines of a cluster, newest first.
    pub async fn get_logs(&self, cluster_id: &str, query: LogQuery) -> Result<Vec<LogEntry>> {
        require("cluster id", cluster_id)?;
        self.settle().await;
        self.ensure_cluster(cluster_id)?;

        let count = query.count.unwrap_or(DEFAULT_LOG_COUNT);
        let raw = self.synth.lock().raw_logs(count);
        debug!(cluster_id, count, "logs synthesized");

        Ok(raw
            .into_iter()
            .map(|line| LogEntry::from(line).with_detail("clusterId", cluster_id))
            .collect())
    }
}
