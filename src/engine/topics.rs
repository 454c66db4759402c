use std::collections::BTreeMap;

use tracing::{debug, info};

use super::Engine;
use crate::{
    error::{Error, Result},
    log_store::{Details, LogLevel},
    topic::{NewTopic, Topic},
    validation::{require, validate_topic_name},
};

const SOURCE: &str = "TopicManager";

fn topic_details(cluster_id: &str, topic: &str) -> Details {
    Details::from([
        ("clusterId".to_owned(), cluster_id.into()),
        ("topic".to_owned(), topic.into()),
    ])
}

impl Engine {
    /// Topics of a cluster, ordered by name.
    pub async fn list_topics(&self, cluster_id: &str) -> Result<Vec<Topic>> {
        require("cluster id", cluster_id)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, _| {
            Ok(topology.topics.values().cloned().collect())
        })
    }

    pub async fn get_topic_detail(&self, cluster_id: &str, topic: &str) -> Result<Topic> {
        require("cluster id", cluster_id)?;
        require("topic name", topic)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, _| {
            topology
                .topics
                .get(topic)
                .cloned()
                .ok_or_else(|| Error::not_found("topic", topic))
        })
    }

    /// Creates an empty topic with round-robin replica placement.
    pub async fn create_topic(&self, cluster_id: &str, request: NewTopic) -> Result<Topic> {
        require("cluster id", cluster_id)?;
        validate_topic_name(&request.name)?;
        if request.partitions < 1 {
            return Err(Error::validation("topic needs at least one partition"));
        }
        self.settle().await;

        let topic = self.with_topology(cluster_id, |topology, synth| {
            let brokers = synth.broker_pool();
            if !(1..=brokers).contains(&request.replication_factor) {
                return Err(Error::validation(format!(
                    "replication factor must be between 1 and {brokers}"
                )));
            }
            if topology.topics.contains_key(&request.name) {
                return Err(Error::validation(format!(
                    "topic '{}' already exists",
                    request.name
                )));
            }

            let topic = synth.new_topic(&request);
            topology.topics.insert(topic.name.clone(), topic.clone());
            topology.refresh_counts();
            Ok(topic)
        })?;

        info!(
            cluster_id,
            topic = %topic.name,
            partitions = topic.partitions.len(),
            "topic created",
        );
        self.record_event(
            LogLevel::Info,
            SOURCE,
            format!("Topic '{}' created", topic.name),
            topic_details(cluster_id, &topic.name),
        );
        Ok(topic)
    }

    /// Deletes a topic together with every committed offset and assignment that refers to it.
    pub async fn delete_topic(&self, cluster_id: &str, topic: &str) -> Result<()> {
        require("cluster id", cluster_id)?;
        require("topic name", topic)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, _| {
            topology
                .topics
                .remove(topic)
                .ok_or_else(|| Error::not_found("topic", topic))?;
            topology.refresh_counts();

            for group in topology.groups.values_mut() {
                group.offsets.retain(|o| o.topic != topic);
                for member in &mut group.members {
                    member.assignment.remove(topic);
                }
            }
            Ok(())
        })?;

        info!(cluster_id, topic, "topic deleted");
        self.record_event(
            LogLevel::Warn,
            SOURCE,
            format!("Topic '{topic}' deleted"),
            topic_details(cluster_id, topic),
        );
        Ok(())
    }

    /// Merges `changes` into the topic's configs.
    pub async fn update_topic_config(
        &self,
        cluster_id: &str,
        topic: &str,
        changes: BTreeMap<String, String>,
    ) -> Result<Topic> {
        require("cluster id", cluster_id)?;
        require("topic name", topic)?;
        if changes.is_empty() {
            return Err(Error::validation("no config changes given"));
        }
        for name in changes.keys() {
            require("config name", name)?;
        }
        self.settle().await;

        let updated = self.with_topology(cluster_id, |topology, _| {
            let entry = topology
                .topics
                .get_mut(topic)
                .ok_or_else(|| Error::not_found("topic", topic))?;
            entry.apply_configs(&changes);
            Ok(entry.clone())
        })?;

        debug!(cluster_id, topic, ?changes, "topic config updated");
        self.record_event(
            LogLevel::Info,
            SOURCE,
            format!("Config of topic '{topic}' updated"),
            topic_details(cluster_id, topic),
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::topic::ConfigSource;

    fn engine() -> Engine {
        Engine::builder().no_latency().seed(21).build()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let engine = engine();
        let before = engine.get_cluster_metadata("cluster-1").await.unwrap();

        let created = engine
            .create_topic("cluster-1", NewTopic::new("orders", 3, 2))
            .await
            .unwrap();
        assert_eq!(created.partitions.len(), 3);

        let fetched = engine.get_topic_detail("cluster-1", "orders").await.unwrap();
        assert_eq!(fetched, created);

        let after = engine.get_cluster_metadata("cluster-1").await.unwrap();
        assert_eq!(after.topic_count, before.topic_count + 1);
        assert_eq!(after.partition_count, before.partition_count + 3);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_requests() {
        let engine = engine();
        engine
            .create_topic("cluster-1", NewTopic::new("orders", 1, 1))
            .await
            .unwrap();

        for request in [
            NewTopic::new("orders", 1, 1),
            NewTopic::new("payments", 0, 1),
            NewTopic::new("payments", 1, 4),
            NewTopic::new("bad name", 1, 1),
        ] {
            assert_matches!(
                engine.create_topic("cluster-1", request.clone()).await,
                Err(Error::Validation(_)),
                "{request:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_delete_cascades_to_groups() {
        let engine = engine();
        let groups = engine.list_consumer_groups("cluster-1").await.unwrap();
        let topic = groups
            .iter()
            .find_map(|g| g.offsets.first())
            .map(|o| o.topic.clone())
            .unwrap();

        engine.delete_topic("cluster-1", &topic).await.unwrap();

        for group in engine.list_consumer_groups("cluster-1").await.unwrap() {
            assert!(group.offsets.iter().all(|o| o.topic != topic));
            assert!(group.members.iter().all(|m| !m.assignment.contains_key(&topic)));
        }
        assert_matches!(
            engine.get_topic_detail("cluster-1", &topic).await,
            Err(Error::NotFound { kind: "topic", .. })
        );
        assert_matches!(
            engine.delete_topic("cluster-1", &topic).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_update_config() {
        let engine = engine();
        engine
            .create_topic("cluster-1", NewTopic::new("orders", 1, 1))
            .await
            .unwrap();

        let changes = BTreeMap::from([
            ("retention.ms".to_owned(), "1000".to_owned()),
            ("max.message.bytes".to_owned(), "2048".to_owned()),
        ]);
        let topic = engine
            .update_topic_config("cluster-1", "orders", changes)
            .await
            .unwrap();

        assert_eq!(topic.config("retention.ms"), Some("1000"));
        assert_eq!(topic.config("max.message.bytes"), Some("2048"));
        assert!(topic.config("cleanup.policy").is_some());
        let retention = topic.configs.iter().find(|c| c.name == "retention.ms").unwrap();
        assert_eq!(retention.source, ConfigSource::DynamicTopic);

        assert_matches!(
            engine
                .update_topic_config("cluster-1", "orders", BTreeMap::new())
                .await,
            Err(Error::Validation(_))
        );
    }
}
