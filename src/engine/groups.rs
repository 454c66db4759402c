use tracing::info;

use super::Engine;
use crate::{
    error::{Error, Result},
    group::{ConsumerGroup, GroupState, OffsetReset, ResetTarget},
    log_store::{Details, LogLevel},
    validation::{require, validate_group_id},
};

const SOURCE: &str = "GroupCoordinator";

fn group_details(cluster_id: &str, group_id: &str) -> Details {
    Details::from([
        ("clusterId".to_owned(), cluster_id.into()),
        ("groupId".to_owned(), group_id.into()),
    ])
}

impl Engine {
    /// Consumer groups of a cluster, ordered by id.
    pub async fn list_consumer_groups(&self, cluster_id: &str) -> Result<Vec<ConsumerGroup>> {
        require("cluster id", cluster_id)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, _| {
            Ok(topology.groups.values().cloned().collect())
        })
    }

    pub async fn get_consumer_group_detail(
        &self,
        cluster_id: &str,
        group_id: &str,
    ) -> Result<ConsumerGroup> {
        require("cluster id", cluster_id)?;
        validate_group_id(group_id)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, _| {
            topology
                .groups
                .get(group_id)
                .cloned()
                .ok_or_else(|| Error::not_found("consumer group", group_id))
        })
    }

    /// Moves every committed offset of `reset.topic` to the requested position.
    ///
    /// Absolute offsets are clamped to the retained range of each partition.
    pub async fn reset_consumer_group_offset(
        &self,
        cluster_id: &str,
        group_id: &str,
        reset: OffsetReset,
    ) -> Result<ConsumerGroup> {
        require("cluster id", cluster_id)?;
        validate_group_id(group_id)?;
        require("topic name", &reset.topic)?;
        self.settle().await;

        let group = self.with_topology(cluster_id, |topology, _| {
            let topic = topology
                .topics
                .get(&reset.topic)
                .ok_or_else(|| Error::not_found("topic", &reset.topic))?;
            let group = topology
                .groups
                .get_mut(group_id)
                .ok_or_else(|| Error::not_found("consumer group", group_id))?;

            if !group.offsets.iter().any(|o| o.topic == reset.topic) {
                return Err(Error::validation(format!(
                    "consumer group '{group_id}' has no offsets for topic '{}'",
                    reset.topic
                )));
            }

            for offset in group.offsets.iter_mut().filter(|o| o.topic == reset.topic) {
                let Some(partition) = topic.partition(offset.partition) else {
                    continue;
                };
                let (earliest, latest) = (partition.earliest_offset, partition.latest_offset);
                let target = match reset.target {
                    ResetTarget::Earliest => earliest,
                    ResetTarget::Latest => latest,
                    ResetTarget::Offset(o) => o.clamp(earliest, latest.max(earliest)),
                };
                offset.set_end(latest);
                offset.set_current(target);
            }
            Ok(group.clone())
        })?;

        info!(
            cluster_id,
            group_id,
            topic = %reset.topic,
            target = ?reset.target,
            "consumer group offsets reset",
        );
        let mut details = group_details(cluster_id, group_id);
        details.insert("topic".to_owned(), reset.topic.as_str().into());
        self.record_event(
            LogLevel::Info,
            SOURCE,
            format!("Offsets of group '{group_id}' reset on '{}'", reset.topic),
            details,
        );
        Ok(group)
    }

    /// Moves the group to [`GroupState::Dead`] and forgets it.
    ///
    /// The transition is recorded in the event log with the state the group left.
    pub async fn delete_consumer_group(&self, cluster_id: &str, group_id: &str) -> Result<()> {
        require("cluster id", cluster_id)?;
        validate_group_id(group_id)?;
        self.settle().await;

        let previous = self.with_topology(cluster_id, |topology, _| {
            let mut group = topology
                .groups
                .remove(group_id)
                .ok_or_else(|| Error::not_found("consumer group", group_id))?;
            let previous = group.state;
            if previous != GroupState::Dead {
                group.transition(GroupState::Dead)?;
            }
            Ok(previous)
        })?;

        info!(cluster_id, group_id, %previous, "consumer group deleted");
        let mut details = group_details(cluster_id, group_id);
        details.insert("previousState".to_owned(), previous.to_string().into());
        details.insert("state".to_owned(), GroupState::Dead.to_string().into());
        self.record_event(
            LogLevel::Warn,
            SOURCE,
            format!("Consumer group '{group_id}' deleted ({previous} -> Dead)"),
            details,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::log_store::DetailValue;

    fn engine() -> Engine {
        Engine::builder().no_latency().seed(31).build()
    }

    async fn some_group(engine: &Engine) -> ConsumerGroup {
        engine
            .list_consumer_groups("cluster-1")
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_and_detail() {
        let engine = engine();
        let groups = engine.list_consumer_groups("cluster-1").await.unwrap();
        assert!(!groups.is_empty());

        let detail = engine
            .get_consumer_group_detail("cluster-1", &groups[0].group_id)
            .await
            .unwrap();
        assert_eq!(detail, groups[0]);

        assert_matches!(
            engine.get_consumer_group_detail("cluster-1", "ghost").await,
            Err(Error::NotFound { kind: "consumer group", .. })
        );
    }

    #[tokio::test]
    async fn test_reset_to_earliest_and_latest() {
        let engine = engine();
        let group = some_group(&engine).await;
        let topic_name = group.offsets[0].topic.clone();
        let topic = engine.get_topic_detail("cluster-1", &topic_name).await.unwrap();

        let reset = OffsetReset::new(&topic_name, ResetTarget::Latest);
        let updated = engine
            .reset_consumer_group_offset("cluster-1", &group.group_id, reset)
            .await
            .unwrap();
        for offset in updated.offsets.iter().filter(|o| o.topic == topic_name) {
            assert_eq!(offset.lag, 0);
        }

        let reset = OffsetReset::new(&topic_name, ResetTarget::Earliest);
        let updated = engine
            .reset_consumer_group_offset("cluster-1", &group.group_id, reset)
            .await
            .unwrap();
        for offset in updated.offsets.iter().filter(|o| o.topic == topic_name) {
            let partition = topic.partition(offset.partition).unwrap();
            assert_eq!(offset.current_offset, partition.earliest_offset);
            assert_eq!(offset.lag, partition.message_count);
        }
    }

    #[tokio::test]
    async fn test_reset_offset_is_clamped() {
        let engine = engine();
        let group = some_group(&engine).await;
        let topic_name = group.offsets[0].topic.clone();

        let reset = OffsetReset::new(&topic_name, ResetTarget::Offset(i64::MAX));
        let updated = engine
            .reset_consumer_group_offset("cluster-1", &group.group_id, reset)
            .await
            .unwrap();
        for offset in updated.offsets.iter().filter(|o| o.topic == topic_name) {
            assert_eq!(offset.current_offset, offset.end_offset);
        }
    }

    #[tokio::test]
    async fn test_reset_with_missing_group_id() {
        let engine = engine();
        let before = engine.list_consumer_groups("cluster-1").await.unwrap();

        let reset = OffsetReset::new("orders", ResetTarget::Earliest);
        assert_matches!(
            engine.reset_consumer_group_offset("cluster-1", "", reset).await,
            Err(Error::Validation(_))
        );

        let after = engine.list_consumer_groups("cluster-1").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_delete() {
        let engine = engine();
        let group = some_group(&engine).await;

        engine
            .delete_consumer_group("cluster-1", &group.group_id)
            .await
            .unwrap();
        let groups = engine.list_consumer_groups("cluster-1").await.unwrap();
        assert!(groups.iter().all(|g| g.group_id != group.group_id));

        let event = engine
            .events()
            .entries()
            .into_iter()
            .find(|e| e.source == SOURCE && e.message.contains(&group.group_id))
            .unwrap();
        assert_eq!(event.level, LogLevel::Warn);
        let details = event.details.unwrap();
        assert_eq!(details["state"], DetailValue::from("Dead"));
        assert_eq!(details["previousState"], DetailValue::from(group.state.to_string()));

        assert_matches!(
            engine.delete_consumer_group("cluster-1", &group.group_id).await,
            Err(Error::NotFound { .. })
        );
    }
}
