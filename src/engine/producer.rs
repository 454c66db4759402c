use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{ClusterTopology, Engine};
use crate::{
    error::{Error, Result, ResultVec},
    log_store::{Details, LogLevel},
    record::{ConsumeRequest, ConsumerRecord, DEFAULT_CONSUME_COUNT, ProducerRecord, SendReceipt},
    synth::Synthesizer,
    validation::require,
};

const SOURCE: &str = "Producer";

fn validate_record(record: &ProducerRecord) -> Result<()> {
    require("topic name", &record.topic)?;
    require("message value", &record.value)?;
    Ok(())
}

/// Picks the partition of a record: explicit, then by key hash, then round robin.
fn choose_partition(topology: &mut ClusterTopology, record: &ProducerRecord) -> Result<i32> {
    let partitions = topology
        .topics
        .get(&record.topic)
        .ok_or_else(|| Error::not_found("topic", &record.topic))?
        .partitions
        .len();

    match (record.partition, &record.key) {
        (Some(p), _) => {
            if p < 0 || p as usize >= partitions {
                return Err(Error::validation(format!(
                    "partition {p} does not exist in topic '{}'",
                    record.topic
                )));
            }
            Ok(p)
        }
        (None, Some(key)) => Ok((crc32c::crc32c(key.as_bytes()) as usize % partitions) as i32),
        (None, None) => Ok(topology.next_round_robin(partitions)),
    }
}

/// Appends `record` and advances the end offsets every group has committed for its partition.
fn append(
    topology: &mut ClusterTopology,
    record: &ProducerRecord,
    now: DateTime<Utc>,
) -> Result<SendReceipt> {
    let partition = choose_partition(topology, record)?;
    let topic = topology
        .topics
        .get_mut(&record.topic)
        .ok_or_else(|| Error::not_found("topic", &record.topic))?;
    let entry = topic
        .partition_mut(partition)
        .ok_or_else(|| Error::not_found("partition", format!("{}/{partition}", record.topic)))?;

    let offset = entry.append(1);
    let latest = entry.latest_offset;

    for group in topology.groups.values_mut() {
        for committed in group
            .offsets
            .iter_mut()
            .filter(|o| o.topic == record.topic && o.partition == partition)
        {
            committed.set_end(latest);
        }
    }

    Ok(SendReceipt {
        topic: record.topic.clone(),
        partition,
        offset,
        timestamp: record.timestamp.unwrap_or(now),
    })
}

fn send_failure(synth: &mut Synthesizer, rate: f64, topic: &str) -> Result<()> {
    if synth.random().chance(rate) {
        return Err(Error::SimulatedFailure {
            operation: "send_message",
            message: format!("failed to send message to topic '{topic}'"),
        });
    }
    Ok(())
}

impl Engine {
    pub async fn send_message(&self, cluster_id: &str, record: ProducerRecord) -> Result<SendReceipt> {
        require("cluster id", cluster_id)?;
        validate_record(&record)?;
        self.settle().await;

        let rate = self.config.send_failure_rate;
        let receipt = self.with_topology(cluster_id, |topology, synth| {
            send_failure(synth, rate, &record.topic)?;
            append(topology, &record, Utc::now())
        })?;

        info!(
            cluster_id,
            topic = %receipt.topic,
            partition = receipt.partition,
            offset = receipt.offset,
            "message sent",
        );
        self.record_event(
            LogLevel::Debug,
            SOURCE,
            format!("Message sent to '{}'", receipt.topic),
            Details::from([
                ("clusterId".to_owned(), cluster_id.into()),
                ("partition".to_owned(), receipt.partition.into()),
                ("offset".to_owned(), receipt.offset.into()),
            ]),
        );
        Ok(receipt)
    }

    /// Sends several records in one round trip.
    ///
    /// Each record succeeds or fails on its own; the outer error is reserved for a bad cluster id.
    pub async fn send_batch_messages(
        &self,
        cluster_id: &str,
        records: Vec<ProducerRecord>,
    ) -> Result<ResultVec<SendReceipt>> {
        require("cluster id", cluster_id)?;
        self.settle().await;

        let rate = self.config.send_failure_rate;
        let results: ResultVec<SendReceipt> = self.with_topology(cluster_id, |topology, synth| {
            let now = Utc::now();
            Ok(records
                .iter()
                .map(|record| {
                    validate_record(record)?;
                    send_failure(synth, rate, &record.topic)?;
                    append(topology, record, now)
                })
                .collect::<Vec<_>>()
                .into())
        })?;

        let sent = results.success_count();
        info!(cluster_id, sent, failed = results.len() - sent, "batch sent");
        self.record_event(
            LogLevel::Info,
            SOURCE,
            format!("Batch of {} messages sent, {sent} succeeded", results.len()),
            Details::from([("clusterId".to_owned(), cluster_id.into())]),
        );
        Ok(results)
    }

    /// Reads up to `count` records starting at `offset`, never past the partition's latest offset.
    pub async fn consume_messages(
        &self,
        cluster_id: &str,
        request: ConsumeRequest,
    ) -> Result<Vec<ConsumerRecord>> {
        require("cluster id", cluster_id)?;
        require("topic name", &request.topic)?;
        self.settle().await;

        let records = self.with_topology(cluster_id, |topology, synth| {
            let topic = topology
                .topics
                .get(&request.topic)
                .ok_or_else(|| Error::not_found("topic", &request.topic))?;
            let partition_id = request.partition.unwrap_or(0);
            let partition = topic.partition(partition_id).ok_or_else(|| {
                Error::not_found("partition", format!("{}/{partition_id}", request.topic))
            })?;

            let (earliest, latest) = (partition.earliest_offset, partition.latest_offset);
            let start = request.offset.unwrap_or(earliest).clamp(earliest, latest.max(earliest));
            let count = request.count.unwrap_or(DEFAULT_CONSUME_COUNT) as i64;
            let end = start.saturating_add(count).min(latest);

            Ok((start..end)
                .map(|offset| synth.message(&request.topic, partition_id, offset))
                .collect::<Vec<_>>())
        })?;

        debug!(cluster_id, topic = %request.topic, n = records.len(), "messages consumed");
        Ok(records)
    }

    pub async fn get_message_detail(
        &self,
        cluster_id: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<ConsumerRecord> {
        require("cluster id", cluster_id)?;
        require("topic name", topic)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, synth| {
            let entry = topology
                .topics
                .get(topic)
                .ok_or_else(|| Error::not_found("topic", topic))?
                .partition(partition)
                .ok_or_else(|| Error::not_found("partition", format!("{topic}/{partition}")))?;

            if !(entry.earliest_offset..entry.latest_offset).contains(&offset) {
                return Err(Error::not_found(
                    "message",
                    format!("{topic}/{partition}@{offset}"),
                ));
            }
            Ok(synth.message(topic, partition, offset))
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::topic::NewTopic;

    async fn engine_with_topic(send_failure_rate: f64) -> Engine {
        let engine = Engine::builder()
            .no_latency()
            .failure_rates(0.0, send_failure_rate)
            .seed(41)
            .build();
        engine
            .create_topic("cluster-1", NewTopic::new("orders", 3, 1))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_offsets_grow_per_partition() {
        let engine = engine_with_topic(0.0).await;

        for expected in 0..3 {
            let receipt = engine
                .send_message("cluster-1", ProducerRecord::new("orders", "v").with_partition(1))
                .await
                .unwrap();
            assert_eq!((receipt.partition, receipt.offset), (1, expected));
        }

        let topic = engine.get_topic_detail("cluster-1", "orders").await.unwrap();
        assert_eq!(topic.partition(1).unwrap().latest_offset, 3);
        assert_eq!(topic.partition(0).unwrap().latest_offset, 0);
    }

    #[tokio::test]
    async fn test_key_and_round_robin_partitioning() {
        let engine = engine_with_topic(0.0).await;

        let mut keyed = vec![];
        for _ in 0..3 {
            let record = ProducerRecord::new("orders", "v").with_key("customer-7");
            keyed.push(engine.send_message("cluster-1", record).await.unwrap().partition);
        }
        assert!(keyed.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(keyed[0], (crc32c::crc32c(b"customer-7") % 3) as i32);

        let mut unkeyed = vec![];
        for _ in 0..3 {
            let record = ProducerRecord::new("orders", "v");
            unkeyed.push(engine.send_message("cluster-1", record).await.unwrap().partition);
        }
        unkeyed.sort_unstable();
        assert_eq!(unkeyed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_send_rejects_bad_records() {
        let engine = engine_with_topic(0.0).await;

        assert_matches!(
            engine.send_message("cluster-1", ProducerRecord::new("orders", "")).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            engine
                .send_message("cluster-1", ProducerRecord::new("orders", "v").with_partition(3))
                .await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            engine.send_message("cluster-1", ProducerRecord::new("ghost", "v")).await,
            Err(Error::NotFound { kind: "topic", .. })
        );
    }

    #[tokio::test]
    async fn test_send_failure() {
        let engine = engine_with_topic(1.0).await;
        assert_matches!(
            engine.send_message("cluster-1", ProducerRecord::new("orders", "v")).await,
            Err(Error::SimulatedFailure { operation: "send_message", .. })
        );
    }

    #[tokio::test]
    async fn test_batch_reports_per_record() {
        let engine = engine_with_topic(0.0).await;
        let records = vec![
            ProducerRecord::new("orders", "a"),
            ProducerRecord::new("ghost", "b"),
            ProducerRecord::new("orders", "c"),
        ];

        let results = engine.send_batch_messages("cluster-1", records).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.success_count(), 2);
        let outcomes: Vec<_> = results.into_iter().collect();
        assert_matches!(outcomes[1], Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_consume_window() {
        let engine = engine_with_topic(0.0).await;
        for _ in 0..15 {
            engine
                .send_message("cluster-1", ProducerRecord::new("orders", "v").with_partition(0))
                .await
                .unwrap();
        }

        let records = engine
            .consume_messages("cluster-1", ConsumeRequest::new("orders"))
            .await
            .unwrap();
        let offsets: Vec<_> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, (0..10).collect::<Vec<_>>());

        let records = engine
            .consume_messages("cluster-1", ConsumeRequest::new("orders").with_offset(12))
            .await
            .unwrap();
        assert_eq!(records.len(), 3);

        let records = engine
            .consume_messages("cluster-1", ConsumeRequest::new("orders").with_partition(2))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_message_detail_bounds() {
        let engine = engine_with_topic(0.0).await;
        engine
            .send_message("cluster-1", ProducerRecord::new("orders", "v").with_partition(0))
            .await
            .unwrap();

        let record = engine.get_message_detail("cluster-1", "orders", 0, 0).await.unwrap();
        assert_eq!(record.offset, 0);
        assert_matches!(
            engine.get_message_detail("cluster-1", "orders", 0, 1).await,
            Err(Error::NotFound { kind: "message", .. })
        );
    }
}
