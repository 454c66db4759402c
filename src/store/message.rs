use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{StateCell, Status, StoreError, impl_has_status};
use crate::{
    engine::Engine,
    error::{Error, Result, ResultVec},
    record::{ConsumeRequest, ConsumedRecord, ConsumerRecord, ProducerRecord, SendReceipt},
    validation::require,
};

/// Sent messages kept in the producer history; older ones are dropped.
pub const PRODUCER_HISTORY_LIMIT: usize = 100;

/// Records kept while consuming continuously; older ones are dropped.
pub const CONSUMER_BUFFER_LIMIT: usize = 1_000;

/// A message that made it to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducedMessage {
    pub record: ProducerRecord,
    pub receipt: SendReceipt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageState {
    pub status: Status,
    /// Result of the last one-off fetch.
    pub messages: Vec<ConsumerRecord>,
    pub selected: Option<ConsumerRecord>,
    /// Oldest first.
    pub producer_history: VecDeque<ProducedMessage>,
    /// Oldest first.
    pub consumer_messages: VecDeque<ConsumedRecord>,
    pub consuming: bool,
    /// Run of the continuous consumer allowed to commit; `None` while stopped.
    consume_epoch: Option<u64>,
}

impl_has_status!(MessageState);

impl MessageState {
    fn record_sent(&mut self, record: ProducerRecord, receipt: SendReceipt) {
        self.producer_history
            .push_back(ProducedMessage { record, receipt });
        while self.producer_history.len() > PRODUCER_HISTORY_LIMIT {
            self.producer_history.pop_front();
        }
    }

    fn stop(&mut self) -> bool {
        if !self.consuming && self.consume_epoch.is_none() {
            return false;
        }
        self.consuming = false;
        self.consume_epoch = None;
        true
    }
}

#[derive(Debug)]
pub struct MessageStore {
    engine: Arc<Engine>,
    state: Arc<StateCell<MessageState>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    next_epoch: AtomicU64,
}

impl MessageStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: Arc::new(StateCell::new(MessageState::default())),
            consumer: Mutex::new(None),
            next_epoch: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MessageState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> MessageState {
        self.state.snapshot()
    }

    pub fn is_consuming(&self) -> bool {
        self.state.read(|s| s.consuming)
    }

    pub async fn send_message(&self, cluster_id: &str, record: ProducerRecord) -> Result<SendReceipt> {
        let _guard = self.state.begin();

        match self.engine.send_message(cluster_id, record.clone()).await {
            Ok(receipt) => {
                self.state
                    .modify(|s| s.record_sent(record, receipt.clone()));
                Ok(receipt)
            }
            Err(e) => {
                warn!(cluster_id, topic = %record.topic, %e, "send failed");
                self.state.modify(|s| s.status.error = Some((&e).into()));
                Err(e)
            }
        }
    }

    /// Sends `records` in one round trip and adds the successful ones to the producer history.
    ///
    /// If some records failed, the error slot summarizes them.
    pub async fn send_batch_messages(
        &self,
        cluster_id: &str,
        records: Vec<ProducerRecord>,
    ) -> Result<ResultVec<SendReceipt>> {
        let _guard = self.state.begin();

        let results = match self
            .engine
            .send_batch_messages(cluster_id, records.clone())
            .await
        {
            Ok(results) => results,
            Err(e) => {
                self.state.modify(|s| s.status.error = Some((&e).into()));
                return Err(e);
            }
        };

        let failed = results.len() - results.success_count();
        let first_error = results.iter().find_map(|r| r.as_ref().err()).map(StoreError::from);
        self.state.modify(|s| {
            for (record, result) in records.into_iter().zip(results.iter()) {
                if let Ok(receipt) = result {
                    s.record_sent(record, receipt.clone());
                }
            }
            if let Some(first) = first_error {
                s.status.error = Some(StoreError {
                    code: first.code,
                    message: format!("{failed} of {} messages failed: {first}", results.len()),
                });
            }
        });
        Ok(results)
    }

    pub async fn fetch_messages(
        &self,
        cluster_id: &str,
        request: ConsumeRequest,
    ) -> Result<Vec<ConsumerRecord>> {
        self.state
            .run(
                "messages",
                self.engine.consume_messages(cluster_id, request),
                |s, records| s.messages = records.clone(),
            )
            .await
    }

    pub async fn get_message_detail(
        &self,
        cluster_id: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<ConsumerRecord> {
        self.state
            .run(
                "message-detail",
                self.engine
                    .get_message_detail(cluster_id, topic, partition, offset),
                |s, record| s.selected = Some(record.clone()),
            )
            .await
    }

    /// Polls `request` every `interval` until [`stop_consuming`](Self::stop_consuming) is called or a poll
    /// fails.
    ///
    /// Each poll continues after the last offset seen. A running consumer is replaced.
    pub fn start_consuming(
        &self,
        cluster_id: &str,
        request: ConsumeRequest,
        interval: Duration,
    ) -> Result<()> {
        require("cluster id", cluster_id)?;
        require("topic name", &request.topic)?;
        if interval.is_zero() {
            return Err(Error::validation("poll interval must be positive"));
        }
        self.stop_consuming();

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.modify(|s| {
            s.consuming = true;
            s.consume_epoch = Some(epoch);
            s.consumer_messages.clear();
            s.status.error = None;
        });

        let task = consume_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.state),
            cluster_id.to_owned(),
            request,
            interval,
            epoch,
        );
        *self.consumer.lock() = Some(tokio::spawn(task));
        info!(cluster_id, epoch, "consuming started");
        Ok(())
    }

    /// Stops the continuous consumer. No poll commits after this returns; stopping twice is a no-op.
    pub fn stop_consuming(&self) {
        let stopped = self.state.modify_if(MessageState::stop);
        if let Some(handle) = self.consumer.lock().take() {
            handle.abort();
        }
        if stopped {
            info!("consuming stopped");
        }
    }

    pub fn clear_producer_history(&self) {
        self.state.modify(|s| s.producer_history.clear());
    }

    pub fn clear_consumer_messages(&self) {
        self.state.modify(|s| s.consumer_messages.clear());
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        if let Some(handle) = self.consumer.get_mut().take() {
            handle.abort();
        }
    }
}

async fn consume_loop(
    engine: Arc<Engine>,
    state: Arc<StateCell<MessageState>>,
    cluster_id: String,
    request: ConsumeRequest,
    interval: Duration,
    epoch: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut next_offset = request.offset;

    loop {
        ticker.tick().await;

        let poll = ConsumeRequest {
            offset: next_offset,
            ..request.clone()
        };
        let outcome = engine.consume_messages(&cluster_id, poll).await;

        let committed = state.modify_if(|s| {
            if s.consume_epoch != Some(epoch) {
                return false;
            }
            match &outcome {
                Ok(records) => {
                    let consumed_at = Utc::now();
                    s.consumer_messages
                        .extend(records.iter().cloned().map(|record| ConsumedRecord {
                            record,
                            consumed_at,
                        }));
                    while s.consumer_messages.len() > CONSUMER_BUFFER_LIMIT {
                        s.consumer_messages.pop_front();
                    }
                }
                Err(e) => {
                    s.status.error = Some(e.into());
                    s.stop();
                }
            }
            true
        });

        match outcome {
            Ok(records) if committed => {
                if let Some(last) = records.last() {
                    next_offset = Some(last.offset + 1);
                }
                debug!(%cluster_id, epoch, n = records.len(), "poll committed");
            }
            Ok(_) => {
                debug!(%cluster_id, epoch, "consumer epoch superseded");
                return;
            }
            Err(e) => {
                warn!(%cluster_id, epoch, %e, "consuming aborted");
                return;
            }
        }
    }
}
