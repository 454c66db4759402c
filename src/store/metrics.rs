use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{StateCell, Status, impl_has_status};
use crate::{
    engine::Engine,
    error::{Error, Result},
    metrics::{ClusterMetrics, ConsumerGroupMetrics, TimeRange, TopicMetrics},
    validation::require,
};

/// Refresh period used by the dashboard unless configured otherwise.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsState {
    pub status: Status,
    pub range: TimeRange,
    pub cluster: Option<ClusterMetrics>,
    pub topic: Option<TopicMetrics>,
    pub group: Option<ConsumerGroupMetrics>,
    pub auto_refresh: bool,
    refresh_epoch: Option<u64>,
}

impl_has_status!(MetricsState);

impl MetricsState {
    fn stop(&mut self) -> bool {
        if !self.auto_refresh && self.refresh_epoch.is_none() {
            return false;
        }
        self.auto_refresh = false;
        self.refresh_epoch = None;
        true
    }
}

#[derive(Debug)]
pub struct MetricsStore {
    engine: Arc<Engine>,
    state: Arc<StateCell<MetricsState>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
    next_epoch: AtomicU64,
}

impl MetricsStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: Arc::new(StateCell::new(MetricsState::default())),
            refresher: Mutex::new(None),
            next_epoch: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MetricsState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> MetricsState {
        self.state.snapshot()
    }

    pub fn time_range(&self) -> TimeRange {
        self.state.read(|s| s.range)
    }

    /// Range used by every following fetch.
    pub fn set_time_range(&self, range: TimeRange) {
        self.state.modify_if(|s| {
            let changed = s.range != range;
            s.range = range;
            changed
        });
    }

    pub async fn fetch_cluster_metrics(&self, cluster_id: &str) -> Result<ClusterMetrics> {
        let range = self.time_range();
        self.state
            .run(
                "cluster-metrics",
                self.engine.get_cluster_metrics(cluster_id, range),
                |s, metrics| s.cluster = Some(metrics.clone()),
            )
            .await
    }

    pub async fn fetch_topic_metrics(&self, cluster_id: &str, topic: &str) -> Result<TopicMetrics> {
        let range = self.time_range();
        self.state
            .run(
                "topic-metrics",
                self.engine.get_topic_metrics(cluster_id, topic, range),
                |s, metrics| s.topic = Some(metrics.clone()),
            )
            .await
    }

    pub async fn fetch_consumer_group_metrics(
        &self,
        cluster_id: &str,
        group_id: &str,
    ) -> Result<ConsumerGroupMetrics> {
        let range = self.time_range();
        self.state
            .run(
                "group-metrics",
                self.engine
                    .get_consumer_group_metrics(cluster_id, group_id, range),
                |s, metrics| s.group = Some(metrics.clone()),
            )
            .await
    }

    /// Re-fetches every metric bundle currently shown, right away and then every `interval`.
    ///
    /// A running refresher is replaced.
    pub fn start_auto_refresh(&self, cluster_id: &str, interval: Duration) -> Result<()> {
        require("cluster id", cluster_id)?;
        if interval.is_zero() {
            return Err(Error::validation("refresh interval must be positive"));
        }
        self.stop_auto_refresh();

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.modify(|s| {
            s.auto_refresh = true;
            s.refresh_epoch = Some(epoch);
        });

        let task = refresh_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.state),
            cluster_id.to_owned(),
            interval,
            epoch,
        );
        *self.refresher.lock() = Some(tokio::spawn(task));
        info!(cluster_id, epoch, ?interval, "auto refresh started");
        Ok(())
    }

    /// No refresh commits after this returns; stopping twice is a no-op.
    pub fn stop_auto_refresh(&self) {
        let stopped = self.state.modify_if(MetricsState::stop);
        if let Some(handle) = self.refresher.lock().take() {
            handle.abort();
        }
        if stopped {
            info!("auto refresh stopped");
        }
    }
}

impl Drop for MetricsStore {
    fn drop(&mut self) {
        if let Some(handle) = self.refresher.get_mut().take() {
            handle.abort();
        }
    }
}

async fn refresh_loop(
    engine: Arc<Engine>,
    state: Arc<StateCell<MetricsState>>,
    cluster_id: String,
    interval: Duration,
    epoch: u64,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let (range, has_cluster, topic, group) = state.read(|s| {
            (
                s.range,
                s.cluster.is_some(),
                s.topic.as_ref().map(|t| t.topic.clone()),
                s.group.as_ref().map(|g| g.group_id.clone()),
            )
        });

        let cluster_fut = async {
            if has_cluster {
                Some(engine.get_cluster_metrics(&cluster_id, range).await)
            } else {
                None
            }
        };
        let topic_fut = async {
            match &topic {
                Some(topic) => Some(engine.get_topic_metrics(&cluster_id, topic, range).await),
                None => None,
            }
        };
        let group_fut = async {
            match &group {
                Some(group) => Some(
                    engine
                        .get_consumer_group_metrics(&cluster_id, group, range)
                        .await,
                ),
                None => None,
            }
        };
        let (cluster, topic, group) = futures::join!(cluster_fut, topic_fut, group_fut);

        let mut first_error: Option<Error> = None;
        let committed = state.modify_if(|s| {
            if s.refresh_epoch != Some(epoch) {
                return false;
            }
            if s.range != range {
                // range changed mid-flight; the next tick picks it up
                return false;
            }
            match cluster {
                Some(Ok(metrics)) => s.cluster = Some(metrics),
                Some(Err(e)) => first_error = first_error.take().or(Some(e)),
                None => {}
            }
            match topic {
                Some(Ok(metrics)) => s.topic = Some(metrics),
                Some(Err(e)) => first_error = first_error.take().or(Some(e)),
                None => {}
            }
            match group {
                Some(Ok(metrics)) => s.group = Some(metrics),
                Some(Err(e)) => first_error = first_error.take().or(Some(e)),
                None => {}
            }
            s.status.error = first_error.as_ref().map(Into::into);
            true
        });

        if !committed && state.read(|s| s.refresh_epoch != Some(epoch)) {
            debug!(%cluster_id, epoch, "refresh epoch superseded");
            return;
        }
        if let Some(e) = first_error {
            warn!(%cluster_id, epoch, %e, "metrics refresh failed");
        }
    }
}
