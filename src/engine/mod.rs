//! Query and mutation surface the dashboard talks to.
//!
//! The [`Engine`] owns a registry of clusters and one synthesized topology per cluster. Every operation
//! validates its identifiers first, then awaits a simulated round trip before it touches any state.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    log_store::{DEFAULT_LOG_CAPACITY, Details, LogLevel, LogStore},
    metadata::{ClusterConfig, ClusterInfo, ClusterStatus},
    metrics::DEFAULT_POINT_COUNT,
    random::RandomSource,
    synth::{DEFAULT_BROKER_POOL, Synthesizer},
};

mod clusters;
mod groups;
mod monitoring;
mod producer;
mod topics;
mod topology;

pub use monitoring::{DEFAULT_LOG_COUNT, LogQuery};
pub use topology::ClusterTopology;

use topology::TopologyCache;

/// Tunables of an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shortest simulated round trip.
    pub min_latency: Duration,
    /// Longest simulated round trip.
    pub max_latency: Duration,
    /// Probability that a connection test fails.
    pub connection_failure_rate: f64,
    /// Probability that sending a single record fails.
    pub send_failure_rate: f64,
    /// Brokers partitions and coordinators are placed on.
    pub broker_pool: i32,
    /// Consumer groups synthesized per cluster.
    pub groups_per_cluster: usize,
    /// Points per metric series.
    pub metric_points: usize,
    pub event_log_capacity: usize,
    /// Seed for reproducible topologies. Drawn from the thread RNG when `None`.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(300),
            max_latency: Duration::from_millis(500),
            connection_failure_rate: 0.2,
            send_failure_rate: 0.1,
            broker_pool: DEFAULT_BROKER_POOL,
            groups_per_cluster: 15,
            metric_points: DEFAULT_POINT_COUNT,
            event_log_capacity: DEFAULT_LOG_CAPACITY,
            seed: None,
        }
    }
}

/// Builder for [`Engine`].
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated round trip, drawn uniformly from `[min, max]`.
    pub fn latency(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_latency = min;
        self.config.max_latency = max.max(min);
        self
    }

    /// Completes every operation without delay.
    pub fn no_latency(self) -> Self {
        self.latency(Duration::ZERO, Duration::ZERO)
    }

    pub fn failure_rates(mut self, connection: f64, send: f64) -> Self {
        self.config.connection_failure_rate = connection.clamp(0.0, 1.0);
        self.config.send_failure_rate = send.clamp(0.0, 1.0);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn broker_pool(mut self, brokers: i32) -> Self {
        self.config.broker_pool = brokers.max(1);
        self
    }

    pub fn groups_per_cluster(mut self, groups: usize) -> Self {
        self.config.groups_per_cluster = groups;
        self
    }

    pub fn metric_points(mut self, points: usize) -> Self {
        self.config.metric_points = points.max(1);
        self
    }

    pub fn event_log_capacity(mut self, capacity: usize) -> Self {
        self.config.event_log_capacity = capacity;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build [`Engine`] with the three stock clusters registered.
    pub fn build(self) -> Engine {
        let config = self.config;
        let random = match config.seed {
            Some(seed) => RandomSource::seeded(seed),
            None => RandomSource::from_entropy(),
        };
        let synth = Synthesizer::new(random).with_broker_pool(config.broker_pool);

        let engine = Engine {
            events: Arc::new(LogStore::new(config.event_log_capacity)),
            synth: Mutex::new(synth),
            clusters: Mutex::new(stock_clusters()),
            topology: TopologyCache::default(),
            next_cluster_id: AtomicU64::new(STOCK_CLUSTERS.len() as u64 + 1),
            config,
        };
        debug!(config=?engine.config, "engine built");
        engine
    }
}

const STOCK_CLUSTERS: [(&str, &str, ClusterStatus, &str); 3] = [
    ("Development", "localhost:9092", ClusterStatus::Connected, "3.5.0"),
    (
        "Testing",
        "test.kafka.cluster:9092",
        ClusterStatus::Disconnected,
        "3.4.0",
    ),
    (
        "Production",
        "prod.kafka.cluster:9092",
        ClusterStatus::Connected,
        "3.5.0",
    ),
];

fn stock_clusters() -> Vec<ClusterInfo> {
    STOCK_CLUSTERS
        .iter()
        .enumerate()
        .map(|(i, (name, servers, status, version))| {
            let mut info = ClusterInfo::from_config(
                format!("cluster-{}", i + 1),
                ClusterConfig::new(*name, *servers),
                *status,
            );
            info.version = (*version).to_owned();
            info
        })
        .collect()
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    synth: Mutex<Synthesizer>,
    clusters: Mutex<Vec<ClusterInfo>>,
    topology: TopologyCache,
    next_cluster_id: AtomicU64,
    events: Arc<LogStore>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine-significant events, newest first.
    pub fn events(&self) -> Arc<LogStore> {
        Arc::clone(&self.events)
    }

    /// Awaits one simulated round trip.
    async fn settle(&self) {
        let (min, max) = (self.config.min_latency, self.config.max_latency);
        if max.is_zero() {
            return;
        }
        let ms = {
            let mut synth = self.synth.lock();
            synth
                .random()
                .int(min.as_millis() as i64, max.as_millis() as i64)
        };
        tokio::time::sleep(Duration::from_millis(ms.max(0) as u64)).await;
    }

    /// Fails with probability `rate`.
    fn inject_failure(&self, operation: &'static str, rate: f64, message: &str) -> Result<()> {
        if self.synth.lock().random().chance(rate) {
            info!(operation, message, "injecting simulated failure");
            return Err(Error::SimulatedFailure {
                operation,
                message: message.to_owned(),
            });
        }
        Ok(())
    }

    fn next_cluster_id(&self) -> String {
        format!(
            "cluster-{}",
            self.next_cluster_id.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn ensure_cluster(&self, cluster_id: &str) -> Result<()> {
        if self.clusters.lock().iter().any(|c| c.id == cluster_id) {
            Ok(())
        } else {
            Err(Error::not_found("cluster", cluster_id))
        }
    }

    /// Runs `f` against the topology of `cluster_id`, synthesizing it on first use.
    fn with_topology<T>(
        &self,
        cluster_id: &str,
        f: impl FnOnce(&mut ClusterTopology, &mut Synthesizer) -> Result<T>,
    ) -> Result<T> {
        self.ensure_cluster(cluster_id)?;

        let (result, counts) = self.topology.with(cluster_id, |topology| {
            let mut synth = self.synth.lock();
            let topology = topology.get_or_insert_with(|| {
                ClusterTopology::synthesize(&mut synth, self.config.groups_per_cluster)
            });
            let result = f(topology, &mut synth);
            (result, topology.metadata.clone())
        });

        if let Some(info) = self.clusters.lock().iter_mut().find(|c| c.id == cluster_id) {
            info.record_counts(&counts);
        }
        result
    }

    fn record_event(&self, level: LogLevel, source: &str, message: String, details: Details) {
        let details = (!details.is_empty()).then_some(details);
        self.events.add_log(level, message, source, details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let engine = Engine::builder()
            .latency(Duration::from_millis(50), Duration::from_millis(10))
            .failure_rates(2.0, -1.0)
            .seed(1)
            .build();

        let config = engine.config();
        assert_eq!(config.max_latency, Duration::from_millis(50));
        assert_eq!(config.connection_failure_rate, 1.0);
        assert_eq!(config.send_failure_rate, 0.0);
        assert_eq!(config.seed, Some(1));
    }

    #[test]
    fn test_stock_clusters() {
        let clusters = stock_clusters();
        let ids: Vec<_> = clusters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["cluster-1", "cluster-2", "cluster-3"]);
        assert_eq!(clusters[1].status, ClusterStatus::Disconnected);
        assert_eq!(clusters[1].version, "3.4.0");
    }

    #[test]
    fn test_topology_is_built_once() {
        let engine = Engine::builder().seed(3).build();

        let first = engine
            .with_topology("cluster-1", |t, _| Ok(t.metadata.cluster_id.clone()))
            .unwrap();
        let second = engine
            .with_topology("cluster-1", |t, _| Ok(t.metadata.cluster_id.clone()))
            .unwrap();
        assert_eq!(first, second);

        let err = engine.with_topology("cluster-9", |_, _| Ok(())).unwrap_err();
        assert_eq!(err.code(), 404);
    }
}
