use std::{collections::BTreeMap, ops::ControlFlow, sync::Arc};

use tokio::sync::watch;
use tracing::{debug, info};

use super::{StateCell, Status, impl_has_status};
use crate::{
    backoff::{Backoff, BackoffConfig},
    engine::Engine,
    error::{Error, Result},
    metadata::{ClusterConfig, ClusterInfo, ClusterMetadata, ConnectionTest},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    pub status: Status,
    pub clusters: Vec<ClusterInfo>,
    pub active_cluster_id: Option<String>,
    /// Metadata loaded per cluster id.
    pub metadata: BTreeMap<String, ClusterMetadata>,
    pub last_connection_test: Option<ConnectionTest>,
}

impl_has_status!(ClusterState);

impl ClusterState {
    pub fn active_cluster(&self) -> Option<&ClusterInfo> {
        let id = self.active_cluster_id.as_deref()?;
        self.clusters.iter().find(|c| c.id == id)
    }
}

#[derive(Debug)]
pub struct ClusterStore {
    engine: Arc<Engine>,
    state: StateCell<ClusterState>,
}

impl ClusterStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: StateCell::new(ClusterState::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ClusterState {
        self.state.snapshot()
    }

    pub async fn load_clusters(&self) -> Result<Vec<ClusterInfo>> {
        self.state
            .run("clusters", self.engine.list_clusters(), |s, clusters| {
                s.clusters = clusters.clone();
            })
            .await
    }

    pub async fn add_cluster(&self, config: ClusterConfig) -> Result<ClusterInfo> {
        let key = format!("add:{}", config.name);
        self.state
            .run(&key, self.engine.add_cluster(config), |s, info| {
                s.clusters.push(info.clone());
            })
            .await
    }

    pub async fn update_cluster(&self, cluster_id: &str, config: ClusterConfig) -> Result<ClusterInfo> {
        self.state
            .run(
                &format!("cluster:{cluster_id}"),
                self.engine.update_cluster(cluster_id, config),
                |s, info| {
                    if let Some(entry) = s.clusters.iter_mut().find(|c| c.id == info.id) {
                        *entry = info.clone();
                    }
                },
            )
            .await
    }

    /// Removes a cluster; the active cluster is cleared if it was this one.
    pub async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        let key = format!("cluster:{cluster_id}");
        self.state
            .run(&key, self.engine.delete_cluster(cluster_id), |s, _| {
                s.clusters.retain(|c| c.id != cluster_id);
                s.metadata.remove(cluster_id);
                if s.active_cluster_id.as_deref() == Some(cluster_id) {
                    s.active_cluster_id = None;
                }
            })
            .await?;
        self.state.forget(&key);
        self.state.forget(&format!("metadata:{cluster_id}"));
        Ok(())
    }

    /// Selects the cluster the rest of the dashboard works on. `None` clears the selection.
    pub fn set_active_cluster(&self, cluster_id: Option<&str>) {
        debug!(?cluster_id, "active cluster changed");
        self.state
            .modify(|s| s.active_cluster_id = cluster_id.map(str::to_owned));
    }

    pub fn active_cluster(&self) -> Option<ClusterInfo> {
        self.state.read(|s| s.active_cluster().cloned())
    }

    pub async fn test_connection(&self, config: &ClusterConfig) -> Result<ConnectionTest> {
        self.state
            .run(
                "connection-test",
                self.engine.test_cluster_connection(config),
                |s, test| s.last_connection_test = Some(test.clone()),
            )
            .await
    }

    /// Like [`test_connection`](Self::test_connection), but retries simulated failures with backoff.
    ///
    /// Validation errors are returned immediately.
    pub async fn test_connection_with_retry(
        &self,
        config: &ClusterConfig,
        backoff_config: &BackoffConfig,
    ) -> Result<ConnectionTest> {
        let engine = &self.engine;
        let attempt = async {
            let mut backoff = Backoff::new(backoff_config);
            backoff
                .retry_with_backoff("test_cluster_connection", move || async move {
                    match engine.test_cluster_connection(config).await {
                        Ok(test) => ControlFlow::Break(Ok(test)),
                        Err(e @ Error::SimulatedFailure { .. }) => ControlFlow::Continue(e),
                        Err(e) => ControlFlow::Break(Err(e)),
                    }
                })
                .await?
        };

        let test = self
            .state
            .run("connection-test", attempt, |s, test| {
                s.last_connection_test = Some(test.clone())
            })
            .await?;
        info!(bootstrap_servers = %config.bootstrap_servers, "connection established");
        Ok(test)
    }

    pub async fn load_metadata(&self, cluster_id: &str) -> Result<ClusterMetadata> {
        self.state
            .run(
                &format!("metadata:{cluster_id}"),
                self.engine.get_cluster_metadata(cluster_id),
                |s, metadata| {
                    s.metadata.insert(cluster_id.to_owned(), metadata.clone());
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn store(engine: Engine) -> ClusterStore {
        ClusterStore::new(Arc::new(engine))
    }

    fn engine() -> Engine {
        Engine::builder()
            .no_latency()
            .failure_rates(0.0, 0.0)
            .seed(61)
            .build()
    }

    #[tokio::test]
    async fn test_load_and_select() {
        let store = store(engine());
        store.load_clusters().await.unwrap();

        let state = store.state();
        assert_eq!(state.clusters.len(), 3);
        assert!(!state.status.loading);
        assert!(store.active_cluster().is_none());

        store.set_active_cluster(Some("cluster-2"));
        assert_eq!(store.active_cluster().unwrap().name, "Testing");
    }

    #[tokio::test]
    async fn test_delete_active_cluster_clears_selection() {
        let store = store(engine());
        store.load_clusters().await.unwrap();
        store.set_active_cluster(Some("cluster-1"));
        store.load_metadata("cluster-1").await.unwrap();
        let tracked = store.state.tracked_keys();

        store.delete_cluster("cluster-1").await.unwrap();

        let state = store.state();
        assert_eq!(state.active_cluster_id, None);
        assert!(!state.metadata.contains_key("cluster-1"));
        assert_eq!(state.clusters.len(), 2);
        // metadata key pruned, delete key never outlives the call
        assert_eq!(store.state.tracked_keys(), tracked - 1);
    }

    #[tokio::test]
    async fn test_add_and_update() {
        let store = store(engine());
        store.load_clusters().await.unwrap();

        let info = store
            .add_cluster(ClusterConfig::new("staging", "staging.kafka:9092"))
            .await
            .unwrap();
        store
            .update_cluster(&info.id, ClusterConfig::new("staging-2", "staging.kafka:9092"))
            .await
            .unwrap();

        let state = store.state();
        assert_eq!(state.clusters.len(), 4);
        assert_eq!(state.clusters[3].name, "staging-2");
    }

    #[tokio::test]
    async fn test_error_slot() {
        let store = store(engine());

        assert_matches!(store.delete_cluster("cluster-77").await, Err(Error::NotFound { .. }));
        let status = store.state().status;
        assert!(!status.loading);
        assert_eq!(status.error.unwrap().code, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_retry_gives_up() {
        let engine = Engine::builder().no_latency().failure_rates(1.0, 0.0).build();
        let store = store(engine);
        let backoff = BackoffConfig {
            init_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            base: 2.,
            deadline: Some(Duration::from_secs(1)),
        };

        let res = store
            .test_connection_with_retry(&ClusterConfig::new("dev", "localhost:9092"), &backoff)
            .await;
        assert_matches!(res, Err(Error::RetryFailed(_)));
        assert_eq!(store.state().status.error.unwrap().code, 500);
    }

    #[tokio::test]
    async fn test_connection_succeeds() {
        let store = store(engine());
        let test = store
            .test_connection(&ClusterConfig::new("dev", "localhost:9092"))
            .await
            .unwrap();
        assert_eq!(store.state().last_connection_test, Some(test));
    }
}
