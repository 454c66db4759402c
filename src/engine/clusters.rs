use tracing::info;

use super::{ClusterTopology, Engine};
use crate::{
    error::{Error, Result},
    log_store::{Details, LogLevel},
    metadata::{BROKER_VERSION, ClusterConfig, ClusterInfo, ClusterMetadata, ClusterStatus, ConnectionTest},
    validation::{require, validate_bootstrap_servers, validate_cluster_name},
};

const SOURCE: &str = "ClusterManager";

fn validate_config(config: &ClusterConfig) -> Result<()> {
    validate_cluster_name(&config.name)?;
    validate_bootstrap_servers(&config.bootstrap_servers)
}

fn cluster_details(cluster_id: &str) -> Details {
    Details::from([("clusterId".to_owned(), cluster_id.into())])
}

impl Engine {
    /// Registered clusters with the counts of their topologies.
    pub async fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        self.settle().await;

        let ids: Vec<String> = self.clusters.lock().iter().map(|c| c.id.clone()).collect();
        for id in &ids {
            self.with_topology(id, |_, _| Ok(()))?;
        }
        Ok(self.clusters.lock().clone())
    }

    pub async fn get_cluster_metadata(&self, cluster_id: &str) -> Result<ClusterMetadata> {
        require("cluster id", cluster_id)?;
        self.settle().await;

        self.with_topology(cluster_id, |topology, _| Ok(topology.metadata.clone()))
    }

    /// Copy of the synthesized topology of `cluster_id`, if it was built already.
    pub fn topology(&self, cluster_id: &str) -> Option<ClusterTopology> {
        self.topology.get(cluster_id)
    }

    /// Pretends to connect to the bootstrap servers of `config`.
    ///
    /// Fails with the configured connection failure rate.
    pub async fn test_cluster_connection(&self, config: &ClusterConfig) -> Result<ConnectionTest> {
        validate_bootstrap_servers(&config.bootstrap_servers)?;
        self.settle().await;

        self.inject_failure(
            "test_cluster_connection",
            self.config.connection_failure_rate,
            &format!("failed to connect to {}", config.bootstrap_servers),
        )?;

        info!(bootstrap_servers = %config.bootstrap_servers, "connection test succeeded");
        Ok(ConnectionTest {
            version: BROKER_VERSION.to_owned(),
            broker_count: self.config.broker_pool as usize,
        })
    }

    pub async fn add_cluster(&self, config: ClusterConfig) -> Result<ClusterInfo> {
        validate_config(&config)?;
        self.settle().await;

        let id = self.next_cluster_id();
        let name = config.name.clone();
        self.clusters
            .lock()
            .push(ClusterInfo::from_config(id.clone(), config, ClusterStatus::Connected));

        let info = self.with_topology(&id, |_, _| Ok(()))
            .and_then(|_| self.cluster_info(&id))?;

        info!(cluster_id = %id, name = %name, "cluster added");
        self.record_event(
            LogLevel::Info,
            SOURCE,
            format!("Cluster '{name}' added"),
            cluster_details(&id),
        );
        Ok(info)
    }

    /// Replaces name, bootstrap servers and connection options of a cluster.
    ///
    /// Status, version and topology are kept.
    pub async fn update_cluster(&self, cluster_id: &str, config: ClusterConfig) -> Result<ClusterInfo> {
        require("cluster id", cluster_id)?;
        validate_config(&config)?;
        self.settle().await;

        let info = {
            let mut clusters = self.clusters.lock();
            let info = clusters
                .iter_mut()
                .find(|c| c.id == cluster_id)
                .ok_or_else(|| Error::not_found("cluster", cluster_id))?;
            info.name = config.name;
            info.bootstrap_servers = config.bootstrap_servers;
            info.ssl_enabled = config.ssl_enabled;
            info.timeout_ms = config.timeout_ms;
            info.clone()
        };

        info!(cluster_id, name = %info.name, "cluster updated");
        self.record_event(
            LogLevel::Info,
            SOURCE,
            format!("Cluster '{}' updated", info.name),
            cluster_details(cluster_id),
        );
        Ok(info)
    }

    pub async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        require("cluster id", cluster_id)?;
        self.settle().await;

        let removed = {
            let mut clusters = self.clusters.lock();
            let idx = clusters
                .iter()
                .position(|c| c.id == cluster_id)
                .ok_or_else(|| Error::not_found("cluster", cluster_id))?;
            clusters.remove(idx)
        };
        self.topology.invalidate(cluster_id);

        info!(cluster_id, name = %removed.name, "cluster deleted");
        self.record_event(
            LogLevel::Warn,
            SOURCE,
            format!("Cluster '{}' deleted", removed.name),
            cluster_details(cluster_id),
        );
        Ok(())
    }

    fn cluster_info(&self, cluster_id: &str) -> Result<ClusterInfo> {
        self.clusters
            .lock()
            .iter()
            .find(|c| c.id == cluster_id)
            .cloned()
            .ok_or_else(|| Error::not_found("cluster", cluster_id))
    }
}
