use std::sync::Arc;

use tokio::sync::watch;

use super::{StateCell, Status, impl_has_status};
use crate::{
    engine::Engine,
    error::Result,
    group::{ConsumerGroup, OffsetReset},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerGroupState {
    pub status: Status,
    pub groups: Vec<ConsumerGroup>,
    pub selected: Option<ConsumerGroup>,
}

impl_has_status!(ConsumerGroupState);

#[derive(Debug)]
pub struct ConsumerGroupStore {
    engine: Arc<Engine>,
    state: StateCell<ConsumerGroupState>,
}

impl ConsumerGroupStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: StateCell::new(ConsumerGroupState::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsumerGroupState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConsumerGroupState {
        self.state.snapshot()
    }

    pub async fn fetch_consumer_groups(&self, cluster_id: &str) -> Result<Vec<ConsumerGroup>> {
        self.state
            .run("groups", self.engine.list_consumer_groups(cluster_id), |s, groups| {
                s.groups = groups.clone();
            })
            .await
    }

    pub async fn fetch_consumer_group_detail(
        &self,
        cluster_id: &str,
        group_id: &str,
    ) -> Result<ConsumerGroup> {
        self.state
            .run(
                "group-detail",
                self.engine.get_consumer_group_detail(cluster_id, group_id),
                |s, group| s.selected = Some(group.clone()),
            )
            .await
    }

    pub async fn reset_consumer_group_offset(
        &self,
        cluster_id: &str,
        group_id: &str,
        reset: OffsetReset,
    ) -> Result<ConsumerGroup> {
        self.state
            .run(
                &format!("group:{group_id}"),
                self.engine
                    .reset_consumer_group_offset(cluster_id, group_id, reset),
                |s, group| {
                    if let Some(entry) = s.groups.iter_mut().find(|g| g.group_id == group.group_id) {
                        *entry = group.clone();
                    }
                    if let Some(selected) = s
                        .selected
                        .as_mut()
                        .filter(|g| g.group_id == group.group_id)
                    {
                        *selected = group.clone();
                    }
                },
            )
            .await
    }

    pub async fn delete_consumer_group(&self, cluster_id: &str, group_id: &str) -> Result<()> {
        let key = format!("group:{group_id}");
        self.state
            .run(
                &key,
                self.engine.delete_consumer_group(cluster_id, group_id),
                |s, _| {
                    s.groups.retain(|g| g.group_id != group_id);
                    if s.selected.as_ref().is_some_and(|g| g.group_id == group_id) {
                        s.selected = None;
                    }
                },
            )
            .await?;
        self.state.forget(&key);
        Ok(())
    }
}
