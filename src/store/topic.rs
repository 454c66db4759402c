use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::watch;

use super::{StateCell, Status, impl_has_status};
use crate::{
    engine::Engine,
    error::Result,
    topic::{NewTopic, Topic},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicState {
    pub status: Status,
    pub topics: Vec<Topic>,
    /// Topic shown in the detail view.
    pub selected: Option<Topic>,
}

impl_has_status!(TopicState);

impl TopicState {
    fn replace(&mut self, topic: &Topic) {
        if let Some(entry) = self.topics.iter_mut().find(|t| t.name == topic.name) {
            *entry = topic.clone();
        }
        if let Some(selected) = self.selected.as_mut().filter(|t| t.name == topic.name) {
            *selected = topic.clone();
        }
    }
}

#[derive(Debug)]
pub struct TopicStore {
    engine: Arc<Engine>,
    state: StateCell<TopicState>,
}

impl TopicStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: StateCell::new(TopicState::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TopicState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> TopicState {
        self.state.snapshot()
    }

    pub async fn fetch_topics(&self, cluster_id: &str) -> Result<Vec<Topic>> {
        self.state
            .run("topics", self.engine.list_topics(cluster_id), |s, topics| {
                s.topics = topics.clone();
            })
            .await
    }

    pub async fn fetch_topic_detail(&self, cluster_id: &str, topic: &str) -> Result<Topic> {
        self.state
            .run(
                "topic-detail",
                self.engine.get_topic_detail(cluster_id, topic),
                |s, topic| s.selected = Some(topic.clone()),
            )
            .await
    }

    pub async fn create_topic(&self, cluster_id: &str, request: NewTopic) -> Result<Topic> {
        let key = format!("topic:{}", request.name);
        self.state
            .run(&key, self.engine.create_topic(cluster_id, request), |s, topic| {
                s.topics.push(topic.clone());
                s.topics.sort_by(|a, b| a.name.cmp(&b.name));
            })
            .await
    }

    pub async fn delete_topic(&self, cluster_id: &str, topic: &str) -> Result<()> {
        let key = format!("topic:{topic}");
        self.state
            .run(&key, self.engine.delete_topic(cluster_id, topic), |s, _| {
                s.topics.retain(|t| t.name != topic);
                if s.selected.as_ref().is_some_and(|t| t.name == topic) {
                    s.selected = None;
                }
            })
            .await?;
        self.state.forget(&key);
        Ok(())
    }

    /// Merges `changes` into the topic's configs, in the list and the detail view alike.
    pub async fn update_topic_config(
        &self,
        cluster_id: &str,
        topic: &str,
        changes: BTreeMap<String, String>,
    ) -> Result<Topic> {
        self.state
            .run(
                &format!("topic:{topic}"),
                self.engine.update_topic_config(cluster_id, topic, changes),
                |s, topic| s.replace(topic),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::Error;

    fn store() -> TopicStore {
        let engine = Engine::builder().no_latency().seed(71).build();
        TopicStore::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_fetch_and_detail() {
        let store = store();
        let topics = store.fetch_topics("cluster-1").await.unwrap();
        store
            .fetch_topic_detail("cluster-1", &topics[0].name)
            .await
            .unwrap();

        let state = store.state();
        assert_eq!(state.topics, topics);
        assert_eq!(state.selected.as_ref(), Some(&topics[0]));
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let store = store();
        store.fetch_topics("cluster-1").await.unwrap();
        let before = store.state().topics.len();

        store
            .create_topic("cluster-1", NewTopic::new("orders", 2, 1))
            .await
            .unwrap();
        store.fetch_topic_detail("cluster-1", "orders").await.unwrap();
        assert_eq!(store.state().topics.len(), before + 1);

        let changes = BTreeMap::from([("retention.ms".to_owned(), "60000".to_owned())]);
        store
            .update_topic_config("cluster-1", "orders", changes)
            .await
            .unwrap();
        let state = store.state();
        assert_eq!(state.selected.unwrap().config("retention.ms"), Some("60000"));
        let listed = state.topics.iter().find(|t| t.name == "orders").unwrap();
        assert_eq!(listed.config("retention.ms"), Some("60000"));

        let tracked = store.state.tracked_keys();
        store.delete_topic("cluster-1", "orders").await.unwrap();
        let state = store.state();
        assert_eq!(state.topics.len(), before);
        assert!(state.selected.is_none());
        assert_eq!(store.state.tracked_keys(), tracked - 1);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_topics() {
        let store = store();
        let topics = store.fetch_topics("cluster-1").await.unwrap();

        assert_matches!(
            store.create_topic("cluster-1", NewTopic::new("..", 1, 1)).await,
            Err(Error::Validation(_))
        );
        let state = store.state();
        assert_eq!(state.topics, topics);
        assert_eq!(state.status.error.unwrap().code, 400);
    }
}
