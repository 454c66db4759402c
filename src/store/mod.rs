//! Observable view-model stores.
//!
//! Every store keeps its state in a [`StateCell`]: a [`watch`] channel the presentation layer subscribes to,
//! plus a per-key request sequencer so a slow completion never overwrites the result of a newer request.
use std::{collections::HashMap, future::Future};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

mod cluster;
mod consumer_group;
mod message;
mod metrics;
mod settings;
mod topic;

pub use cluster::{ClusterState, ClusterStore};
pub use consumer_group::{ConsumerGroupState, ConsumerGroupStore};
pub use message::{
    CONSUMER_BUFFER_LIMIT, MessageState, MessageStore, PRODUCER_HISTORY_LIMIT, ProducedMessage,
};
pub use metrics::{DEFAULT_REFRESH_INTERVAL, MetricsState, MetricsStore};
pub use settings::{
    AdvancedSettings, AppearanceSettings, ClusterSettings, ConsumerSettings, FileBackend,
    GeneralSettings, MemoryBackend, MonitoringSettings, ProducerSettings, Settings,
    SettingsBackend, SettingsState, SettingsStore, Theme,
};
pub use topic::{TopicState, TopicStore};

/// Cloneable form of an [`Error`] kept in a store's error slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct StoreError {
    pub code: u16,
    pub message: String,
}

impl From<&Error> for StoreError {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Loading flag and error slot every store carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub loading: bool,
    pub error: Option<StoreError>,
    in_flight: usize,
}

impl Status {
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

pub trait HasStatus {
    fn status(&self) -> &Status;

    fn status_mut(&mut self) -> &mut Status;
}

/// Identifies one request for a key. Only the newest ticket of a key may commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    key: String,
    seq: u64,
}

/// Sequence numbers are drawn from one counter shared by all keys, so a key that was forgotten and later
/// reused never hands out a number an older ticket still holds.
#[derive(Debug, Default)]
struct Sequencer {
    inner: Mutex<SequencerInner>,
}

#[derive(Debug, Default)]
struct SequencerInner {
    counter: u64,
    latest: HashMap<String, u64>,
}

impl Sequencer {
    fn next(&self, key: &str) -> Ticket {
        let mut inner = self.inner.lock();
        inner.counter += 1;
        let seq = inner.counter;
        inner.latest.insert(key.to_owned(), seq);
        Ticket {
            key: key.to_owned(),
            seq,
        }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.inner.lock().latest.get(&ticket.key).copied() == Some(ticket.seq)
    }

    /// Outstanding tickets for `key` become stale.
    fn forget(&self, key: &str) {
        self.inner.lock().latest.remove(key);
    }

    fn len(&self) -> usize {
        self.inner.lock().latest.len()
    }
}

#[derive(Debug)]
pub struct StateCell<S> {
    tx: watch::Sender<S>,
    sequencer: Sequencer,
}

impl<S: HasStatus> StateCell<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            sequencer: Sequencer::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Runs `f` against the current state without cloning it.
    pub fn read<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.tx.borrow())
    }

    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.read(|s| s.status().clone())
    }

    /// Mutates the state and notifies observers.
    pub fn modify(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }

    /// Mutates the state, notifying observers only if `f` returns `true`.
    pub fn modify_if(&self, f: impl FnOnce(&mut S) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Marks an operation as started: loading on, error cleared.
    ///
    /// Loading stays on until the last outstanding guard is dropped.
    pub fn begin(&self) -> OperationGuard<'_, S> {
        self.tx.send_modify(|s| {
            let status = s.status_mut();
            status.in_flight += 1;
            status.loading = true;
            status.error = None;
        });
        OperationGuard { cell: self }
    }

    pub fn ticket(&self, key: &str) -> Ticket {
        self.sequencer.next(key)
    }

    /// Stops tracking `key`, for entities that no longer exist.
    ///
    /// Requests for `key` still in flight are discarded when they complete.
    pub fn forget(&self, key: &str) {
        self.sequencer.forget(key);
    }

    /// Number of keys with a live request sequence.
    pub fn tracked_keys(&self) -> usize {
        self.sequencer.len()
    }

    /// Applies `f` if `ticket` is still the newest for its key.
    pub fn commit(&self, ticket: &Ticket, f: impl FnOnce(&mut S)) -> bool {
        let committed = self.tx.send_if_modified(|s| {
            if !self.sequencer.is_current(ticket) {
                return false;
            }
            f(s);
            true
        });

        if !committed {
            debug!(key = %ticket.key, seq = ticket.seq, "discarding stale completion");
        }
        committed
    }

    /// Records `error` in the error slot if `ticket` is still the newest for its key.
    pub fn fail(&self, ticket: &Ticket, error: &Error) {
        if self.commit(ticket, |s| s.status_mut().error = Some(error.into())) {
            warn!(key = %ticket.key, %error, "store operation failed");
        }
    }

    /// Drives one store operation end to end.
    ///
    /// The loading flag is held for the duration of `fut`. Success is committed through `commit`, failure
    /// lands in the error slot, both only if no newer request for `key` was issued meanwhile. The result is
    /// handed back to the caller either way.
    pub async fn run<T, F, C>(&self, key: &str, fut: F, commit: C) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        C: FnOnce(&mut S, &T),
    {
        let _guard = self.begin();
        let ticket = self.ticket(key);

        match fut.await {
            Ok(value) => {
                self.commit(&ticket, |s| commit(s, &value));
                Ok(value)
            }
            Err(e) => {
                self.fail(&ticket, &e);
                Err(e)
            }
        }
    }
}

/// Clears the loading flag when dropped, on every exit path.
#[derive(Debug)]
#[must_use = "dropping the guard ends the operation immediately"]
pub struct OperationGuard<'a, S: HasStatus> {
    cell: &'a StateCell<S>,
}

impl<S: HasStatus> Drop for OperationGuard<'_, S> {
    fn drop(&mut self) {
        self.cell.tx.send_modify(|s| {
            let status = s.status_mut();
            status.in_flight = status.in_flight.saturating_sub(1);
            status.loading = status.in_flight > 0;
        });
    }
}

macro_rules! impl_has_status {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::store::HasStatus for $ty {
                fn status(&self) -> &$crate::store::Status {
                    &self.status
                }

                fn status_mut(&mut self) -> &mut $crate::store::Status {
                    &mut self.status
                }
            }
        )*
    };
}

pub(crate) use impl_has_status;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Counter {
        status: Status,
        value: u32,
    }

    impl_has_status!(Counter);

    #[tokio::test]
    async fn test_run_commits_and_clears_loading() {
        let cell = StateCell::new(Counter::default());
        let mut rx = cell.subscribe();

        let v = cell
            .run("counter", async { Ok(7) }, |s, v| s.value = *v)
            .await
            .unwrap();
        assert_eq!(v, 7);

        let state = rx.borrow_and_update().clone();
        assert_eq!(state.value, 7);
        assert!(!state.status.loading);
        assert_eq!(state.status.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_sets_error_slot() {
        let cell = StateCell::new(Counter::default());

        let res: Result<u32> = cell
            .run(
                "counter",
                async { Err(Error::validation("nope")) },
                |s, v| s.value = *v,
            )
            .await;
        assert!(res.is_err());

        let status = cell.status();
        assert!(!status.loading);
        assert_eq!(status.error.map(|e| e.code), Some(400));

        // next operation clears the slot
        cell.run("counter", async { Ok(1) }, |s, v| s.value = *v)
            .await
            .unwrap();
        assert_eq!(cell.status().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_is_discarded() {
        let cell = StateCell::new(Counter::default());

        let slow = cell.run(
            "counter",
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(1)
            },
            |s, v| s.value = *v,
        );
        let fast = async {
            // issued after the slow one
            tokio::time::sleep(Duration::from_millis(10)).await;
            cell.run("counter", async { Ok(2) }, |s, v| s.value = *v)
                .await
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap(), 1);
        assert_eq!(fast.unwrap(), 2);

        assert_eq!(cell.read(|s| s.value), 2);
        assert!(!cell.status().loading);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cell = StateCell::new(Counter::default());
        let a = cell.ticket("a");
        let _b = cell.ticket("b");
        assert!(cell.commit(&a, |s| s.value = 3));

        let _a2 = cell.ticket("a");
        assert!(!cell.commit(&a, |s| s.value = 4));
        assert_eq!(cell.read(|s| s.value), 3);
    }

    #[test]
    fn test_forget_drops_key_and_stales_tickets() {
        let cell = StateCell::new(Counter::default());
        let old = cell.ticket("topic:orders");
        let _other = cell.ticket("topic:payments");
        assert_eq!(cell.tracked_keys(), 2);

        cell.forget("topic:orders");
        assert_eq!(cell.tracked_keys(), 1);
        assert!(!cell.commit(&old, |s| s.value = 1));

        // reusing the key starts a fresh sequence the old ticket cannot match
        let new = cell.ticket("topic:orders");
        assert!(!cell.commit(&old, |s| s.value = 1));
        assert!(cell.commit(&new, |s| s.value = 2));
        assert_eq!(cell.read(|s| s.value), 2);
    }

    #[test]
    fn test_guard_nesting() {
        let cell = StateCell::new(Counter::default());
        let outer = cell.begin();
        let inner = cell.begin();
        drop(inner);
        assert!(cell.status().loading);
        drop(outer);
        assert!(!cell.status().loading);
    }
}
