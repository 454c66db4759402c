//! Consumer groups, their members and committed offsets.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topic::UNKNOWN_OFFSET;

/// State of a consumer group as reported by its coordinator.
///
/// Groups move along `Empty -> PreparingRebalance -> CompletingRebalance -> Stable`, fall back to
/// `PreparingRebalance` when membership changes and may end up `Dead` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupState {
    Stable,
    PreparingRebalance,
    CompletingRebalance,
    Empty,
    Dead,
}

impl GroupState {
    pub const ALL: [Self; 5] = [
        Self::Stable,
        Self::PreparingRebalance,
        Self::CompletingRebalance,
        Self::Empty,
        Self::Dead,
    ];

    pub const fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Dead, _) => false,
            (_, Self::Dead) => true,
            (Self::Empty, Self::PreparingRebalance) => true,
            (Self::PreparingRebalance, Self::CompletingRebalance) => true,
            (Self::PreparingRebalance, Self::Empty) => true,
            (Self::CompletingRebalance, Self::Stable) => true,
            (Self::CompletingRebalance, Self::PreparingRebalance) => true,
            (Self::Stable, Self::PreparingRebalance) => true,
            _ => false,
        }
    }

    /// Whether the group is in the middle of a rebalance.
    pub const fn is_rebalancing(self) -> bool {
        matches!(self, Self::PreparingRebalance | Self::CompletingRebalance)
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Stable => "Stable",
            Self::PreparingRebalance => "Preparing rebalance",
            Self::CompletingRebalance => "Completing rebalance",
            Self::Empty => "Empty",
            Self::Dead => "Dead",
        }
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Broker acting as group coordinator.
///
/// Only a copy of the broker's address; the broker itself is resolved by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinator {
    pub id: i32,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub member_id: String,
    pub client_id: String,
    pub host: String,
    /// Topic -> assigned partitions.
    pub assignment: BTreeMap<String, BTreeSet<i32>>,
}

impl Member {
    pub fn partition_count(&self) -> usize {
        self.assignment.values().map(BTreeSet::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOffset {
    pub topic: String,
    pub partition: i32,
    pub current_offset: i64,
    pub end_offset: i64,
    /// `max(0, end - current)`, or [`UNKNOWN_OFFSET`] when either side is unknown.
    pub lag: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_consumed_timestamp: Option<DateTime<Utc>>,
}

impl GroupOffset {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        current_offset: i64,
        end_offset: i64,
        last_consumed_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            current_offset,
            end_offset,
            lag: lag(current_offset, end_offset),
            last_consumed_timestamp,
        }
    }

    pub fn set_current(&mut self, offset: i64) {
        self.current_offset = offset;
        self.lag = lag(self.current_offset, self.end_offset);
    }

    pub fn set_end(&mut self, offset: i64) {
        self.end_offset = offset;
        self.lag = lag(self.current_offset, self.end_offset);
    }
}

fn lag(current: i64, end: i64) -> i64 {
    if current == UNKNOWN_OFFSET || end == UNKNOWN_OFFSET {
        return UNKNOWN_OFFSET;
    }
    (end - current).max(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroup {
    pub group_id: String,
    pub state: GroupState,
    pub coordinator: Coordinator,
    pub members: Vec<Member>,
    pub offsets: Vec<GroupOffset>,
}

impl ConsumerGroup {
    /// Moves the group to `target`, rejecting transitions the coordinator would never make.
    pub fn transition(&mut self, target: GroupState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::validation(format!(
                "consumer group '{}' cannot move from {} to {}",
                self.group_id, self.state, target
            )));
        }
        self.state = target;
        Ok(())
    }

    /// Topics this group has committed offsets for, in first-seen order.
    pub fn topics(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.offsets
            .iter()
            .map(|o| o.topic.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    pub fn offset(&self, topic: &str, partition: i32) -> Option<&GroupOffset> {
        self.offsets
            .iter()
            .find(|o| o.topic == topic && o.partition == partition)
    }
}

/// Where to move a group's committed offsets to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum ResetTarget {
    /// The earliest offset still retained by the partition.
    Earliest,

    /// The end of the partition, skipping everything not yet consumed.
    Latest,

    /// An absolute offset, clamped to the retained range.
    Offset(i64),
}

/// Request to reset the committed offsets of one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetReset {
    pub topic: String,
    pub target: ResetTarget,
}

impl OffsetReset {
    pub fn new(topic: impl Into<String>, target: ResetTarget) -> Self {
        Self {
            topic: topic.into(),
            target,
        }
    }
}
