//! Bounded, most-recent-first log buffer with lazy filtering and export.
use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::{
    engine::{Engine, LogQuery},
    error::{Error, Result},
    store::{HasStatus, StateCell, Status, impl_has_status},
    synth::RawLog,
};

/// Entries kept by a [`LogStore`] unless configured otherwise.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

const CSV_HEADER: &str = "ID,Timestamp,Level,Message,Source,Details";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub const ALL: [Self; 4] = [Self::Info, Self::Warn, Self::Error, Self::Debug];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::validation(format!("unknown log level '{s}'")))
    }
}

/// Value of a structured log detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for DetailValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for DetailValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for DetailValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<usize> for DetailValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for DetailValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for DetailValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for DetailValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

pub type Details = BTreeMap<String, DetailValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.into(),
            details: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    fn details_json(&self) -> String {
        match &self.details {
            // maps of plain values always serialize
            Some(details) => serde_json::to_string(details).unwrap_or_default(),
            None => "{}".to_owned(),
        }
    }
}

impl From<RawLog> for LogEntry {
    fn from(raw: RawLog) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: raw.timestamp,
            level: raw.level,
            message: raw.message,
            source: raw.component,
            details: Some(BTreeMap::from([
                ("thread".to_owned(), raw.thread.into()),
                ("class".to_owned(), raw.class.into()),
            ])),
        }
    }
}

/// Read-side filter. Set fields are AND-composed, unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Case-insensitive, matched against the message and the serialized details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.level.is_some_and(|level| level != entry.level) {
            return false;
        }
        if self.source.as_ref().is_some_and(|s| s != &entry.source) {
            return false;
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_message = entry.message.to_lowercase().contains(&needle);
            let in_details = entry.details.is_some()
                && entry.details_json().to_lowercase().contains(&needle);
            if !in_message && !in_details {
                return false;
            }
        }
        if self.start_time.is_some_and(|t| entry.timestamp < t) {
            return false;
        }
        if self.end_time.is_some_and(|t| entry.timestamp > t) {
            return false;
        }
        true
    }

    /// Overlays the set fields of `other` on top of this filter.
    pub fn merge(&mut self, other: Self) {
        let Self {
            level,
            source,
            search,
            start_time,
            end_time,
        } = other;
        self.level = level.or(self.level);
        self.source = source.or(self.source.take());
        self.search = search.or(self.search.take());
        self.start_time = start_time.or(self.start_time);
        self.end_time = end_time.or(self.end_time);
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        quote_csv(s)
    } else {
        s.to_owned()
    }
}

fn quote_csv(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Observable side of a [`LogStore`]; the entries themselves stay in the buffer.
#[derive(Debug, Clone, Default)]
pub struct LogState {
    pub status: Status,
    pub filter: LogFilter,
    pub len: usize,
    /// Bumped on every change to the buffer.
    pub revision: u64,
}

impl_has_status!(LogState);

#[derive(Debug)]
pub struct LogStore {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    state: StateCell<LogState>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            capacity: capacity.max(1),
            state: StateCell::new(LogState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> watch::Receiver<LogState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LogState {
        self.state.snapshot()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Inserts `entry` at the head, evicting the oldest entry once full.
    pub fn push(&self, entry: LogEntry) {
        debug!(
            level = %entry.level,
            source = %entry.source,
            message = %entry.message,
            "log entry added"
        );
        let len = {
            let mut entries = self.entries.lock();
            entries.push_front(entry);
            entries.truncate(self.capacity);
            entries.len()
        };
        self.bump(len);
    }

    pub fn add_log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        source: impl Into<String>,
        details: Option<Details>,
    ) {
        let mut entry = LogEntry::new(level, source, message);
        entry.details = details;
        self.push(entry);
    }

    /// Appends several entries, given newest first, keeping that order at the head.
    pub fn extend(&self, entries: impl IntoIterator<Item = LogEntry>) {
        let len = self.insert_front(entries);
        debug!(len, "log entries loaded");
        self.bump(len);
    }

    /// Puts `entries` (newest first) at the head and returns the new length.
    ///
    /// Only takes the buffer lock, so it may run inside a state commit.
    fn insert_front(&self, entries: impl IntoIterator<Item = LogEntry>) -> usize {
        let mut buffer = self.entries.lock();
        let incoming: Vec<_> = entries.into_iter().collect();
        for entry in incoming.into_iter().rev() {
            buffer.push_front(entry);
        }
        buffer.truncate(self.capacity);
        buffer.len()
    }

    fn bump(&self, len: usize) {
        self.state.modify(|s| {
            s.len = len;
            s.revision += 1;
        });
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries matching the current filter, newest first.
    pub fn filtered(&self) -> Vec<LogEntry> {
        let filter = self.state.read(|s| s.filter.clone());
        self.query(&filter)
    }

    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn set_filter(&self, filter: LogFilter) {
        self.state.modify(|s| s.filter.merge(filter));
    }

    pub fn clear_filter(&self) {
        self.state.modify(|s| s.filter = LogFilter::default());
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.bump(0);
    }

    /// Exports the filtered view.
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let entries = self.filtered();
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
            ExportFormat::Csv => Ok(to_csv(&entries)),
        }
    }

    /// Loads `count` engine logs for `cluster_id` on top of the buffer and returns how many the engine sent.
    ///
    /// A fetch overtaken by a newer one for the same cluster leaves the buffer untouched.
    pub async fn fetch_logs(
        &self,
        engine: &Engine,
        cluster_id: &str,
        count: usize,
    ) -> Result<usize> {
        let entries = self
            .state
            .run(
                &format!("logs:{cluster_id}"),
                engine.get_logs(cluster_id, LogQuery::new(count)),
                |s, entries: &Vec<LogEntry>| {
                    s.len = self.insert_front(entries.iter().cloned());
                    s.revision += 1;
                },
            )
            .await?;
        debug!(cluster_id, n = entries.len(), "engine logs fetched");
        Ok(entries.len())
    }
}

fn to_csv(entries: &[LogEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    for entry in entries {
        out.push('\n');
        out.push_str(&escape_csv(&entry.id.to_string()));
        out.push(',');
        out.push_str(&entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
        out.push(',');
        out.push_str(entry.level.as_str());
        out.push(',');
        out.push_str(&quote_csv(&entry.message));
        out.push(',');
        out.push_str(&escape_csv(&entry.source));
        out.push(',');
        out.push_str(&quote_csv(&entry.details_json()));
    }
    out
}
