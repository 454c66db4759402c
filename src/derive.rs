//! Pure functions deriving counts, rates, status and display strings from topology and metrics.
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    group::ConsumerGroup,
    topic::{NO_LEADER, Partition, Topic, UNKNOWN_OFFSET},
};

const KIB: f64 = 1024.0;

/// Messages in a partition, [`UNKNOWN_OFFSET`] if either bound is unknown.
pub fn partition_message_count(partition: &Partition) -> i64 {
    if partition.earliest_offset == UNKNOWN_OFFSET || partition.latest_offset == UNKNOWN_OFFSET {
        return UNKNOWN_OFFSET;
    }
    partition.latest_offset - partition.earliest_offset
}

/// Messages over all partitions; partitions with unknown bounds are skipped.
pub fn topic_message_count(topic: &Topic) -> i64 {
    topic
        .partitions
        .iter()
        .map(partition_message_count)
        .filter(|c| *c != UNKNOWN_OFFSET)
        .sum()
}

pub fn consumer_group_total_lag(group: &ConsumerGroup) -> i64 {
    group
        .offsets
        .iter()
        .map(|o| o.lag)
        .filter(|lag| *lag != UNKNOWN_OFFSET)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStatus {
    Online,
    Offline,
    UnderReplicated,
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::UnderReplicated => "under-replicated",
        })
    }
}

pub fn partition_status(partition: &Partition) -> PartitionStatus {
    if partition.leader == NO_LEADER {
        PartitionStatus::Offline
    } else if partition.isr.len() < partition.replicas.len() {
        PartitionStatus::UnderReplicated
    } else {
        PartitionStatus::Online
    }
}

/// Events per second observed over `span`, rounded; `0` for an empty or negative span.
pub fn calculate_rate(count: u64, span: TimeDelta) -> u64 {
    let ms = span.num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    (count as f64 / ms as f64 * 1000.0).round() as u64
}

pub fn format_message_rate(rate: u64) -> String {
    match rate {
        0..1_000 => format!("{rate} msg/s"),
        1_000..1_000_000 => format!("{:.2} K msg/s", rate as f64 / 1e3),
        _ => format!("{:.2} M msg/s", rate as f64 / 1e6),
    }
}

pub fn format_byte_rate(rate: u64) -> String {
    let r = rate as f64;
    if r < KIB {
        format!("{rate} B/s")
    } else if r < KIB * KIB {
        format!("{:.2} KB/s", r / KIB)
    } else if r < KIB * KIB * KIB {
        format!("{:.2} MB/s", r / (KIB * KIB))
    } else {
        format!("{:.2} GB/s", r / (KIB * KIB * KIB))
    }
}

/// Binary byte size, `B` to `TB`, two decimals. Zero is `0 B`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_owned();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB && unit < UNITS.len() - 1 {
        value /= KIB;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Compact count: `950`, `1.5K`, `2.0M`, `3.1B`.
pub fn format_large_number(n: u64) -> String {
    let v = n as f64;
    if n < 1_000 {
        n.to_string()
    } else if n < 1_000_000 {
        format!("{:.1}K", v / 1e3)
    } else if n < 1_000_000_000 {
        format!("{:.1}M", v / 1e6)
    } else {
        format!("{:.1}B", v / 1e9)
    }
}

/// Integer with `,` thousands separators.
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn format_offset(offset: i64) -> String {
    if offset == UNKNOWN_OFFSET {
        return "N/A".to_owned();
    }
    format_number(offset)
}

pub fn format_lag(lag: i64) -> String {
    match lag {
        UNKNOWN_OFFSET => "N/A".to_owned(),
        0 => "0".to_owned(),
        lag => format_number(lag),
    }
}

/// `YYYY-MM-DD HH:MM:SS`, or `-` when there is no timestamp.
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_owned(),
    }
}

/// Renders milliseconds in the largest unit that keeps the value at or above one.
pub fn format_duration_ms(ms: i64) -> String {
    let v = ms as f64;
    if ms < 1_000 {
        format!("{ms} ms")
    } else if ms < 60_000 {
        format!("{:.2} s", v / 1e3)
    } else if ms < 3_600_000 {
        format!("{:.2} min", v / 60_000.0)
    } else if ms < 86_400_000 {
        format!("{:.2} h", v / 3_600_000.0)
    } else {
        format!("{:.2} days", v / 86_400_000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    String,
    Int,
    Long,
    Double,
    Boolean,
    List,
    Class,
    Unknown,
}

// Lookup order matters: a name listed under several types takes the first.
const CONFIG_TYPES: &[(ConfigType, &[&str])] = &[
    (
        ConfigType::String,
        &[
            "cleanup.policy",
            "compression.type",
            "message.format.version",
            "timestamp.type",
            "log.message.timestamp.type",
        ],
    ),
    (
        ConfigType::Int,
        &[
            "min.insync.replicas",
            "retention.bytes",
            "max.message.bytes",
            "segment.bytes",
            "segment.ms",
            "retention.ms",
            "message.timestamp.difference.max.ms",
            "message.timestamp.before.max.ms",
            "message.timestamp.after.max.ms",
        ],
    ),
    (
        ConfigType::Long,
        &["log.retention.bytes", "log.segment.bytes", "log.retention.ms"],
    ),
    (
        ConfigType::Double,
        &[
            "log.cleaner.min.cleanable.ratio",
            "log.cleaner.max.compaction.lag.ms",
            "log.cleaner.delete.retention.ms",
        ],
    ),
    (
        ConfigType::Boolean,
        &[
            "cleanup.policy",
            "compression.type",
            "unclean.leader.election.enable",
            "delete.enable",
            "compact.enable",
            "message.timestamp.type",
        ],
    ),
    (ConfigType::List, &["cleanup.policy"]),
    (
        ConfigType::Class,
        &[
            "metric.reporters",
            "principal.builder.class",
            "key.serializer",
            "value.serializer",
            "key.deserializer",
            "value.deserializer",
        ],
    ),
];

pub fn config_type(name: &str) -> ConfigType {
    CONFIG_TYPES
        .iter()
        .find(|(_, names)| names.contains(&name))
        .map(|(ty, _)| *ty)
        .unwrap_or(ConfigType::Unknown)
}

/// Human readable rendering of a topic config value; values that cannot be interpreted pass through.
pub fn format_config_value(name: &str, value: &str) -> String {
    match config_type(name) {
        ConfigType::Int | ConfigType::Long => {
            let Ok(n) = value.trim().parse::<i64>() else {
                return value.to_owned();
            };
            if name.contains("ms") || name.contains("time") {
                format_duration_ms(n)
            } else if name.contains("bytes") || name.contains("size") {
                match u64::try_from(n) {
                    Ok(bytes) => format_bytes(bytes),
                    Err(_) => format_number(n),
                }
            } else {
                format_number(n)
            }
        }
        ConfigType::Double => match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => format!("{v:.2}"),
            _ => value.to_owned(),
        },
        ConfigType::Boolean => value.trim().eq_ignore_ascii_case("true").to_string(),
        ConfigType::String | ConfigType::List | ConfigType::Class | ConfigType::Unknown => {
            value.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{Coordinator, GroupOffset, GroupState};

    fn partition(
        leader: i32,
        replicas: Vec<i32>,
        isr: Vec<i32>,
        earliest: i64,
        latest: i64,
    ) -> Partition {
        Partition {
            id: 0,
            leader,
            replicas,
            isr,
            earliest_offset: earliest,
            latest_offset: latest,
            message_count: 0,
        }
    }

    #[test]
    fn test_message_counts() {
        let known = partition(0, vec![0], vec![0], 10, 30);
        let unknown = partition(0, vec![0], vec![0], UNKNOWN_OFFSET, 30);
        assert_eq!(partition_message_count(&known), 20);
        assert_eq!(partition_message_count(&unknown), UNKNOWN_OFFSET);

        let topic = Topic {
            name: "orders".to_owned(),
            internal: false,
            partitions: vec![known.clone(), unknown, known],
            configs: vec![],
        };
        assert_eq!(topic_message_count(&topic), 40);
    }

    #[test]
    fn test_total_lag_skips_unknown() {
        let group = ConsumerGroup {
            group_id: "g".to_owned(),
            state: GroupState::Stable,
            coordinator: Coordinator {
                id: 0,
                host: "h".to_owned(),
                port: 9092,
            },
            members: vec![],
            offsets: vec![
                GroupOffset::new("t", 0, 5, 10, None),
                GroupOffset::new("t", 1, UNKNOWN_OFFSET, 10, None),
                GroupOffset::new("t", 2, 0, 3, None),
            ],
        };
        assert_eq!(consumer_group_total_lag(&group), 8);
    }

    #[test]
    fn test_partition_status() {
        assert_eq!(
            partition_status(&partition(NO_LEADER, vec![0, 1], vec![0, 1], 0, 0)),
            PartitionStatus::Offline
        );
        assert_eq!(
            partition_status(&partition(0, vec![0, 1], vec![0], 0, 0)),
            PartitionStatus::UnderReplicated
        );
        assert_eq!(
            partition_status(&partition(0, vec![0, 1], vec![1, 0], 0, 0)),
            PartitionStatus::Online
        );
        assert_eq!(PartitionStatus::UnderReplicated.to_string(), "under-replicated");
    }

    #[test]
    fn test_rates() {
        assert_eq!(format_message_rate(999), "999 msg/s");
        assert_eq!(format_message_rate(1_500), "1.50 K msg/s");
        assert_eq!(format_message_rate(2_345_678), "2.35 M msg/s");

        assert_eq!(format_byte_rate(512), "512 B/s");
        assert_eq!(format_byte_rate(1536), "1.50 KB/s");

        assert_eq!(calculate_rate(500, TimeDelta::seconds(2)), 250);
        assert_eq!(calculate_rate(500, TimeDelta::zero()), 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(format_bytes(u64::MAX), format!("{:.2} TB", u64::MAX as f64 / KIB.powi(4)));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1_234_567), "1,234,567");
        assert_eq!(format_number(-1_000), "-1,000");
        assert_eq!(format_large_number(950), "950");
        assert_eq!(format_large_number(1_500), "1.5K");
        assert_eq!(format_large_number(3_100_000_000), "3.1B");
        assert_eq!(format_offset(UNKNOWN_OFFSET), "N/A");
        assert_eq!(format_offset(12_000), "12,000");
        assert_eq!(format_lag(0), "0");
        assert_eq!(format_lag(UNKNOWN_OFFSET), "N/A");
        assert_eq!(format_timestamp(None), "-");
        assert_eq!(
            format_timestamp(DateTime::from_timestamp(0, 0)),
            "1970-01-01 00:00:00"
        );
    }

    #[test]
    fn test_config_values() {
        assert_eq!(config_type("cleanup.policy"), ConfigType::String);
        assert_eq!(config_type("compact.enable"), ConfigType::Boolean);
        assert_eq!(config_type("nope"), ConfigType::Unknown);

        assert_eq!(format_config_value("retention.ms", "604800000"), "7.00 days");
        assert_eq!(format_config_value("segment.ms", "500"), "500 ms");
        assert_eq!(format_config_value("segment.ms", "90000"), "1.50 min");
        assert_eq!(format_config_value("retention.bytes", "1073741824"), "1.00 GB");
        assert_eq!(format_config_value("retention.bytes", "-1"), "-1");
        assert_eq!(format_config_value("min.insync.replicas", "2"), "2");
        assert_eq!(format_config_value("log.cleaner.min.cleanable.ratio", "0.5"), "0.50");
        assert_eq!(format_config_value("delete.enable", "TRUE"), "true");
        assert_eq!(format_config_value("delete.enable", "yes"), "false");
        assert_eq!(format_config_value("retention.ms", "forever"), "forever");
        assert_eq!(format_config_value("cleanup.policy", "compact"), "compact");
    }
}
