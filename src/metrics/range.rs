use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Points per chart unless the caller asks for more.
pub const DEFAULT_POINT_COUNT: usize = 20;

/// Window a metrics query looks back over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
}

impl TimeRange {
    pub const ALL: [Self; 5] = [
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::SixHours,
        Self::OneDay,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::OneDay => "24h",
        }
    }

    pub fn duration(self) -> TimeDelta {
        match self {
            Self::FiveMinutes => TimeDelta::minutes(5),
            Self::FifteenMinutes => TimeDelta::minutes(15),
            Self::OneHour => TimeDelta::hours(1),
            Self::SixHours => TimeDelta::hours(6),
            Self::OneDay => TimeDelta::hours(24),
        }
    }

    /// Spacing between `count` points spread over this range.
    pub fn cadence(self, count: usize) -> TimeDelta {
        let count = i32::try_from(count.max(1)).unwrap_or(i32::MAX);
        self.duration() / count
    }

    /// Timestamps of `count` evenly spaced points, the last one at `now`.
    ///
    /// Points that would fall before the earliest representable instant are left out.
    pub fn points(self, count: usize, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let cadence = self.cadence(count);
        let mut points: Vec<_> = (0..count)
            .map_while(|i| super::steps_before(now, cadence, i))
            .collect();
        points.reverse();
        points
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unsupported time range '{s}'")))
    }
}
