//! The immutable polling policy for one run, validated from configuration.

use super::ConfigProvider;
use crate::error::AcquireError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_WEEKS: &str = "1,2,3,4,5,6,7";
const DEFAULT_DAYS: &str = "am,pm";
const DEFAULT_SLEEP_MS: u64 = 3000;
const DEFAULT_MAX_RETRIES: u32 = 3;

pub const START_DATE_FORMAT: &str = "%Y-%m-%d";
pub const APPOINT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which upstream query path(s) to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Department schedule matrix (`CHANNEL_1`).
    Primary,
    /// Doctor detail paging (`CHANNEL_2`).
    Secondary,
    Both,
}

impl Channel {
    /// Unknown or empty values poll both channels.
    pub fn from_config(raw: &str) -> Self {
        match raw.trim() {
            "CHANNEL_1" => Self::Primary,
            "CHANNEL_2" => Self::Secondary,
            _ => Self::Both,
        }
    }
}

/// Coarse time-of-day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DayPart {
    Am,
    Pm,
}

impl DayPart {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "am" => Some(Self::Am),
            "pm" => Some(Self::Pm),
            _ => None,
        }
    }

    /// Key used by the upstream schedule documents.
    pub fn as_key(self) -> &'static str {
        match self {
            Self::Am => "am",
            Self::Pm => "pm",
        }
    }
}

impl fmt::Display for DayPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Weekday code, 1 = Monday through 7 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeekdayCode(u8);

impl WeekdayCode {
    pub fn new(code: u8) -> Option<Self> {
        (1..=7).contains(&code).then_some(Self(code))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u8>().ok().and_then(Self::new)
    }

    pub fn code(self) -> u8 {
        self.0
    }

    /// The single-character alias the doctor-detail channel uses for this day.
    pub fn alias(self) -> &'static str {
        match self.0 {
            1 => "一",
            2 => "二",
            3 => "三",
            4 => "四",
            5 => "五",
            6 => "六",
            _ => "日",
        }
    }

    /// Whether a week-position label from the department schedule names this
    /// day. Labels come as codes (`"1"`), aliases (`"一"`) or full names
    /// (`"星期一"`, `"周一"`).
    pub fn matches_label(self, label: &str) -> bool {
        let label = label.trim();
        if label == self.to_string() || label == self.alias() {
            return true;
        }
        let stem = label
            .strip_prefix("星期")
            .or_else(|| label.strip_prefix("周"))
            .unwrap_or("");
        stem == self.alias() || (self.0 == 7 && stem == "天")
    }
}

impl fmt::Display for WeekdayCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The department and doctor a run is aimed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub unit_id: String,
    pub dep_id: String,
    pub doc_id: String,
}

/// Everything that shapes polling for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingPolicy {
    pub target: Target,
    pub channel: Channel,
    pub weeks: Vec<WeekdayCode>,
    pub day_parts: Vec<DayPart>,
    pub base_delay: Duration,
    pub max_retries: u32,
    /// Bound on cycles that make no progress; `None` polls until success.
    pub max_cycles: Option<u64>,
    /// First date to query; today when unset.
    pub start_date: Option<NaiveDate>,
    /// Local wall-clock instant at which polling may begin.
    pub scheduled_start: Option<NaiveDateTime>,
}

impl PollingPolicy {
    pub fn from_config(config: &dyn ConfigProvider) -> Result<Self, AcquireError> {
        let target = Target {
            unit_id: config.get("unit_id", ""),
            dep_id: config.get("dep_id", ""),
            doc_id: config.get("doc_id", ""),
        };
        let channel = Channel::from_config(&config.get("brushChannel", ""));

        if matches!(channel, Channel::Primary | Channel::Both)
            && (target.unit_id.is_empty() || target.dep_id.is_empty())
        {
            return Err(AcquireError::Config(
                "unit_id and dep_id are required for the department channel".into(),
            ));
        }
        if matches!(channel, Channel::Secondary | Channel::Both)
            && (target.doc_id.is_empty() || target.dep_id.is_empty())
        {
            return Err(AcquireError::Config(
                "doc_id and dep_id are required for the doctor channel".into(),
            ));
        }

        let weeks = parse_csv(&config.get("weeks", DEFAULT_WEEKS), "weeks", WeekdayCode::parse)?;
        let day_parts = parse_csv(&config.get("days", DEFAULT_DAYS), "days", DayPart::parse)?;

        let base_delay = Duration::from_millis(parse_number(
            &config.get("sleepTime", ""),
            "sleepTime",
            DEFAULT_SLEEP_MS,
        )?);
        let max_retries = parse_number(&config.get("maxRetries", ""), "maxRetries", DEFAULT_MAX_RETRIES)?;

        let max_cycles = match config.get("maxCycles", "").trim() {
            "" => None,
            raw => Some(
                raw.parse::<u64>()
                    .map_err(|_| AcquireError::Config(format!("maxCycles is not a number: {raw}")))?,
            ),
        };

        let start_date = match config.get("brushStartDate", "").trim() {
            "" => None,
            raw => Some(NaiveDate::parse_from_str(raw, START_DATE_FORMAT).map_err(|_| {
                AcquireError::Config(format!("brushStartDate must be YYYY-MM-DD: {raw}"))
            })?),
        };

        let scheduled_start = if parse_bool(&config.get("enableAppoint", "false")) {
            match config.get("appointTime", "").trim() {
                "" => None,
                raw => Some(NaiveDateTime::parse_from_str(raw, APPOINT_TIME_FORMAT).map_err(
                    |_| AcquireError::Config(format!("appointTime must be YYYY-MM-DD HH:MM:SS: {raw}")),
                )?),
            }
        } else {
            None
        };

        Ok(Self {
            target,
            channel,
            weeks,
            day_parts,
            base_delay,
            max_retries,
            max_cycles,
            start_date,
            scheduled_start,
        })
    }
}

pub fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str, default: T) -> Result<T, AcquireError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    raw.parse::<T>()
        .map_err(|_| AcquireError::Config(format!("{key} is not a number: {raw}")))
}

fn parse_csv<T: PartialEq>(
    raw: &str,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>, AcquireError> {
    let mut out = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let value =
            parse(item).ok_or_else(|| AcquireError::Config(format!("invalid {key} entry: {item}")))?;
        if !out.contains(&value) {
            out.push(value);
        }
    }
    if out.is_empty() {
        return Err(AcquireError::Config(format!("{key} must not be empty")));
    }
    Ok(out)
}
