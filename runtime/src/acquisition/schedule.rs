//! Schedule discovery over the two upstream channels.
//!
//! The department channel returns a schedule matrix whose day-part entries
//! are either a flat list of records or a map keyed by week position. The
//! doctor channel returns a six-day window keyed by calendar date. Both are
//! decoded into typed documents here and normalized by pure functions into
//! [`Slot`]s; only records flagged open survive.

use crate::acquisition::http_client::{HttpGateway, Redirects};
use crate::acquisition::site::SiteEndpoints;
use crate::acquisition::slot::{RawSlotRecord, Slot};
use crate::config::policy::{Channel, DayPart, PollingPolicy, Target, WeekdayCode};
use crate::error::AcquireError;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Days requested from the doctor channel.
pub const DOCTOR_WINDOW_DAYS: u32 = 6;

/// Anything that can produce candidate slots for a policy.
#[async_trait]
pub trait SlotSource: Send {
    async fn poll(&mut self, policy: &PollingPolicy) -> Result<Vec<Slot>, AcquireError>;
}

/// One day-part cell of the department matrix.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DayPartSchedule {
    /// Every record for the day-part, independent of weekday.
    Flat(Vec<RawSlotRecord>),
    /// Records keyed by week position (`"0"`, `"1"`, ...).
    Indexed(BTreeMap<String, RawSlotRecord>),
}

/// Department schedule document.
#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentSchedule {
    /// Week-position labels; absent when the request was rejected.
    #[serde(default)]
    pub week: Option<Vec<Value>>,
    #[serde(default)]
    pub doc_ids: Value,
    /// Doctor id → day-part key → cell. Cells are decoded on demand.
    #[serde(default)]
    pub sch: Map<String, Value>,
    /// Every other top-level field, kept for diagnostics.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl DepartmentSchedule {
    /// The document's top-level fields, for error messages.
    pub fn payload(&self) -> Value {
        payload_of(&self.rest, &self.sch)
    }
}

/// Doctor detail document.
#[derive(Debug, Clone, Deserialize)]
pub struct DoctorSchedule {
    /// Calendar date → weekday alias.
    #[serde(default)]
    pub dates: Option<BTreeMap<String, Value>>,
    /// Present instead of `dates` when the login session has lapsed.
    #[serde(default)]
    pub status: Option<Value>,
    /// `{dep}_{doc}` → `{dep}_{doc}_{daypart}` → date → record.
    #[serde(default)]
    pub sch: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl DoctorSchedule {
    pub fn payload(&self) -> Value {
        payload_of(&self.rest, &self.sch)
    }
}

fn payload_of(rest: &Map<String, Value>, sch: &Map<String, Value>) -> Value {
    let mut all = rest.clone();
    if !sch.is_empty() {
        all.insert("sch".to_string(), Value::Object(sch.clone()));
    }
    Value::Object(all)
}

/// Slots from a flat day-part list.
pub fn normalize_flat(records: &[RawSlotRecord], day_part: DayPart) -> Vec<Slot> {
    records
        .iter()
        .filter_map(|r| Slot::from_record(r, day_part))
        .collect()
}

/// Slots from a week-position map, visiting `positions` in order.
pub fn normalize_indexed(
    records: &BTreeMap<String, RawSlotRecord>,
    positions: &[String],
    day_part: DayPart,
) -> Vec<Slot> {
    positions
        .iter()
        .filter_map(|pos| records.get(pos))
        .filter_map(|r| Slot::from_record(r, day_part))
        .collect()
}

/// Week positions (as map keys) of the requested weekdays.
pub fn week_positions(labels: &[String], weeks: &[WeekdayCode]) -> Vec<String> {
    weeks
        .iter()
        .filter_map(|w| labels.iter().position(|l| w.matches_label(l)))
        .map(|idx| idx.to_string())
        .collect()
}

/// Normalize a department schedule document.
pub fn normalize_department(
    endpoint: &str,
    doc: &DepartmentSchedule,
    weeks: &[WeekdayCode],
    day_parts: &[DayPart],
) -> Result<Vec<Slot>, AcquireError> {
    let Some(labels) = &doc.week else {
        return Err(AcquireError::protocol(
            endpoint,
            format!("missing `week` in schedule: {}", doc.payload()),
        ));
    };
    let labels: Vec<String> = labels.iter().map(value_to_label).collect();
    let positions = week_positions(&labels, weeks);

    let mut slots = Vec::new();
    for doc_id in split_ids(&doc.doc_ids) {
        let Some(doctor) = doc.sch.get(&doc_id).and_then(Value::as_object) else {
            tracing::debug!("doctor {doc_id} listed without a schedule");
            continue;
        };
        for &day_part in day_parts {
            let Some(cell) = doctor.get(day_part.as_key()) else {
                continue;
            };
            let cell = DayPartSchedule::deserialize(cell).map_err(|e| {
                AcquireError::protocol(
                    endpoint,
                    format!("unrecognized {day_part} schedule for doctor {doc_id}: {e}"),
                )
            })?;
            match &cell {
                DayPartSchedule::Flat(records) => slots.extend(normalize_flat(records, day_part)),
                DayPartSchedule::Indexed(records) => {
                    slots.extend(normalize_indexed(records, &positions, day_part))
                }
            }
        }
    }
    Ok(slots)
}

/// Dates in the doctor window that fall on the requested weekdays.
pub fn matching_dates(dates: &BTreeMap<String, Value>, weeks: &[WeekdayCode]) -> Vec<String> {
    weeks
        .iter()
        .filter_map(|w| {
            dates
                .iter()
                .find(|(_, alias)| alias.as_str().map(str::trim) == Some(w.alias()))
                .map(|(date, _)| date.clone())
        })
        .collect()
}

/// Normalize a doctor detail document.
pub fn normalize_doctor(
    endpoint: &str,
    doc: &DoctorSchedule,
    target: &Target,
    weeks: &[WeekdayCode],
    day_parts: &[DayPart],
) -> Result<Vec<Slot>, AcquireError> {
    let Some(dates) = &doc.dates else {
        if doc.status.is_some() {
            return Err(AcquireError::SessionExpired {
                endpoint: endpoint.to_string(),
            });
        }
        return Err(AcquireError::protocol(
            endpoint,
            format!("missing `dates` in schedule: {}", doc.payload()),
        ));
    };

    let week_dates = matching_dates(dates, weeks);
    if week_dates.is_empty() {
        return Ok(Vec::new());
    }

    let prefix = format!("{}_{}", target.dep_id, target.doc_id);
    let Some(doctor) = doc.sch.get(&prefix).and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut slots = Vec::new();
    for &day_part in day_parts {
        let key = format!("{prefix}_{}", day_part.as_key());
        let Some(by_date) = doctor.get(&key).and_then(Value::as_object) else {
            continue;
        };
        for date in &week_dates {
            let Some(entry) = by_date.get(date) else {
                continue;
            };
            let record = RawSlotRecord::deserialize(entry).map_err(|e| {
                AcquireError::protocol(endpoint, format!("unrecognized record at {key}_{date}: {e}"))
            })?;
            slots.extend(Slot::from_record(&record, day_part));
        }
    }
    Ok(slots)
}

/// Polls the upstream schedule endpoints.
pub struct ScheduleDiscovery {
    gateway: Arc<HttpGateway>,
    site: SiteEndpoints,
}

impl ScheduleDiscovery {
    pub fn new(gateway: Arc<HttpGateway>, site: SiteEndpoints) -> Self {
        Self { gateway, site }
    }

    /// Query the channel(s) selected by the policy and concatenate results.
    pub async fn poll(&self, policy: &PollingPolicy) -> Result<Vec<Slot>, AcquireError> {
        let date = policy
            .start_date
            .unwrap_or_else(|| Local::now().date_naive());

        match policy.channel {
            Channel::Primary => self.poll_department(policy, date).await,
            Channel::Secondary => self.poll_doctor(policy, date).await,
            Channel::Both => {
                let mut slots = self.poll_department(policy, date).await?;
                slots.extend(self.poll_doctor(policy, date).await?);
                Ok(slots)
            }
        }
    }

    /// Department schedule matrix.
    pub async fn poll_department(
        &self,
        policy: &PollingPolicy,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, AcquireError> {
        let url = self
            .site
            .department_schedule(&policy.target.unit_id, &policy.target.dep_id, date);
        let resp = self.gateway.get(&url, Redirects::Follow).await?;
        let doc: DepartmentSchedule = decode_json(&url, &resp.body)?;
        let slots = normalize_department(&url, &doc, &policy.weeks, &policy.day_parts)?;
        tracing::debug!("department channel: {} open slot(s)", slots.len());
        Ok(slots)
    }

    /// Doctor detail window.
    pub async fn poll_doctor(
        &self,
        policy: &PollingPolicy,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, AcquireError> {
        let url = self.site.doctor_schedule();
        let form = [
            ("docid", policy.target.doc_id.clone()),
            ("date", date.format("%Y-%m-%d").to_string()),
            ("days", DOCTOR_WINDOW_DAYS.to_string()),
        ];
        let resp = self.gateway.post_form(&url, &form, Redirects::Follow).await?;
        let doc: DoctorSchedule = decode_json(&url, &resp.body)?;
        let slots = normalize_doctor(&url, &doc, &policy.target, &policy.weeks, &policy.day_parts)?;
        tracing::debug!("doctor channel: {} open slot(s)", slots.len());
        Ok(slots)
    }
}

#[async_trait]
impl SlotSource for ScheduleDiscovery {
    async fn poll(&mut self, policy: &PollingPolicy) -> Result<Vec<Slot>, AcquireError> {
        ScheduleDiscovery::poll(self, policy).await
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(endpoint: &str, body: &str) -> Result<T, AcquireError> {
    serde_json::from_str(body)
        .map_err(|e| AcquireError::protocol(endpoint, format!("invalid JSON ({e}): {body}")))
}

fn value_to_label(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `doc_ids` is a comma-separated string, occasionally a bare number or list.
fn split_ids(v: &Value) -> Vec<String> {
    match v {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::Number(n) => vec![n.to_string()],
        Value::Array(items) => items.iter().map(value_to_label).collect(),
        _ => Vec::new(),
    }
}
