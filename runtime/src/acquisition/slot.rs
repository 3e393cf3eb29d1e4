//! The normalized slot record and the raw upstream record it is built from.

use crate::config::policy::DayPart;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Availability sentinel meaning "open for booking".
pub const OPEN_STATE: &str = "1";

/// A schedule entry exactly as both channels deliver it.
///
/// Identifiers arrive as strings or numbers depending on the endpoint, so
/// every field is read leniently into a string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSlotRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub schedule_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unit_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dep_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub doctor_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub time_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub level_code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub y_state: String,
}

impl RawSlotRecord {
    pub fn is_open(&self) -> bool {
        self.y_state == OPEN_STATE
    }
}

/// A bookable appointment slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub unit_id: String,
    pub dep_id: String,
    pub doctor_id: String,
    pub schedule_id: String,
    pub day_part: DayPart,
    /// Upstream time-type code, sent back verbatim when claiming.
    pub time_type: String,
    pub level_code: String,
    pub available: bool,
}

impl Slot {
    /// Build a slot from an upstream record found under `day_part`.
    ///
    /// Returns `None` unless the record is flagged open.
    pub fn from_record(record: &RawSlotRecord, day_part: DayPart) -> Option<Self> {
        if !record.is_open() {
            return None;
        }
        Some(Self {
            unit_id: record.unit_id.clone(),
            dep_id: record.dep_id.clone(),
            doctor_id: record.doctor_id.clone(),
            schedule_id: record.schedule_id.clone(),
            day_part,
            time_type: record.time_type.clone(),
            level_code: record.level_code.clone(),
            available: true,
        })
    }
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_accepts_numbers_and_strings() {
        let record: RawSlotRecord = serde_json::from_value(json!({
            "schedule_id": 98765,
            "unit_id": "21",
            "dep_id": 369,
            "doctor_id": "1001",
            "time_type": "1",
            "level_code": 3,
            "y_state": 1,
            "extra": "ignored"
        }))
        .unwrap();
        assert_eq!(record.schedule_id, "98765");
        assert_eq!(record.dep_id, "369");
        assert!(record.is_open());
    }

    #[test]
    fn test_closed_record_builds_no_slot() {
        let record = RawSlotRecord {
            y_state: "0".into(),
            ..Default::default()
        };
        assert!(Slot::from_record(&record, DayPart::Am).is_none());

        let missing_flag = RawSlotRecord::default();
        assert!(Slot::from_record(&missing_flag, DayPart::Pm).is_none());
    }

    #[test]
    fn test_open_record_builds_available_slot() {
        let record = RawSlotRecord {
            schedule_id: "s1".into(),
            y_state: OPEN_STATE.into(),
            ..Default::default()
        };
        let slot = Slot::from_record(&record, DayPart::Pm).unwrap();
        assert!(slot.available);
        assert_eq!(slot.day_part, DayPart::Pm);
        assert_eq!(slot.schedule_id, "s1");
    }
}
