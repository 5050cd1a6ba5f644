use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::AttendanceError;
use crate::model::student::StudentId;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

/// Anything that can touch a student's record for the day.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    CheckIn,
    CheckOut,
    ManualPresent,
    ManualLate,
    ManualAbsent,
}

impl EventType {
    /// Status a manual mark forces onto the record.
    pub fn manual_status(self) -> Option<AttendanceStatus> {
        match self {
            EventType::ManualPresent => Some(AttendanceStatus::Present),
            EventType::ManualLate => Some(AttendanceStatus::Late),
            EventType::ManualAbsent => Some(AttendanceStatus::Absent),
            EventType::CheckIn | EventType::CheckOut => None,
        }
    }

    /// Detection events notify parents; manual marks do not.
    pub fn is_detection(self) -> bool {
        matches!(self, EventType::CheckIn | EventType::CheckOut)
    }

    pub fn for_status(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Present => EventType::ManualPresent,
            AttendanceStatus::Late => EventType::ManualLate,
            AttendanceStatus::Absent => EventType::ManualAbsent,
        }
    }
}

/// Where an event came from: a camera or the teacher who marked it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum SourceRef {
    #[display(fmt = "camera:{}", _0)]
    Camera(u64),
    #[display(fmt = "teacher:{}", _0)]
    Teacher(u64),
}

impl FromStr for SourceRef {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| AttendanceError::Validation(format!("malformed source `{s}`")))?;
        let id: u64 = id
            .parse()
            .map_err(|_| AttendanceError::Validation(format!("malformed source id `{s}`")))?;
        match kind {
            "camera" => Ok(SourceRef::Camera(id)),
            "teacher" => Ok(SourceRef::Teacher(id)),
            _ => Err(AttendanceError::Validation(format!("unknown source kind `{kind}`"))),
        }
    }
}

impl Serialize for SourceRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SourceRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "student_id": 12,
        "attendance_date": "2026-03-02",
        "check_in_time": "2026-03-02T03:00:00Z",
        "check_out_time": null,
        "status": "present",
        "source": "camera:1"
    })
)]
pub struct AttendanceRecord {
    pub student_id: StudentId,

    #[schema(value_type = String, format = "date")]
    pub attendance_date: NaiveDate,

    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_in_time: Option<DateTime<Utc>>,

    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_out_time: Option<DateTime<Utc>>,

    pub status: AttendanceStatus,

    #[schema(value_type = Option<String>, example = "camera:1")]
    pub source: Option<SourceRef>,
}

/// One event to be merged into the record for a (student, date) key.
///
/// Stores hand the current row (if any) to [`RecordPatch::merge`] while
/// holding the key, so the transition rules below run exactly once per
/// writer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordPatch {
    pub event: EventType,
    pub source: SourceRef,
    pub at: DateTime<Utc>,
}

impl RecordPatch {
    pub fn new(event: EventType, source: SourceRef, at: DateTime<Utc>) -> Self {
        Self { event, source, at }
    }

    /// Returns the record to persist, or `None` when the event changes nothing.
    pub fn merge(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        existing: Option<&AttendanceRecord>,
    ) -> Option<AttendanceRecord> {
        let Some(current) = existing else {
            return Some(self.create(student_id, date));
        };

        let mut next = current.clone();
        match self.event {
            EventType::CheckIn => {
                if current.check_in_time.is_some() {
                    return None;
                }
                next.check_in_time = Some(self.at);
                next.source.get_or_insert(self.source);
            }
            EventType::CheckOut => {
                next.check_out_time = Some(self.at);
                next.source = Some(self.source);
            }
            EventType::ManualPresent | EventType::ManualLate | EventType::ManualAbsent => {
                // manual_status is Some for every manual variant
                next.status = self.event.manual_status().unwrap_or(current.status);
            }
        }

        (next != *current).then_some(next)
    }

    fn create(&self, student_id: StudentId, date: NaiveDate) -> AttendanceRecord {
        let mut record = AttendanceRecord {
            student_id,
            attendance_date: date,
            check_in_time: None,
            check_out_time: None,
            status: AttendanceStatus::Present,
            source: Some(self.source),
        };
        match self.event {
            EventType::CheckIn => record.check_in_time = Some(self.at),
            // a check-out with nothing before it stands in for both ends of the day
            EventType::CheckOut => {
                record.check_in_time = Some(self.at);
                record.check_out_time = Some(self.at);
            }
            manual => {
                if let Some(status) = manual.manual_status() {
                    record.status = status;
                }
            }
        }
        record
    }
}

/// Result of an upsert: the stored record and what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub record: AttendanceRecord,
    pub created: bool,
    pub changed: bool,
}
