//! Persistence seams for the attendance core.
//!
//! [`AttendanceStore`] owns the per-student-per-day record, [`StudentDirectory`]
//! is the read-only view of the admin-managed roster and cameras, and [`NotificationLog`]
//! is the append-only SMS log. `MySqlStore` backs all three in production;
//! `InMemoryStore` is the embedded variant.

pub mod directory_cache;
pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::error::{AttendanceError, AttendanceResult};
use crate::model::attendance::{AttendanceRecord, RecordPatch, UpsertOutcome};
use crate::model::notification::NotificationLogEntry;
use crate::model::camera::{Camera, CameraId};
use crate::model::student::{Grade, GradeId, Student, StudentId};

/// Longest span a single stats/roster query may cover.
pub const MAX_SPAN_DAYS: i64 = 366;

/// Which active students a query covers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum CohortFilter {
    #[display(fmt = "school")]
    All,
    #[display(fmt = "grade:{}", _0)]
    Grade(GradeId),
    #[display(fmt = "student:{}", _0)]
    Student(StudentId),
}

impl CohortFilter {
    pub fn matches(&self, student: &Student) -> bool {
        match *self {
            CohortFilter::All => true,
            CohortFilter::Grade(grade_id) => student.grade_id == grade_id,
            CohortFilter::Student(id) => student.id == id,
        }
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DateSpan {
    #[schema(value_type = String, format = "date")]
    pub start: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AttendanceResult<Self> {
        if end < start {
            return Err(AttendanceError::Validation(format!(
                "date range ends ({end}) before it starts ({start})"
            )));
        }
        let span = Self { start, end };
        if span.len() > MAX_SPAN_DAYS {
            return Err(AttendanceError::Validation(format!(
                "date range may cover at most {MAX_SPAN_DAYS} days"
            )));
        }
        Ok(span)
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    /// The `days` calendar days ending with `today`.
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        let back = i64::from(days.max(1)) - 1;
        Self {
            start: today - Duration::days(back),
            end: today,
        }
    }

    pub fn len(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

/// One (student, day) slot of a range query.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RosterEntry {
    pub student: Student,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub record: Option<AttendanceRecord>,
}

/// One row of the live check-in feed.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecentCheckIn {
    pub student: Student,
    #[schema(example = "Grade 3")]
    pub grade_name: String,
    pub record: AttendanceRecord,
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Exact lookup; `NotFound` when no event was recorded for the pair.
    async fn get_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> AttendanceResult<AttendanceRecord>;

    /// Creates or merges under exclusive hold of the (student, date) key.
    async fn upsert_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        patch: &RecordPatch,
    ) -> AttendanceResult<UpsertOutcome>;

    /// Every active student in the cohort × every day in the span, ordered by
    /// roll number then date.
    async fn query_range(
        &self,
        filter: CohortFilter,
        span: DateSpan,
    ) -> AttendanceResult<Vec<RosterEntry>>;

    /// Active students' records on `date` that have a check-in, latest
    /// check-in first, at most `limit` of them.
    async fn recent_check_ins(
        &self,
        filter: CohortFilter,
        date: NaiveDate,
        limit: u32,
    ) -> AttendanceResult<Vec<RecentCheckIn>>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn find_student(&self, id: StudentId) -> AttendanceResult<Option<Student>>;

    async fn find_grade(&self, id: GradeId) -> AttendanceResult<Option<Grade>>;

    async fn find_camera(&self, id: CameraId) -> AttendanceResult<Option<Camera>>;

    /// Active students matching the filter, ordered by roll number.
    async fn active_students(&self, filter: CohortFilter) -> AttendanceResult<Vec<Student>>;
}

#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn append(&self, entry: &NotificationLogEntry) -> AttendanceResult<()>;

    /// Most recent first.
    async fn recent(&self, limit: u32) -> AttendanceResult<Vec<NotificationLogEntry>>;
}

/// Cross `students` (already ordered by roll number) with the span's days,
/// attaching whichever records exist.
pub fn assemble_roster(
    students: Vec<Student>,
    records: Vec<AttendanceRecord>,
    span: DateSpan,
) -> Vec<RosterEntry> {
    let mut by_key: HashMap<(StudentId, NaiveDate), AttendanceRecord> = records
        .into_iter()
        .map(|r| ((r.student_id, r.attendance_date), r))
        .collect();

    let mut out = Vec::with_capacity(students.len() * span.len().max(0) as usize);
    for student in students {
        for date in span.days() {
            let record = by_key.remove(&(student.id, date));
            out.push(RosterEntry {
                student: student.clone(),
                date,
                record,
            });
        }
    }
    out
}
