//! Present/late/absent statistics.
//!
//! Every dashboard and report goes through [`tally`], so "70% present" means
//! the same thing on the admin dashboard, a teacher's grade view, a student's
//! 30-day window and a range report.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use crate::clock::{Clock, SchoolCalendar};
use crate::error::AttendanceResult;
use crate::model::attendance::AttendanceStatus;
use crate::model::student::Student;
use crate::store::{AttendanceStore, CohortFilter, DateSpan, RosterEntry};

/// Length of the per-student rolling window.
pub const STUDENT_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, ToSchema)]
#[schema(
    example = json!({
        "total_student_days": 10,
        "present_count": 7,
        "late_count": 1,
        "absent_count": 2,
        "percentage_present": 70.0
    })
)]
pub struct AttendanceStats {
    pub total_student_days: u64,
    pub present_count: u64,
    pub late_count: u64,
    pub absent_count: u64,
    pub percentage_present: f64,
}

impl AttendanceStats {
    fn add(&mut self, status: AttendanceStatus) {
        self.total_student_days += 1;
        match status {
            AttendanceStatus::Present => self.present_count += 1,
            AttendanceStatus::Late => self.late_count += 1,
            AttendanceStatus::Absent => self.absent_count += 1,
        }
    }

    fn finish(mut self) -> Self {
        self.percentage_present = percentage(self.present_count, self.total_student_days);
        self
    }
}

/// `part / whole` as a percentage rounded to one decimal; 0 for an empty whole.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / whole as f64).round() / 10.0
}

/// Outcome that counts for a (student, day) slot, or `None` if the day is
/// still in the future and has nothing recorded.
pub fn classify(entry: &RosterEntry, today: NaiveDate) -> Option<AttendanceStatus> {
    match &entry.record {
        Some(record) => Some(record.status),
        None if entry.date <= today => Some(AttendanceStatus::Absent),
        None => None,
    }
}

pub fn tally<'a>(entries: impl IntoIterator<Item = &'a RosterEntry>, today: NaiveDate) -> AttendanceStats {
    let mut stats = AttendanceStats::default();
    for status in entries.into_iter().filter_map(|e| classify(e, today)) {
        stats.add(status);
    }
    stats.finish()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DailyStats {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub stats: AttendanceStats,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudentStats {
    pub student: Student,
    pub stats: AttendanceStats,
}

/// Read-only view over the store for dashboards.
pub struct AttendanceAggregator {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    calendar: SchoolCalendar,
}

impl AttendanceAggregator {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        calendar: SchoolCalendar,
    ) -> Self {
        Self {
            store,
            clock,
            calendar,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }

    pub async fn compute_stats(
        &self,
        filter: CohortFilter,
        span: DateSpan,
    ) -> AttendanceResult<AttendanceStats> {
        let entries = self.store.query_range(filter, span).await?;
        let stats = tally(&entries, self.today());
        debug!(%filter, start = %span.start, end = %span.end, ?stats, "Computed attendance stats");
        Ok(stats)
    }

    /// A student's last [`STUDENT_WINDOW_DAYS`] days, today included.
    pub async fn student_window(&self, student_id: u64) -> AttendanceResult<AttendanceStats> {
        let span = DateSpan::trailing(self.today(), STUDENT_WINDOW_DAYS);
        self.compute_stats(CohortFilter::Student(student_id), span).await
    }

    /// One stats row per day in the span, oldest first.
    pub async fn daily(
        &self,
        filter: CohortFilter,
        span: DateSpan,
    ) -> AttendanceResult<Vec<DailyStats>> {
        let entries = self.store.query_range(filter, span).await?;
        let today = self.today();

        let mut by_day: BTreeMap<NaiveDate, Vec<&RosterEntry>> = BTreeMap::new();
        for entry in &entries {
            by_day.entry(entry.date).or_default().push(entry);
        }

        Ok(span
            .days()
            .map(|date| DailyStats {
                date,
                stats: tally(by_day.remove(&date).unwrap_or_default(), today),
            })
            .collect())
    }

    /// One stats row per student in roll-number order.
    pub async fn per_student(
        &self,
        filter: CohortFilter,
        span: DateSpan,
    ) -> AttendanceResult<Vec<StudentStats>> {
        let entries = self.store.query_range(filter, span).await?;
        let today = self.today();

        // entries arrive grouped by student, in roll-number order
        let mut out: Vec<StudentStats> = Vec::new();
        for group in entries.chunk_by(|a, b| a.student.id == b.student.id) {
            out.push(StudentStats {
                student: group[0].student.clone(),
                stats: tally(group, today),
            });
        }
        Ok(out)
    }
}
