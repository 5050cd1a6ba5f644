use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::clock::{Clock, SchoolCalendar};
use crate::error::{AttendanceError, AttendanceResult};
use crate::model::attendance::{AttendanceRecord, EventType, RecordPatch, SourceRef};
use crate::model::notification::ContactAttempt;
use crate::model::student::{Student, StudentId};
use crate::service::notifier::{NotificationSink, category_for, detection_message};
use crate::store::{AttendanceStore, StudentDirectory};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttendanceOutcome {
    pub created: bool,
    pub record: AttendanceRecord,
    pub notified: Vec<ContactAttempt>,
}

/// Sole writer of attendance records.
pub struct AttendanceRecorder {
    store: Arc<dyn AttendanceStore>,
    directory: Arc<dyn StudentDirectory>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    calendar: SchoolCalendar,
}

impl AttendanceRecorder {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        directory: Arc<dyn StudentDirectory>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        calendar: SchoolCalendar,
    ) -> Self {
        Self {
            store,
            directory,
            sink,
            clock,
            calendar,
        }
    }

    /// Applies one check-in, check-out or manual mark to the student's day.
    ///
    /// Fails with `UnknownStudent` before touching the store when the id does
    /// not resolve to an active student. Notification outcomes are reported in
    /// the result but never turn a successful write into an error.
    #[instrument(name = "record_event", skip_all, fields(student_id = student_id, event = %event, source = %source))]
    pub async fn record_event(
        &self,
        student_id: StudentId,
        event: EventType,
        source: SourceRef,
        at: DateTime<Utc>,
    ) -> AttendanceResult<AttendanceOutcome> {
        let student = self
            .directory
            .find_student(student_id)
            .await?
            .filter(|s| s.active)
            .ok_or(AttendanceError::UnknownStudent(student_id))?;

        let at = if event.is_detection() {
            self.guard_timing(student_id, at).await?
        } else {
            at
        };
        let date = self.calendar.date_of(at);

        let outcome = self
            .store
            .upsert_record(student_id, date, &RecordPatch::new(event, source, at))
            .await?;

        info!(
            student_id,
            %date,
            created = outcome.created,
            changed = outcome.changed,
            status = %outcome.record.status,
            "Attendance event applied"
        );

        let notified = if outcome.changed && event.is_detection() {
            self.notify_parents(&student, event, at).await
        } else {
            Vec::new()
        };

        Ok(AttendanceOutcome {
            created: outcome.created,
            record: outcome.record,
            notified,
        })
    }

    /// Falls back to server time when a detection timestamp is earlier than a
    /// check-out already recorded on the same school day.
    async fn guard_timing(
        &self,
        student_id: StudentId,
        at: DateTime<Utc>,
    ) -> AttendanceResult<DateTime<Utc>> {
        let date = self.calendar.date_of(at);
        let last_check_out = match self.store.get_record(student_id, date).await {
            Ok(record) => record.check_out_time,
            Err(AttendanceError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let Some(last_check_out) = last_check_out.filter(|out| at < *out) else {
            return Ok(at);
        };

        let err = AttendanceError::InvalidEventTiming { at, last_check_out };
        let now = self.clock.now();
        warn!(error = %err, student_id, replacement = %now, "Event clock skew, using server time");
        Ok(now)
    }

    async fn notify_parents(
        &self,
        student: &Student,
        event: EventType,
        at: DateTime<Utc>,
    ) -> Vec<ContactAttempt> {
        let body = detection_message(student, event, at, &self.calendar);
        let category = category_for(event);

        let sends = student.parent_contacts.iter().map(|contact| {
            let body = body.as_str();
            async move {
                let status = self
                    .sink
                    .notify(contact, body, category, Some(student.id))
                    .await;
                ContactAttempt {
                    contact: contact.clone(),
                    status,
                }
            }
        });

        futures::future::join_all(sends).await
    }
}
