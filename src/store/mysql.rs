use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::TryStreamExt;
use sqlx::mysql::MySqlDatabaseError;
use sqlx::{FromRow, MySqlPool};
use tracing::debug;

use super::{
    AttendanceStore, CohortFilter, DateSpan, NotificationLog, RecentCheckIn, RosterEntry,
    StudentDirectory, assemble_roster,
};
use crate::error::{AttendanceError, AttendanceResult};
use crate::model::attendance::{AttendanceRecord, RecordPatch, UpsertOutcome};
use crate::model::camera::{Camera, CameraId};
use crate::model::notification::NotificationLogEntry;
use crate::model::student::{Grade, GradeId, Student, StudentId, StudentRow};

/// Column list for attendance queries.
const ATTENDANCE_COLUMNS: &str =
    "student_id, attendance_date, check_in_time, check_out_time, status, source";

/// Column list for students queries.
const STUDENT_COLUMNS: &str = "\
    id, roll_number, student_name, grade_id, parent_phone1, parent_phone2, is_active";

#[derive(Debug, FromRow)]
struct AttendanceRow {
    student_id: u64,
    attendance_date: NaiveDate,
    check_in_time: Option<DateTime<Utc>>,
    check_out_time: Option<DateTime<Utc>>,
    status: String,
    source: Option<String>,
}

impl TryFrom<AttendanceRow> for AttendanceRecord {
    type Error = AttendanceError;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e: strum::ParseError| {
            AttendanceError::Validation(format!("attendance status `{}`: {e}", row.status))
        })?;
        let source = row.source.as_deref().map(str::parse).transpose()?;
        Ok(AttendanceRecord {
            student_id: row.student_id,
            attendance_date: row.attendance_date,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            status,
            source,
        })
    }
}

/// Attendance row joined with its student and grade name.
#[derive(Debug, FromRow)]
struct RecentRow {
    #[sqlx(flatten)]
    record: AttendanceRow,
    #[sqlx(flatten)]
    student: StudentRow,
    grade_name: String,
}

#[derive(Debug, FromRow)]
struct SmsLogRow {
    student_id: Option<u64>,
    phone_number: String,
    message: String,
    sms_type: String,
    status: String,
    sent_at: DateTime<Utc>,
}

impl TryFrom<SmsLogRow> for NotificationLogEntry {
    type Error = AttendanceError;

    fn try_from(row: SmsLogRow) -> Result<Self, Self::Error> {
        let bad = |what: &str, v: &str, e: strum::ParseError| {
            AttendanceError::Validation(format!("{what} `{v}`: {e}"))
        };
        Ok(NotificationLogEntry {
            student_id: row.student_id,
            category: row.sms_type.parse().map_err(|e| bad("sms type", &row.sms_type, e))?,
            status: row.status.parse().map_err(|e| bad("sms status", &row.status, e))?,
            phone_number: row.phone_number,
            message: row.message,
            sent_at: row.sent_at,
        })
    }
}

/// Appends the cohort condition and returns the value to bind, if any.
fn cohort_clause(filter: CohortFilter, alias: &str) -> (String, Option<u64>) {
    match filter {
        CohortFilter::All => (String::new(), None),
        CohortFilter::Grade(id) => (format!(" AND {alias}.grade_id = ?"), Some(id)),
        CohortFilter::Student(id) => (format!(" AND {alias}.id = ?"), Some(id)),
    }
}

/// MySQL error numbers the upsert reacts to.
const ER_DUP_ENTRY: u16 = 1062;
const ER_LOCK_DEADLOCK: u16 = 1213;
const ER_NO_REFERENCED_ROW_2: u16 = 1452;

fn mysql_error_number(err: &sqlx::Error) -> Option<u16> {
    err.as_database_error()?
        .try_downcast_ref::<MySqlDatabaseError>()
        .map(MySqlDatabaseError::number)
}

/// Another writer inserted the key first, or InnoDB rolled this
/// transaction back as a deadlock victim.
fn is_contended(number: u16) -> bool {
    matches!(number, ER_DUP_ENTRY | ER_LOCK_DEADLOCK)
}

/// Failure of a single upsert transaction.
#[derive(Debug)]
enum AttemptError {
    /// Lost the race for the key; the transaction was rolled back and can be rerun.
    Contended { number: u16, source: sqlx::Error },
    Fatal(AttendanceError),
}

impl AttemptError {
    fn settle(self, student_id: StudentId, date: NaiveDate) -> AttendanceError {
        match self {
            AttemptError::Contended {
                number: ER_DUP_ENTRY,
                ..
            } => AttendanceError::ConstraintViolation { student_id, date },
            AttemptError::Contended { source, .. } => AttendanceError::Database(source),
            AttemptError::Fatal(e) => e,
        }
    }
}

impl From<sqlx::Error> for AttemptError {
    fn from(source: sqlx::Error) -> Self {
        match mysql_error_number(&source) {
            Some(number) if is_contended(number) => AttemptError::Contended { number, source },
            _ => AttemptError::Fatal(AttendanceError::Database(source)),
        }
    }
}

impl From<AttendanceError> for AttemptError {
    fn from(e: AttendanceError) -> Self {
        AttemptError::Fatal(e)
    }
}

/// MySQL-backed store, directory and SMS log.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Sender id of the active `sms_settings` row; `None` when SMS is switched off.
    pub async fn active_sms_sender(&self) -> AttendanceResult<Option<String>> {
        let sender = sqlx::query_scalar::<_, Option<String>>(
            "SELECT sender_id FROM sms_settings WHERE is_active = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(sender.map(|s| s.unwrap_or_default()))
    }

    /// One transaction of read, merge and write on the (student, date) key.
    ///
    /// `SELECT .. FOR UPDATE` takes the exclusive lock up front: on the row
    /// when it exists, on the index gap when it does not. Two first writers
    /// for the same key both get the gap lock, so one of them fails its
    /// INSERT with a deadlock or duplicate entry and is rerun by the caller.
    async fn try_upsert(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        patch: &RecordPatch,
    ) -> Result<UpsertOutcome, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
             WHERE student_id = ? AND attendance_date = ? FOR UPDATE"
        );
        let existing = sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(student_id)
            .bind(date)
            .fetch_optional(&mut *tx)
            .await?
            .map(AttendanceRecord::try_from)
            .transpose()?;

        let Some(next) = patch.merge(student_id, date, existing.as_ref()) else {
            tx.commit().await?;
            let record = existing.ok_or(AttendanceError::NotFound { student_id, date })?;
            return Ok(UpsertOutcome {
                record,
                created: false,
                changed: false,
            });
        };

        let created = existing.is_none();
        let write = if created {
            "INSERT INTO attendance \
             (check_in_time, check_out_time, status, source, student_id, attendance_date) \
             VALUES (?, ?, ?, ?, ?, ?)"
        } else {
            "UPDATE attendance \
             SET check_in_time = ?, check_out_time = ?, status = ?, source = ? \
             WHERE student_id = ? AND attendance_date = ?"
        };
        sqlx::query(write)
            .bind(next.check_in_time)
            .bind(next.check_out_time)
            .bind(next.status.as_ref())
            .bind(next.source.map(|s| s.to_string()))
            .bind(student_id)
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(|e| match mysql_error_number(&e) {
                Some(ER_NO_REFERENCED_ROW_2) => {
                    AttemptError::Fatal(AttendanceError::UnknownStudent(student_id))
                }
                _ => AttemptError::from(e),
            })?;

        tx.commit().await?;

        debug!(student_id, %date, created, "Attendance row written");

        Ok(UpsertOutcome {
            record: next,
            created,
            changed: true,
        })
    }
}

#[async_trait]
impl AttendanceStore for MySqlStore {
    async fn get_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> AttendanceResult<AttendanceRecord> {
        let sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
             WHERE student_id = ? AND attendance_date = ?"
        );
        sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(student_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AttendanceError::NotFound { student_id, date })?
            .try_into()
    }

    async fn upsert_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        patch: &RecordPatch,
    ) -> AttendanceResult<UpsertOutcome> {
        match self.try_upsert(student_id, date, patch).await {
            Err(AttemptError::Contended { number, .. }) => {
                debug!(student_id, %date, number, "Attendance key contended, retrying");
                self.try_upsert(student_id, date, patch)
                    .await
                    .map_err(|e| e.settle(student_id, date))
            }
            other => other.map_err(|e| e.settle(student_id, date)),
        }
    }

    async fn query_range(
        &self,
        filter: CohortFilter,
        span: DateSpan,
    ) -> AttendanceResult<Vec<RosterEntry>> {
        let students = self.active_students(filter).await?;

        let (cohort, bind) = cohort_clause(filter, "s");
        let sql = format!(
            "SELECT a.student_id, a.attendance_date, a.check_in_time, a.check_out_time, \
                    a.status, a.source \
             FROM attendance a \
             JOIN students s ON s.id = a.student_id \
             WHERE s.is_active = 1 AND a.attendance_date BETWEEN ? AND ?{cohort}"
        );
        debug!(sql = %sql, %filter, start = %span.start, end = %span.end, "Fetching attendance range");

        let mut query = sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(span.start)
            .bind(span.end);
        if let Some(v) = bind {
            query = query.bind(v);
        }

        let mut records = Vec::new();
        let mut rows = query.fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            records.push(AttendanceRecord::try_from(row)?);
        }

        Ok(assemble_roster(students, records, span))
    }

    async fn recent_check_ins(
        &self,
        filter: CohortFilter,
        date: NaiveDate,
        limit: u32,
    ) -> AttendanceResult<Vec<RecentCheckIn>> {
        let (cohort, bind) = cohort_clause(filter, "s");
        let sql = format!(
            "SELECT a.student_id, a.attendance_date, a.check_in_time, a.check_out_time, \
                    a.status, a.source, \
                    s.id, s.roll_number, s.student_name, s.grade_id, \
                    s.parent_phone1, s.parent_phone2, s.is_active, \
                    g.grade_name \
             FROM attendance a \
             JOIN students s ON s.id = a.student_id \
             JOIN grades g ON g.id = s.grade_id \
             WHERE s.is_active = 1 AND a.attendance_date = ? \
               AND a.check_in_time IS NOT NULL{cohort} \
             ORDER BY a.check_in_time DESC, s.roll_number ASC \
             LIMIT ?"
        );

        let mut query = sqlx::query_as::<_, RecentRow>(&sql).bind(date);
        if let Some(v) = bind {
            query = query.bind(v);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                Ok(RecentCheckIn {
                    record: AttendanceRecord::try_from(row.record)?,
                    student: Student::from(row.student),
                    grade_name: row.grade_name,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StudentDirectory for MySqlStore {
    async fn find_student(&self, id: StudentId) -> AttendanceResult<Option<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
        let row = sqlx::query_as::<_, StudentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Student::from))
    }

    async fn find_grade(&self, id: GradeId) -> AttendanceResult<Option<Grade>> {
        let grade = sqlx::query_as::<_, Grade>(
            "SELECT id, grade_name, description FROM grades WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grade)
    }

    async fn find_camera(&self, id: CameraId) -> AttendanceResult<Option<Camera>> {
        let camera = sqlx::query_as::<_, Camera>(
            "SELECT id, camera_name, camera_type, is_active FROM cameras WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(camera)
    }

    async fn active_students(&self, filter: CohortFilter) -> AttendanceResult<Vec<Student>> {
        let (cohort, bind) = cohort_clause(filter, "s");
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students s \
             WHERE s.is_active = 1{cohort} ORDER BY s.roll_number ASC"
        );
        let mut query = sqlx::query_as::<_, StudentRow>(&sql);
        if let Some(v) = bind {
            query = query.bind(v);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Student::from).collect())
    }
}

#[async_trait]
impl NotificationLog for MySqlStore {
    async fn append(&self, entry: &NotificationLogEntry) -> AttendanceResult<()> {
        sqlx::query(
            "INSERT INTO sms_logs (student_id, phone_number, message, sms_type, status, sent_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.student_id)
        .bind(&entry.phone_number)
        .bind(&entry.message)
        .bind(entry.category.as_ref())
        .bind(entry.status.as_ref())
        .bind(entry.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> AttendanceResult<Vec<NotificationLogEntry>> {
        let rows = sqlx::query_as::<_, SmsLogRow>(
            "SELECT student_id, phone_number, message, sms_type, status, sent_at \
             FROM sms_logs ORDER BY sent_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationLogEntry::try_from).collect()
    }
}
