use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{
    AttendanceStore, CohortFilter, DateSpan, NotificationLog, RecentCheckIn, RosterEntry,
    StudentDirectory, assemble_roster,
};
use crate::error::{AttendanceError, AttendanceResult};
use crate::model::attendance::{AttendanceRecord, RecordPatch, UpsertOutcome};
use crate::model::camera::{Camera, CameraId};
use crate::model::notification::NotificationLogEntry;
use crate::model::student::{Grade, GradeId, Student, StudentId, roll_number};

/// Embedded store: one mutex guards the record map, so read-merge-write for a
/// key happens under a single lock acquisition.
#[derive(Default)]
pub struct InMemoryStore {
    grades: Mutex<BTreeMap<GradeId, Grade>>,
    cameras: Mutex<BTreeMap<CameraId, Camera>>,
    students: Mutex<BTreeMap<StudentId, Student>>,
    records: Mutex<HashMap<(StudentId, NaiveDate), AttendanceRecord>>,
    notifications: Mutex<Vec<NotificationLogEntry>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_grade(&self, grade: Grade) {
        lock(&self.grades).insert(grade.id, grade);
    }

    pub fn put_camera(&self, camera: Camera) {
        lock(&self.cameras).insert(camera.id, camera);
    }

    pub fn put_student(&self, student: Student) {
        lock(&self.students).insert(student.id, student);
    }

    /// Adds an active student with the next free id and roll number in the grade.
    pub fn enroll(&self, name: &str, grade_id: GradeId, parent_contacts: &[&str]) -> Student {
        let mut students = lock(&self.students);
        let id = students.keys().next_back().map_or(1, |last| last + 1);
        let in_grade = students.values().filter(|s| s.grade_id == grade_id).count() as u64;

        let student = Student {
            id,
            roll_number: roll_number(grade_id, in_grade),
            name: name.to_string(),
            grade_id,
            parent_contacts: parent_contacts.iter().map(|c| c.to_string()).collect(),
            active: true,
        };
        students.insert(id, student.clone());
        student
    }

    /// Inserts a record verbatim; refuses a second row for the same key.
    pub fn insert_record(&self, record: AttendanceRecord) -> AttendanceResult<()> {
        let key = (record.student_id, record.attendance_date);
        let mut records = lock(&self.records);
        if records.contains_key(&key) {
            return Err(AttendanceError::ConstraintViolation {
                student_id: key.0,
                date: key.1,
            });
        }
        records.insert(key, record);
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn notifications(&self) -> Vec<NotificationLogEntry> {
        lock(&self.notifications).clone()
    }

    fn sorted_active(&self, filter: CohortFilter) -> Vec<Student> {
        let mut students: Vec<Student> = lock(&self.students)
            .values()
            .filter(|s| s.active && filter.matches(s))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));
        students
    }
}

#[async_trait]
impl AttendanceStore for InMemoryStore {
    async fn get_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> AttendanceResult<AttendanceRecord> {
        lock(&self.records)
            .get(&(student_id, date))
            .cloned()
            .ok_or(AttendanceError::NotFound { student_id, date })
    }

    async fn upsert_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        patch: &RecordPatch,
    ) -> AttendanceResult<UpsertOutcome> {
        let mut records = lock(&self.records);
        let existing = records.get(&(student_id, date));
        let created = existing.is_none();

        match patch.merge(student_id, date, existing) {
            Some(next) => {
                records.insert((student_id, date), next.clone());
                Ok(UpsertOutcome {
                    record: next,
                    created,
                    changed: true,
                })
            }
            None => {
                let record = existing
                    .cloned()
                    .ok_or(AttendanceError::NotFound { student_id, date })?;
                Ok(UpsertOutcome {
                    record,
                    created: false,
                    changed: false,
                })
            }
        }
    }

    async fn query_range(
        &self,
        filter: CohortFilter,
        span: DateSpan,
    ) -> AttendanceResult<Vec<RosterEntry>> {
        let students = self.sorted_active(filter);
        let records = lock(&self.records)
            .values()
            .filter(|r| r.attendance_date >= span.start && r.attendance_date <= span.end)
            .cloned()
            .collect();
        Ok(assemble_roster(students, records, span))
    }

    async fn recent_check_ins(
        &self,
        filter: CohortFilter,
        date: NaiveDate,
        limit: u32,
    ) -> AttendanceResult<Vec<RecentCheckIn>> {
        let students = lock(&self.students);
        let grades = lock(&self.grades);
        let mut feed: Vec<RecentCheckIn> = lock(&self.records)
            .values()
            .filter(|r| r.attendance_date == date && r.check_in_time.is_some())
            .filter_map(|record| {
                let student = students
                    .get(&record.student_id)
                    .filter(|s| s.active && filter.matches(s))?;
                Some(RecentCheckIn {
                    student: student.clone(),
                    grade_name: grades
                        .get(&student.grade_id)
                        .map(|g| g.grade_name.clone())
                        .unwrap_or_default(),
                    record: record.clone(),
                })
            })
            .collect();

        feed.sort_by(|a, b| {
            b.record
                .check_in_time
                .cmp(&a.record.check_in_time)
                .then_with(|| a.student.roll_number.cmp(&b.student.roll_number))
        });
        feed.truncate(limit as usize);
        Ok(feed)
    }
}

#[async_trait]
impl StudentDirectory for InMemoryStore {
    async fn find_student(&self, id: StudentId) -> AttendanceResult<Option<Student>> {
        Ok(lock(&self.students).get(&id).cloned())
    }

    async fn find_grade(&self, id: GradeId) -> AttendanceResult<Option<Grade>> {
        Ok(lock(&self.grades).get(&id).cloned())
    }

    async fn find_camera(&self, id: CameraId) -> AttendanceResult<Option<Camera>> {
        Ok(lock(&self.cameras).get(&id).cloned())
    }

    async fn active_students(&self, filter: CohortFilter) -> AttendanceResult<Vec<Student>> {
        Ok(self.sorted_active(filter))
    }
}

#[async_trait]
impl NotificationLog for InMemoryStore {
    async fn append(&self, entry: &NotificationLogEntry) -> AttendanceResult<()> {
        lock(&self.notifications).push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: u32) -> AttendanceResult<Vec<NotificationLogEntry>> {
        Ok(lock(&self.notifications)
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
