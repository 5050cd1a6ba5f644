use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use super::{CohortFilter, StudentDirectory};
use crate::error::AttendanceResult;
use crate::model::camera::{Camera, CameraId};
use crate::model::student::{Grade, GradeId, Student, StudentId};

/// Keeps recently used students in memory in front of the real directory.
///
/// Only single-student lookups are cached: every detection event resolves
/// its student, while cohort listings are comparatively rare and must see
/// roster changes promptly.
pub struct CachedDirectory {
    inner: Arc<dyn StudentDirectory>,
    cache: Cache<StudentId, Student>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn StudentDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(50_000) // tune based on school size
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Batch insert students into the cache
    async fn batch_insert(&self, students: &[Student]) {
        let futures: Vec<_> = students
            .iter()
            .map(|s| self.cache.insert(s.id, s.clone()))
            .collect();

        futures::future::join_all(futures).await;
    }

    /// Load every active student into the cache in batches.
    pub async fn warmup(&self, batch_size: usize) -> AttendanceResult<usize> {
        let students = self.inner.active_students(CohortFilter::All).await?;

        for chunk in students.chunks(batch_size.max(1)) {
            self.batch_insert(chunk).await;
        }

        log::info!(
            "Student directory warmup complete: {} active students",
            students.len()
        );

        Ok(students.len())
    }
}

#[async_trait]
impl StudentDirectory for CachedDirectory {
    async fn find_student(&self, id: StudentId) -> AttendanceResult<Option<Student>> {
        if let Some(student) = self.cache.get(&id).await {
            return Ok(Some(student));
        }

        let found = self.inner.find_student(id).await?;
        if let Some(student) = &found {
            self.cache.insert(id, student.clone()).await;
        }
        Ok(found)
    }

    async fn find_grade(&self, id: GradeId) -> AttendanceResult<Option<Grade>> {
        self.inner.find_grade(id).await
    }

    async fn find_camera(&self, id: CameraId) -> AttendanceResult<Option<Camera>> {
        self.inner.find_camera(id).await
    }

    async fn active_students(&self, filter: CohortFilter) -> AttendanceResult<Vec<Student>> {
        self.inner.active_students(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn student(id: u64, name: &str) -> Student {
        Student {
            id,
            roll_number: format!("GR01{id:03}"),
            name: name.into(),
            grade_id: 1,
            parent_contacts: vec![],
            active: true,
        }
    }

    #[actix_web::test]
    async fn cached_entry_is_served_until_it_expires() {
        let backing = Arc::new(InMemoryStore::new());
        backing.put_student(student(1, "Nabila"));
        let dir = CachedDirectory::new(backing.clone(), Duration::from_millis(200));

        assert_eq!(dir.find_student(1).await.unwrap().unwrap().name, "Nabila");

        backing.put_student(student(1, "Nabila Islam"));
        assert_eq!(dir.find_student(1).await.unwrap().unwrap().name, "Nabila");

        actix_web::rt::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(dir.find_student(1).await.unwrap().unwrap().name, "Nabila Islam");
    }

    #[actix_web::test]
    async fn warmup_loads_every_active_student() {
        let backing = Arc::new(InMemoryStore::new());
        for id in 1..=5 {
            backing.put_student(student(id, "x"));
        }
        let dir = CachedDirectory::new(backing, Duration::from_secs(60));
        assert_eq!(dir.warmup(2).await.unwrap(), 5);
        assert!(dir.cache.contains_key(&3));
    }

    #[actix_web::test]
    async fn unknown_student_is_not_cached() {
        let backing = Arc::new(InMemoryStore::new());
        let dir = CachedDirectory::new(backing.clone(), Duration::from_secs(60));
        assert!(dir.find_student(8).await.unwrap().is_none());
        backing.put_student(student(8, "Late joiner"));
        assert!(dir.find_student(8).await.unwrap().is_some());
    }
}
