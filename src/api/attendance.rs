use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::model::attendance::{AttendanceStatus, EventType, SourceRef};
use crate::model::camera::CameraId;
use crate::model::student::{Grade, GradeId, Student, StudentId};
use crate::service::aggregator::{AttendanceStats, tally};
use crate::state::AppState;
use crate::store::{CohortFilter, DateSpan, RecentCheckIn, RosterEntry};
use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct DetectionEvent {
    #[schema(example = 12)]
    pub student_id: StudentId,

    /// `check_in` or `check_out`
    #[schema(example = "check_in")]
    pub event: EventType,

    /// Must be a registered, active camera
    #[schema(example = 1)]
    pub camera_id: CameraId,

    /// Detection time; server time when omitted
    #[schema(example = "2026-03-02T03:00:00Z", format = "date-time", value_type = Option<String>)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
pub struct ManualMark {
    #[schema(example = 12)]
    pub student_id: StudentId,

    #[schema(example = "late")]
    pub status: AttendanceStatus,

    /// Day being marked; today when omitted
    #[schema(example = "2026-03-02", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct RosterQuery {
    #[schema(example = 3)]
    pub grade_id: GradeId,

    /// Defaults to today
    #[schema(example = "2026-03-02", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
}

#[derive(Serialize, ToSchema)]
pub struct RosterResponse {
    pub grade: Grade,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub stats: AttendanceStats,
    pub entries: Vec<RosterEntry>,
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct RecentQuery {
    /// Restrict to one grade; defaults to the teacher's grade or, for admins, the whole school
    #[schema(example = 3)]
    pub grade_id: Option<GradeId>,

    /// Defaults to today
    #[schema(example = "2026-03-02", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,

    /// Max entries (1-50, default 10)
    #[schema(example = 10)]
    pub limit: Option<u32>,
}

/// Resolves a student and checks the caller may act on them.
pub(crate) async fn visible_student(
    auth: &AuthUser,
    state: &AppState,
    student_id: StudentId,
) -> Result<Student, AttendanceError> {
    let student = state
        .directory
        .find_student(student_id)
        .await?
        .ok_or(AttendanceError::UnknownStudent(student_id))?;
    auth.require_student(&student)?;
    Ok(student)
}

/// Detection callback from the camera service
#[utoipa::path(
    post,
    path = "/api/attendance/events",
    request_body = DetectionEvent,
    responses(
        (status = 200, description = "Event applied", body = crate::service::recorder::AttendanceOutcome),
        (status = 400, description = "Not a detection event, or unknown camera"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Unknown or inactive student")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn record_detection(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<DetectionEvent>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_event_source()?;

    if !payload.event.is_detection() {
        return Err(AttendanceError::Validation(format!(
            "`{}` is not a detection event",
            payload.event
        )));
    }

    state
        .directory
        .find_camera(payload.camera_id)
        .await?
        .filter(|camera| camera.is_active)
        .ok_or_else(|| {
            AttendanceError::Validation(format!(
                "Camera {} is not registered or inactive",
                payload.camera_id
            ))
        })?;

    let at = payload.at.unwrap_or_else(|| state.clock.now());
    let outcome = state
        .recorder
        .record_event(
            payload.student_id,
            payload.event,
            SourceRef::Camera(payload.camera_id),
            at,
        )
        .await?;

    Ok(HttpResponse::Ok().json(outcome))
}

/// Teacher's manual present/late/absent mark
#[utoipa::path(
    post,
    path = "/api/attendance/mark",
    request_body = ManualMark,
    responses(
        (status = 200, description = "Attendance updated successfully", body = crate::service::recorder::AttendanceOutcome),
        (status = 400, description = "Date is in the future"),
        (status = 403, description = "Student is outside the teacher's grade"),
        (status = 404, description = "Unknown or inactive student")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn mark_attendance(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<ManualMark>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    visible_student(&auth, &state, payload.student_id).await?;

    let now = state.clock.now();
    let today = state.calendar.date_of(now);
    let date = payload.date.unwrap_or(today);
    if date > today {
        return Err(AttendanceError::Validation(format!(
            "cannot mark attendance for {date}, which is after today ({today})"
        )));
    }

    let at = if date == today {
        now
    } else {
        state.calendar.at_local(date, state.calendar.local_time(now))
    };

    let outcome = state
        .recorder
        .record_event(
            payload.student_id,
            EventType::for_status(payload.status),
            SourceRef::Teacher(auth.user_id),
            at,
        )
        .await?;

    Ok(HttpResponse::Ok().json(outcome))
}

/// One student's record for one day
#[utoipa::path(
    get,
    path = "/api/attendance/{student_id}/{date}",
    params(
        ("student_id", Path, description = "Student ID"),
        ("date", Path, description = "Attendance date (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "Record found", body = crate::model::attendance::AttendanceRecord),
        (status = 404, description = "No record for that day", body = Object, example = json!({
            "error": "No attendance record for student 12 on 2026-03-02",
            "code": "NOT_FOUND"
        }))
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn get_record(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<(StudentId, NaiveDate)>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let (student_id, date) = path.into_inner();
    visible_student(&auth, &state, student_id).await?;

    let record = state.store.get_record(student_id, date).await?;
    Ok(HttpResponse::Ok().json(record))
}

/// Every active student of a grade with that day's record
#[utoipa::path(
    get,
    path = "/api/attendance/roster",
    params(RosterQuery),
    responses(
        (status = 200, description = "Day roster", body = RosterResponse),
        (status = 400, description = "Unknown grade"),
        (status = 403, description = "Grade is not the teacher's")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn day_roster(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<RosterQuery>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    auth.require_grade(query.grade_id)?;
    let grade = state
        .directory
        .find_grade(query.grade_id)
        .await?
        .ok_or_else(|| AttendanceError::Validation(format!("Unknown grade {}", query.grade_id)))?;

    let date = query.date.unwrap_or_else(|| state.today());
    let entries = state
        .store
        .query_range(CohortFilter::Grade(query.grade_id), DateSpan::single(date))
        .await?;
    let stats = tally(&entries, state.today());

    Ok(HttpResponse::Ok().json(RosterResponse {
        grade,
        date,
        stats,
        entries,
    }))
}

/// Latest check-ins of a day, newest first
#[utoipa::path(
    get,
    path = "/api/attendance/recent",
    params(RecentQuery),
    responses(
        (status = 200, description = "Check-in feed", body = [RecentCheckIn]),
        (status = 403, description = "Grade is not the teacher's")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn recent_check_ins(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let cohort = auth.grade_scope(query.grade_id)?;
    let date = query.date.unwrap_or_else(|| state.today());
    let limit = query.limit.unwrap_or(10).clamp(1, 50);

    let feed: Vec<RecentCheckIn> = state.store.recent_check_ins(cohort, date, limit).await?;
    Ok(HttpResponse::Ok().json(feed))
}
