use crate::api::attendance::visible_student;
use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::model::student::{GradeId, Student, StudentId};
use crate::service::aggregator::{AttendanceStats, STUDENT_WINDOW_DAYS};
use crate::state::AppState;
use crate::store::{CohortFilter, DateSpan};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct StatsQuery {
    /// Restrict to one grade
    #[schema(example = 3)]
    pub grade_id: Option<GradeId>,
    /// Restrict to one student (takes precedence over grade)
    #[schema(example = 12)]
    pub student_id: Option<StudentId>,
    /// Single day; overrides from/to
    #[schema(example = "2026-03-02", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    #[schema(example = "2026-03-01", format = "date", value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    /// Defaults to today
    #[schema(example = "2026-03-31", format = "date", value_type = Option<String>)]
    pub to: Option<NaiveDate>,
}

#[derive(Serialize, ToSchema)]
pub struct StatsResponse {
    /// `school`, `grade:{id}` or `student:{id}`
    #[schema(example = "grade:3")]
    pub cohort: String,
    pub span: DateSpan,
    pub stats: AttendanceStats,
}

#[derive(Serialize, ToSchema)]
pub struct StudentWindowResponse {
    pub student: Student,
    #[schema(example = 30)]
    pub days: u32,
    pub stats: AttendanceStats,
}

impl StatsQuery {
    fn span(&self, today: NaiveDate) -> Result<DateSpan, AttendanceError> {
        if let Some(date) = self.date {
            return Ok(DateSpan::single(date));
        }
        let end = self.to.unwrap_or(today);
        DateSpan::new(self.from.unwrap_or(end), end)
    }
}

/// Narrowest cohort the caller asked for, checked against what they may see.
async fn resolve_cohort(
    auth: &AuthUser,
    state: &AppState,
    query: &StatsQuery,
) -> Result<CohortFilter, AttendanceError> {
    if let Some(student_id) = query.student_id {
        visible_student(auth, state, student_id).await?;
        return Ok(CohortFilter::Student(student_id));
    }
    auth.grade_scope(query.grade_id)
}

/// Present/late/absent totals for a cohort and range
#[utoipa::path(
    get,
    path = "/api/stats",
    params(StatsQuery),
    responses(
        (status = 200, description = "Attendance statistics", body = StatsResponse),
        (status = 400, description = "Invalid date range"),
        (status = 403, description = "Cohort not visible to caller")
    ),
    security(("bearer_auth" = [])),
    tag = "Stats"
)]
pub async fn get_stats(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let cohort = resolve_cohort(&auth, &state, &query).await?;
    let span = query.span(state.today())?;
    debug!(?query, %cohort, "Stats request");

    let stats = state.aggregator.compute_stats(cohort, span).await?;
    Ok(HttpResponse::Ok().json(StatsResponse {
        cohort: cohort.to_string(),
        span,
        stats,
    }))
}

/// Per-day trend over a range
#[utoipa::path(
    get,
    path = "/api/stats/daily",
    params(StatsQuery),
    responses(
        (status = 200, description = "One row per day", body = [crate::service::aggregator::DailyStats])
    ),
    security(("bearer_auth" = [])),
    tag = "Stats"
)]
pub async fn daily_stats(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let cohort = resolve_cohort(&auth, &state, &query).await?;
    let span = query.span(state.today())?;

    let rows = state.aggregator.daily(cohort, span).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// Per-student breakdown over a range
#[utoipa::path(
    get,
    path = "/api/stats/students",
    params(StatsQuery),
    responses(
        (status = 200, description = "One row per student", body = [crate::service::aggregator::StudentStats])
    ),
    security(("bearer_auth" = [])),
    tag = "Stats"
)]
pub async fn student_breakdown(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let cohort = resolve_cohort(&auth, &state, &query).await?;
    let span = query.span(state.today())?;

    let rows = state.aggregator.per_student(cohort, span).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// A student's rolling 30-day window
#[utoipa::path(
    get,
    path = "/api/stats/student/{student_id}/recent",
    params(
        ("student_id", Path, description = "Student ID")
    ),
    responses(
        (status = 200, description = "Last 30 days", body = StudentWindowResponse),
        (status = 404, description = "Unknown student")
    ),
    security(("bearer_auth" = [])),
    tag = "Stats"
)]
pub async fn student_recent(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<StudentId>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let student = visible_student(&auth, &state, path.into_inner()).await?;

    let stats = state.aggregator.student_window(student.id).await?;
    Ok(HttpResponse::Ok().json(StudentWindowResponse {
        student,
        days: STUDENT_WINDOW_DAYS,
        stats,
    }))
}
