use crate::api::attendance::visible_student;
use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::model::notification::{DeliveryStatus, SmsCategory};
use crate::model::student::StudentId;
use crate::service::notifier::test_message;
use crate::state::AppState;
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct TestSms {
    #[schema(example = "+8801712345678")]
    pub phone_number: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ManualSms {
    #[schema(example = "+8801712345678")]
    pub phone_number: String,
    #[schema(example = "Please collect your child's report card tomorrow.")]
    pub message: String,
    /// Student the message concerns, if any
    #[schema(example = 12)]
    pub student_id: Option<StudentId>,
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct LogQuery {
    /// Max entries (1-200, default 50)
    #[schema(example = 50)]
    pub limit: Option<u32>,
}

fn require_phone(phone: &str) -> Result<&str, AttendanceError> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err(AttendanceError::Validation("Phone number must not be empty".into()));
    }
    Ok(phone)
}

fn delivered(status: DeliveryStatus) -> Result<HttpResponse, AttendanceError> {
    match status {
        DeliveryStatus::Sent => Ok(HttpResponse::Ok().json(json!({
            "message": "SMS sent successfully",
            "status": status,
        }))),
        DeliveryStatus::Failed => Err(AttendanceError::NotificationFailure(
            "Failed to send SMS. Please check your SMS settings.".into(),
        )),
    }
}

/// Send a test SMS through the configured gateway
#[utoipa::path(
    post,
    path = "/api/sms/test",
    request_body = TestSms,
    responses(
        (status = 200, description = "Test SMS sent"),
        (status = 502, description = "Gateway refused or timed out")
    ),
    security(("bearer_auth" = [])),
    tag = "SMS"
)]
pub async fn send_test(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<TestSms>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_admin()?;
    let phone = require_phone(&payload.phone_number)?;

    let body = test_message(state.clock.now(), &state.calendar);
    let status = state.sink.notify(phone, &body, SmsCategory::Test, None).await;
    delivered(status)
}

/// Teacher-written SMS to a parent
#[utoipa::path(
    post,
    path = "/api/sms/send",
    request_body = ManualSms,
    responses(
        (status = 200, description = "SMS sent"),
        (status = 400, description = "Empty phone number or message"),
        (status = 502, description = "Gateway refused or timed out")
    ),
    security(("bearer_auth" = [])),
    tag = "SMS"
)]
pub async fn send_manual(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<ManualSms>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_staff()?;
    let phone = require_phone(&payload.phone_number)?;
    if payload.message.trim().is_empty() {
        return Err(AttendanceError::Validation("Message must not be empty".into()));
    }
    if let Some(student_id) = payload.student_id {
        visible_student(&auth, &state, student_id).await?;
    }

    let status = state
        .sink
        .notify(phone, payload.message.trim(), SmsCategory::Manual, payload.student_id)
        .await;
    delivered(status)
}

/// Most recent SMS log entries
#[utoipa::path(
    get,
    path = "/api/sms/logs",
    params(LogQuery),
    responses(
        (status = 200, description = "Newest first", body = [crate::model::notification::NotificationLogEntry])
    ),
    security(("bearer_auth" = [])),
    tag = "SMS"
)]
pub async fn list_logs(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<LogQuery>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_admin()?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let entries = state.sms_log.recent(limit).await?;
    Ok(HttpResponse::Ok().json(entries))
}
