use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

use crate::model::student::StudentId;

/// Everything the attendance core and its HTTP surface can fail with.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("Student {0} does not exist or is inactive")]
    UnknownStudent(StudentId),

    #[error("No attendance record for student {student_id} on {date}")]
    NotFound { student_id: StudentId, date: NaiveDate },

    #[error("Attendance record for student {student_id} on {date} already exists")]
    ConstraintViolation { student_id: StudentId, date: NaiveDate },

    #[error("Event at {at} precedes the last recorded check-out at {last_check_out}")]
    InvalidEventTiming {
        at: DateTime<Utc>,
        last_check_out: DateTime<Utc>,
    },

    #[error("Notification failed: {0}")]
    NotificationFailure(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::UnknownStudent(_) => "UNKNOWN_STUDENT",
            AttendanceError::NotFound { .. } => "NOT_FOUND",
            AttendanceError::ConstraintViolation { .. } => "CONFLICT",
            AttendanceError::InvalidEventTiming { .. } => "INVALID_EVENT_TIMING",
            AttendanceError::NotificationFailure(_) => "NOTIFICATION_FAILURE",
            AttendanceError::Validation(_) => "VALIDATION_ERROR",
            AttendanceError::Forbidden(_) => "FORBIDDEN",
            AttendanceError::Database(_) => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::UnknownStudent(_) | AttendanceError::NotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            AttendanceError::ConstraintViolation { .. } => StatusCode::CONFLICT,
            AttendanceError::InvalidEventTiming { .. } | AttendanceError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AttendanceError::Forbidden(_) => StatusCode::FORBIDDEN,
            AttendanceError::NotificationFailure(_) => StatusCode::BAD_GATEWAY,
            AttendanceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AttendanceError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Something went wrong, Contact with system admin".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "code": self.code(),
        }))
    }
}
