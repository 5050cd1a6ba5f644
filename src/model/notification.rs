use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::student::StudentId;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SmsCategory {
    CheckIn,
    CheckOut,
    Test,
    Manual,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Append-only log line for one outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationLogEntry {
    pub student_id: Option<StudentId>,
    #[schema(example = "+8801712345678")]
    pub phone_number: String,
    pub message: String,
    pub category: SmsCategory,
    pub status: DeliveryStatus,
    #[schema(value_type = String, format = "date-time")]
    pub sent_at: DateTime<Utc>,
}

/// One parent contact the recorder tried to reach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContactAttempt {
    pub contact: String,
    pub status: DeliveryStatus,
}
