use crate::api::attendance::{
    DetectionEvent, ManualMark, RecentQuery, RosterQuery, RosterResponse,
};
use crate::api::sms::{LogQuery, ManualSms, TestSms};
use crate::api::stats::{StatsQuery, StatsResponse, StudentWindowResponse};
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, EventType};
use crate::model::notification::{
    ContactAttempt, DeliveryStatus, NotificationLogEntry, SmsCategory,
};
use crate::model::student::Student;
use crate::service::aggregator::{AttendanceStats, DailyStats, StudentStats};
use crate::service::recorder::AttendanceOutcome;
use crate::store::{DateSpan, RecentCheckIn, RosterEntry};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Smart Attendance API",
        version = "1.0.0",
        description = r#"
## Smart Attendance

Attendance core for a school whose entrance cameras recognise students.

### 🔹 Key Features
- **Detection events**
  - Camera check-in and check-out, idempotent per student and day
- **Manual marks**
  - Teachers mark present, late or absent for their own grade
- **Statistics**
  - School, grade and student totals, daily trend, 30-day window
- **Parent SMS**
  - Arrival and departure messages, manual sends, delivery log

### 🔐 Security
Every endpoint is protected using **JWT Bearer authentication**.
Roles are **Admin**, **Teacher** (scoped to one grade) and **System** (camera service).

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::attendance::record_detection,
        crate::api::attendance::mark_attendance,
        crate::api::attendance::get_record,
        crate::api::attendance::day_roster,
        crate::api::attendance::recent_check_ins,

        crate::api::stats::get_stats,
        crate::api::stats::daily_stats,
        crate::api::stats::student_breakdown,
        crate::api::stats::student_recent,

        crate::api::sms::send_test,
        crate::api::sms::send_manual,
        crate::api::sms::list_logs
    ),
    components(
        schemas(
            DetectionEvent,
            ManualMark,
            RosterQuery,
            RosterResponse,
            RosterEntry,
            RecentQuery,
            RecentCheckIn,
            AttendanceRecord,
            AttendanceStatus,
            EventType,
            AttendanceOutcome,
            ContactAttempt,
            DeliveryStatus,
            SmsCategory,
            NotificationLogEntry,
            Student,
            StatsQuery,
            StatsResponse,
            StudentWindowResponse,
            AttendanceStats,
            DailyStats,
            StudentStats,
            DateSpan,
            TestSms,
            ManualSms,
            LogQuery
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Detection events, manual marks, day rosters and the check-in feed"),
        (name = "Stats", description = "Attendance statistics"),
        (name = "SMS", description = "Parent notifications"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
