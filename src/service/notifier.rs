use actix_web::rt::time::timeout;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::{Clock, SchoolCalendar};
use crate::error::{AttendanceError, AttendanceResult};
use crate::model::attendance::EventType;
use crate::model::notification::{DeliveryStatus, NotificationLogEntry, SmsCategory};
use crate::model::student::{Student, StudentId};
use crate::store::NotificationLog;
use crate::store::mysql::MySqlStore;

/// Outbound message channel to parents.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one message and logs the attempt. Never fails the caller.
    async fn notify(
        &self,
        contact: &str,
        body: &str,
        category: SmsCategory,
        student_id: Option<StudentId>,
    ) -> DeliveryStatus;
}

/// Provider-facing half of SMS delivery.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn deliver(&self, contact: &str, body: &str) -> AttendanceResult<()>;
}

/// Gateway that only dispatches while an active `sms_settings` row exists.
pub struct SettingsGateway {
    store: MySqlStore,
}

impl SettingsGateway {
    pub fn new(store: MySqlStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SmsGateway for SettingsGateway {
    async fn deliver(&self, contact: &str, body: &str) -> AttendanceResult<()> {
        let sender = self
            .store
            .active_sms_sender()
            .await?
            .ok_or_else(|| AttendanceError::NotificationFailure("SMS is not configured".into()))?;

        // Provider hand-off lives outside this service; the dispatch is recorded here.
        info!(sender = %sender, contact, chars = body.chars().count(), "SMS dispatched");
        Ok(())
    }
}

/// Sink that sends through a gateway with a deadline and logs every attempt.
pub struct SmsNotifier {
    gateway: Arc<dyn SmsGateway>,
    log: Arc<dyn NotificationLog>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SmsNotifier {
    pub fn new(
        gateway: Arc<dyn SmsGateway>,
        log: Arc<dyn NotificationLog>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            log,
            clock,
            timeout,
        }
    }
}

#[async_trait]
impl NotificationSink for SmsNotifier {
    async fn notify(
        &self,
        contact: &str,
        body: &str,
        category: SmsCategory,
        student_id: Option<StudentId>,
    ) -> DeliveryStatus {
        let result = match timeout(self.timeout, self.gateway.deliver(contact, body)).await {
            Ok(inner) => inner,
            Err(_) => Err(AttendanceError::NotificationFailure(format!(
                "gateway did not answer within {} ms",
                self.timeout.as_millis()
            ))),
        };

        let status = match result {
            Ok(()) => DeliveryStatus::Sent,
            Err(e) => {
                warn!(error = %e, contact, %category, "SMS delivery failed");
                DeliveryStatus::Failed
            }
        };

        let entry = NotificationLogEntry {
            student_id,
            phone_number: contact.to_string(),
            message: body.to_string(),
            category,
            status,
            sent_at: self.clock.now(),
        };
        if let Err(e) = self.log.append(&entry).await {
            warn!(error = %e, contact, "Failed to write SMS log entry");
        }

        status
    }
}

/// Parent-facing text for a detection event, in school local time.
pub fn detection_message(
    student: &Student,
    event: EventType,
    at: DateTime<Utc>,
    calendar: &SchoolCalendar,
) -> String {
    let time = calendar.local_time(at).format("%H:%M:%S");
    match event {
        EventType::CheckOut => format!("Your child {} has left school at {}", student.name, time),
        _ => format!("Your child {} has arrived at school at {}", student.name, time),
    }
}

pub fn test_message(at: DateTime<Utc>, calendar: &SchoolCalendar) -> String {
    let local = at.with_timezone(&calendar.offset());
    format!(
        "Test message from Smart Attendance System at {}",
        local.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn category_for(event: EventType) -> SmsCategory {
    match event {
        EventType::CheckOut => SmsCategory::CheckOut,
        EventType::CheckIn => SmsCategory::CheckIn,
        _ => SmsCategory::Manual,
    }
}
