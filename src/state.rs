use std::sync::Arc;

use crate::clock::{Clock, SchoolCalendar};
use crate::service::aggregator::AttendanceAggregator;
use crate::service::notifier::NotificationSink;
use crate::service::recorder::AttendanceRecorder;
use crate::store::{AttendanceStore, NotificationLog, StudentDirectory};

/// Shared services handed to every handler through `web::Data`.
pub struct AppState {
    pub recorder: AttendanceRecorder,
    pub aggregator: AttendanceAggregator,
    pub store: Arc<dyn AttendanceStore>,
    pub directory: Arc<dyn StudentDirectory>,
    pub sms_log: Arc<dyn NotificationLog>,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    pub calendar: SchoolCalendar,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        directory: Arc<dyn StudentDirectory>,
        sms_log: Arc<dyn NotificationLog>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        calendar: SchoolCalendar,
    ) -> Self {
        Self {
            recorder: AttendanceRecorder::new(
                store.clone(),
                directory.clone(),
                sink.clone(),
                clock.clone(),
                calendar,
            ),
            aggregator: AttendanceAggregator::new(store.clone(), clock.clone(), calendar),
            store,
            directory,
            sms_log,
            sink,
            clock,
            calendar,
        }
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }
}
