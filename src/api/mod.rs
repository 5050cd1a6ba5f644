pub mod attendance;
pub mod sms;
pub mod stats;
