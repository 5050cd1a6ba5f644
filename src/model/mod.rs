pub mod attendance;
pub mod camera;
pub mod notification;
pub mod role;
pub mod student;
