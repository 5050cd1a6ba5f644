use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type CameraId = u64;

/// Entrance camera registered by an admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Camera {
    pub id: CameraId,
    pub camera_name: String,
    /// `check_in` or `check_out`
    pub camera_type: String,
    pub is_active: bool,
}
