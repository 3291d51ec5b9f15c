use serde::{Deserialize, Serialize};

/// Audit row written each time an account is linked to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDevice {
    pub id: String,        // UUID
    pub user_id: String,   // FK → User.id
    pub device_id: String, // FK → DeviceFingerprint.id
    pub created_ts: i64,
}
