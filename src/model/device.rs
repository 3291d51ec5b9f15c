use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_REGISTRATIONS: u32 = 2;

/// Client-supplied fingerprint signals. Every field may be absent; absence
/// is what the risk score penalises.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignals {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub screen_resolution: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub canvas_fingerprint: Option<String>,
    #[serde(default)]
    pub webgl_fingerprint: Option<String>,
    #[serde(default)]
    pub audio_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub id: String,
    pub server_device_id: String,
    pub last_ip: Option<String>,
    pub registrations: u32,
    pub max_registrations: u32,
    pub blocked: bool,
    pub risk_score: i64,
    pub signals: DeviceSignals,
    pub created_ts: i64,
    pub updated_ts: i64,
}

impl DeviceFingerprint {
    pub fn can_register(&self) -> bool {
        !self.blocked && self.registrations < self.max_registrations
    }
}
