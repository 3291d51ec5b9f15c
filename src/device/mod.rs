use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::DBLayer,
    errors::AppError,
    model::{
        device::{DeviceFingerprint, DeviceSignals},
        user_device::UserDevice,
    },
};

const MISSING_USER_AGENT: i64 = 10;
const MISSING_SCREEN_RESOLUTION: i64 = 5;
const MISSING_CANVAS: i64 = 15;
const MISSING_WEBGL: i64 = 10;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device ID is required")]
    MissingId,
    #[error("Device not found")]
    NotFound,
    #[error("Device is blocked")]
    Blocked,
    #[error("Device registration limit reached")]
    LimitReached,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::MissingId => AppError::Validation(err.to_string()),
            DeviceError::NotFound => AppError::NotFound(err.to_string()),
            DeviceError::Blocked | DeviceError::LimitReached => AppError::Forbidden(err.to_string()),
            DeviceError::Store(e) => AppError::Internal(e),
        }
    }
}

/// Result of a pre-registration device check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCheck {
    pub device_id: String,
    pub can_register: bool,
    pub registrations: u32,
    pub blocked: bool,
    pub risk_score: i64,
}

impl From<&DeviceFingerprint> for DeviceCheck {
    fn from(device: &DeviceFingerprint) -> Self {
        Self {
            device_id: device.id.clone(),
            can_register: device.can_register(),
            registrations: device.registrations,
            blocked: device.blocked,
            risk_score: device.risk_score,
        }
    }
}

/// Additive penalty for absent signals; higher is riskier. Only the four
/// signals below are weighed.
pub fn risk_score(signals: &DeviceSignals) -> i64 {
    fn missing(field: &Option<String>) -> bool {
        field.as_deref().map_or(true, str::is_empty)
    }

    let mut score = 0;
    if missing(&signals.user_agent) {
        score += MISSING_USER_AGENT;
    }
    if missing(&signals.screen_resolution) {
        score += MISSING_SCREEN_RESOLUTION;
    }
    if missing(&signals.canvas_fingerprint) {
        score += MISSING_CANVAS;
    }
    if missing(&signals.webgl_fingerprint) {
        score += MISSING_WEBGL;
    }
    score
}

/// Per-device registration gate.
///
/// `check` records what the client looks like; `link` spends one of the
/// device's registration slots. The slot count is re-checked inside the
/// `link` transaction, so racing registrations cannot overrun the cap.
pub struct DeviceGate {
    db: Arc<DBLayer>,
    max_registrations: u32,
}

impl DeviceGate {
    pub fn new(db: Arc<DBLayer>, max_registrations: u32) -> Self {
        Self {
            db,
            max_registrations,
        }
    }

    /// Creates or refreshes the fingerprint for `server_device_id`.
    /// Registration count, block flag and cap are never touched here.
    pub async fn check(
        &self,
        server_device_id: &str,
        client_ip: Option<&str>,
        signals: DeviceSignals,
    ) -> Result<DeviceCheck, DeviceError> {
        let server_device_id = server_device_id.trim();
        if server_device_id.is_empty() {
            return Err(DeviceError::MissingId);
        }

        let score = risk_score(&signals);
        let device = self.db.transact("device_check", |tx| {
            let now = chrono::Utc::now().timestamp();
            let existing = match tx.device_id_for(server_device_id)? {
                Some(id) => tx.device_for_update(&id)?,
                None => None,
            };

            let device = match existing {
                Some(mut device) => {
                    if let Some(ip) = client_ip {
                        device.last_ip = Some(ip.to_string());
                    }
                    device.signals = signals.clone();
                    device.risk_score = score;
                    device.updated_ts = now;
                    device
                }
                None => DeviceFingerprint {
                    id: Uuid::new_v4().to_string(),
                    server_device_id: server_device_id.to_string(),
                    last_ip: client_ip.map(str::to_string),
                    registrations: 0,
                    max_registrations: self.max_registrations,
                    blocked: false,
                    risk_score: score,
                    signals: signals.clone(),
                    created_ts: now,
                    updated_ts: now,
                },
            };

            tx.put_device(&device)?;
            Ok::<_, DeviceError>(device)
        })?;

        let result = DeviceCheck::from(&device);
        info!(
            device_id = %result.device_id,
            registrations = result.registrations,
            risk_score = result.risk_score,
            can_register = result.can_register,
            "device checked"
        );
        Ok(result)
    }

    /// Spends one registration slot of `device_id` on `user_id`.
    pub async fn link(&self, user_id: &str, device_id: &str) -> Result<DeviceFingerprint, DeviceError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(DeviceError::MissingId);
        }

        let device = self
            .db
            .update_device("device_link", device_id, |tx, device| {
                if device.blocked {
                    return Err(DeviceError::Blocked);
                }
                if device.registrations >= device.max_registrations {
                    return Err(DeviceError::LimitReached);
                }

                let now = chrono::Utc::now().timestamp();
                device.registrations += 1;
                device.updated_ts = now;
                tx.put_user_device(&UserDevice {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    device_id: device.id.clone(),
                    created_ts: now,
                })?;
                Ok(())
            })
            .map_err(|err| {
                if matches!(err, DeviceError::Blocked | DeviceError::LimitReached) {
                    warn!(user_id, device_id, reason = %err, "device link refused");
                }
                err
            })?
            .ok_or(DeviceError::NotFound)?;

        info!(
            user_id,
            device_id,
            registrations = device.registrations,
            "device linked"
        );
        Ok(device)
    }

    pub async fn get(&self, device_id: &str) -> Result<DeviceFingerprint, DeviceError> {
        self.db
            .load_device(device_id)
            .await?
            .ok_or(DeviceError::NotFound)
    }

    /// Audit trail of the devices `user_id` has been linked to, oldest first.
    pub async fn links_for_user(&self, user_id: &str) -> Result<Vec<UserDevice>, DeviceError> {
        let mut links = self.db.list_devices_for_user(user_id).await?;
        links.sort_by_key(|l| l.created_ts);
        Ok(links)
    }

    /// Moderation: block/unblock a device or change its cap.
    pub async fn set_policy(
        &self,
        device_id: &str,
        blocked: Option<bool>,
        max_registrations: Option<u32>,
    ) -> Result<DeviceFingerprint, DeviceError> {
        let device = self
            .db
            .update_device("device_policy", device_id, |_, device| {
                if let Some(blocked) = blocked {
                    device.blocked = blocked;
                }
                if let Some(max) = max_registrations {
                    device.max_registrations = max;
                }
                device.updated_ts = chrono::Utc::now().timestamp();
                Ok::<_, DeviceError>(())
            })?
            .ok_or(DeviceError::NotFound)?;

        info!(
            device_id,
            blocked = device.blocked,
            max_registrations = device.max_registrations,
            "device policy updated"
        );
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::device::DEFAULT_MAX_REGISTRATIONS, testing::temp_db};

    fn full_signals() -> DeviceSignals {
        DeviceSignals {
            user_agent: Some("Mozilla/5.0".into()),
            screen_resolution: Some("1920x1080".into()),
            timezone: Some("UTC".into()),
            language: Some("en-US".into()),
            canvas_fingerprint: Some("c4nv45".into()),
            webgl_fingerprint: Some("w3bgl".into()),
            audio_fingerprint: Some("aud10".into()),
        }
    }

    fn gate(db: &Arc<DBLayer>) -> DeviceGate {
        DeviceGate::new(db.clone(), DEFAULT_MAX_REGISTRATIONS)
    }

    #[test]
    fn risk_score_weighs_only_the_four_signals() {
        assert_eq!(risk_score(&full_signals()), 0);
        assert_eq!(risk_score(&DeviceSignals::default()), 40);

        let mut s = full_signals();
        s.user_agent = Some(String::new());
        assert_eq!(risk_score(&s), 10);

        let mut s = full_signals();
        s.screen_resolution = None;
        s.webgl_fingerprint = None;
        assert_eq!(risk_score(&s), 15);

        let mut s = full_signals();
        s.canvas_fingerprint = None;
        assert_eq!(risk_score(&s), 15);

        let mut s = full_signals();
        s.audio_fingerprint = None;
        s.timezone = None;
        s.language = None;
        assert_eq!(risk_score(&s), 0);
    }

    #[tokio::test]
    async fn first_check_creates_an_open_record() {
        let (_dir, db) = temp_db();
        let gate = gate(&db);

        let check = gate
            .check("dev-1", Some("10.0.0.1"), DeviceSignals::default())
            .await
            .unwrap();
        assert_eq!(check.registrations, 0);
        assert!(check.can_register);
        assert!(!check.blocked);
        assert_eq!(check.risk_score, 40);

        let device = gate.get(&check.device_id).await.unwrap();
        assert_eq!(device.max_registrations, 2);
        assert_eq!(device.last_ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn repeat_check_refreshes_signals_but_not_counters() {
        let (_dir, db) = temp_db();
        let gate = gate(&db);

        let first = gate.check("dev-1", Some("10.0.0.1"), DeviceSignals::default()).await.unwrap();
        gate.link("u1", &first.device_id).await.unwrap();
        gate.set_policy(&first.device_id, Some(true), None).await.unwrap();

        let second = gate.check("dev-1", Some("10.0.0.2"), full_signals()).await.unwrap();
        assert_eq!(second.device_id, first.device_id);
        assert_eq!(second.registrations, 1);
        assert!(second.blocked);
        assert_eq!(second.risk_score, 0);

        let device = gate.get(&first.device_id).await.unwrap();
        assert_eq!(device.last_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(device.signals, full_signals());
    }

    #[tokio::test]
    async fn device_at_cap_cannot_register_even_with_clean_signals() {
        let (_dir, db) = temp_db();
        let gate = gate(&db);

        let check = gate.check("dev-1", None, full_signals()).await.unwrap();
        gate.link("u1", &check.device_id).await.unwrap();
        gate.link("u2", &check.device_id).await.unwrap();

        let check = gate.check("dev-1", None, full_signals()).await.unwrap();
        assert_eq!(check.registrations, 2);
        assert_eq!(check.risk_score, 0);
        assert!(!check.can_register);
    }

    #[tokio::test]
    async fn link_increments_once_and_refuses_past_the_cap() {
        let (_dir, db) = temp_db();
        let gate = gate(&db);
        let check = gate.check("dev-1", None, full_signals()).await.unwrap();

        assert_eq!(gate.link("u1", &check.device_id).await.unwrap().registrations, 1);
        assert_eq!(gate.link("u1", &check.device_id).await.unwrap().registrations, 2);

        let err = gate.link("u3", &check.device_id).await.unwrap_err();
        assert!(matches!(err, DeviceError::LimitReached));
        assert_eq!(gate.get(&check.device_id).await.unwrap().registrations, 2);

        let links = gate.links_for_user("u1").await.unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.device_id == check.device_id));
        assert!(links[0].created_ts <= links[1].created_ts);
        assert!(gate.links_for_user("u3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocked_or_unknown_devices_cannot_be_linked() {
        let (_dir, db) = temp_db();
        let gate = gate(&db);
        let check = gate.check("dev-1", None, full_signals()).await.unwrap();
        gate.set_policy(&check.device_id, Some(true), None).await.unwrap();

        assert!(matches!(
            gate.link("u1", &check.device_id).await.unwrap_err(),
            DeviceError::Blocked
        ));
        assert!(matches!(
            gate.link("u1", "no-such-device").await.unwrap_err(),
            DeviceError::NotFound
        ));
        assert!(matches!(
            gate.check("  ", None, full_signals()).await.unwrap_err(),
            DeviceError::MissingId
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_links_never_overrun_the_cap() {
        let (_dir, db) = temp_db();
        let gate = Arc::new(gate(&db));
        let check = gate.check("dev-1", None, full_signals()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                let device_id = check.device_id.clone();
                tokio::spawn(async move { gate.link(&format!("u{i}"), &device_id).await })
            })
            .collect();

        let mut linked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => linked += 1,
                Err(DeviceError::LimitReached) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(linked, 2);
        assert_eq!(gate.get(&check.device_id).await.unwrap().registrations, 2);
    }

    #[tokio::test]
    async fn raising_the_cap_reopens_the_device() {
        let (_dir, db) = temp_db();
        let gate = gate(&db);
        let check = gate.check("dev-1", None, full_signals()).await.unwrap();
        gate.link("u1", &check.device_id).await.unwrap();
        gate.link("u2", &check.device_id).await.unwrap();

        gate.set_policy(&check.device_id, None, Some(3)).await.unwrap();
        let check = gate.check("dev-1", None, full_signals()).await.unwrap();
        assert!(check.can_register);
    }
}
