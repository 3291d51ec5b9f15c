use std::{path::Path, str};

use anyhow::{anyhow, Context, Result};
use rocksdb::{Direction, ErrorKind, IteratorMode, OptimisticTransactionDB, Options, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::model::{
    device::DeviceFingerprint, session::SessionRecord, user::User, user_device::UserDevice,
};

/// Upper bound on optimistic retries before a mutation is reported as failed.
/// An attempt only loses when another writer committed to a key it read, so
/// up to this many concurrent writers on one row all get through.
pub const MAX_TXN_ATTEMPTS: usize = 64;

/// Shared handle over the RocksDB store.
///
/// Every read-modify-write goes through [`DBLayer::transact`], which runs the
/// body inside an optimistic transaction. Keys read with `get_for_update` are
/// conflict-checked at commit, and a losing writer retries from a fresh read,
/// so two requests racing on the same row can never both apply a stale view.
pub struct DBLayer {
    db: OptimisticTransactionDB,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = OptimisticTransactionDB::open(&opts, path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        Ok(Self { db })
    }

    // ============================================================
    // KEYS
    // ============================================================
    fn user_key(id: &str) -> String {
        format!("user:{id}")
    }

    fn username_key(username: &str) -> String {
        format!("username:{username}")
    }

    fn referral_key(code: &str) -> String {
        format!("referral:{code}")
    }

    fn device_key(id: &str) -> String {
        format!("device:{id}")
    }

    fn device_lookup_key(server_device_id: &str) -> String {
        format!("device_lookup:{server_device_id}")
    }

    fn user_device_key(user_id: &str, link_id: &str) -> String {
        format!("user_device:{user_id}:{link_id}")
    }

    fn session_key(id: &str) -> String {
        format!("session:{id}")
    }

    // ============================================================
    // TRANSACTIONS
    // ============================================================

    /// Runs `body` inside an optimistic transaction and commits it.
    ///
    /// An `Err` from `body` drops the transaction, discarding every write it
    /// staged. A commit that loses a write conflict re-runs `body` from the
    /// start against fresh state.
    pub fn transact<T, E, F>(&self, op: &'static str, mut body: F) -> Result<T, E>
    where
        E: From<anyhow::Error>,
        F: FnMut(&Tx<'_>) -> Result<T, E>,
    {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let txn = self.db.transaction();
            let value = body(&Tx { txn: &txn })?;

            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(err) if matches!(err.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => {
                    debug!(op, attempt, "write conflict, retrying");
                }
                Err(err) => {
                    return Err(E::from(
                        anyhow::Error::new(err).context(format!("{op}: commit failed")),
                    ));
                }
            }
        }

        warn!(op, attempts = MAX_TXN_ATTEMPTS, "giving up after repeated conflicts");
        Err(E::from(anyhow!(
            "{op}: gave up after {MAX_TXN_ATTEMPTS} conflicting attempts"
        )))
    }

    /// Atomic read-modify-write of one user row.
    ///
    /// `apply` returns whether it changed anything; unchanged rows are not
    /// rewritten. Returns `Ok(None)` when the user does not exist.
    pub fn update_user<E, F>(&self, op: &'static str, user_id: &str, mut apply: F) -> Result<Option<User>, E>
    where
        E: From<anyhow::Error>,
        F: FnMut(&mut User) -> Result<bool, E>,
    {
        self.transact(op, |tx| {
            let Some(mut user) = tx.user_for_update(user_id)? else {
                return Ok(None);
            };
            if apply(&mut user)? {
                tx.put_user(&user)?;
            }
            Ok(Some(user))
        })
    }

    /// Atomic read-modify-write of one device row, by internal id.
    pub fn update_device<E, F>(
        &self,
        op: &'static str,
        device_id: &str,
        mut apply: F,
    ) -> Result<Option<DeviceFingerprint>, E>
    where
        E: From<anyhow::Error>,
        F: FnMut(&Tx<'_>, &mut DeviceFingerprint) -> Result<(), E>,
    {
        self.transact(op, |tx| {
            let Some(mut device) = tx.device_for_update(device_id)? else {
                return Ok(None);
            };
            apply(tx, &mut device)?;
            tx.put_device(&device)?;
            Ok(Some(device))
        })
    }

    // ============================================================
    // USER READS
    // ============================================================
    pub async fn load_user(&self, id: &str) -> Result<Option<User>> {
        self.get_json(&Self::user_key(id))
            .with_context(|| format!("failed to load user {id}"))
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let Some(id) = self.get_string(&Self::username_key(username))? else {
            return Ok(None);
        };
        self.load_user(&id).await
    }

    pub async fn find_user_id_by_referral_code(&self, code: &str) -> Result<Option<String>> {
        self.get_string(&Self::referral_key(code))
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.scan_prefix("user:")
    }

    // ============================================================
    // DEVICE READS
    // ============================================================
    pub async fn load_device(&self, id: &str) -> Result<Option<DeviceFingerprint>> {
        self.get_json(&Self::device_key(id))
            .with_context(|| format!("failed to load device {id}"))
    }

    pub async fn list_devices_for_user(&self, user_id: &str) -> Result<Vec<UserDevice>> {
        self.scan_prefix(&format!("user_device:{user_id}:"))
    }

    // ============================================================
    // SESSION STORAGE
    // ============================================================
    pub async fn save_session(&self, session: &SessionRecord) -> Result<()> {
        let val = serde_json::to_vec(session)?;
        self.db
            .put(Self::session_key(&session.id), val)
            .context("failed to save session")?;
        Ok(())
    }

    pub async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.get_json(&Self::session_key(id))
            .context("failed to load session")
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.db
            .delete(Self::session_key(id))
            .context("failed to delete session")?;
        Ok(())
    }

    /// Drops session rows whose absolute expiry has passed.
    pub async fn purge_expired_sessions(&self, now_ts: i64) -> Result<usize> {
        let sessions: Vec<SessionRecord> = self.scan_prefix("session:")?;
        let mut purged = 0;
        for session in sessions.iter().filter(|s| !s.is_live(now_ts)) {
            self.db.delete(Self::session_key(&session.id))?;
            purged += 1;
        }
        Ok(purged)
    }

    // ============================================================
    // HELPERS
    // ============================================================
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.db
            .get(key)?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.db
            .get(key)?
            .map(|v| String::from_utf8(v).map_err(Into::into))
            .transpose()
    }

    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();

        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, val) = item?;
            let k = str::from_utf8(&key)?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push(serde_json::from_slice(&val)?);
        }

        Ok(out)
    }
}

/// Typed view over an open transaction. Reads marked `for_update` take part
/// in commit-time conflict detection.
pub struct Tx<'a> {
    txn: &'a Transaction<'a, OptimisticTransactionDB>,
}

impl Tx<'_> {
    pub fn user_for_update(&self, id: &str) -> Result<Option<User>> {
        self.get_json_for_update(&DBLayer::user_key(id))
    }

    pub fn put_user(&self, user: &User) -> Result<()> {
        self.put_json(&DBLayer::user_key(&user.id), user)
    }

    pub fn username_owner(&self, username: &str) -> Result<Option<String>> {
        self.get_string_for_update(&DBLayer::username_key(username))
    }

    pub fn claim_username(&self, username: &str, user_id: &str) -> Result<()> {
        self.txn.put(DBLayer::username_key(username), user_id)?;
        Ok(())
    }

    pub fn referral_owner(&self, code: &str) -> Result<Option<String>> {
        self.get_string_for_update(&DBLayer::referral_key(code))
    }

    pub fn claim_referral_code(&self, code: &str, user_id: &str) -> Result<()> {
        self.txn.put(DBLayer::referral_key(code), user_id)?;
        Ok(())
    }

    pub fn device_for_update(&self, id: &str) -> Result<Option<DeviceFingerprint>> {
        self.get_json_for_update(&DBLayer::device_key(id))
    }

    pub fn device_id_for(&self, server_device_id: &str) -> Result<Option<String>> {
        self.get_string_for_update(&DBLayer::device_lookup_key(server_device_id))
    }

    /// Writes the device row and its external-id lookup entry.
    pub fn put_device(&self, device: &DeviceFingerprint) -> Result<()> {
        self.put_json(&DBLayer::device_key(&device.id), device)?;
        self.txn.put(
            DBLayer::device_lookup_key(&device.server_device_id),
            device.id.as_bytes(),
        )?;
        Ok(())
    }

    pub fn put_user_device(&self, link: &UserDevice) -> Result<()> {
        self.put_json(&DBLayer::user_device_key(&link.user_id, &link.id), link)
    }

    fn get_json_for_update<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.txn
            .get_for_update(key, true)?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn get_string_for_update(&self, key: &str) -> Result<Option<String>> {
        self.txn
            .get_for_update(key, true)?
            .map(|v| String::from_utf8(v).map_err(Into::into))
            .transpose()
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let val = serde_json::to_vec(value)?;
        self.txn.put(key, val)?;
        Ok(())
    }
}
