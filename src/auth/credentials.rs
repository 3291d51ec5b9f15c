use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use scrypt::{scrypt, Params};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const SCRYPT_LOG_N: u8 = 15; // N = 32768
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Hashes and verifies access keys.
///
/// Stored form is `base64(derived_key) + ":" + base64(salt)` with scrypt at
/// fixed cost. Changing any parameter invalidates every stored key.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialStore;

impl CredentialStore {
    /// Derives a stored form for `plain` under a fresh random salt.
    pub fn hash(&self, plain: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let derived = derive_key(plain.as_bytes(), &salt)?;
        Ok(format!("{}:{}", BASE64.encode(derived), BASE64.encode(salt)))
    }

    /// Checks `plain` against a stored form. Any malformed input is a
    /// mismatch, never an error.
    pub fn verify(&self, stored: &str, plain: &str) -> bool {
        let mut parts = stored.split(':');
        let (Some(hash_b64), Some(salt_b64), None) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let Ok(expected) = BASE64.decode(hash_b64) else {
            return false;
        };
        let Ok(salt) = BASE64.decode(salt_b64) else {
            return false;
        };
        let Ok(actual) = derive_key(plain.as_bytes(), &salt) else {
            return false;
        };

        constant_time_eq(&expected, &actual)
    }

    /// [`hash`](Self::hash) on the blocking pool; scrypt is too heavy for a
    /// runtime worker thread.
    pub async fn spawn_hash(&self, plain: String) -> Result<String> {
        let store = *self;
        tokio::task::spawn_blocking(move || store.hash(&plain))
            .await
            .context("access key hashing task failed")?
    }

    /// [`verify`](Self::verify) on the blocking pool. A failed task counts
    /// as a mismatch.
    pub async fn spawn_verify(&self, stored: String, plain: String) -> bool {
        let store = *self;
        tokio::task::spawn_blocking(move || store.verify(&stored, &plain))
            .await
            .unwrap_or(false)
    }
}

fn derive_key(password: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| anyhow!("invalid scrypt parameters: {e}"))?;
    let mut out = [0u8; KEY_LEN];
    scrypt(password, salt, &params, &mut out).map_err(|e| anyhow!("scrypt failed: {e}"))?;
    Ok(out)
}

/// Length may leak through timing; content may not.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
