//! Fixtures shared by the in-crate test modules.

use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use crate::{app::AppState, config::AppConfig, db::DBLayer, errors::AppError, model::user::User};

pub(crate) fn temp_db() -> (TempDir, Arc<DBLayer>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = DBLayer::new(dir.path().join("db")).expect("open store");
    (dir, Arc::new(db))
}

pub(crate) fn test_state() -> (TempDir, AppState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db");
    let config = AppConfig::for_tests(path.to_string_lossy());
    let state = AppState::new(config).expect("build state");
    (dir, state)
}

/// Inserts a user directly, bypassing registration and its scrypt cost.
pub(crate) fn seed_user(db: &DBLayer, username: &str) -> User {
    let user = User::new(
        Uuid::new_v4().to_string(),
        username.to_string(),
        "unused:unused".to_string(),
        chrono::Utc::now().timestamp(),
    );
    db.transact::<_, AppError, _>("seed_user", |tx| {
        tx.put_user(&user)?;
        tx.claim_username(&user.username, &user.id)?;
        Ok(())
    })
    .expect("seed user");
    user
}
