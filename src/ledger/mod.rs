use std::sync::Arc;

use anyhow::anyhow;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    db::DBLayer,
    errors::AppError,
    model::user::{User, COIN_SCALE},
};

/// Smallest hash-power purchase, in USDT.
pub const MIN_PURCHASE: Decimal = Decimal::ONE;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Minimum purchase is 1 USDT")]
    BelowMinimum,
    #[error("Insufficient USDT balance")]
    InsufficientBalance,
    #[error("Hash power required to start mining")]
    NoHashPower,
    #[error("No rewards to claim")]
    NoRewards,
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,
    #[error("User not found")]
    UserNotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::BelowMinimum
            | LedgerError::InsufficientBalance
            | LedgerError::NoHashPower
            | LedgerError::NoRewards
            | LedgerError::NonPositiveAmount => AppError::Validation(err.to_string()),
            LedgerError::UserNotFound => AppError::NotFound(err.to_string()),
            LedgerError::Store(e) => AppError::Internal(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub usdt_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub hash_power: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningStart {
    Started,
    AlreadyMining,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    #[serde(with = "rust_decimal::serde::str")]
    pub claimed: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub gbtc_balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditAsset {
    Usdt,
    Unclaimed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditReceipt {
    pub asset: CreditAsset,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
}

/// Balance transitions of the mining economy.
///
/// Every operation is a single read-check-write transaction on the user's
/// row. A failed precondition aborts the transaction, so the row is left
/// exactly as it was read.
pub struct LedgerEngine {
    db: Arc<DBLayer>,
}

impl LedgerEngine {
    pub fn new(db: Arc<DBLayer>) -> Self {
        Self { db }
    }

    /// Converts `amount` USDT into the same amount of hash power.
    pub async fn purchase_power(&self, user_id: &str, amount: Decimal) -> Result<PurchaseReceipt, LedgerError> {
        if amount < MIN_PURCHASE {
            return Err(LedgerError::BelowMinimum);
        }

        let user = self.mutate("purchase_power", user_id, |user| {
            if amount > user.usdt_balance {
                return Err(LedgerError::InsufficientBalance);
            }
            user.usdt_balance = checked(user.usdt_balance.checked_sub(amount), "usdt")?;
            user.hash_power = checked(user.hash_power.checked_add(amount), "hash power")?;
            Ok(true)
        })?;

        info!(user_id, %amount, usdt = %user.usdt_balance, hash_power = %user.hash_power, "hash power purchased");
        Ok(PurchaseReceipt {
            amount,
            usdt_balance: user.usdt_balance,
            hash_power: user.hash_power,
        })
    }

    /// Sets the mining flag. Calling it again once set changes nothing.
    pub async fn start_mining(&self, user_id: &str) -> Result<MiningStart, LedgerError> {
        let mut outcome = MiningStart::Started;
        self.mutate("start_mining", user_id, |user| {
            if user.hash_power <= Decimal::ZERO {
                return Err(LedgerError::NoHashPower);
            }
            if user.has_started_mining {
                outcome = MiningStart::AlreadyMining;
                return Ok(false);
            }
            outcome = MiningStart::Started;
            user.has_started_mining = true;
            Ok(true)
        })?;

        info!(user_id, ?outcome, "start mining");
        Ok(outcome)
    }

    /// Moves the whole unclaimed balance into GBTC.
    pub async fn claim_rewards(&self, user_id: &str) -> Result<ClaimReceipt, LedgerError> {
        let mut claimed = Decimal::ZERO;
        let user = self.mutate("claim_rewards", user_id, |user| {
            if user.unclaimed_balance <= Decimal::ZERO {
                return Err(LedgerError::NoRewards);
            }
            claimed = user.unclaimed_balance;
            user.gbtc_balance = checked(user.gbtc_balance.checked_add(claimed), "gbtc")?;
            user.unclaimed_balance = Decimal::new(0, COIN_SCALE);
            Ok(true)
        })?;

        info!(user_id, %claimed, gbtc = %user.gbtc_balance, "rewards claimed");
        Ok(ClaimReceipt {
            claimed,
            gbtc_balance: user.gbtc_balance,
        })
    }

    /// Adds funds to one of the user's balances (deposit approval, reward
    /// settlement).
    pub async fn credit(&self, user_id: &str, asset: CreditAsset, amount: Decimal) -> Result<CreditReceipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount);
        }

        let user = self.mutate("credit", user_id, |user| {
            let balance = match asset {
                CreditAsset::Usdt => &mut user.usdt_balance,
                CreditAsset::Unclaimed => &mut user.unclaimed_balance,
            };
            *balance = checked(balance.checked_add(amount), "credit")?;
            Ok(true)
        })?;

        let balance = match asset {
            CreditAsset::Usdt => user.usdt_balance,
            CreditAsset::Unclaimed => user.unclaimed_balance,
        };
        info!(user_id, ?asset, %amount, %balance, "balance credited");
        Ok(CreditReceipt {
            asset,
            amount,
            balance,
        })
    }

    fn mutate<F>(&self, op: &'static str, user_id: &str, apply: F) -> Result<User, LedgerError>
    where
        F: FnMut(&mut User) -> Result<bool, LedgerError>,
    {
        self.db
            .update_user(op, user_id, apply)?
            .ok_or(LedgerError::UserNotFound)
    }
}

fn checked(value: Option<Decimal>, what: &str) -> Result<Decimal, LedgerError> {
    value.ok_or_else(|| LedgerError::Store(anyhow!("{what} balance overflow")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_user, temp_db};
    use rust_decimal_macros::dec;

    async fn funded(db: &Arc<DBLayer>, usdt: Decimal) -> (LedgerEngine, String) {
        let user = seed_user(db, "miner");
        let ledger = LedgerEngine::new(db.clone());
        if usdt > Decimal::ZERO {
            ledger.credit(&user.id, CreditAsset::Usdt, usdt).await.unwrap();
        }
        (ledger, user.id)
    }

    #[tokio::test]
    async fn purchase_moves_usdt_into_hash_power_one_to_one() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(100)).await;

        let receipt = ledger.purchase_power(&id, dec!(50)).await.unwrap();
        assert_eq!(receipt.usdt_balance, dec!(50));
        assert_eq!(receipt.hash_power, dec!(50));
    }

    #[tokio::test]
    async fn purchase_rejects_amounts_below_minimum() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(100)).await;

        for amount in [dec!(0.99), dec!(0), dec!(-5)] {
            assert!(matches!(
                ledger.purchase_power(&id, amount).await.unwrap_err(),
                LedgerError::BelowMinimum
            ));
        }
        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(user.usdt_balance, dec!(100));
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_row_unchanged() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(10)).await;

        assert!(matches!(
            ledger.purchase_power(&id, dec!(10.01)).await.unwrap_err(),
            LedgerError::InsufficientBalance
        ));
        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(user.usdt_balance, dec!(10));
        assert!(user.hash_power.is_zero());
    }

    #[tokio::test]
    async fn repeated_decimal_arithmetic_does_not_drift() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(100.10)).await;

        for _ in 0..3 {
            ledger.purchase_power(&id, dec!(1.10)).await.unwrap();
        }
        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(user.usdt_balance, dec!(96.80));
        assert_eq!(user.hash_power, dec!(3.30));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_purchases_that_fit_both_succeed() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(75.50)).await;
        let ledger = Arc::new(ledger);

        let a = tokio::spawn({
            let (ledger, id) = (ledger.clone(), id.clone());
            async move { ledger.purchase_power(&id, dec!(25.25)).await }
        });
        let b = tokio::spawn({
            let (ledger, id) = (ledger.clone(), id.clone());
            async move { ledger.purchase_power(&id, dec!(50.25)).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let user = db.load_user(&id).await.unwrap().unwrap();
        assert!(user.usdt_balance.is_zero());
        assert_eq!(user.hash_power, dec!(75.50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_purchases_never_overdraw() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(10)).await;
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let (ledger, id) = (ledger.clone(), id.clone());
                tokio::spawn(async move { ledger.purchase_power(&id, dec!(1)).await })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientBalance) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(ok, 10);
        assert!(user.usdt_balance.is_zero());
        assert_eq!(user.hash_power, dec!(10));
        assert!(user.balances_non_negative());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn only_one_of_two_oversized_purchases_wins() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(100)).await;
        let ledger = Arc::new(ledger);

        let results = futures_util::future::join_all((0..2).map(|_| {
            let (ledger, id) = (ledger.clone(), id.clone());
            tokio::spawn(async move { ledger.purchase_power(&id, dec!(60)).await })
        }))
        .await;

        let wins = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let losses = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(LedgerError::InsufficientBalance))))
            .count();
        assert_eq!((wins, losses), (1, 1));

        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(user.usdt_balance, dec!(40));
        assert_eq!(user.hash_power, dec!(60));
    }

    #[tokio::test]
    async fn start_mining_requires_hash_power_and_is_idempotent() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, dec!(5)).await;

        assert!(matches!(
            ledger.start_mining(&id).await.unwrap_err(),
            LedgerError::NoHashPower
        ));

        ledger.purchase_power(&id, dec!(5)).await.unwrap();
        assert_eq!(ledger.start_mining(&id).await.unwrap(), MiningStart::Started);
        assert_eq!(ledger.start_mining(&id).await.unwrap(), MiningStart::AlreadyMining);
        assert!(db.load_user(&id).await.unwrap().unwrap().has_started_mining);
    }

    #[tokio::test]
    async fn second_claim_finds_nothing_to_claim() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, Decimal::ZERO).await;
        ledger
            .credit(&id, CreditAsset::Unclaimed, dec!(0.00012345))
            .await
            .unwrap();

        let receipt = ledger.claim_rewards(&id).await.unwrap();
        assert_eq!(receipt.claimed, dec!(0.00012345));
        assert_eq!(receipt.gbtc_balance, dec!(0.00012345));

        assert!(matches!(
            ledger.claim_rewards(&id).await.unwrap_err(),
            LedgerError::NoRewards
        ));
        let user = db.load_user(&id).await.unwrap().unwrap();
        assert!(user.unclaimed_balance.is_zero());
        assert!(!user.unclaimed_balance.is_sign_negative());
        assert_eq!(user.gbtc_balance, dec!(0.00012345));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn double_submitted_claim_credits_once() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, Decimal::ZERO).await;
        ledger.credit(&id, CreditAsset::Unclaimed, dec!(1.5)).await.unwrap();
        let ledger = Arc::new(ledger);

        let results = futures_util::future::join_all((0..4).map(|_| {
            let (ledger, id) = (ledger.clone(), id.clone());
            tokio::spawn(async move { ledger.claim_rewards(&id).await })
        }))
        .await;

        let wins = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(wins, 1);
        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(user.gbtc_balance, dec!(1.5));
        assert!(user.unclaimed_balance.is_zero());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn many_writers_on_one_row_all_commit() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, Decimal::ZERO).await;
        let ledger = Arc::new(ledger);
        let writers = 40;
        assert!(writers < crate::db::MAX_TXN_ATTEMPTS);

        let results = futures_util::future::join_all((0..writers).map(|_| {
            let (ledger, id) = (ledger.clone(), id.clone());
            tokio::spawn(async move { ledger.credit(&id, CreditAsset::Usdt, dec!(0.25)).await })
        }))
        .await;

        assert!(results.iter().all(|r| matches!(r, Ok(Ok(_)))));
        let user = db.load_user(&id).await.unwrap().unwrap();
        assert_eq!(user.usdt_balance, dec!(10.00));
    }

    #[tokio::test]
    async fn credit_rejects_non_positive_amounts_and_unknown_users() {
        let (_dir, db) = temp_db();
        let (ledger, id) = funded(&db, Decimal::ZERO).await;

        assert!(matches!(
            ledger.credit(&id, CreditAsset::Usdt, dec!(0)).await.unwrap_err(),
            LedgerError::NonPositiveAmount
        ));
        assert!(matches!(
            ledger.credit("ghost", CreditAsset::Usdt, dec!(1)).await.unwrap_err(),
            LedgerError::UserNotFound
        ));
        assert!(matches!(
            ledger.claim_rewards("ghost").await.unwrap_err(),
            LedgerError::UserNotFound
        ));
    }
}
