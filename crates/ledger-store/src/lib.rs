//! Balance-ledger collaborator port.
//!
//! The platform's durable per-user/token ledger lives outside this engine;
//! the engine only needs read-balance plus per-user atomic debit/credit.
//! Every mutation a session makes goes through [`Ledger`], so per-user
//! atomicity here is what prevents lost updates when non-session activity
//! (a deposit, say) touches the same balance concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wager_domain::{Amount, TokenKind, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerDirection {
    Debit,
    Credit,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_balance(&self, user: UserId, token: &TokenKind) -> Result<Amount, LedgerError>;

    /// Atomic per-user read-modify-write; fails without side effect when the
    /// balance does not cover `amount`.
    async fn debit(
        &self,
        user: UserId,
        token: &TokenKind,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    async fn credit(
        &self,
        user: UserId,
        token: &TokenKind,
        amount: Amount,
    ) -> Result<(), LedgerError>;
}

/// In-memory ledger for tests and local runs. The single mutex gives the
/// per-user atomicity the trait requires.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    balances: Arc<Mutex<HashMap<(UserId, TokenKind), u128>>>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, user: UserId, token: &TokenKind, amount: Amount) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert((user, token.clone()), amount.as_u128());
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get_balance(&self, user: UserId, token: &TokenKind) -> Result<Amount, LedgerError> {
        let balances = self
            .balances
            .lock()
            .map_err(|_| LedgerError::Unavailable("balance map lock poisoned".to_string()))?;
        Ok(Amount(
            balances.get(&(user, token.clone())).copied().unwrap_or(0),
        ))
    }

    async fn debit(
        &self,
        user: UserId,
        token: &TokenKind,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| LedgerError::Unavailable("balance map lock poisoned".to_string()))?;
        let balance = balances.entry((user, token.clone())).or_insert(0);
        if *balance < amount.as_u128() {
            return Err(LedgerError::InsufficientFunds);
        }
        *balance -= amount.as_u128();
        Ok(())
    }

    async fn credit(
        &self,
        user: UserId,
        token: &TokenKind,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| LedgerError::Unavailable("balance map lock poisoned".to_string()))?;
        let balance = balances.entry((user, token.clone())).or_insert(0);
        *balance = balance.saturating_add(amount.as_u128());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> TokenKind {
        TokenKind::new("points")
    }

    #[tokio::test]
    async fn debit_fails_closed_on_insufficient_funds() {
        let ledger = InMemoryLedger::new();
        let user = UserId::new();
        ledger.set_balance(user, &points(), Amount(50));

        let err = ledger
            .debit(user, &points(), Amount(51))
            .await
            .expect_err("insufficient");
        assert_eq!(err, LedgerError::InsufficientFunds);
        assert_eq!(
            ledger.get_balance(user, &points()).await.expect("balance"),
            Amount(50)
        );
    }

    #[tokio::test]
    async fn debit_then_credit_round_trips() {
        let ledger = InMemoryLedger::new();
        let user = UserId::new();
        ledger.set_balance(user, &points(), Amount(100));

        ledger.debit(user, &points(), Amount(40)).await.expect("debit");
        assert_eq!(
            ledger.get_balance(user, &points()).await.expect("balance"),
            Amount(60)
        );
        ledger.credit(user, &points(), Amount(40)).await.expect("credit");
        assert_eq!(
            ledger.get_balance(user, &points()).await.expect("balance"),
            Amount(100)
        );
    }

    #[tokio::test]
    async fn unknown_user_reads_zero() {
        let ledger = InMemoryLedger::new();
        assert_eq!(
            ledger
                .get_balance(UserId::new(), &points())
                .await
                .expect("balance"),
            Amount::ZERO
        );
    }
}
