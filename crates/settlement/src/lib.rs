//! Fund custody for a session: debit at round start, payout or refund at
//! round end, each side effect exactly once.
//!
//! The service keeps an escrow record per session while funds are debited
//! but unresolved. The record is created by [`SettlementService::debit_for_start`]
//! and consumed (removed) by exactly one of payout, void refund, or leave
//! refund — consuming it twice is an error, which is the settlement-side
//! backstop behind the round-evaluation sentinel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ledger_store::{Ledger, LedgerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use wager_domain::{Amount, MoneyError, Session, SessionId, TokenKind, UserId};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("money error: {0}")]
    Money(#[from] MoneyError),
    #[error("session has no challenger to debit")]
    MissingChallenger,
    #[error("session funds already escrowed")]
    AlreadyEscrowed,
    #[error("no escrowed funds for session {0}")]
    NoEscrow(SessionId),
    #[error("settlement lock poisoned")]
    LockPoisoned,
}

impl SettlementError {
    /// True when the cause was a balance that could not cover the debit,
    /// as opposed to an unreachable ledger.
    #[must_use]
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, Self::Ledger(LedgerError::InsufficientFunds))
    }
}

/// Funds held for one in-flight round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub creator: UserId,
    pub creator_stake: Amount,
    pub challenger: UserId,
    pub challenger_stake: Amount,
    pub token: TokenKind,
}

impl Escrow {
    pub fn payout_total(&self) -> Result<Amount, MoneyError> {
        self.creator_stake.checked_add(self.challenger_stake)
    }
}

#[derive(Debug)]
pub struct SettlementService<L> {
    ledger: L,
    escrows: Arc<Mutex<HashMap<SessionId, Escrow>>>,
}

impl<L: Ledger> SettlementService<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            escrows: Arc::default(),
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn take_escrow(&self, session_id: SessionId) -> Result<Escrow, SettlementError> {
        self.escrows
            .lock()
            .map_err(|_| SettlementError::LockPoisoned)?
            .remove(&session_id)
            .ok_or(SettlementError::NoEscrow(session_id))
    }

    fn peek_escrow(&self, session_id: SessionId) -> Result<Option<Escrow>, SettlementError> {
        Ok(self
            .escrows
            .lock()
            .map_err(|_| SettlementError::LockPoisoned)?
            .get(&session_id)
            .cloned())
    }

    /// True while the session has debited-but-unresolved funds.
    pub fn has_escrow(&self, session_id: SessionId) -> Result<bool, SettlementError> {
        Ok(self.peek_escrow(session_id)?.is_some())
    }

    /// Debits the creator by `bet_amount` and the challenger by
    /// `challenger_buy_in`. The debits are independent per-user atomics; if
    /// the challenger debit fails the creator is credited back, so a partial
    /// debit is never observable as a completed accept.
    pub async fn debit_for_start(&self, session: &Session) -> Result<(), SettlementError> {
        let challenger = session.challenger.ok_or(SettlementError::MissingChallenger)?;
        {
            let escrows = self
                .escrows
                .lock()
                .map_err(|_| SettlementError::LockPoisoned)?;
            if escrows.contains_key(&session.id) {
                return Err(SettlementError::AlreadyEscrowed);
            }
        }

        self.ledger
            .debit(session.creator, &session.token, session.bet_amount)
            .await?;
        if let Err(err) = self
            .ledger
            .debit(challenger, &session.token, session.challenger_buy_in)
            .await
        {
            // Compensating credit: the accept must fail closed.
            if let Err(comp_err) = self
                .ledger
                .credit(session.creator, &session.token, session.bet_amount)
                .await
            {
                warn!(
                    session_id = %session.id,
                    error = %comp_err,
                    "compensating credit failed after challenger debit failure"
                );
            }
            return Err(err.into());
        }

        self.escrows
            .lock()
            .map_err(|_| SettlementError::LockPoisoned)?
            .insert(
                session.id,
                Escrow {
                    creator: session.creator,
                    creator_stake: session.bet_amount,
                    challenger,
                    challenger_stake: session.challenger_buy_in,
                    token: session.token.clone(),
                },
            );
        info!(
            session_id = %session.id,
            creator_stake = session.bet_amount.as_u128(),
            challenger_stake = session.challenger_buy_in.as_u128(),
            "round stakes escrowed"
        );
        Ok(())
    }

    /// Credits the winner with the full escrowed pot. Consumes the escrow;
    /// a second call for the same round fails with [`SettlementError::NoEscrow`].
    pub async fn payout_on_resolve(
        &self,
        session_id: SessionId,
        winner: UserId,
    ) -> Result<Amount, SettlementError> {
        let escrow = self.take_escrow(session_id)?;
        let payout = escrow.payout_total()?;
        self.ledger.credit(winner, &escrow.token, payout).await?;
        info!(
            session_id = %session_id,
            winner = %winner,
            payout = payout.as_u128(),
            "round payout settled"
        );
        Ok(payout)
    }

    /// Draw: no balance movement, funds stay escrowed for the extended round.
    pub fn payout_on_draw(&self, session_id: SessionId) -> Result<(), SettlementError> {
        match self.peek_escrow(session_id)? {
            Some(_) => Ok(()),
            None => Err(SettlementError::NoEscrow(session_id)),
        }
    }

    /// Sequential round timed out with no move: both parties get their own
    /// debited amount back.
    pub async fn refund_on_void(&self, session_id: SessionId) -> Result<(), SettlementError> {
        let escrow = self.take_escrow(session_id)?;
        self.refund(session_id, escrow, "round void").await
    }

    /// A party left after the debit but before resolution: full refund.
    pub async fn refund_on_leave(&self, session_id: SessionId) -> Result<(), SettlementError> {
        let escrow = self.take_escrow(session_id)?;
        self.refund(session_id, escrow, "player left").await
    }

    async fn refund(
        &self,
        session_id: SessionId,
        escrow: Escrow,
        reason: &str,
    ) -> Result<(), SettlementError> {
        self.ledger
            .credit(escrow.creator, &escrow.token, escrow.creator_stake)
            .await?;
        self.ledger
            .credit(escrow.challenger, &escrow.token, escrow.challenger_stake)
            .await?;
        info!(session_id = %session_id, reason, "escrowed stakes refunded");
        Ok(())
    }
}
