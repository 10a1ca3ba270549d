use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest indivisible unit of whatever token the session is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn as_u128(self) -> u128 {
        self.0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, MoneyError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self, MoneyError> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(MoneyError::Underflow)
    }
}

/// Token the stakes are denominated in. The ledger collaborator owns the
/// actual asset; the engine only keys balances by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenKind(pub String);

impl TokenKind {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }
}

/// Challenger-side odds in basis points: 10_000 means the challenger buys in
/// at 1:1 with the creator's bet, 5_000 at 1:2, 20_000 at 2:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Odds(pub u32);

impl Odds {
    pub const EVEN: Self = Self(10_000);

    /// The challenger buy-in implied by these odds for a creator bet.
    /// Integer token units, so the buy-in always rounds down.
    pub fn buy_in_for(self, bet_amount: Amount) -> Result<Amount, MoneyError> {
        let scaled = bet_amount
            .as_u128()
            .checked_mul(u128::from(self.0))
            .ok_or(MoneyError::Overflow)?;
        Ok(Amount(scaled / 10_000))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount overflow")]
    Overflow,
    #[error("amount underflow")]
    Underflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_odds_buy_in_equals_bet() {
        let buy_in = Odds::EVEN.buy_in_for(Amount(100)).expect("buy in");
        assert_eq!(buy_in, Amount(100));
    }

    #[test]
    fn fractional_odds_round_down() {
        let buy_in = Odds(15_000).buy_in_for(Amount(3)).expect("buy in");
        assert_eq!(buy_in, Amount(4));
        let buy_in = Odds(3_333).buy_in_for(Amount(100)).expect("buy in");
        assert_eq!(buy_in, Amount(33));
    }

    #[test]
    fn buy_in_overflow_is_reported() {
        let err = Odds(20_000).buy_in_for(Amount(u128::MAX)).expect_err("overflow");
        assert_eq!(err, MoneyError::Overflow);
    }

    #[test]
    fn checked_sub_underflow() {
        let err = Amount(1).checked_sub(Amount(2)).expect_err("underflow");
        assert_eq!(err, MoneyError::Underflow);
    }
}
