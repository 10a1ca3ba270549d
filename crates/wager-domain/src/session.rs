use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};
use crate::money::{Amount, MoneyError, Odds, TokenKind};

/// Which move-collection strategy the session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Both players submit independently; resolved by a fixed 3-way
    /// precedence rule once both moves are in or the timer fires.
    Simultaneous,
    /// One shared choice slot; the first valid submission resolves the round
    /// against a server-derived fair outcome.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    AwaitingRematch,
}

/// Durable record of one matched pair of players plus their agreed stake.
///
/// `challenger_buy_in` and `payout` are always derived, never set directly:
/// any change to `bet_amount` or `odds` goes through [`Session::set_stakes`]
/// so the derived amounts can never drift from the inputs used for balance
/// mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub creator: UserId,
    pub challenger: Option<UserId>,
    pub game_kind: GameKind,
    pub token: TokenKind,
    pub bet_amount: Amount,
    pub odds: Odds,
    pub challenger_buy_in: Amount,
    pub payout: Amount,
    pub status: SessionStatus,
    pub is_draw: bool,
}

impl Session {
    pub fn open(
        creator: UserId,
        game_kind: GameKind,
        token: TokenKind,
        bet_amount: Amount,
        odds: Odds,
    ) -> Result<Self, MoneyError> {
        let challenger_buy_in = odds.buy_in_for(bet_amount)?;
        let payout = bet_amount.checked_add(challenger_buy_in)?;
        Ok(Self {
            id: SessionId::new(),
            creator,
            challenger: None,
            game_kind,
            token,
            bet_amount,
            odds,
            challenger_buy_in,
            payout,
            status: SessionStatus::Waiting,
            is_draw: false,
        })
    }

    /// Applies a renegotiated stake, recomputing the derived amounts.
    pub fn set_stakes(&mut self, bet_amount: Amount, odds: Odds) -> Result<(), MoneyError> {
        let challenger_buy_in = odds.buy_in_for(bet_amount)?;
        let payout = bet_amount.checked_add(challenger_buy_in)?;
        self.bet_amount = bet_amount;
        self.odds = odds;
        self.challenger_buy_in = challenger_buy_in;
        self.payout = payout;
        Ok(())
    }

    #[must_use]
    pub fn is_member(&self, user: UserId) -> bool {
        self.creator == user || self.challenger == Some(user)
    }

    /// The matched opponent of `user`, if the session has both parties.
    #[must_use]
    pub fn opponent_of(&self, user: UserId) -> Option<UserId> {
        let challenger = self.challenger?;
        if user == self.creator {
            Some(challenger)
        } else if user == challenger {
            Some(self.creator)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_session() -> Session {
        Session::open(
            UserId::new(),
            GameKind::Simultaneous,
            TokenKind::new("points"),
            Amount(100),
            Odds::EVEN,
        )
        .expect("open")
    }

    #[test]
    fn open_derives_buy_in_and_payout() {
        let session = open_session();
        assert_eq!(session.challenger_buy_in, Amount(100));
        assert_eq!(session.payout, Amount(200));
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.challenger.is_none());
    }

    #[test]
    fn set_stakes_recomputes_derived_amounts() {
        let mut session = open_session();
        session.set_stakes(Amount(50), Odds(20_000)).expect("stakes");
        assert_eq!(session.challenger_buy_in, Amount(100));
        assert_eq!(session.payout, Amount(150));
    }

    #[test]
    fn opponent_lookup_requires_membership() {
        let mut session = open_session();
        let challenger = UserId::new();
        session.challenger = Some(challenger);
        assert_eq!(session.opponent_of(session.creator), Some(challenger));
        assert_eq!(session.opponent_of(challenger), Some(session.creator));
        assert_eq!(session.opponent_of(UserId::new()), None);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(SessionStatus::AwaitingRematch).expect("serialize"),
            serde_json::json!("awaiting_rematch")
        );
        assert_eq!(
            serde_json::to_value(GameKind::Sequential).expect("serialize"),
            serde_json::json!("sequential")
        );
    }
}
