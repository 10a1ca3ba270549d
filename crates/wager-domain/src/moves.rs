use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::money::Amount;

/// Admissible move for a simultaneous-choice round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandSign {
    Rock,
    Paper,
    Scissors,
}

impl HandSign {
    /// Fixed 3-way precedence: rock > scissors > paper > rock.
    #[must_use]
    pub fn beats(self, other: HandSign) -> bool {
        matches!(
            (self, other),
            (HandSign::Rock, HandSign::Scissors)
                | (HandSign::Scissors, HandSign::Paper)
                | (HandSign::Paper, HandSign::Rock)
        )
    }
}

/// Admissible call for a sequential-choice round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinFace {
    Heads,
    Tails,
}

/// A player's submitted move, either variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerMove {
    Sign(HandSign),
    Call(CoinFace),
}

/// Terminal result of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Decisive result; the winner takes the full payout.
    Won { winner: UserId, by_forfeit: bool },
    /// Simultaneous tie; funds stay escrowed and the round re-collects.
    Draw,
    /// No evaluable moves; both parties are refunded.
    Void,
}

impl RoundOutcome {
    #[must_use]
    pub fn winner(self) -> Option<UserId> {
        match self {
            RoundOutcome::Won { winner, .. } => Some(winner),
            RoundOutcome::Draw | RoundOutcome::Void => None,
        }
    }
}

/// What the history sink records after a round resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAmounts {
    pub creator_stake: Amount,
    pub challenger_stake: Amount,
    pub payout: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_is_a_cycle() {
        assert!(HandSign::Rock.beats(HandSign::Scissors));
        assert!(HandSign::Scissors.beats(HandSign::Paper));
        assert!(HandSign::Paper.beats(HandSign::Rock));
        assert!(!HandSign::Rock.beats(HandSign::Paper));
        assert!(!HandSign::Rock.beats(HandSign::Rock));
    }

    #[test]
    fn moves_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_value(PlayerMove::Sign(HandSign::Scissors)).expect("serialize"),
            serde_json::json!({ "sign": "scissors" })
        );
        assert_eq!(
            serde_json::to_value(PlayerMove::Call(CoinFace::Heads)).expect("serialize"),
            serde_json::json!({ "call": "heads" })
        );
    }
}
