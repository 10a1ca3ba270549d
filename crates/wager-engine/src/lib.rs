//! Pure round state machines for the two game variants.
//!
//! Everything here is synchronous and deterministic (the sequential coin
//! flip comes in through the [`FairDraw`] port). The session actor owns the
//! timers and the move records; this crate owns the resolution rules and the
//! exactly-once sentinel.

use rand::Rng;
use serde::{Deserialize, Serialize};
use wager_domain::{CoinFace, HandSign, RoundId};

/// Which seat of the session a resolution refers to. The engine never sees
/// user ids; the actor maps sides back to parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Creator,
    Challenger,
}

impl Side {
    #[must_use]
    pub fn other(self) -> Side {
        match self {
            Side::Creator => Side::Challenger,
            Side::Challenger => Side::Creator,
        }
    }
}

/// Resolution of a simultaneous-choice round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimultaneousResolution {
    Decisive { winner: Side, by_forfeit: bool },
    Draw,
    /// Neither player produced a move; the round cannot be scored.
    Void,
}

/// Server-derived fair outcome for sequential-choice rounds, independent of
/// player identity.
pub trait FairDraw: Send + Sync {
    fn flip(&self) -> CoinFace;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngDraw;

impl FairDraw for ThreadRngDraw {
    fn flip(&self) -> CoinFace {
        if rand::thread_rng().gen_bool(0.5) {
            CoinFace::Heads
        } else {
            CoinFace::Tails
        }
    }
}

/// Fixed outcome for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub CoinFace);

impl FairDraw for FixedDraw {
    fn flip(&self) -> CoinFace {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Collecting,
    Resolved,
}

/// Per-round bookkeeping held by the session actor: sequence number, draw
/// extensions, the timer generation the current countdown was armed with,
/// and the resolution sentinel.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub round_id: RoundId,
    pub round_no: u32,
    pub draw_count: u32,
    pub timer_generation: u64,
    phase: RoundPhase,
}

impl RoundState {
    #[must_use]
    pub fn begin(round_no: u32, timer_generation: u64) -> Self {
        Self {
            round_id: RoundId::new(),
            round_no,
            draw_count: 0,
            timer_generation,
            phase: RoundPhase::Collecting,
        }
    }

    #[must_use]
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.phase == RoundPhase::Collecting
    }

    /// The exactly-once guard: the first trigger (second move or timer) to
    /// observe `Collecting` flips the sentinel and may evaluate; any later
    /// trigger sees `Resolved` and must no-op.
    pub fn try_resolve(&mut self) -> bool {
        if self.phase == RoundPhase::Resolved {
            return false;
        }
        self.phase = RoundPhase::Resolved;
        true
    }

    /// Re-enters collection after a draw with a fresh timer generation.
    pub fn extend_for_draw(&mut self, timer_generation: u64) {
        self.draw_count += 1;
        self.timer_generation = timer_generation;
        self.phase = RoundPhase::Collecting;
    }

    /// True when `generation` matches the currently armed countdown; stale
    /// timer wake-ups fail this check and are dropped.
    #[must_use]
    pub fn timer_is_current(&self, generation: u64) -> bool {
        self.timer_generation == generation
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RoundEngine;

impl RoundEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Scores a simultaneous round once both moves are present. Returns
    /// `None` while a move is still outstanding (keep collecting).
    #[must_use]
    pub fn evaluate_simultaneous(
        &self,
        creator: Option<HandSign>,
        challenger: Option<HandSign>,
    ) -> Option<SimultaneousResolution> {
        let (creator, challenger) = (creator?, challenger?);
        Some(if creator.beats(challenger) {
            SimultaneousResolution::Decisive {
                winner: Side::Creator,
                by_forfeit: false,
            }
        } else if challenger.beats(creator) {
            SimultaneousResolution::Decisive {
                winner: Side::Challenger,
                by_forfeit: false,
            }
        } else {
            SimultaneousResolution::Draw
        })
    }

    /// Scores a simultaneous round at timer expiry. A player with no
    /// submitted move has forfeited; with neither move the round is void.
    #[must_use]
    pub fn evaluate_simultaneous_at_timeout(
        &self,
        creator: Option<HandSign>,
        challenger: Option<HandSign>,
    ) -> SimultaneousResolution {
        match (creator, challenger) {
            (Some(_), None) => SimultaneousResolution::Decisive {
                winner: Side::Creator,
                by_forfeit: true,
            },
            (None, Some(_)) => SimultaneousResolution::Decisive {
                winner: Side::Challenger,
                by_forfeit: true,
            },
            (None, None) => SimultaneousResolution::Void,
            (Some(creator), Some(challenger)) => self
                .evaluate_simultaneous(Some(creator), Some(challenger))
                .unwrap_or(SimultaneousResolution::Void),
        }
    }

    /// Sequential: the submitted call wins iff it matches the server flip.
    #[must_use]
    pub fn sequential_call_wins(&self, call: CoinFace, draw: &dyn FairDraw) -> bool {
        call == draw.flip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_moves_resolve_by_precedence() {
        let engine = RoundEngine::new();
        assert_eq!(
            engine.evaluate_simultaneous(Some(HandSign::Rock), Some(HandSign::Scissors)),
            Some(SimultaneousResolution::Decisive {
                winner: Side::Creator,
                by_forfeit: false
            })
        );
        assert_eq!(
            engine.evaluate_simultaneous(Some(HandSign::Rock), Some(HandSign::Paper)),
            Some(SimultaneousResolution::Decisive {
                winner: Side::Challenger,
                by_forfeit: false
            })
        );
        assert_eq!(
            engine.evaluate_simultaneous(Some(HandSign::Paper), Some(HandSign::Paper)),
            Some(SimultaneousResolution::Draw)
        );
    }

    #[test]
    fn one_missing_move_keeps_collecting() {
        let engine = RoundEngine::new();
        assert_eq!(
            engine.evaluate_simultaneous(Some(HandSign::Rock), None),
            None
        );
        assert_eq!(engine.evaluate_simultaneous(None, None), None);
    }

    #[test]
    fn timeout_forfeits_the_silent_player() {
        let engine = RoundEngine::new();
        assert_eq!(
            engine.evaluate_simultaneous_at_timeout(Some(HandSign::Rock), None),
            SimultaneousResolution::Decisive {
                winner: Side::Creator,
                by_forfeit: true
            }
        );
        assert_eq!(
            engine.evaluate_simultaneous_at_timeout(None, Some(HandSign::Paper)),
            SimultaneousResolution::Decisive {
                winner: Side::Challenger,
                by_forfeit: true
            }
        );
    }

    #[test]
    fn timeout_with_no_moves_is_void() {
        let engine = RoundEngine::new();
        assert_eq!(
            engine.evaluate_simultaneous_at_timeout(None, None),
            SimultaneousResolution::Void
        );
    }

    #[test]
    fn sentinel_resolves_exactly_once() {
        let mut round = RoundState::begin(1, 7);
        assert!(round.is_collecting());
        assert!(round.try_resolve());
        assert!(!round.try_resolve());
        assert_eq!(round.phase(), RoundPhase::Resolved);
    }

    #[test]
    fn draw_extension_rearms_the_sentinel_and_timer() {
        let mut round = RoundState::begin(1, 7);
        assert!(round.try_resolve());
        round.extend_for_draw(8);
        assert!(round.is_collecting());
        assert_eq!(round.draw_count, 1);
        assert!(round.timer_is_current(8));
        assert!(!round.timer_is_current(7));
        assert!(round.try_resolve());
    }

    #[test]
    fn sequential_call_wins_iff_it_matches_the_flip() {
        let engine = RoundEngine::new();
        assert!(engine.sequential_call_wins(CoinFace::Heads, &FixedDraw(CoinFace::Heads)));
        assert!(!engine.sequential_call_wins(CoinFace::Heads, &FixedDraw(CoinFace::Tails)));
    }
}
