use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TraceId, UserId};
use crate::money::{Amount, Odds};
use crate::moves::RoundOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    JoinRequested { candidate: UserId },
    JoinCancelled { candidate: UserId },
    JoinRejected { candidate: UserId },
    JoinExpired { candidate: UserId },
    GameStarted { round_no: u32 },
    MoveAccepted { player: UserId },
    RoundResolved { outcome: RoundOutcome, payout: Amount },
    RoundVoided,
    BetProposed { bet_amount: Amount, odds: Odds },
    BetAccepted { bet_amount: Amount, odds: Odds },
    BetRejected,
    RematchPending { requested_by: UserId },
    RematchStarted { round_no: u32 },
    RematchExpired,
    PlayerLeft { player: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub trace_id: TraceId,
    pub occurred_at: DateTime<Utc>,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    #[must_use]
    pub fn now(session_id: SessionId, kind: SessionEventKind) -> Self {
        Self {
            session_id,
            trace_id: TraceId::new(),
            occurred_at: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_variant_names_are_stable_snake_case() {
        let ev = SessionEvent::now(
            SessionId::new(),
            SessionEventKind::RoundResolved {
                outcome: RoundOutcome::Draw,
                payout: Amount(200),
            },
        );
        let value = serde_json::to_value(ev).expect("serialize");
        assert_eq!(value["kind"]["round_resolved"]["outcome"], json!("draw"));
        assert_eq!(value["kind"]["round_resolved"]["payout"], json!(200));
    }

    #[test]
    fn join_events_carry_the_candidate() {
        let candidate = UserId::new();
        let ev = SessionEvent::now(
            SessionId::new(),
            SessionEventKind::JoinRequested { candidate },
        );
        let value = serde_json::to_value(ev).expect("serialize");
        assert_eq!(
            value["kind"]["join_requested"]["candidate"],
            json!(candidate.0)
        );
    }
}
