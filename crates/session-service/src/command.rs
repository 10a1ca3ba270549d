use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use wager_domain::{Amount, Odds, PlayerMove, RoundOutcome, Session, SessionId, UserId};

use crate::error::SessionServiceError;

type Reply<T> = oneshot::Sender<Result<T, SessionServiceError>>;

/// What the caller learns from a move submission. A resolution produced by
/// the same submission is returned inline; everyone else hears about it
/// through the session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveAck {
    Pending,
    Resolved(RoundOutcome),
}

/// Caller-facing view of the actor's state at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub round_no: Option<u32>,
    pub draw_count: u32,
    pub pending_candidate: Option<UserId>,
}

#[derive(Debug)]
pub enum SessionCommand {
    RequestJoin {
        candidate: UserId,
        reply: Reply<()>,
    },
    CancelJoin {
        candidate: UserId,
        reply: Reply<()>,
    },
    AcceptJoin {
        caller: UserId,
        reply: Reply<()>,
    },
    RejectJoin {
        caller: UserId,
        reply: Reply<()>,
    },
    SubmitMove {
        player: UserId,
        player_move: PlayerMove,
        reply: Reply<MoveAck>,
    },
    Leave {
        caller: UserId,
        reply: Reply<()>,
    },
    ProposeBetUpdate {
        caller: UserId,
        bet_amount: Amount,
        odds: Odds,
        reply: Reply<()>,
    },
    RespondBetUpdate {
        caller: UserId,
        accept: bool,
        reply: Reply<()>,
    },
    RequestRematch {
        caller: UserId,
        reply: Reply<bool>,
    },
    GetSnapshot {
        reply: Reply<SessionSnapshot>,
    },
    // timer wake-ups; each carries the generation it was armed with so a
    // stale countdown can be recognized and dropped
    JoinWindowElapsed { generation: u64 },
    RoundTimerElapsed { generation: u64 },
    ProposalWindowElapsed { generation: u64 },
    RematchWindowElapsed { generation: u64 },
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    #[must_use]
    pub fn new(sender: mpsc::Sender<SessionCommand>) -> Self {
        Self { sender }
    }

    pub fn sender(&self) -> mpsc::Sender<SessionCommand> {
        self.sender.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionServiceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| SessionServiceError::ActorUnavailable)?;
        rx.await.map_err(|_| SessionServiceError::ActorUnavailable)?
    }

    pub async fn request_join(&self, candidate: UserId) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::RequestJoin { candidate, reply })
            .await
    }

    pub async fn cancel_join(&self, candidate: UserId) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::CancelJoin { candidate, reply })
            .await
    }

    pub async fn accept_join(&self, caller: UserId) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::AcceptJoin { caller, reply })
            .await
    }

    pub async fn reject_join(&self, caller: UserId) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::RejectJoin { caller, reply })
            .await
    }

    pub async fn submit_move(
        &self,
        player: UserId,
        player_move: PlayerMove,
    ) -> Result<MoveAck, SessionServiceError> {
        self.call(|reply| SessionCommand::SubmitMove {
            player,
            player_move,
            reply,
        })
        .await
    }

    pub async fn leave(&self, caller: UserId) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::Leave { caller, reply })
            .await
    }

    pub async fn propose_bet_update(
        &self,
        caller: UserId,
        bet_amount: Amount,
        odds: Odds,
    ) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::ProposeBetUpdate {
            caller,
            bet_amount,
            odds,
            reply,
        })
        .await
    }

    pub async fn respond_bet_update(
        &self,
        caller: UserId,
        accept: bool,
    ) -> Result<(), SessionServiceError> {
        self.call(|reply| SessionCommand::RespondBetUpdate {
            caller,
            accept,
            reply,
        })
        .await
    }

    /// Returns `true` once both parties have voted and the next round is
    /// underway.
    pub async fn request_rematch(&self, caller: UserId) -> Result<bool, SessionServiceError> {
        self.call(|reply| SessionCommand::RequestRematch { caller, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionServiceError> {
        self.call(|reply| SessionCommand::GetSnapshot { reply }).await
    }
}

/// Live actor handles keyed by session. Closed actors stay until the next
/// [`SessionRegistry::prune`].
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: SessionId, handle: SessionHandle) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session_id, handle);
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(&session_id).cloned())
            .filter(|handle| !handle.is_closed())
    }

    pub fn remove(&self, session_id: SessionId) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&session_id);
        }
    }

    pub fn handles(&self) -> Vec<(SessionId, SessionHandle)> {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|(_, handle)| !handle.is_closed())
                    .map(|(id, handle)| (*id, handle.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn prune(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|_, handle| !handle.is_closed());
        }
    }
}
