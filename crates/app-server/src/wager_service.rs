use std::sync::Arc;

use ledger_store::{Ledger, LedgerError};
use platform_core::ErrorCode;
use presence::{ConnId, PresenceRegistry};
use session_service::{
    spawn_session_actor, SessionDeps, SessionHandle, SessionRegistry, SessionServiceError,
    SessionSnapshot,
};
use settlement::SettlementError;
use tracing::{info, warn};
use wager_domain::{
    Amount, DomainError, GameKind, Odds, Session, SessionId, SessionStatus, TokenKind, UserId,
};

const SESSION_QUEUE_CAPACITY: usize = 64;

/// Application facade over the session actors: opens sessions, routes calls
/// to the right mailbox, and runs the connection-lifecycle hooks.
pub struct WagerService<L> {
    deps: Arc<SessionDeps<L>>,
    registry: SessionRegistry,
    connections: PresenceRegistry,
}

impl<L> Clone for WagerService<L> {
    fn clone(&self) -> Self {
        Self {
            deps: Arc::clone(&self.deps),
            registry: self.registry.clone(),
            connections: self.connections.clone(),
        }
    }
}

impl<L: Ledger + 'static> WagerService<L> {
    pub fn new(deps: Arc<SessionDeps<L>>) -> Self {
        Self {
            deps,
            registry: SessionRegistry::new(),
            connections: PresenceRegistry::new(),
        }
    }

    /// Opens a session in `Waiting` and spawns its actor. The creator must
    /// hold at least the bet they are posting; the actual debit happens when
    /// a challenger is accepted.
    pub async fn open_session(
        &self,
        creator: UserId,
        game_kind: GameKind,
        token: TokenKind,
        bet_amount: Amount,
        odds: Odds,
    ) -> Result<SessionId, SessionServiceError> {
        let balance = self
            .deps
            .settlement
            .ledger()
            .get_balance(creator, &token)
            .await
            .map_err(SettlementError::from)?;
        if balance < bet_amount {
            return Err(SessionServiceError::InsufficientBalance);
        }

        let session = Session::open(creator, game_kind, token, bet_amount, odds)?;
        let session_id = session.id;
        let handle = spawn_session_actor(session, Arc::clone(&self.deps), SESSION_QUEUE_CAPACITY);
        self.registry.insert(session_id, handle);
        if let Err(err) = self
            .deps
            .presence
            .join_session_channel(session_id, creator)
            .await
        {
            warn!(session_id = %session_id, error = %err, "creator channel join failed");
        }
        info!(session_id = %session_id, creator = %creator, "session opened");
        Ok(session_id)
    }

    pub fn session(&self, session_id: SessionId) -> Result<SessionHandle, SessionServiceError> {
        self.registry
            .get(session_id)
            .ok_or(SessionServiceError::SessionNotFound)
    }

    /// Sessions currently advertised for matchmaking.
    pub async fn list_waiting_sessions(&self) -> Vec<SessionSnapshot> {
        let mut waiting = Vec::new();
        for (_, handle) in self.registry.handles() {
            if let Ok(snapshot) = handle.snapshot().await {
                if snapshot.session.status == SessionStatus::Waiting {
                    waiting.push(snapshot);
                }
            }
        }
        self.registry.prune();
        waiting
    }

    pub fn handle_connect(&self, conn: ConnId, user: UserId) {
        if let Err(err) = self.connections.connect(conn, user) {
            warn!(user = %user, error = %err, "connection registration failed");
        }
    }

    /// Transport disconnect hook. When the last connection for a user drops,
    /// the user leaves every session they are party to and any join request
    /// they have pending is withdrawn.
    pub async fn handle_disconnect(&self, conn: &ConnId) {
        let user = match self.connections.disconnect(conn) {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "disconnect lookup failed");
                return;
            }
        };

        for (session_id, handle) in self.registry.handles() {
            let Ok(snapshot) = handle.snapshot().await else {
                continue;
            };
            if snapshot.pending_candidate == Some(user) {
                if let Err(err) = handle.cancel_join(user).await {
                    warn!(session_id = %session_id, user = %user, error = %err, "join withdrawal failed");
                }
            }
            if snapshot.session.is_member(user) {
                info!(session_id = %session_id, user = %user, "leaving session after disconnect");
                if let Err(err) = handle.leave(user).await {
                    warn!(session_id = %session_id, user = %user, error = %err, "disconnect leave failed");
                }
            }
            if handle.is_closed() {
                self.registry.remove(session_id);
            }
        }
    }
}

/// Stable client-facing code for a service error.
#[must_use]
pub fn error_code(err: &SessionServiceError) -> ErrorCode {
    match err {
        SessionServiceError::SessionNotFound | SessionServiceError::ActorUnavailable => {
            ErrorCode::SessionNotFound
        }
        SessionServiceError::Domain(domain) => match domain {
            DomainError::NotCreator | DomainError::NotMember | DomainError::CannotJoinOwnSession => {
                ErrorCode::Forbidden
            }
            DomainError::InvalidSessionState => ErrorCode::SessionStateInvalid,
            DomainError::MoveAlreadySubmitted | DomainError::InadmissibleMove => {
                ErrorCode::MoveRejected
            }
        },
        SessionServiceError::Money(_)
        | SessionServiceError::NoPendingJoin
        | SessionServiceError::NoPendingProposal => ErrorCode::RequestInvalid,
        SessionServiceError::RoomOccupied => ErrorCode::RoomOccupied,
        SessionServiceError::JoinExpired => ErrorCode::JoinExpired,
        SessionServiceError::ProposalExpired => ErrorCode::ProposalExpired,
        SessionServiceError::InsufficientBalance => ErrorCode::InsufficientBalance,
        SessionServiceError::Settlement(SettlementError::Ledger(LedgerError::Unavailable(_))) => {
            ErrorCode::LedgerUnavailable
        }
        SessionServiceError::Settlement(_) | SessionServiceError::Coord(_) => {
            ErrorCode::InternalError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_cover_the_client_visible_failures() {
        assert_eq!(
            error_code(&SessionServiceError::RoomOccupied),
            ErrorCode::RoomOccupied
        );
        assert_eq!(
            error_code(&SessionServiceError::JoinExpired),
            ErrorCode::JoinExpired
        );
        assert_eq!(
            error_code(&SessionServiceError::InsufficientBalance),
            ErrorCode::InsufficientBalance
        );
        assert_eq!(
            error_code(&SessionServiceError::Domain(DomainError::NotCreator)),
            ErrorCode::Forbidden
        );
        assert_eq!(
            error_code(&SessionServiceError::Domain(
                DomainError::MoveAlreadySubmitted
            )),
            ErrorCode::MoveRejected
        );
        assert_eq!(
            error_code(&SessionServiceError::ActorUnavailable),
            ErrorCode::SessionNotFound
        );
        assert_eq!(
            error_code(&SessionServiceError::Settlement(SettlementError::Ledger(
                LedgerError::Unavailable("down".to_string())
            ))),
            ErrorCode::LedgerUnavailable
        );
    }
}
