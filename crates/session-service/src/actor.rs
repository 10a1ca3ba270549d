use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coord_store::{CoordStore, Fetch, SharedChoice};
use history_store::{RoundHistorySink, RoundRecord};
use ledger_store::Ledger;
use platform_core::TimingSection;
use presence::PresencePort;
use settlement::SettlementService;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wager_domain::{
    Amount, CoinFace, DomainError, GameKind, Odds, PlayerMove, RoundAmounts, RoundOutcome,
    Session, SessionEvent, SessionEventKind, SessionStatus, UserId,
};
use wager_engine::{FairDraw, RoundEngine, RoundState, Side, SimultaneousResolution};

use crate::command::{MoveAck, SessionCommand, SessionHandle, SessionSnapshot};
use crate::error::SessionServiceError;

/// Shared collaborators handed to every session actor.
pub struct SessionDeps<L> {
    pub coord: CoordStore,
    pub settlement: SettlementService<L>,
    pub presence: Arc<dyn PresencePort>,
    pub history: Arc<dyn RoundHistorySink>,
    pub draw: Arc<dyn FairDraw>,
    pub timing: TimingSection,
}

pub fn spawn_session_actor<L>(
    session: Session,
    deps: Arc<SessionDeps<L>>,
    queue_capacity: usize,
) -> SessionHandle
where
    L: Ledger + 'static,
{
    let (tx, mut rx) = mpsc::channel(queue_capacity);
    let self_tx = tx.clone();

    tokio::spawn(async move {
        let session_id = session.id;
        let mut actor = SessionActor {
            session,
            round: None,
            rounds_started: 0,
            timer_seq: 0,
            pending_proposal_from: None,
            engine: RoundEngine::new(),
            deps,
            self_tx,
            closed: false,
        };

        while let Some(cmd) = rx.recv().await {
            actor.handle(cmd).await;
            if actor.closed {
                break;
            }
        }

        if let Err(err) = actor.deps.coord.purge_session(session_id) {
            warn!(session_id = %session_id, error = %err, "session purge failed");
        }
        debug!(session_id = %session_id, "session actor stopped");
    });

    SessionHandle::new(tx)
}

struct SessionActor<L> {
    session: Session,
    round: Option<RoundState>,
    rounds_started: u32,
    timer_seq: u64,
    pending_proposal_from: Option<UserId>,
    engine: RoundEngine,
    deps: Arc<SessionDeps<L>>,
    self_tx: mpsc::Sender<SessionCommand>,
    closed: bool,
}

fn coord_ttl(window: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(window.as_millis()).unwrap_or(i64::MAX))
}

impl<L: Ledger + 'static> SessionActor<L> {
    async fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::RequestJoin { candidate, reply } => {
                let _ = reply.send(self.request_join(candidate).await);
            }
            SessionCommand::CancelJoin { candidate, reply } => {
                let _ = reply.send(self.cancel_join(candidate).await);
            }
            SessionCommand::AcceptJoin { caller, reply } => {
                let _ = reply.send(self.accept_join(caller).await);
            }
            SessionCommand::RejectJoin { caller, reply } => {
                let _ = reply.send(self.reject_join(caller).await);
            }
            SessionCommand::SubmitMove {
                player,
                player_move,
                reply,
            } => {
                let _ = reply.send(self.submit_move(player, player_move).await);
            }
            SessionCommand::Leave { caller, reply } => {
                let _ = reply.send(self.leave(caller).await);
            }
            SessionCommand::ProposeBetUpdate {
                caller,
                bet_amount,
                odds,
                reply,
            } => {
                let _ = reply.send(self.propose_bet_update(caller, bet_amount, odds).await);
            }
            SessionCommand::RespondBetUpdate {
                caller,
                accept,
                reply,
            } => {
                let _ = reply.send(self.respond_bet_update(caller, accept).await);
            }
            SessionCommand::RequestRematch { caller, reply } => {
                let _ = reply.send(self.request_rematch(caller).await);
            }
            SessionCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::JoinWindowElapsed { generation } => {
                self.join_window_elapsed(generation).await;
            }
            SessionCommand::RoundTimerElapsed { generation } => {
                self.round_timer_elapsed(generation).await;
            }
            SessionCommand::ProposalWindowElapsed { generation } => {
                self.proposal_window_elapsed(generation).await;
            }
            SessionCommand::RematchWindowElapsed { generation } => {
                self.rematch_window_elapsed(generation).await;
            }
        }
    }

    // --- event delivery (best effort; a transport failure never fails the
    // operation that produced the event) ---

    async fn publish(&self, kind: SessionEventKind) -> SessionEvent {
        let event = SessionEvent::now(self.session.id, kind);
        if let Err(err) = self
            .deps
            .presence
            .broadcast_session(self.session.id, &event)
            .await
        {
            warn!(session_id = %self.session.id, error = %err, "session broadcast failed");
        }
        event
    }

    async fn notify(&self, user: UserId, event: &SessionEvent) {
        if let Err(err) = self.deps.presence.send_to_user(user, event).await {
            warn!(session_id = %self.session.id, user = %user, error = %err, "user notify failed");
        }
    }

    // --- timers ---

    fn next_timer_generation(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    fn arm_timer(&self, delay: Duration, cmd: SessionCommand) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd).await;
        });
    }

    /// Current collection window: the sequential picker window is fixed, the
    /// simultaneous window stretches with each consecutive draw.
    fn current_window(&self) -> Duration {
        match self.session.game_kind {
            GameKind::Sequential => self.deps.timing.pick_timeout(),
            GameKind::Simultaneous => {
                let draws = self.round.as_ref().map_or(0, |round| round.draw_count);
                self.deps.timing.round_timeout() + self.deps.timing.draw_extension() * draws
            }
        }
    }

    // --- matchmaking ---

    async fn request_join(&mut self, candidate: UserId) -> Result<(), SessionServiceError> {
        if self.session.status != SessionStatus::Waiting {
            return Err(DomainError::InvalidSessionState.into());
        }
        if candidate == self.session.creator {
            return Err(DomainError::CannotJoinOwnSession.into());
        }
        let balance = self
            .deps
            .settlement
            .ledger()
            .get_balance(candidate, &self.session.token)
            .await
            .map_err(settlement::SettlementError::from)?;
        if balance < self.session.challenger_buy_in {
            return Err(SessionServiceError::InsufficientBalance);
        }

        let window = self.deps.timing.join_window();
        let generation =
            self.deps
                .coord
                .acquire_join_lock(self.session.id, candidate, coord_ttl(window))?;
        self.arm_timer(window, SessionCommand::JoinWindowElapsed { generation });

        info!(session_id = %self.session.id, candidate = %candidate, "join requested");
        let event = self.publish(SessionEventKind::JoinRequested { candidate }).await;
        self.notify(candidate, &event).await;
        Ok(())
    }

    fn pending_join(&self) -> Result<coord_store::JoinLock, SessionServiceError> {
        match self.deps.coord.fetch_join_lock(self.session.id)? {
            Fetch::Present(lock) => Ok(lock),
            Fetch::Expired => Err(SessionServiceError::JoinExpired),
            Fetch::Absent => Err(SessionServiceError::NoPendingJoin),
        }
    }

    /// Idempotent: cancelling an already-gone request is a no-op.
    async fn cancel_join(&mut self, candidate: UserId) -> Result<(), SessionServiceError> {
        let lock = match self.deps.coord.fetch_join_lock(self.session.id)? {
            Fetch::Present(lock) => lock,
            Fetch::Expired | Fetch::Absent => return Ok(()),
        };
        if lock.candidate != candidate {
            return Err(DomainError::NotMember.into());
        }
        self.deps.coord.release_join_lock(self.session.id)?;
        self.deps.coord.clear_bet_proposal(self.session.id)?;
        self.pending_proposal_from = None;
        self.publish(SessionEventKind::JoinCancelled { candidate }).await;
        Ok(())
    }

    async fn reject_join(&mut self, caller: UserId) -> Result<(), SessionServiceError> {
        if caller != self.session.creator {
            return Err(DomainError::NotCreator.into());
        }
        let lock = self.pending_join()?;
        self.deps.coord.release_join_lock(self.session.id)?;
        self.deps.coord.clear_bet_proposal(self.session.id)?;
        self.pending_proposal_from = None;
        let event = self
            .publish(SessionEventKind::JoinRejected {
                candidate: lock.candidate,
            })
            .await;
        self.notify(lock.candidate, &event).await;
        Ok(())
    }

    async fn accept_join(&mut self, caller: UserId) -> Result<(), SessionServiceError> {
        if self.session.status != SessionStatus::Waiting {
            return Err(DomainError::InvalidSessionState.into());
        }
        if caller != self.session.creator {
            return Err(DomainError::NotCreator.into());
        }
        let lock = self.pending_join()?;

        self.session.challenger = Some(lock.candidate);
        if let Err(err) = self.deps.settlement.debit_for_start(&self.session).await {
            // fail closed: no state or lock mutation, the creator may retry
            // or reject the candidate explicitly
            self.session.challenger = None;
            return Err(err.into());
        }

        self.deps.coord.release_join_lock(self.session.id)?;
        self.deps.coord.clear_bet_proposal(self.session.id)?;
        self.pending_proposal_from = None;
        self.session.status = SessionStatus::InProgress;
        if let Err(err) = self
            .deps
            .presence
            .join_session_channel(self.session.id, lock.candidate)
            .await
        {
            warn!(session_id = %self.session.id, error = %err, "channel join failed");
        }

        let round_no = self.begin_round()?;
        info!(session_id = %self.session.id, challenger = %lock.candidate, round_no, "game started");
        self.publish(SessionEventKind::GameStarted { round_no }).await;
        Ok(())
    }

    async fn join_window_elapsed(&mut self, generation: u64) {
        let released = match self
            .deps
            .coord
            .release_join_lock_if_generation(self.session.id, generation)
        {
            Ok(released) => released,
            Err(err) => {
                warn!(session_id = %self.session.id, error = %err, "join expiry release failed");
                return;
            }
        };
        if let Some(lock) = released {
            debug!(session_id = %self.session.id, candidate = %lock.candidate, "join request expired");
            let event = self
                .publish(SessionEventKind::JoinExpired {
                    candidate: lock.candidate,
                })
                .await;
            self.notify(lock.candidate, &event).await;
        }
    }

    // --- rounds ---

    fn begin_round(&mut self) -> Result<u32, SessionServiceError> {
        self.deps.coord.clear_moves(self.session.id)?;
        self.rounds_started += 1;
        let generation = self.next_timer_generation();
        self.round = Some(RoundState::begin(self.rounds_started, generation));
        self.arm_timer(
            self.current_window(),
            SessionCommand::RoundTimerElapsed { generation },
        );
        Ok(self.rounds_started)
    }

    fn challenger(&self) -> Result<UserId, SessionServiceError> {
        self.session
            .challenger
            .ok_or_else(|| DomainError::InvalidSessionState.into())
    }

    fn party_for(&self, side: Side) -> Result<UserId, SessionServiceError> {
        match side {
            Side::Creator => Ok(self.session.creator),
            Side::Challenger => self.challenger(),
        }
    }

    async fn submit_move(
        &mut self,
        player: UserId,
        player_move: PlayerMove,
    ) -> Result<MoveAck, SessionServiceError> {
        if self.session.status != SessionStatus::InProgress {
            return Err(DomainError::InvalidSessionState.into());
        }
        if !self.session.is_member(player) {
            return Err(DomainError::NotMember.into());
        }
        if !self.round.as_ref().is_some_and(RoundState::is_collecting) {
            return Err(DomainError::InvalidSessionState.into());
        }

        match (self.session.game_kind, player_move) {
            (GameKind::Simultaneous, PlayerMove::Sign(sign)) => {
                // record TTL outlives the timer so the timeout evaluation can
                // still read a move submitted early in the window
                let ttl = coord_ttl(self.current_window() * 2);
                self.deps
                    .coord
                    .put_move(self.session.id, player, sign, ttl)
                    .map_err(|err| match err {
                        coord_store::CoordStoreError::AlreadyPresent => {
                            DomainError::MoveAlreadySubmitted.into()
                        }
                        other => SessionServiceError::from(other),
                    })?;
                self.publish(SessionEventKind::MoveAccepted { player }).await;
                self.try_resolve_simultaneous(false).await
            }
            (GameKind::Sequential, PlayerMove::Call(choice)) => {
                let ttl = coord_ttl(self.current_window() * 2);
                self.deps
                    .coord
                    .put_shared_choice(
                        self.session.id,
                        SharedChoice {
                            choice,
                            initiator: player,
                        },
                        ttl,
                    )
                    .map_err(|err| match err {
                        coord_store::CoordStoreError::AlreadyPresent => {
                            DomainError::MoveAlreadySubmitted.into()
                        }
                        other => SessionServiceError::from(other),
                    })?;
                self.publish(SessionEventKind::MoveAccepted { player }).await;
                self.resolve_sequential(player, choice).await
            }
            _ => Err(DomainError::InadmissibleMove.into()),
        }
    }

    /// Evaluates the simultaneous round if it can be scored. `at_timeout`
    /// switches between "keep collecting until both moves are in" and the
    /// forfeit rule. The round sentinel guarantees at most one evaluation per
    /// collection window.
    async fn try_resolve_simultaneous(
        &mut self,
        at_timeout: bool,
    ) -> Result<MoveAck, SessionServiceError> {
        let challenger = self.challenger()?;
        let creator_move = self
            .deps
            .coord
            .fetch_move(self.session.id, self.session.creator)?
            .present();
        let challenger_move = self
            .deps
            .coord
            .fetch_move(self.session.id, challenger)?
            .present();

        let resolution = if at_timeout {
            Some(
                self.engine
                    .evaluate_simultaneous_at_timeout(creator_move, challenger_move),
            )
        } else {
            self.engine
                .evaluate_simultaneous(creator_move, challenger_move)
        };
        let Some(resolution) = resolution else {
            return Ok(MoveAck::Pending);
        };

        let Some(round) = self.round.as_mut() else {
            return Err(DomainError::InvalidSessionState.into());
        };
        if !round.try_resolve() {
            return Ok(MoveAck::Pending);
        }

        match resolution {
            SimultaneousResolution::Decisive { winner, by_forfeit } => {
                let winner = self.party_for(winner)?;
                let outcome = self.settle_decisive(winner, by_forfeit).await?;
                Ok(MoveAck::Resolved(outcome))
            }
            SimultaneousResolution::Draw => {
                self.extend_for_draw().await?;
                Ok(MoveAck::Resolved(RoundOutcome::Draw))
            }
            SimultaneousResolution::Void => {
                self.settle_void().await?;
                self.session.status = SessionStatus::AwaitingRematch;
                self.round = None;
                Ok(MoveAck::Resolved(RoundOutcome::Void))
            }
        }
    }

    async fn resolve_sequential(
        &mut self,
        initiator: UserId,
        choice: CoinFace,
    ) -> Result<MoveAck, SessionServiceError> {
        let Some(round) = self.round.as_mut() else {
            return Err(DomainError::InvalidSessionState.into());
        };
        if !round.try_resolve() {
            return Ok(MoveAck::Pending);
        }

        let opponent = self
            .session
            .opponent_of(initiator)
            .ok_or(DomainError::NotMember)?;
        let winner = if self.engine.sequential_call_wins(choice, self.deps.draw.as_ref()) {
            initiator
        } else {
            opponent
        };
        let outcome = self.settle_decisive(winner, false).await?;
        Ok(MoveAck::Resolved(outcome))
    }

    async fn round_timer_elapsed(&mut self, generation: u64) {
        let current = self
            .round
            .as_ref()
            .is_some_and(|round| round.is_collecting() && round.timer_is_current(generation));
        if self.session.status != SessionStatus::InProgress || !current {
            return;
        }

        let result = match self.session.game_kind {
            GameKind::Simultaneous => self.try_resolve_simultaneous(true).await.map(|_| ()),
            GameKind::Sequential => self.sequential_timeout().await,
        };
        if let Err(err) = result {
            warn!(session_id = %self.session.id, error = %err, "round timeout handling failed");
        }
    }

    /// Sequential picker window lapsed with the shared slot still empty: the
    /// round is void, stakes are refunded, and the challenger's seat reopens.
    async fn sequential_timeout(&mut self) -> Result<(), SessionServiceError> {
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        if !round.try_resolve() {
            return Ok(());
        }

        self.settle_void().await?;
        self.reopen_for_matchmaking().await
    }

    async fn settle_decisive(
        &mut self,
        winner: UserId,
        by_forfeit: bool,
    ) -> Result<RoundOutcome, SessionServiceError> {
        let payout = self
            .deps
            .settlement
            .payout_on_resolve(self.session.id, winner)
            .await?;
        let outcome = RoundOutcome::Won { winner, by_forfeit };
        let event = self
            .publish(SessionEventKind::RoundResolved { outcome, payout })
            .await;
        self.record_history(outcome, &event);
        self.session.status = SessionStatus::AwaitingRematch;
        self.session.is_draw = false;
        self.round = None;
        Ok(outcome)
    }

    /// Draw: stakes stay escrowed and the same round re-collects with an
    /// extended window.
    async fn extend_for_draw(&mut self) -> Result<(), SessionServiceError> {
        self.deps.settlement.payout_on_draw(self.session.id)?;
        self.deps.coord.clear_moves(self.session.id)?;
        self.session.is_draw = true;
        let generation = self.next_timer_generation();
        if let Some(round) = self.round.as_mut() {
            round.extend_for_draw(generation);
        }
        self.publish(SessionEventKind::RoundResolved {
            outcome: RoundOutcome::Draw,
            payout: Amount::ZERO,
        })
        .await;
        self.arm_timer(
            self.current_window(),
            SessionCommand::RoundTimerElapsed { generation },
        );
        Ok(())
    }

    async fn settle_void(&mut self) -> Result<(), SessionServiceError> {
        self.deps.settlement.refund_on_void(self.session.id).await?;
        let event = self.publish(SessionEventKind::RoundVoided).await;
        self.record_history(RoundOutcome::Void, &event);
        self.session.is_draw = false;
        Ok(())
    }

    fn record_history(&self, outcome: RoundOutcome, event: &SessionEvent) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        let record = RoundRecord {
            session_id: self.session.id,
            round_id: round.round_id,
            round_no: round.round_no,
            game_kind: self.session.game_kind,
            token: self.session.token.clone(),
            outcome,
            amounts: RoundAmounts {
                creator_stake: self.session.bet_amount,
                challenger_stake: self.session.challenger_buy_in,
                payout: self.session.payout,
            },
            resolved_at: Utc::now(),
            trace_id: event.trace_id,
        };
        let history = Arc::clone(&self.deps.history);
        let session_id = self.session.id;
        tokio::spawn(async move {
            if let Err(err) = history.record_round(&record).await {
                warn!(session_id = %session_id, error = %err, "round history write failed");
            }
        });
    }

    // --- leaving ---

    async fn leave(&mut self, caller: UserId) -> Result<(), SessionServiceError> {
        if !self.session.is_member(caller) {
            return Err(DomainError::NotMember.into());
        }

        if self.session.status == SessionStatus::InProgress
            && self.deps.settlement.has_escrow(self.session.id)?
        {
            self.deps.settlement.refund_on_leave(self.session.id).await?;
        }

        self.publish(SessionEventKind::PlayerLeft { player: caller }).await;

        if caller == self.session.creator && self.session.challenger.is_none() {
            // A pending candidate would otherwise wait out the join window
            // for a room that no longer exists.
            if let Ok(Fetch::Present(lock)) = self.deps.coord.fetch_join_lock(self.session.id) {
                let event = SessionEvent::now(
                    self.session.id,
                    SessionEventKind::JoinRejected {
                        candidate: lock.candidate,
                    },
                );
                self.notify(lock.candidate, &event).await;
            }
            info!(session_id = %self.session.id, "creator left unmatched session, closing");
            self.closed = true;
            return Ok(());
        }

        // Either party leaving a matched session clears the challenger seat
        // and returns the session to matchmaking.
        self.reopen_for_matchmaking().await
    }

    async fn reopen_for_matchmaking(&mut self) -> Result<(), SessionServiceError> {
        let departed = self.session.challenger.take();
        self.session.status = SessionStatus::Waiting;
        self.session.is_draw = false;
        self.round = None;
        self.pending_proposal_from = None;
        self.deps.coord.clear_moves(self.session.id)?;
        self.deps.coord.clear_rematch_votes(self.session.id)?;
        self.deps.coord.clear_bet_proposal(self.session.id)?;
        if let Some(challenger) = departed {
            if let Err(err) = self
                .deps
                .presence
                .leave_session_channel(self.session.id, challenger)
                .await
            {
                warn!(session_id = %self.session.id, error = %err, "channel leave failed");
            }
        }
        Ok(())
    }

    // --- bet renegotiation ---

    async fn propose_bet_update(
        &mut self,
        caller: UserId,
        bet_amount: Amount,
        odds: Odds,
    ) -> Result<(), SessionServiceError> {
        let responder = match self.session.status {
            SessionStatus::Waiting => {
                if caller != self.session.creator {
                    return Err(DomainError::NotCreator.into());
                }
                // with no candidate mid-join the proposal sits until one
                // appears or it lapses
                self.deps
                    .coord
                    .fetch_join_lock(self.session.id)?
                    .present()
                    .map(|lock| lock.candidate)
            }
            SessionStatus::AwaitingRematch => {
                if !self.session.is_member(caller) {
                    return Err(DomainError::NotMember.into());
                }
                Some(
                    self.session
                        .opponent_of(caller)
                        .ok_or(DomainError::InvalidSessionState)?,
                )
            }
            SessionStatus::InProgress => {
                return Err(DomainError::InvalidSessionState.into());
            }
        };

        // derived buy-in must be representable before the proposal is offered
        odds.buy_in_for(bet_amount)?;

        let window = self.deps.timing.proposal_window();
        let generation =
            self.deps
                .coord
                .put_bet_proposal(self.session.id, bet_amount, odds, coord_ttl(window))?;
        self.pending_proposal_from = Some(caller);
        self.arm_timer(window, SessionCommand::ProposalWindowElapsed { generation });

        let event = self
            .publish(SessionEventKind::BetProposed { bet_amount, odds })
            .await;
        if let Some(responder) = responder {
            self.notify(responder, &event).await;
        }
        Ok(())
    }

    async fn respond_bet_update(
        &mut self,
        caller: UserId,
        accept: bool,
    ) -> Result<(), SessionServiceError> {
        let proposal = match self.deps.coord.fetch_bet_proposal(self.session.id)? {
            Fetch::Present(proposal) => proposal,
            Fetch::Expired => return Err(SessionServiceError::ProposalExpired),
            Fetch::Absent => return Err(SessionServiceError::NoPendingProposal),
        };
        let proposer = self
            .pending_proposal_from
            .ok_or(SessionServiceError::NoPendingProposal)?;

        match self.session.status {
            SessionStatus::Waiting => {
                // the join candidate is the counterparty while unmatched
                if self.pending_join()?.candidate != caller {
                    return Err(DomainError::NotMember.into());
                }
            }
            SessionStatus::AwaitingRematch => {
                if !self.session.is_member(caller) {
                    return Err(DomainError::NotMember.into());
                }
                if caller == proposer {
                    return Err(DomainError::InvalidSessionState.into());
                }
            }
            SessionStatus::InProgress => {
                return Err(DomainError::InvalidSessionState.into());
            }
        }

        if accept {
            // the responder funds the challenger side; re-check against the
            // renegotiated buy-in before anything is applied
            let buy_in = proposal.odds.buy_in_for(proposal.bet_amount)?;
            let balance = self
                .deps
                .settlement
                .ledger()
                .get_balance(caller, &self.session.token)
                .await
                .map_err(settlement::SettlementError::from)?;
            if balance < buy_in {
                return Err(SessionServiceError::InsufficientBalance);
            }
        }

        self.deps.coord.clear_bet_proposal(self.session.id)?;
        self.pending_proposal_from = None;

        if accept {
            self.session
                .set_stakes(proposal.bet_amount, proposal.odds)?;
            info!(
                session_id = %self.session.id,
                bet = proposal.bet_amount.as_u128(),
                odds = proposal.odds.0,
                "bet update accepted"
            );
            self.publish(SessionEventKind::BetAccepted {
                bet_amount: proposal.bet_amount,
                odds: proposal.odds,
            })
            .await;
        } else {
            self.publish(SessionEventKind::BetRejected).await;
        }
        Ok(())
    }

    async fn proposal_window_elapsed(&mut self, generation: u64) {
        match self
            .deps
            .coord
            .clear_bet_proposal_if_generation(self.session.id, generation)
        {
            Ok(Some(_)) => {
                // an unanswered proposal lapses as a rejection
                self.pending_proposal_from = None;
                self.publish(SessionEventKind::BetRejected).await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = %self.session.id, error = %err, "proposal expiry failed");
            }
        }
    }

    // --- rematch ---

    async fn request_rematch(&mut self, caller: UserId) -> Result<bool, SessionServiceError> {
        if self.session.status != SessionStatus::AwaitingRematch {
            return Err(DomainError::InvalidSessionState.into());
        }
        if !self.session.is_member(caller) {
            return Err(DomainError::NotMember.into());
        }
        let challenger = self.challenger()?;

        let window = self.deps.timing.vote_window();
        let votes = self
            .deps
            .coord
            .add_rematch_vote(self.session.id, caller, coord_ttl(window))?;
        if votes.voters.len() == 1 {
            self.arm_timer(
                window,
                SessionCommand::RematchWindowElapsed {
                    generation: votes.generation,
                },
            );
        }
        self.publish(SessionEventKind::RematchPending { requested_by: caller })
            .await;

        let unanimous =
            votes.voters.contains(&self.session.creator) && votes.voters.contains(&challenger);
        if !unanimous {
            return Ok(false);
        }

        // votes stay on the board until the debit lands, so a failed rematch
        // can be retried without re-voting
        self.deps.settlement.debit_for_start(&self.session).await?;
        self.deps.coord.clear_rematch_votes(self.session.id)?;
        self.session.status = SessionStatus::InProgress;
        self.session.is_draw = false;
        let round_no = self.begin_round()?;
        info!(session_id = %self.session.id, round_no, "rematch started");
        self.publish(SessionEventKind::RematchStarted { round_no }).await;
        Ok(true)
    }

    async fn rematch_window_elapsed(&mut self, generation: u64) {
        if self.session.status != SessionStatus::AwaitingRematch {
            return;
        }
        match self
            .deps
            .coord
            .clear_rematch_votes_if_generation(self.session.id, generation)
        {
            Ok(Some(_)) => {
                info!(session_id = %self.session.id, "rematch window expired");
                self.publish(SessionEventKind::RematchExpired).await;
                if let Err(err) = self.reopen_for_matchmaking().await {
                    warn!(session_id = %self.session.id, error = %err, "rematch teardown failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = %self.session.id, error = %err, "rematch expiry failed");
            }
        }
    }

    // --- snapshot ---

    fn snapshot(&self) -> Result<SessionSnapshot, SessionServiceError> {
        let pending_candidate = self
            .deps
            .coord
            .fetch_join_lock(self.session.id)?
            .present()
            .map(|lock| lock.candidate);
        Ok(SessionSnapshot {
            session: self.session.clone(),
            round_no: self.round.as_ref().map(|round| round.round_no),
            draw_count: self.round.as_ref().map_or(0, |round| round.draw_count),
            pending_candidate,
        })
    }
}
