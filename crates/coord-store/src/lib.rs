//! Typed ephemeral coordination records with per-key expiry.
//!
//! Everything a session step can abandon mid-flight lives here: the join
//! lock and room-occupancy marker, per-round move records, rematch votes,
//! and bet proposals. Expiry is a first-class outcome — a read of a lapsed
//! record reports [`Fetch::Expired`], never plain absence — and every
//! window-bearing record carries a generation so a scheduled expiry timer
//! can be ignored once the record it was armed for is gone.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use wager_domain::{Amount, CoinFace, HandSign, Odds, SessionId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordStoreError {
    #[error("coordination store lock poisoned")]
    LockPoisoned,
    #[error("room already has an outstanding join candidate")]
    RoomOccupied,
    #[error("record already present")]
    AlreadyPresent,
}

/// Read outcome distinguishing a lapsed record from one that never existed,
/// so callers can surface "expired" to clients instead of "not found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch<T> {
    Present(T),
    Expired,
    Absent,
}

impl<T> Fetch<T> {
    #[must_use]
    pub fn present(self) -> Option<T> {
        match self {
            Fetch::Present(value) => Some(value),
            Fetch::Expired | Fetch::Absent => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLock {
    pub candidate: UserId,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedChoice {
    pub choice: CoinFace,
    pub initiator: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetProposal {
    pub bet_amount: Amount,
    pub odds: Odds,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RematchVotes {
    pub voters: HashSet<UserId>,
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Utc::now() + ttl,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
struct Inner {
    occupancy: HashMap<SessionId, Entry<()>>,
    join_locks: HashMap<SessionId, Entry<JoinLock>>,
    moves: HashMap<(SessionId, UserId), Entry<HandSign>>,
    shared_choices: HashMap<SessionId, Entry<SharedChoice>>,
    rematch_votes: HashMap<SessionId, Entry<RematchVotes>>,
    bet_proposals: HashMap<SessionId, Entry<BetProposal>>,
    next_generation: u64,
}

/// In-memory implementation of the ephemeral coordination facility. The
/// single mutex makes compound operations (occupancy check + lock write)
/// atomic; per-session traffic is already serialized by the session actor.
#[derive(Debug, Clone, Default)]
pub struct CoordStore {
    inner: Arc<Mutex<Inner>>,
}

impl CoordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, CoordStoreError> {
        self.inner.lock().map_err(|_| CoordStoreError::LockPoisoned)
    }

    fn fetch_entry<T: Clone>(
        map: &HashMap<SessionId, Entry<T>>,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Fetch<T> {
        match map.get(&session_id) {
            Some(entry) if entry.is_expired(now) => Fetch::Expired,
            Some(entry) => Fetch::Present(entry.value.clone()),
            None => Fetch::Absent,
        }
    }

    // --- join lock + room occupancy ---

    /// Atomically claims the room for `candidate`: fails with
    /// [`CoordStoreError::RoomOccupied`] while another unexpired candidate
    /// holds the occupancy marker. Returns the lock generation for the
    /// caller's expiry timer.
    pub fn acquire_join_lock(
        &self,
        session_id: SessionId,
        candidate: UserId,
        ttl: Duration,
    ) -> Result<u64, CoordStoreError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        if let Some(entry) = inner.occupancy.get(&session_id) {
            if !entry.is_expired(now) {
                return Err(CoordStoreError::RoomOccupied);
            }
        }
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.occupancy.insert(session_id, Entry::new((), ttl));
        inner.join_locks.insert(
            session_id,
            Entry::new(
                JoinLock {
                    candidate,
                    generation,
                },
                ttl,
            ),
        );
        Ok(generation)
    }

    pub fn fetch_join_lock(&self, session_id: SessionId) -> Result<Fetch<JoinLock>, CoordStoreError> {
        let inner = self.lock()?;
        Ok(Self::fetch_entry(&inner.join_locks, session_id, Utc::now()))
    }

    /// Removes the lock and occupancy marker. Idempotent.
    pub fn release_join_lock(&self, session_id: SessionId) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        inner.join_locks.remove(&session_id);
        inner.occupancy.remove(&session_id);
        Ok(())
    }

    /// Removes the lock only if it still belongs to `generation`; used by the
    /// expiry timer so it cannot tear down a newer candidate's lock.
    pub fn release_join_lock_if_generation(
        &self,
        session_id: SessionId,
        generation: u64,
    ) -> Result<Option<JoinLock>, CoordStoreError> {
        let mut inner = self.lock()?;
        let matches = inner
            .join_locks
            .get(&session_id)
            .is_some_and(|entry| entry.value.generation == generation);
        if !matches {
            return Ok(None);
        }
        inner.occupancy.remove(&session_id);
        Ok(inner.join_locks.remove(&session_id).map(|entry| entry.value))
    }

    // --- simultaneous move records ---

    /// Write-once per (session, player): a second write while the first is
    /// live is rejected so a submitted move can never be overwritten.
    pub fn put_move(
        &self,
        session_id: SessionId,
        player: UserId,
        sign: HandSign,
        ttl: Duration,
    ) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        if let Some(entry) = inner.moves.get(&(session_id, player)) {
            if !entry.is_expired(now) {
                return Err(CoordStoreError::AlreadyPresent);
            }
        }
        inner
            .moves
            .insert((session_id, player), Entry::new(sign, ttl));
        Ok(())
    }

    pub fn fetch_move(
        &self,
        session_id: SessionId,
        player: UserId,
    ) -> Result<Fetch<HandSign>, CoordStoreError> {
        let inner = self.lock()?;
        let now = Utc::now();
        Ok(match inner.moves.get(&(session_id, player)) {
            Some(entry) if entry.is_expired(now) => Fetch::Expired,
            Some(entry) => Fetch::Present(entry.value),
            None => Fetch::Absent,
        })
    }

    /// Drops both players' move records ahead of a fresh collection window.
    pub fn clear_moves(&self, session_id: SessionId) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        inner.moves.retain(|(sid, _), _| *sid != session_id);
        inner.shared_choices.remove(&session_id);
        Ok(())
    }

    // --- sequential shared choice ---

    pub fn put_shared_choice(
        &self,
        session_id: SessionId,
        choice: SharedChoice,
        ttl: Duration,
    ) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        if let Some(entry) = inner.shared_choices.get(&session_id) {
            if !entry.is_expired(now) {
                return Err(CoordStoreError::AlreadyPresent);
            }
        }
        inner
            .shared_choices
            .insert(session_id, Entry::new(choice, ttl));
        Ok(())
    }

    pub fn fetch_shared_choice(
        &self,
        session_id: SessionId,
    ) -> Result<Fetch<SharedChoice>, CoordStoreError> {
        let inner = self.lock()?;
        Ok(Self::fetch_entry(&inner.shared_choices, session_id, Utc::now()))
    }

    // --- rematch votes ---

    /// Adds a vote, creating the vote window on the first one. Returns the
    /// current voter set; the generation arms the window-expiry timer.
    pub fn add_rematch_vote(
        &self,
        session_id: SessionId,
        voter: UserId,
        ttl: Duration,
    ) -> Result<RematchVotes, CoordStoreError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let stale = inner
            .rematch_votes
            .get(&session_id)
            .is_some_and(|entry| entry.is_expired(now));
        if stale {
            inner.rematch_votes.remove(&session_id);
        }
        match inner.rematch_votes.get_mut(&session_id) {
            Some(entry) => {
                entry.value.voters.insert(voter);
                Ok(entry.value.clone())
            }
            None => {
                inner.next_generation += 1;
                let votes = RematchVotes {
                    voters: HashSet::from([voter]),
                    generation: inner.next_generation,
                };
                inner
                    .rematch_votes
                    .insert(session_id, Entry::new(votes.clone(), ttl));
                Ok(votes)
            }
        }
    }

    pub fn clear_rematch_votes(&self, session_id: SessionId) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        inner.rematch_votes.remove(&session_id);
        Ok(())
    }

    pub fn clear_rematch_votes_if_generation(
        &self,
        session_id: SessionId,
        generation: u64,
    ) -> Result<Option<RematchVotes>, CoordStoreError> {
        let mut inner = self.lock()?;
        let matches = inner
            .rematch_votes
            .get(&session_id)
            .is_some_and(|entry| entry.value.generation == generation);
        if !matches {
            return Ok(None);
        }
        Ok(inner
            .rematch_votes
            .remove(&session_id)
            .map(|entry| entry.value))
    }

    // --- bet proposals ---

    pub fn put_bet_proposal(
        &self,
        session_id: SessionId,
        bet_amount: Amount,
        odds: Odds,
        ttl: Duration,
    ) -> Result<u64, CoordStoreError> {
        let mut inner = self.lock()?;
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.bet_proposals.insert(
            session_id,
            Entry::new(
                BetProposal {
                    bet_amount,
                    odds,
                    generation,
                },
                ttl,
            ),
        );
        Ok(generation)
    }

    pub fn fetch_bet_proposal(
        &self,
        session_id: SessionId,
    ) -> Result<Fetch<BetProposal>, CoordStoreError> {
        let inner = self.lock()?;
        Ok(Self::fetch_entry(&inner.bet_proposals, session_id, Utc::now()))
    }

    pub fn clear_bet_proposal(&self, session_id: SessionId) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        inner.bet_proposals.remove(&session_id);
        Ok(())
    }

    pub fn clear_bet_proposal_if_generation(
        &self,
        session_id: SessionId,
        generation: u64,
    ) -> Result<Option<BetProposal>, CoordStoreError> {
        let mut inner = self.lock()?;
        let matches = inner
            .bet_proposals
            .get(&session_id)
            .is_some_and(|entry| entry.value.generation == generation);
        if !matches {
            return Ok(None);
        }
        Ok(inner
            .bet_proposals
            .remove(&session_id)
            .map(|entry| entry.value))
    }

    /// Drops every ephemeral record for a session; called when a party
    /// leaves or the session closes.
    pub fn purge_session(&self, session_id: SessionId) -> Result<(), CoordStoreError> {
        let mut inner = self.lock()?;
        inner.occupancy.remove(&session_id);
        inner.join_locks.remove(&session_id);
        inner.moves.retain(|(sid, _), _| *sid != session_id);
        inner.shared_choices.remove(&session_id);
        inner.rematch_votes.remove(&session_id);
        inner.bet_proposals.remove(&session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, UserId, UserId) {
        (SessionId::new(), UserId::new(), UserId::new())
    }

    #[test]
    fn second_candidate_is_rejected_while_room_is_occupied() {
        let store = CoordStore::new();
        let (session_id, first, second) = ids();
        store
            .acquire_join_lock(session_id, first, Duration::seconds(30))
            .expect("first candidate");
        let err = store
            .acquire_join_lock(session_id, second, Duration::seconds(30))
            .expect_err("second candidate");
        assert_eq!(err, CoordStoreError::RoomOccupied);
    }

    #[test]
    fn expired_lock_reads_as_expired_not_absent() {
        let store = CoordStore::new();
        let (session_id, candidate, _) = ids();
        store
            .acquire_join_lock(session_id, candidate, Duration::seconds(-1))
            .expect("acquire");
        assert_eq!(
            store.fetch_join_lock(session_id).expect("fetch"),
            Fetch::Expired
        );
        assert_eq!(
            store.fetch_join_lock(SessionId::new()).expect("fetch"),
            Fetch::Absent
        );
    }

    #[test]
    fn expired_occupancy_admits_a_new_candidate() {
        let store = CoordStore::new();
        let (session_id, first, second) = ids();
        store
            .acquire_join_lock(session_id, first, Duration::seconds(-1))
            .expect("first");
        store
            .acquire_join_lock(session_id, second, Duration::seconds(30))
            .expect("second after expiry");
        let lock = store
            .fetch_join_lock(session_id)
            .expect("fetch")
            .present()
            .expect("present");
        assert_eq!(lock.candidate, second);
    }

    #[test]
    fn generation_guard_ignores_stale_expiry() {
        let store = CoordStore::new();
        let (session_id, first, second) = ids();
        let stale_generation = store
            .acquire_join_lock(session_id, first, Duration::seconds(-1))
            .expect("first");
        store.release_join_lock(session_id).expect("release");
        store
            .acquire_join_lock(session_id, second, Duration::seconds(30))
            .expect("second");

        let removed = store
            .release_join_lock_if_generation(session_id, stale_generation)
            .expect("guarded release");
        assert!(removed.is_none());
        assert!(matches!(
            store.fetch_join_lock(session_id).expect("fetch"),
            Fetch::Present(_)
        ));
    }

    #[test]
    fn move_records_are_write_once() {
        let store = CoordStore::new();
        let (session_id, player, _) = ids();
        store
            .put_move(session_id, player, HandSign::Rock, Duration::seconds(20))
            .expect("first write");
        let err = store
            .put_move(session_id, player, HandSign::Paper, Duration::seconds(20))
            .expect_err("overwrite");
        assert_eq!(err, CoordStoreError::AlreadyPresent);
        assert_eq!(
            store.fetch_move(session_id, player).expect("fetch"),
            Fetch::Present(HandSign::Rock)
        );
    }

    #[test]
    fn rematch_votes_accumulate_and_keep_their_generation() {
        let store = CoordStore::new();
        let (session_id, creator, challenger) = ids();
        let first = store
            .add_rematch_vote(session_id, creator, Duration::seconds(30))
            .expect("first vote");
        assert_eq!(first.voters.len(), 1);
        let second = store
            .add_rematch_vote(session_id, challenger, Duration::seconds(30))
            .expect("second vote");
        assert_eq!(second.voters.len(), 2);
        assert_eq!(second.generation, first.generation);
    }

    #[test]
    fn purge_session_drops_every_record_kind() {
        let store = CoordStore::new();
        let (session_id, creator, challenger) = ids();
        store
            .acquire_join_lock(session_id, challenger, Duration::seconds(30))
            .expect("lock");
        store
            .put_move(session_id, creator, HandSign::Rock, Duration::seconds(30))
            .expect("move");
        store
            .add_rematch_vote(session_id, creator, Duration::seconds(30))
            .expect("vote");
        store
            .put_bet_proposal(session_id, Amount(5), Odds::EVEN, Duration::seconds(30))
            .expect("proposal");

        store.purge_session(session_id).expect("purge");
        assert_eq!(store.fetch_join_lock(session_id).expect("f"), Fetch::Absent);
        assert_eq!(
            store.fetch_move(session_id, creator).expect("f"),
            Fetch::Absent
        );
        assert_eq!(
            store.fetch_bet_proposal(session_id).expect("f"),
            Fetch::Absent
        );
    }
}
