//! Presence/transport collaborator: who is connected, and how to reach them.
//!
//! The engine never talks to sockets. It asks the [`PresencePort`] to
//! deliver an event to a user's private channel or to a session's multicast
//! channel, and it consults the [`PresenceRegistry`] to route events to
//! parties that are not (yet) session members — a rejected join candidate,
//! for instance, is only reachable through their private channel.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use wager_domain::{SessionEvent, SessionId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("presence lock poisoned")]
    LockPoisoned,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Transport-side connection identifier (socket id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnId(pub String);

#[async_trait]
pub trait PresencePort: Send + Sync {
    async fn send_to_user(&self, user: UserId, event: &SessionEvent) -> Result<(), PresenceError>;

    async fn broadcast_session(
        &self,
        session_id: SessionId,
        event: &SessionEvent,
    ) -> Result<(), PresenceError>;

    async fn join_session_channel(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<(), PresenceError>;

    async fn leave_session_channel(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<(), PresenceError>;
}

#[derive(Debug, Default)]
pub struct NoopPresence;

#[async_trait]
impl PresencePort for NoopPresence {
    async fn send_to_user(&self, _user: UserId, _event: &SessionEvent) -> Result<(), PresenceError> {
        Ok(())
    }

    async fn broadcast_session(
        &self,
        _session_id: SessionId,
        _event: &SessionEvent,
    ) -> Result<(), PresenceError> {
        Ok(())
    }

    async fn join_session_channel(
        &self,
        _session_id: SessionId,
        _user: UserId,
    ) -> Result<(), PresenceError> {
        Ok(())
    }

    async fn leave_session_channel(
        &self,
        _session_id: SessionId,
        _user: UserId,
    ) -> Result<(), PresenceError> {
        Ok(())
    }
}

/// Records every delivery; tests assert on what each party would have seen.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPresence {
    user_events: Arc<Mutex<HashMap<UserId, Vec<SessionEvent>>>>,
    session_events: Arc<Mutex<HashMap<SessionId, Vec<SessionEvent>>>>,
    memberships: Arc<Mutex<HashMap<SessionId, HashSet<UserId>>>>,
}

impl InMemoryPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_events(&self, user: UserId) -> Vec<SessionEvent> {
        self.user_events
            .lock()
            .map(|events| events.get(&user).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn session_events(&self, session_id: SessionId) -> Vec<SessionEvent> {
        self.session_events
            .lock()
            .map(|events| events.get(&session_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn channel_members(&self, session_id: SessionId) -> HashSet<UserId> {
        self.memberships
            .lock()
            .map(|members| members.get(&session_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PresencePort for InMemoryPresence {
    async fn send_to_user(&self, user: UserId, event: &SessionEvent) -> Result<(), PresenceError> {
        self.user_events
            .lock()
            .map_err(|_| PresenceError::LockPoisoned)?
            .entry(user)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn broadcast_session(
        &self,
        session_id: SessionId,
        event: &SessionEvent,
    ) -> Result<(), PresenceError> {
        self.session_events
            .lock()
            .map_err(|_| PresenceError::LockPoisoned)?
            .entry(session_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn join_session_channel(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<(), PresenceError> {
        self.memberships
            .lock()
            .map_err(|_| PresenceError::LockPoisoned)?
            .entry(session_id)
            .or_default()
            .insert(user);
        Ok(())
    }

    async fn leave_session_channel(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<(), PresenceError> {
        if let Some(members) = self
            .memberships
            .lock()
            .map_err(|_| PresenceError::LockPoisoned)?
            .get_mut(&session_id)
        {
            members.remove(&user);
        }
        Ok(())
    }
}

/// Socket-id ↔ user-id registry with explicit connect/disconnect lifecycle.
/// A user may hold several connections (multiple tabs); they are "online"
/// while at least one remains.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    by_conn: Arc<Mutex<HashMap<ConnId, UserId>>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, conn: ConnId, user: UserId) -> Result<(), PresenceError> {
        let mut by_conn = self.by_conn.lock().map_err(|_| PresenceError::LockPoisoned)?;
        debug!(conn = %conn.0, user = %user, "connection registered");
        by_conn.insert(conn, user);
        Ok(())
    }

    /// Unregisters the connection; returns the user if this was their last
    /// one, so the caller can run the leave transition for them.
    pub fn disconnect(&self, conn: &ConnId) -> Result<Option<UserId>, PresenceError> {
        let mut by_conn = self.by_conn.lock().map_err(|_| PresenceError::LockPoisoned)?;
        let Some(user) = by_conn.remove(conn) else {
            return Ok(None);
        };
        let still_online = by_conn.values().any(|other| *other == user);
        debug!(conn = %conn.0, user = %user, still_online, "connection dropped");
        Ok(if still_online { None } else { Some(user) })
    }

    pub fn user_for(&self, conn: &ConnId) -> Result<Option<UserId>, PresenceError> {
        let by_conn = self.by_conn.lock().map_err(|_| PresenceError::LockPoisoned)?;
        Ok(by_conn.get(conn).copied())
    }

    pub fn is_online(&self, user: UserId) -> Result<bool, PresenceError> {
        let by_conn = self.by_conn.lock().map_err(|_| PresenceError::LockPoisoned)?;
        Ok(by_conn.values().any(|other| *other == user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wager_domain::SessionEventKind;

    #[tokio::test]
    async fn in_memory_presence_records_private_and_session_deliveries() {
        let presence = InMemoryPresence::new();
        let user = UserId::new();
        let session_id = SessionId::new();
        let event = SessionEvent::now(session_id, SessionEventKind::BetRejected);

        presence.send_to_user(user, &event).await.expect("send");
        presence
            .broadcast_session(session_id, &event)
            .await
            .expect("broadcast");

        assert_eq!(presence.user_events(user).len(), 1);
        assert_eq!(presence.session_events(session_id).len(), 1);
        assert!(presence.user_events(UserId::new()).is_empty());
    }

    #[tokio::test]
    async fn channel_membership_tracks_join_and_leave() {
        let presence = InMemoryPresence::new();
        let session_id = SessionId::new();
        let user = UserId::new();

        presence
            .join_session_channel(session_id, user)
            .await
            .expect("join");
        assert!(presence.channel_members(session_id).contains(&user));

        presence
            .leave_session_channel(session_id, user)
            .await
            .expect("leave");
        assert!(!presence.channel_members(session_id).contains(&user));
    }

    #[test]
    fn disconnect_reports_the_user_only_on_last_connection() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        registry
            .connect(ConnId("sock-1".to_string()), user)
            .expect("connect");
        registry
            .connect(ConnId("sock-2".to_string()), user)
            .expect("connect");

        let first = registry
            .disconnect(&ConnId("sock-1".to_string()))
            .expect("disconnect");
        assert_eq!(first, None);
        assert!(registry.is_online(user).expect("online"));

        let second = registry
            .disconnect(&ConnId("sock-2".to_string()))
            .expect("disconnect");
        assert_eq!(second, Some(user));
        assert!(!registry.is_online(user).expect("online"));
    }

    #[test]
    fn unknown_connection_disconnect_is_a_noop() {
        let registry = PresenceRegistry::new();
        let gone = registry
            .disconnect(&ConnId("missing".to_string()))
            .expect("disconnect");
        assert_eq!(gone, None);
    }
}
