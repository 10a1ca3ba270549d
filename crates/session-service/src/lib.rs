//! Per-session actor service.
//!
//! Every live session is one task owning the authoritative [`wager_domain::Session`]
//! plus round state; callers reach it through a [`SessionHandle`] mailbox, so
//! all state transitions for one session are applied by a single writer.
//! Timers are delayed mailbox messages carrying the generation they were
//! armed with; a wake-up whose generation no longer matches is dropped.

mod actor;
mod command;
mod error;

pub use actor::{SessionDeps, spawn_session_actor};
pub use command::{
    MoveAck, SessionCommand, SessionHandle, SessionRegistry, SessionSnapshot,
};
pub use error::SessionServiceError;
