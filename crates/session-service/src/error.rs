use coord_store::CoordStoreError;
use settlement::SettlementError;
use thiserror::Error;
use wager_domain::{DomainError, MoneyError};

#[derive(Debug, Error)]
pub enum SessionServiceError {
    #[error("session not found")]
    SessionNotFound,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Money(#[from] MoneyError),
    #[error("another join request is already pending for this session")]
    RoomOccupied,
    #[error("join request has expired")]
    JoinExpired,
    #[error("no pending join request")]
    NoPendingJoin,
    #[error("bet proposal has expired")]
    ProposalExpired,
    #[error("no pending bet proposal")]
    NoPendingProposal,
    #[error("balance does not cover the required stake")]
    InsufficientBalance,
    #[error("coordination store error: {0}")]
    Coord(CoordStoreError),
    #[error("settlement error: {0}")]
    Settlement(SettlementError),
    #[error("session actor unavailable")]
    ActorUnavailable,
}

impl From<CoordStoreError> for SessionServiceError {
    fn from(err: CoordStoreError) -> Self {
        match err {
            CoordStoreError::RoomOccupied => Self::RoomOccupied,
            other => Self::Coord(other),
        }
    }
}

impl From<SettlementError> for SessionServiceError {
    fn from(err: SettlementError) -> Self {
        if err.is_insufficient_funds() {
            Self::InsufficientBalance
        } else {
            Self::Settlement(err)
        }
    }
}
