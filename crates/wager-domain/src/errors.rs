use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("session is not in a state that allows this operation")]
    InvalidSessionState,
    #[error("caller is not the session creator")]
    NotCreator,
    #[error("caller is not a member of this session")]
    NotMember,
    #[error("a session creator cannot join their own session")]
    CannotJoinOwnSession,
    #[error("move already submitted for this round")]
    MoveAlreadySubmitted,
    #[error("move is not admissible for this game variant")]
    InadmissibleMove,
}
