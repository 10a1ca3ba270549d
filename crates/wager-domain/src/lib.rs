pub mod errors;
pub mod events;
pub mod ids;
pub mod money;
pub mod moves;
pub mod session;

pub use errors::DomainError;
pub use events::{SessionEvent, SessionEventKind};
pub use ids::{RoundId, SessionId, TraceId, UserId};
pub use money::{Amount, MoneyError, Odds, TokenKind};
pub use moves::{CoinFace, HandSign, PlayerMove, RoundAmounts, RoundOutcome};
pub use session::{GameKind, Session, SessionStatus};
