//! Service-level flows exercised end to end against in-memory collaborators.

use std::sync::Arc;

use coord_store::CoordStore;
use history_store::{InMemoryRoundHistorySink, RoundHistorySink};
use ledger_store::{InMemoryLedger, Ledger};
use platform_core::{AppConfig, AppEnv};
use presence::{ConnId, InMemoryPresence, PresencePort};
use session_service::{MoveAck, SessionDeps, SessionServiceError};
use settlement::SettlementService;
use wager_domain::{
    Amount, CoinFace, GameKind, HandSign, Odds, PlayerMove, RoundOutcome, SessionStatus,
    TokenKind, UserId,
};
use wager_engine::FixedDraw;

use crate::wager_service::WagerService;

struct World {
    service: WagerService<InMemoryLedger>,
    ledger: InMemoryLedger,
    presence: Arc<InMemoryPresence>,
    history: Arc<InMemoryRoundHistorySink>,
    token: TokenKind,
}

fn world() -> World {
    let ledger = InMemoryLedger::new();
    let presence = Arc::new(InMemoryPresence::new());
    let history = Arc::new(InMemoryRoundHistorySink::new());
    let token = TokenKind::new("points");
    let deps = Arc::new(SessionDeps {
        coord: CoordStore::new(),
        settlement: SettlementService::new(ledger.clone()),
        presence: presence.clone() as Arc<dyn PresencePort>,
        history: history.clone() as Arc<dyn RoundHistorySink>,
        draw: Arc::new(FixedDraw(CoinFace::Heads)),
        timing: AppConfig::default_for_env(AppEnv::Test).timing,
    });
    World {
        service: WagerService::new(deps),
        ledger,
        presence,
        history,
        token,
    }
}

fn funded_user(world: &World, balance: u128) -> UserId {
    let user = UserId::new();
    world.ledger.set_balance(user, &world.token, Amount(balance));
    user
}

async fn balance(world: &World, user: UserId) -> Amount {
    world
        .ledger
        .get_balance(user, &world.token)
        .await
        .expect("balance")
}

#[tokio::test]
async fn full_session_lifecycle_with_rematch_and_leave() {
    let w = world();
    let creator = funded_user(&w, 1_000);
    let challenger = funded_user(&w, 1_000);

    let session_id = w
        .service
        .open_session(
            creator,
            GameKind::Simultaneous,
            w.token.clone(),
            Amount(100),
            Odds::EVEN,
        )
        .await
        .expect("open");

    let waiting = w.service.list_waiting_sessions().await;
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].session.id, session_id);

    let handle = w.service.session(session_id).expect("handle");
    handle.request_join(challenger).await.expect("request join");
    handle.accept_join(creator).await.expect("accept join");
    assert!(w.service.list_waiting_sessions().await.is_empty());

    handle
        .submit_move(creator, PlayerMove::Sign(HandSign::Scissors))
        .await
        .expect("creator move");
    let ack = handle
        .submit_move(challenger, PlayerMove::Sign(HandSign::Rock))
        .await
        .expect("challenger move");
    assert_eq!(
        ack,
        MoveAck::Resolved(RoundOutcome::Won {
            winner: challenger,
            by_forfeit: false
        })
    );
    assert_eq!(balance(&w, challenger).await, Amount(1_100));
    assert_eq!(balance(&w, creator).await, Amount(900));

    // both vote, round two starts with the same stakes
    assert!(!handle.request_rematch(challenger).await.expect("vote"));
    assert!(handle.request_rematch(creator).await.expect("vote"));
    let snap = handle.snapshot().await.expect("snapshot");
    assert_eq!(snap.session.status, SessionStatus::InProgress);
    assert_eq!(snap.round_no, Some(2));

    // challenger walks away mid-round: refund, session is advertised again
    handle.leave(challenger).await.expect("leave");
    assert_eq!(balance(&w, challenger).await, Amount(1_000));
    let waiting = w.service.list_waiting_sessions().await;
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].session.challenger, None);

    // creator closes it for good
    handle.leave(creator).await.expect("leave");
    assert!(w.service.list_waiting_sessions().await.is_empty());
    assert!(matches!(
        w.service.session(session_id),
        Err(SessionServiceError::SessionNotFound)
    ));

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(w.history.records_len(), 1);
}

#[tokio::test]
async fn sequential_session_settles_on_the_first_call() {
    let w = world();
    let creator = funded_user(&w, 500);
    let challenger = funded_user(&w, 500);

    let session_id = w
        .service
        .open_session(
            creator,
            GameKind::Sequential,
            w.token.clone(),
            Amount(50),
            Odds::EVEN,
        )
        .await
        .expect("open");
    let handle = w.service.session(session_id).expect("handle");
    handle.request_join(challenger).await.expect("join");
    handle.accept_join(creator).await.expect("accept");

    // server flip is fixed to heads; calling tails loses the round
    let ack = handle
        .submit_move(creator, PlayerMove::Call(CoinFace::Tails))
        .await
        .expect("call");
    assert_eq!(
        ack,
        MoveAck::Resolved(RoundOutcome::Won {
            winner: challenger,
            by_forfeit: false
        })
    );
    assert_eq!(balance(&w, challenger).await, Amount(550));
    assert_eq!(balance(&w, creator).await, Amount(450));
}

#[tokio::test]
async fn open_session_requires_the_creator_stake() {
    let w = world();
    let creator = funded_user(&w, 40);
    let err = w
        .service
        .open_session(
            creator,
            GameKind::Simultaneous,
            w.token.clone(),
            Amount(100),
            Odds::EVEN,
        )
        .await
        .expect_err("open");
    assert!(matches!(err, SessionServiceError::InsufficientBalance));
}

#[tokio::test]
async fn disconnect_withdraws_pending_joins_and_leaves_sessions() {
    let w = world();
    let creator = funded_user(&w, 1_000);
    let challenger = funded_user(&w, 1_000);

    let session_id = w
        .service
        .open_session(
            creator,
            GameKind::Simultaneous,
            w.token.clone(),
            Amount(100),
            Odds::EVEN,
        )
        .await
        .expect("open");
    let handle = w.service.session(session_id).expect("handle");

    // candidate drops before the creator answers: the room frees up
    w.service
        .handle_connect(ConnId("sock-challenger".to_string()), challenger);
    handle.request_join(challenger).await.expect("join");
    w.service
        .handle_disconnect(&ConnId("sock-challenger".to_string()))
        .await;
    let snap = handle.snapshot().await.expect("snapshot");
    assert_eq!(snap.pending_candidate, None);

    // matched creator drops mid-round: refund, seat cleared, session back
    // in matchmaking
    handle.request_join(challenger).await.expect("rejoin");
    handle.accept_join(creator).await.expect("accept");
    w.service
        .handle_connect(ConnId("sock-creator".to_string()), creator);
    w.service
        .handle_disconnect(&ConnId("sock-creator".to_string()))
        .await;

    assert_eq!(balance(&w, creator).await, Amount(1_000));
    assert_eq!(balance(&w, challenger).await, Amount(1_000));
    let snap = handle.snapshot().await.expect("snapshot");
    assert_eq!(snap.session.status, SessionStatus::Waiting);
    assert_eq!(snap.session.challenger, None);

    let events = w.presence.session_events(session_id);
    assert!(events.iter().any(|ev| matches!(
        ev.kind,
        wager_domain::SessionEventKind::PlayerLeft { .. }
    )));
}

#[tokio::test]
async fn a_user_with_two_connections_stays_until_the_last_one_drops() {
    let w = world();
    let creator = funded_user(&w, 1_000);
    let session_id = w
        .service
        .open_session(
            creator,
            GameKind::Simultaneous,
            w.token.clone(),
            Amount(100),
            Odds::EVEN,
        )
        .await
        .expect("open");

    w.service
        .handle_connect(ConnId("tab-1".to_string()), creator);
    w.service
        .handle_connect(ConnId("tab-2".to_string()), creator);

    w.service.handle_disconnect(&ConnId("tab-1".to_string())).await;
    assert!(w.service.session(session_id).is_ok());

    w.service.handle_disconnect(&ConnId("tab-2".to_string())).await;
    assert!(w.service.session(session_id).is_err());
}
