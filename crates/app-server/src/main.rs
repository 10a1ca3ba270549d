use std::sync::Arc;

use anyhow::Result;
use app_server::wager_service::WagerService;
use coord_store::CoordStore;
use history_store::{NoopRoundHistorySink, RoundHistorySink};
use ledger_store::InMemoryLedger;
use observability::init_tracing;
use platform_core::AppConfig;
use presence::{NoopPresence, PresencePort};
use session_service::SessionDeps;
use settlement::SettlementService;
use tracing::info;
use wager_domain::{Amount, GameKind, HandSign, Odds, PlayerMove, TokenKind, UserId};
use wager_engine::ThreadRngDraw;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.app.service_name, &config.observability.log_filter);

    let ledger = InMemoryLedger::new();
    let token = TokenKind::new("points");
    let creator = UserId::new();
    let challenger = UserId::new();
    ledger.set_balance(creator, &token, Amount(1_000));
    ledger.set_balance(challenger, &token, Amount(1_000));

    let deps = Arc::new(SessionDeps {
        coord: CoordStore::new(),
        settlement: SettlementService::new(ledger),
        presence: Arc::new(NoopPresence) as Arc<dyn PresencePort>,
        history: Arc::new(NoopRoundHistorySink) as Arc<dyn RoundHistorySink>,
        draw: Arc::new(ThreadRngDraw),
        timing: config.timing.clone(),
    });
    let service = WagerService::new(deps);

    let session_id = service
        .open_session(
            creator,
            GameKind::Simultaneous,
            token,
            Amount(100),
            Odds::EVEN,
        )
        .await?;
    let waiting = service.list_waiting_sessions().await.len();
    let handle = service.session(session_id)?;
    handle.request_join(challenger).await?;
    handle.accept_join(creator).await?;
    let first = handle
        .submit_move(creator, PlayerMove::Sign(HandSign::Rock))
        .await?;
    let second = handle
        .submit_move(challenger, PlayerMove::Sign(HandSign::Scissors))
        .await?;
    let snapshot = handle.snapshot().await?;

    info!(
        session_id = %session_id,
        waiting_before_match = waiting,
        first_ack = ?first,
        second_ack = ?second,
        status = ?snapshot.session.status,
        "demo session flow executed"
    );
    info!("wager-server bootstrap complete");
    Ok(())
}
