use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use packrally::profile::{InMemoryProfileRepository, ProfileModel, ProfileRepository};
use packrally::room::{
    start_sweep_task, GameLifecycle, GameMode, InMemoryPlayerRepository, InMemoryRoomRepository,
    PlayerRepository, RoomDirectory, RoomRepository, RosterSync, SweepConfig, TierList,
    WinnerArbitration,
};
use packrally::store::ChangeBus;
use packrally::trade::{
    InMemoryOfferRepository, InMemoryTradeRepository, OfferReconciler, OfferRepository,
    SettlementEngine, TradeProtocol, TradeRepository, TradeRole,
};

/// Scripted two-client session exercising the coordination layer
/// against the in-memory store: room + winner race, then a full trade.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "packrally=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting packrally coordination demo");

    let rooms_bus = ChangeBus::new();
    let players_bus = ChangeBus::new();
    let trades_bus = ChangeBus::new();

    let rooms: Arc<dyn RoomRepository> =
        Arc::new(InMemoryRoomRepository::new(rooms_bus.clone()));
    let players: Arc<dyn PlayerRepository> =
        Arc::new(InMemoryPlayerRepository::new(players_bus.clone()));
    let trades: Arc<dyn TradeRepository> =
        Arc::new(InMemoryTradeRepository::new(trades_bus.clone()));
    let offers: Arc<dyn OfferRepository> = Arc::new(InMemoryOfferRepository::new());
    let profiles: Arc<dyn ProfileRepository> = Arc::new(InMemoryProfileRepository::new());

    // For production with PostgreSQL:
    // let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"))
    //     .await
    //     .expect("Failed to connect to database");
    // let rooms: Arc<dyn RoomRepository> = Arc::new(packrally::room::pg::PgRoomRepository::new(pool.clone()));
    // let players: Arc<dyn PlayerRepository> = Arc::new(packrally::room::pg::PgPlayerRepository::new(pool.clone()));
    // packrally::room::pg::spawn_change_feed(pool, rooms_bus.clone(), players_bus.clone())
    //     .await
    //     .expect("Failed to start change feed");

    for nickname in ["ash", "misty"] {
        profiles
            .upsert_profile(&ProfileModel::new(nickname))
            .await
            .unwrap();
    }
    profiles.grant_items("ash", "Geode", "Rare", 3).await.unwrap();
    profiles.grant_items("misty", "Pearl", "Epic", 1).await.unwrap();

    // Reconciliation sweep for rooms whose host insert never landed.
    tokio::spawn(start_sweep_task(
        rooms.clone(),
        players.clone(),
        SweepConfig::default(),
    ));

    let directory = RoomDirectory::new(rooms.clone(), players.clone());
    let lifecycle = GameLifecycle::new(rooms.clone(), players.clone(), rooms_bus.clone());
    let rarity_order = Arc::new(TierList::new([
        "Common",
        "Uncommon",
        "Rare",
        "Epic",
        "Legendary",
    ]));
    let arbitration = WinnerArbitration::new(rooms.clone(), players.clone(), rarity_order);
    let roster_sync = RosterSync::new(players.clone(), players_bus.clone());

    // Host creates a classic room, a second player joins by pin.
    let created = directory
        .create_room("ash", GameMode::Classic, Some("Rare".to_string()), 5)
        .await
        .unwrap();
    info!(pin = %created.pin_code, "Room is open");

    directory.join_room(&created.pin_code, "misty").await.unwrap();
    let roster = roster_sync.subscribe(&created.room.id).await.unwrap();

    lifecycle.start_game(&created.room.id, "ash").await.unwrap();

    // Both players pull at nearly the same moment; the store CAS picks
    // exactly one winner.
    arbitration
        .report_item(&created.room.id, "misty", "Pearl", "Epic")
        .await
        .unwrap();
    arbitration
        .report_item(&created.room.id, "ash", "Geode", "Rare")
        .await
        .unwrap();

    let room = rooms.get_room(&created.room.id).await.unwrap().unwrap();
    info!(
        winner = %room.winner_nickname.clone().unwrap_or_default(),
        item = %room.winning_item.clone().unwrap_or_default(),
        players = roster.current().len(),
        "Round decided"
    );
    lifecycle.end_game(&created.room.id).await.unwrap();

    // Trade: ash requests, misty sees it come in and accepts.
    let protocol = TradeProtocol::new(trades.clone(), profiles.clone(), trades_bus.clone());
    let settlement = SettlementEngine::new(trades.clone(), offers.clone(), profiles.clone());

    let incoming = protocol.watch_incoming("misty").await.unwrap();
    let session = protocol.initiate_trade_request("ash", "misty").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let request = incoming.current().expect("request should have arrived");
    protocol.accept_trade_request(&request.id).await.unwrap();

    // Both sides build their offers through their serialized queues.
    let ash_offer = OfferReconciler::new(&session.id, "ash", offers.clone());
    ash_offer.add_item("Geode", "Rare");
    ash_offer.add_item("Geode", "Rare");
    ash_offer.remove_item("Geode");
    ash_offer.close().await;

    let misty_offer = OfferReconciler::new(&session.id, "misty", offers.clone());
    misty_offer.add_item("Pearl", "Epic");
    misty_offer.close().await;

    // Both accept; each client independently observes "both accepted"
    // and triggers completion.
    let mut session_watch = protocol.watch_session(&session.id).await.unwrap();
    settlement
        .accept_trade(&session.id, TradeRole::Requester)
        .await
        .unwrap();
    settlement
        .accept_trade(&session.id, TradeRole::Target)
        .await
        .unwrap();

    while !session_watch
        .current()
        .map(|s| s.both_accepted())
        .unwrap_or(false)
    {
        session_watch.changed().await;
    }

    settlement
        .complete_trade(&session.id, TradeRole::Requester)
        .await
        .unwrap();
    settlement
        .complete_trade(&session.id, TradeRole::Target)
        .await
        .unwrap();

    for nickname in ["ash", "misty"] {
        let profile = profiles.get_profile(nickname).await.unwrap().unwrap();
        info!(
            nickname = %nickname,
            successful_trades = profile.successful_trades,
            inventory = ?profile.inventory,
            "Final profile"
        );
    }
}
