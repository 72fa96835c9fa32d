use std::sync::Arc;

use packrally::profile::{InMemoryProfileRepository, ProfileModel, ProfileRepository};
use packrally::room::{
    GameLifecycle, InMemoryPlayerRepository, InMemoryRoomRepository, PlayerModel, RoomDirectory,
    RoomModel, RosterSync, TierList, WinnerArbitration,
};
use packrally::store::ChangeBus;
use packrally::trade::{
    InMemoryOfferRepository, InMemoryTradeRepository, SettlementEngine, TradeProtocol,
    TradeSessionModel,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

/// Fully wired in-memory coordination layer. Tests drive the services
/// the way UI-level callers would, and reach into the repositories to
/// assert on store state.
pub struct TestWorld {
    pub rooms: Arc<InMemoryRoomRepository>,
    pub players: Arc<InMemoryPlayerRepository>,
    pub trades: Arc<InMemoryTradeRepository>,
    pub offers: Arc<InMemoryOfferRepository>,
    pub profiles: Arc<InMemoryProfileRepository>,
    pub directory: RoomDirectory,
    pub lifecycle: GameLifecycle,
    pub arbitration: WinnerArbitration,
    pub roster: RosterSync,
    pub protocol: TradeProtocol,
    pub settlement: SettlementEngine,
}

impl TestWorld {
    pub fn new() -> Self {
        let rooms_bus: ChangeBus<RoomModel> = ChangeBus::new();
        let players_bus: ChangeBus<PlayerModel> = ChangeBus::new();
        let trades_bus: ChangeBus<TradeSessionModel> = ChangeBus::new();

        let rooms = Arc::new(InMemoryRoomRepository::new(rooms_bus.clone()));
        let players = Arc::new(InMemoryPlayerRepository::new(players_bus.clone()));
        let trades = Arc::new(InMemoryTradeRepository::new(trades_bus.clone()));
        let offers = Arc::new(InMemoryOfferRepository::new());
        let profiles = Arc::new(InMemoryProfileRepository::new());

        let rarity_order = Arc::new(TierList::new([
            "Common",
            "Uncommon",
            "Rare",
            "Epic",
            "Legendary",
        ]));

        Self {
            directory: RoomDirectory::new(rooms.clone(), players.clone()),
            lifecycle: GameLifecycle::new(rooms.clone(), players.clone(), rooms_bus.clone()),
            arbitration: WinnerArbitration::new(rooms.clone(), players.clone(), rarity_order),
            roster: RosterSync::new(players.clone(), players_bus.clone()),
            protocol: TradeProtocol::new(trades.clone(), profiles.clone(), trades_bus),
            settlement: SettlementEngine::new(trades.clone(), offers.clone(), profiles.clone()),
            rooms,
            players,
            trades,
            offers,
            profiles,
        }
    }

    /// Registers a profile holding the given (item, rarity, quantity)
    /// stacks.
    pub async fn register_profile(&self, nickname: &str, stacks: &[(&str, &str, u32)]) {
        self.profiles
            .upsert_profile(&ProfileModel::new(nickname))
            .await
            .unwrap();
        for (item_name, item_rarity, quantity) in stacks {
            self.profiles
                .grant_items(nickname, item_name, item_rarity, *quantity)
                .await
                .unwrap();
        }
    }

    pub async fn profile(&self, nickname: &str) -> ProfileModel {
        self.profiles.get_profile(nickname).await.unwrap().unwrap()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
