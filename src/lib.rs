// Library crate for the packrally multiplayer coordination layer
// This file exposes the public API for integration tests

pub mod profile;
pub mod room;
pub mod shared;
pub mod store;
pub mod trade;

// Re-export commonly used types for easier access in tests
pub use profile::{InMemoryProfileRepository, ItemStack, ProfileModel, ProfileRepository};
pub use room::{
    rank_roster, GameClock, GameLifecycle, GameMode, PlayerModel, RarityOrder, RoomDirectory,
    RoomModel, RoomStatus, RosterSync, TierList, WinnerArbitration,
};
pub use shared::AppError;
pub use store::{ChangeBus, ChangeEvent, ChangeKind};
pub use trade::{
    OfferReconciler, SettlementEngine, TradeProtocol, TradeRole, TradeSessionModel, TradeStatus,
};
