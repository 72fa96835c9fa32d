pub mod models;
pub mod protocol;
pub mod reconciler;
pub mod repository;
pub mod settlement;

pub use models::{OfferLineModel, TradeRole, TradeSessionModel, TradeStatus};
pub use protocol::{SessionWatch, TradeProtocol};
pub use reconciler::OfferReconciler;
pub use repository::{
    InMemoryOfferRepository, InMemoryTradeRepository, OfferRepository, TradeRepository,
};
pub use settlement::SettlementEngine;
