pub mod arbitration;
pub mod cleanup;
pub mod directory;
pub mod lifecycle;
pub mod models;
pub mod pg;
pub mod repository;
pub mod roster;

pub use arbitration::{rank_roster, RarityOrder, TierList, WinnerArbitration};
pub use cleanup::{start_sweep_task, sweep_hostless_rooms, SweepConfig};
pub use directory::{CreatedRoom, RoomDirectory};
pub use lifecycle::{CountdownHandle, GameClock, GameLifecycle, RoomWatch};
pub use models::{GameMode, PlayerModel, RoomModel, RoomStatus};
pub use repository::{
    InMemoryPlayerRepository, InMemoryRoomRepository, PlayerRepository, RoomRepository,
};
pub use roster::{RosterHandle, RosterSync};
